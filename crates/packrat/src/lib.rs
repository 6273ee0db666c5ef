//! Packrat - Embedded columnar packet store
//!
//! This crate provides an embedded, zero-configuration, append-and-upsert
//! storage engine for ETL-style workloads such as time-series metrics.
//! Records belong to a schema-defined table; each table declares one or more
//! indexes, and the engine materializes the table's contents independently
//! under each index as a directory tree of compressed tab-separated
//! *packets*. A packet is the smallest unit of read, write, and locking;
//! the directory tree is the catalog.
//!
//! # Components
//!
//! - [`TableSchema`] / [`Record`]: column, unique-key and index declarations
//! - [`Store`] / [`Table`]: the embedding surface
//! - [`Transaction`]: batched upserts, removes, bulk deletes and updates,
//!   committed per packet in parallel
//! - [`Query`] / [`Cursor`]: planned, index-ordered record streams with
//!   bookmark-based paging
//!
//! # Example
//!
//! ```rust,ignore
//! use packrat::{PathFilter, Store, StoreConfig};
//!
//! let store = Store::open(StoreConfig::default())?;
//! let table = store.table::<Metric>();
//!
//! let mut txn = table.begin();
//! txn.add(Metric::new("2020-01-02", "a11", "ad1", 100));
//! txn.commit()?;
//!
//! let mut cursor = table.fetch(
//!     table
//!         .query()
//!         .filter("account", PathFilter::equals("a11"))
//!         .order_by_asc("date")
//!         .with_limit(12),
//! )?;
//! while let Some(metric) = cursor.fetch_next()? {
//!     println!("{metric:?}");
//! }
//! let next_page = cursor.bookmark()?.encode();
//! ```
//!
//! # Consistency
//!
//! Each record is stored redundantly once per index. Commits take the packet
//! lock per packet but provide no cross-packet atomicity: a concurrent
//! reader may observe some indexes updated before others, and a failed
//! commit may leave indexes diverged (read-uncommitted). The redundancy
//! across indexes is the durability mechanism, not a consistency mechanism.

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod filter;
pub mod fname;
pub mod lock;
pub mod packet;
pub mod pool;
pub mod query;
pub mod schema;
pub mod store;
pub mod txn;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{Durability, StoreConfig};
pub use error::{IoPhase, Result, StoreError};
pub use filter::{FlexFilter, IndexFilter, PathFilter, SortOrder};
pub use query::{Bookmark, Cursor, IndexPriority, Query, QueryPlan};
pub use schema::{Column, ColumnType, Index, Record, TableSchema, TableSchemaBuilder, Value};
pub use store::{IndexStats, Store, Table, TableStats};
pub use txn::{Transaction, UpdateHook, Updater};
