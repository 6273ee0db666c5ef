//! Store and table handles: the embedding surface of the engine.
//!
//! A [`Store`] is little more than a validated configuration rooted at a
//! database directory; tables spring into existence when first written. A
//! [`Table`] handle ties a [`Record`] type to the store and hands out
//! transactions and query cursors.

use crate::config::StoreConfig;
use crate::error::{IoPhase, Result, StoreError};
use crate::packet::PACKET_EXTENSION;
use crate::query::{Cursor, Query, QueryPlan};
use crate::schema::Record;
use crate::txn::Transaction;
use std::fs;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::Path;
use tracing::debug;

/// An embedded packet store rooted at a database directory.
pub struct Store {
    config: StoreConfig,
}

impl Store {
    /// Opens (and creates, if needed) the store's root directory.
    pub fn open(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.database_path)
            .map_err(|e| StoreError::io(IoPhase::CreateDir, &config.database_path, e))?;
        debug!(path = %config.database_path.display(), "opened store");
        Ok(Self { config })
    }

    /// The store's configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// A handle on the table the record type belongs to.
    pub fn table<R: Record>(&self) -> Table<R> {
        Table {
            config: self.config.clone(),
            _record: PhantomData,
        }
    }
}

/// A typed handle on one table of a [`Store`].
pub struct Table<R: Record> {
    config: StoreConfig,
    _record: PhantomData<R>,
}

impl<R: Record> Table<R> {
    /// Starts an empty transaction against this table.
    pub fn begin(&self) -> Transaction<R> {
        Transaction::new(self.config.clone())
    }

    /// An empty query over this table.
    pub fn query(&self) -> Query<R> {
        Query::new()
    }

    /// Plans and starts executing a query, returning its record cursor.
    pub fn fetch(&self, query: Query<R>) -> Result<Cursor<R>> {
        let plan = QueryPlan::build(query)?;
        Cursor::new(plan, &self.config)
    }

    /// Plans a query and renders the plan, without executing it.
    pub fn explain(&self, query: Query<R>) -> Result<String> {
        Ok(QueryPlan::build(query)?.describe())
    }

    /// Sweeps the table's index trees and reports per-index packet counts
    /// and byte totals. Reads directory metadata only; no packet is loaded.
    pub fn stats(&self) -> Result<TableStats> {
        let schema = R::schema();
        let mut indexes = Vec::with_capacity(schema.indexes().len());
        for index in schema.indexes() {
            let root = self
                .config
                .database_path
                .join(schema.name())
                .join(index.name());
            let mut stats = IndexStats {
                index: index.name().to_string(),
                packet_count: 0,
                total_bytes: 0,
            };
            sweep(&root, &mut stats)?;
            indexes.push(stats);
        }
        Ok(TableStats { indexes })
    }
}

/// Statistics for one table, one entry per index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStats {
    /// Per-index statistics, in index declaration order.
    pub indexes: Vec<IndexStats>,
}

/// Statistics for one index tree of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    /// The index's name.
    pub index: String,
    /// Number of packet files under the index.
    pub packet_count: u64,
    /// Total compressed size of those packets, in bytes.
    pub total_bytes: u64,
}

fn sweep(dir: &Path, stats: &mut IndexStats) -> Result<()> {
    let reader = match fs::read_dir(dir) {
        Ok(reader) => reader,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StoreError::io(IoPhase::List, dir, e)),
    };
    for entry in reader {
        let entry = entry.map_err(|e| StoreError::io(IoPhase::List, dir, e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| StoreError::io(IoPhase::List, entry.path(), e))?;
        if file_type.is_dir() {
            sweep(&entry.path(), stats)?;
        } else if entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(&format!(".{PACKET_EXTENSION}")))
        {
            let meta = entry
                .metadata()
                .map_err(|e| StoreError::io(IoPhase::List, entry.path(), e))?;
            stats.packet_count += 1;
            stats.total_bytes += meta.len();
        }
    }
    Ok(())
}
