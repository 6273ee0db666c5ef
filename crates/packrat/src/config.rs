//! Store configuration.

use std::path::PathBuf;

/// Default worker pool size for transaction commits.
pub const DEFAULT_TRANSACTION_PARALLELISM: usize = 4;

/// Default number of in-flight packet loads per query.
pub const DEFAULT_QUERY_PARALLELISM: usize = 4;

/// Default root directory for all tables, relative to the working directory.
pub const DEFAULT_DATABASE_PATH: &str = "./var/data";

/// Durability mode for packet writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    /// Overwrite packet files in place. Fastest; a crash mid-write can leave
    /// a torn packet (default).
    #[default]
    Buffered,
    /// Write to a temporary file, fsync, then atomically rename over the
    /// target. A crash leaves either the old or the new packet, never a mix.
    Atomic,
}

/// Configuration for a [`Store`](crate::store::Store).
///
/// All options have sensible defaults; a zero-configuration store works out
/// of the box:
///
/// ```rust,ignore
/// let store = Store::open(StoreConfig::default())?;
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Worker pool size used when committing a transaction.
    ///
    /// Each worker processes one packet at a time. Default: 4.
    pub transaction_parallelism: usize,

    /// Maximum number of packet loads in flight for a single query.
    ///
    /// Default: 4.
    pub query_parallelism: usize,

    /// Root directory under which every table's index trees live.
    ///
    /// Default: `./var/data`.
    pub database_path: PathBuf,

    /// Durability mode for packet writes. Default: [`Durability::Buffered`].
    pub durability: Durability,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            transaction_parallelism: DEFAULT_TRANSACTION_PARALLELISM,
            query_parallelism: DEFAULT_QUERY_PARALLELISM,
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            durability: Durability::default(),
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with a custom commit worker pool size.
    pub fn with_transaction_parallelism(mut self, parallelism: usize) -> Self {
        self.transaction_parallelism = parallelism;
        self
    }

    /// Creates a configuration with a custom in-flight query load limit.
    pub fn with_query_parallelism(mut self, parallelism: usize) -> Self {
        self.query_parallelism = parallelism;
        self
    }

    /// Creates a configuration rooted at a custom database directory.
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    /// Creates a configuration with a custom durability mode.
    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }
}
