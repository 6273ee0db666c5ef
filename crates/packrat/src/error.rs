//! Error and Result types for packrat storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A convenience `Result` type for packrat operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// The filesystem phase during which an I/O error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoPhase {
    /// Creating a packet's parent directories.
    CreateDir,
    /// Reading a packet file into memory.
    Read,
    /// Writing a packet file.
    Write,
    /// Flushing written bytes to the physical device.
    Sync,
    /// Deleting a packet file.
    Delete,
    /// Renaming a temporary packet file over its target.
    Rename,
    /// Listing a directory during an index tree walk.
    List,
}

impl std::fmt::Display for IoPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self {
            IoPhase::CreateDir => "create-dir",
            IoPhase::Read => "read",
            IoPhase::Write => "write",
            IoPhase::Sync => "sync",
            IoPhase::Delete => "delete",
            IoPhase::Rename => "rename",
            IoPhase::List => "list",
        };
        write!(f, "{phase}")
    }
}

/// The error type for storage engine operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Table schema failed validation at initialization.
    #[error("invalid schema: {0}")]
    SchemaInvalid(String),

    /// A filesystem operation failed.
    #[error("{phase} failed for {}: {source}", .path.display())]
    Io {
        /// The phase the operation was in.
        phase: IoPhase,
        /// Absolute path of the file or directory involved.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// A packet file holds data that does not match its own header.
    #[error("corrupt packet {} at line {line}: {reason}", .path.display())]
    PacketCorrupt {
        /// Path of the offending packet file.
        path: PathBuf,
        /// 1-based line number of the offending row (0 if not row-specific).
        line: usize,
        /// What was wrong with the data.
        reason: String,
    },

    /// A durable save committed the temporary file but could not swap it in.
    ///
    /// The data is safe in the temporary file; the host must move it over the
    /// target path before the packet is touched again.
    #[error(
        "packet swap failed after data was committed to {}; \
         recover by moving {} over {}: {source}",
        .tmp.display(),
        .tmp.display(),
        .path.display()
    )]
    RecoveryRequired {
        /// Temporary file holding the committed data.
        tmp: PathBuf,
        /// Final path the data belongs at.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// An update hook or bulk updater changed indexed columns.
    #[error("illegal update on table {table}: {reason}")]
    IllegalUpdate {
        /// Name of the table the update targeted.
        table: String,
        /// Which invariant the update violated.
        reason: String,
    },

    /// The requested sort order cannot be produced by any path through the
    /// chosen index.
    #[error("cannot satisfy sort on {directive}; admissible sort prefixes: {admissible}")]
    QueryInfeasible {
        /// The first sort directive that cannot be honored.
        directive: String,
        /// Sort prefixes that would be accepted, one per declared index.
        admissible: String,
    },

    /// A paging bookmark could not be decoded or no longer matches the data.
    #[error("invalid bookmark: {0}")]
    InvalidBookmark(String),

    /// The operation was skipped because an earlier worker in the same
    /// commit or query failed.
    #[error("aborted after an earlier worker failed")]
    Aborted,
}

impl StoreError {
    /// Wraps an [`io::Error`] with the phase and path it occurred at.
    pub fn io(phase: IoPhase, path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            phase,
            path: path.into(),
            source,
        }
    }
}
