//! Process-wide striped locks for packet files.
//!
//! Every packet file operation (read or write) must happen under the
//! packet's lock. Per-packet mutexes would be unbounded and a single global
//! lock would serialize everything, so the table stripes a fixed array of
//! mutexes and hashes the packet path onto one of them.
//!
//! Nested acquisition is forbidden: striping gives no lock ordering, so a
//! worker holding one packet's guard must drop it before acquiring another.

use parking_lot::{Mutex, MutexGuard};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::OnceLock;

/// Number of stripes in the lock table.
///
/// Large enough that collisions are rare at the configured parallelism.
pub const LOCK_BUCKETS: usize = 4096;

static GLOBAL: OnceLock<LockTable> = OnceLock::new();

/// Striped mutexes keyed by packet path.
pub struct LockTable {
    buckets: Box<[Mutex<()>]>,
}

/// Exclusive hold on one packet's stripe; released on drop.
pub struct PacketGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl LockTable {
    fn new() -> Self {
        let buckets = (0..LOCK_BUCKETS).map(|_| Mutex::new(())).collect();
        Self { buckets }
    }

    /// The process-wide lock table shared by every store in this process.
    pub fn global() -> &'static LockTable {
        GLOBAL.get_or_init(LockTable::new)
    }

    fn bucket(&self, path: &Path) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        &self.buckets[hasher.finish() as usize % LOCK_BUCKETS]
    }

    /// Acquires the stripe for `path`, blocking until it is available.
    pub fn lock(&self, path: &Path) -> PacketGuard<'_> {
        PacketGuard {
            _guard: self.bucket(path).lock(),
        }
    }

    /// Attempts to acquire the stripe for `path` without blocking.
    ///
    /// Cooperative workers that must not block call this in their own retry
    /// loop, yielding between attempts.
    pub fn try_lock(&self, path: &Path) -> Option<PacketGuard<'_>> {
        self.bucket(path)
            .try_lock()
            .map(|guard| PacketGuard { _guard: guard })
    }
}
