//! Bounded worker fan-out for commit phases.
//!
//! Commit phases hand a batch of per-packet jobs to a fixed number of
//! workers. Workers drain a shared queue; once any worker records a failure
//! the remaining jobs are skipped (they report [`StoreError::Aborted`]
//! internally), the pool drains fully, and the first real error is
//! re-surfaced to the caller. No worker's error silently disappears.

use crate::error::{Result, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use tracing::debug;

/// Runs `jobs` on up to `parallelism` workers and returns the first error.
pub fn run_parallel<J, F>(parallelism: usize, jobs: Vec<J>, worker: F) -> Result<()>
where
    J: Send,
    F: Fn(J) -> Result<()> + Send + Sync,
{
    if jobs.is_empty() {
        return Ok(());
    }
    let workers = parallelism.clamp(1, jobs.len());
    let job_count = jobs.len();

    let (tx, rx) = crossbeam_channel::bounded(job_count);
    for job in jobs {
        // The channel holds the whole batch, so sends cannot block or fail.
        let _ = tx.send(job);
    }
    drop(tx);

    let failed = AtomicBool::new(false);
    let first_error: Mutex<Option<StoreError>> = Mutex::new(None);
    let skipped = AtomicBool::new(false);

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                while let Ok(job) = rx.recv() {
                    let result = if failed.load(Ordering::Acquire) {
                        Err(StoreError::Aborted)
                    } else {
                        worker(job)
                    };
                    match result {
                        Ok(()) => {}
                        Err(StoreError::Aborted) => {
                            skipped.store(true, Ordering::Relaxed);
                        }
                        Err(e) => {
                            failed.store(true, Ordering::Release);
                            let mut slot = first_error.lock().unwrap();
                            if slot.is_none() {
                                *slot = Some(e);
                            }
                        }
                    }
                }
            });
        }
    });

    if skipped.load(Ordering::Relaxed) {
        debug!(jobs = job_count, "jobs aborted after an earlier failure");
    }
    match first_error.into_inner().unwrap() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
