//! Exclusive migration lock
//!
//! The runner holds this lock across "read marker, apply steps, write marker"
//! so two runners can never interleave. Acquisition polls the backend's
//! non-blocking `try_lock` every [`POLL_INTERVAL`] until the timeout elapses.

use crate::backend::Backend;
use crate::migration::error::RunnerError;
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use crate::observability::tracing_helpers;

/// Delay between lock attempts
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lock guard that releases the migration lock when dropped
pub struct MigrationLockGuard<'a> {
    backend: &'a dyn Backend,
}

impl<'a> MigrationLockGuard<'a> {
    /// Acquire the migration lock, waiting up to `timeout`
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::ConcurrentMigration` if the lock is still held by
    /// someone else when `timeout` elapses.
    pub fn acquire(backend: &'a dyn Backend, timeout: Duration) -> Result<Self, RunnerError> {
        acquire_migration_lock(backend, timeout)?;
        Ok(Self { backend })
    }
}

impl Drop for MigrationLockGuard<'_> {
    fn drop(&mut self) {
        match self.backend.unlock() {
            Ok(()) => log::debug!("migration lock released"),
            Err(e) => log::error!("failed to release migration lock: {e}"),
        }
    }
}

/// Poll `try_lock` until it succeeds or `timeout` elapses
///
/// At least one attempt is always made, so a zero timeout means "do not wait".
pub fn acquire_migration_lock(backend: &dyn Backend, timeout: Duration) -> Result<(), RunnerError> {
    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::lock_span(timeout.as_millis()).entered();

    let start = Instant::now();
    loop {
        if backend.try_lock()? {
            log::info!("migration lock acquired after {:?}", start.elapsed());
            return Ok(());
        }

        let waited = start.elapsed();
        if waited >= timeout {
            return Err(RunnerError::ConcurrentMigration { waited });
        }

        log::debug!("migration lock held elsewhere, retrying in {POLL_INTERVAL:?}");
        pause(POLL_INTERVAL.min(timeout - waited));
    }
}

/// Sleep without blocking the worker thread when running inside a coroutine
fn pause(duration: Duration) {
    if may::coroutine::is_coroutine() {
        may::coroutine::sleep(duration);
    } else {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[test]
    fn test_guard_releases_on_drop() {
        let backend = MemoryBackend::new();
        {
            let _guard = MigrationLockGuard::acquire(&backend, Duration::ZERO).unwrap();
            assert!(backend.is_locked());
        }
        assert!(!backend.is_locked());
    }

    #[test]
    fn test_times_out_when_held_elsewhere() {
        let holder = MemoryBackend::new();
        let other = holder.connect();
        assert!(holder.try_lock().unwrap());

        let start = Instant::now();
        let err = MigrationLockGuard::acquire(&other, Duration::from_millis(250))
            .err()
            .unwrap();
        assert!(matches!(err, RunnerError::ConcurrentMigration { .. }));
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert!(holder.is_locked());
    }
}
