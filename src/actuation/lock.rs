//! Promise locking (§3 Lock record, §4.H steps 2-3, 5): a single
//! well-known global lock (e.g. the packages lock) plus per-promise locks
//! honoring `ifelapsed`/`expireafter`, persisted in the locks KV database
//! (§6 `state/cf_lock.lmdb`) so locks survive across separate agent runs.
//!
//! Grounded on `dashflow/src/adaptive_timeout.rs`'s per-node bookkeeping
//! shape (a small record keyed by node identity, read-modify-write each
//! invocation) generalized from "record latency for percentile timeout
//! tuning" to "record acquisition time for interval-based lock reuse."

use crate::kv::backend::Handle;
use crate::kv::Error as KvError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Locking errors (§4.H).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Kv(#[from] KvError),

    #[error("lock record for {handle} is corrupt")]
    MalformedRecord { handle: String },
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> crate::error::ErrorKind {
        crate::error::ErrorKind::Resource
    }
}

/// Persisted lock state (§3 Lock record).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct LockRecord {
    acquired_at: u64,
    expires_at: u64,
    holder_pid: u32,
    /// Hashed/truncated host identity; full hostnames aren't needed for
    /// staleness decisions, only presence.
    holder_host_hash: u64,
    held: bool,
}

/// The handle-string key a caller derives for a concrete promise: `"<type>
/// -<promiser>-<module>"` (§4.H step 3).
#[must_use]
pub fn lock_handle_string(promise_type: &str, promiser: &str, module: &str) -> String {
    format!("{promise_type}-{promiser}-{module}")
}

/// The single well-known key serializing package-promise evaluation across
/// the process (§3 "global packages lock").
pub const GLOBAL_PACKAGES_LOCK: &str = "global-packages-lock";

fn record_key(handle_str: &str) -> Vec<u8> {
    format!("lock:{handle_str}").into_bytes()
}

fn read_record(db: &Handle, handle_str: &str) -> Result<Option<LockRecord>, Error> {
    match db.read(&record_key(handle_str))? {
        Some(bytes) => bincode::deserialize(&bytes)
            .map(Some)
            .map_err(|_| Error::MalformedRecord { handle: handle_str.to_string() }),
        None => Ok(None),
    }
}

fn write_record(db: &Handle, handle_str: &str, record: LockRecord) -> Result<(), Error> {
    let encoded =
        bincode::serialize(&record).map_err(|_| Error::MalformedRecord { handle: handle_str.to_string() })?;
    db.write(&record_key(handle_str), &encoded)?;
    Ok(())
}

/// An acquired lock; releases on drop (§5: "released on every exit path
/// including exceptional termination").
pub struct LockGuard<'db> {
    db: &'db Handle,
    handle_str: String,
    released: bool,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Ok(Some(mut record)) = read_record(self.db, &self.handle_str) {
            record.held = false;
            let _ = write_record(self.db, &self.handle_str, record);
        }
    }
}

impl LockGuard<'_> {
    /// Release explicitly. Equivalent to dropping, but lets callers observe
    /// the result.
    pub fn release(mut self) -> Result<(), Error> {
        if let Some(mut record) = read_record(self.db, &self.handle_str)? {
            record.held = false;
            write_record(self.db, &self.handle_str, record)?;
        }
        self.released = true;
        Ok(())
    }
}

/// Attempt to acquire the per-promise lock named `handle_str` (§4.H step
/// 3).
///
/// - If a lock record exists and is currently held but stale (now past
///   `expires_at`, i.e. `expireafter` has elapsed since acquisition), it is
///   broken and reacquired.
/// - If a lock record exists, is not held, and `ifelapsed` seconds have not
///   yet elapsed since it was last acquired, acquisition fails (the caller
///   should record `Skipped`).
/// - Otherwise the lock is acquired fresh.
pub fn try_acquire<'db>(
    db: &'db Handle,
    handle_str: &str,
    now: u64,
    ifelapsed: Duration,
    expireafter: Duration,
    holder_pid: u32,
    holder_host_hash: u64,
) -> Result<Option<LockGuard<'db>>, Error> {
    if let Some(existing) = read_record(db, handle_str)? {
        if existing.held {
            if now < existing.expires_at {
                return Ok(None);
            }
            tracing::warn!(handle = handle_str, "breaking stale lock past expireafter");
        } else if now.saturating_sub(existing.acquired_at) < ifelapsed.as_secs() {
            return Ok(None);
        }
    }

    let record = LockRecord {
        acquired_at: now,
        expires_at: now + expireafter.as_secs(),
        holder_pid,
        holder_host_hash,
        held: true,
    };
    write_record(db, handle_str, record)?;
    Ok(Some(LockGuard { db, handle_str: handle_str.to_string(), released: false }))
}

/// Acquire the global lock for a promise type (§4.H step 2), spinning for a
/// short bounded period before giving up. A failure here means the caller
/// records `Skipped`, never blocks indefinitely (§5).
pub fn try_acquire_global<'db>(
    db: &'db Handle,
    key: &str,
    now: u64,
    max_hold: Duration,
    holder_pid: u32,
    holder_host_hash: u64,
    retries: u32,
    retry_delay: Duration,
) -> Result<Option<LockGuard<'db>>, Error> {
    for attempt in 0..=retries {
        if let Some(guard) =
            try_acquire(db, key, now, Duration::ZERO, max_hold, holder_pid, holder_host_hash)?
        {
            return Ok(Some(guard));
        }
        if attempt < retries {
            std::thread::sleep(retry_delay);
        }
    }
    Ok(None)
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{DbName, OpenOutcome, Store};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn open_locks_db() -> (tempfile::TempDir, Arc<Handle>) {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        let handle = match store.open(DbName::Locks).unwrap() {
            OpenOutcome::Open(h) => h,
            OpenOutcome::Broken => panic!("locks db reported broken on fresh open"),
        };
        (dir, handle)
    }

    #[test]
    fn second_acquisition_before_ifelapsed_is_skipped() {
        let (_dir, db) = open_locks_db();
        let handle_str = lock_handle_string("files", "/etc/hosts", "editfile");

        let guard = try_acquire(&db, &handle_str, 0, Duration::from_secs(60), Duration::from_secs(600), 1, 1)
            .unwrap()
            .unwrap();
        guard.release().unwrap();

        // Scenario S6: immediately requesting again records Skipped.
        let second = try_acquire(&db, &handle_str, 1, Duration::from_secs(60), Duration::from_secs(600), 1, 1).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn acquisition_after_ifelapsed_elapses_succeeds() {
        let (_dir, db) = open_locks_db();
        let handle_str = lock_handle_string("files", "/etc/hosts", "editfile");

        let guard = try_acquire(&db, &handle_str, 0, Duration::from_secs(60), Duration::from_secs(600), 1, 1)
            .unwrap()
            .unwrap();
        guard.release().unwrap();

        // Scenario S6: after advancing the logical clock by 61s, acquisition succeeds.
        let third = try_acquire(&db, &handle_str, 61, Duration::from_secs(60), Duration::from_secs(600), 1, 1).unwrap();
        assert!(third.is_some());
    }

    #[test]
    fn stale_lock_past_expireafter_is_broken_and_reacquired() {
        let (_dir, db) = open_locks_db();
        let handle_str = lock_handle_string("packages", "nginx", "apt");

        let guard = try_acquire(&db, &handle_str, 0, Duration::ZERO, Duration::from_secs(100), 1, 1).unwrap().unwrap();
        std::mem::forget(guard); // simulate a crash: never released

        let reacquired = try_acquire(&db, &handle_str, 101, Duration::ZERO, Duration::from_secs(100), 2, 2).unwrap();
        assert!(reacquired.is_some());
    }

    #[test]
    fn lock_still_within_expireafter_is_not_reacquired() {
        let (_dir, db) = open_locks_db();
        let handle_str = lock_handle_string("packages", "nginx", "apt");

        let guard = try_acquire(&db, &handle_str, 0, Duration::ZERO, Duration::from_secs(100), 1, 1).unwrap().unwrap();
        std::mem::forget(guard);

        let attempt = try_acquire(&db, &handle_str, 50, Duration::ZERO, Duration::from_secs(100), 2, 2).unwrap();
        assert!(attempt.is_none());
    }

    #[test]
    fn dropping_a_guard_releases_it() {
        let (_dir, db) = open_locks_db();
        let handle_str = GLOBAL_PACKAGES_LOCK.to_string();

        {
            let _guard =
                try_acquire(&db, &handle_str, 0, Duration::ZERO, Duration::from_secs(600), 1, 1).unwrap().unwrap();
        }

        let reacquired = try_acquire(&db, &handle_str, 1, Duration::ZERO, Duration::from_secs(600), 2, 2).unwrap();
        assert!(reacquired.is_some());
    }
}
