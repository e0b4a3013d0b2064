//! Replication-based repair (§4.B).
//!
//! `replicate` opens the source read-only (with LMDB's `NOTLS` flag, so the
//! same OS thread can safely hold both the read transaction on the source
//! and the write transaction on the destination without LMDB's
//! thread-local-transaction tracking getting confused), opens an empty
//! destination, copies every key/value pair in iteration order, and
//! commits. It runs in a forked child so a hard abort inside the backend's
//! assertion channel can't bring down the parent process; the parent waits
//! on the child and classifies its exit status.

use super::Error;
use heed::types::Bytes;
use heed::{Database, EnvFlags, EnvOpenOptions};
use std::path::Path;

/// Exit status classification for a replication child (§4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationStatus {
    Ok,
    CorruptPage,
    Unknown,
}

const EXIT_OK: i32 = 0;
const EXIT_CORRUPT_PAGE: i32 = 101;
const EXIT_UNKNOWN: i32 = 102;

/// Copy every record from `src_path` into a fresh environment at
/// `dst_path`, in a forked child process. Any `*-lock` side file the
/// backend leaves behind at `src_path` is unlinked by the caller, per
/// §4.B.
pub fn replicate(src_path: &Path, dst_path: &Path) -> Result<ReplicationStatus, Error> {
    let status = fork_and_replicate(src_path, dst_path)?;
    unlink_lock_side_file(src_path);
    Ok(status)
}

fn unlink_lock_side_file(path: &Path) {
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        let lock_file = path.with_file_name(format!("{name}-lock"));
        let _ = std::fs::remove_file(lock_file);
    }
}

#[cfg(unix)]
fn fork_and_replicate(src_path: &Path, dst_path: &Path) -> Result<ReplicationStatus, Error> {
    // SAFETY: the child immediately calls `do_replicate_child_body`, which
    // only touches on-disk files and process-local memory, then exits via
    // `std::process::exit` without returning through unwinding machinery
    // shared with the parent.
    let pid = unsafe { libc::fork() };
    match pid {
        -1 => Err(Error::Io("fork failed".into())),
        0 => {
            let code = match do_replicate(src_path, dst_path) {
                Ok(()) => EXIT_OK,
                Err(Error::Corrupt { .. }) => EXIT_CORRUPT_PAGE,
                Err(_) => EXIT_UNKNOWN,
            };
            std::process::exit(code);
        }
        child_pid => {
            let mut wstatus: i32 = 0;
            // SAFETY: `child_pid` was just returned by `fork` above and has
            // not been waited on by anyone else.
            let waited = unsafe { libc::waitpid(child_pid, &mut wstatus, 0) };
            if waited == -1 {
                return Err(Error::Io("waitpid failed".into()));
            }
            // SAFETY: `wstatus` was populated by the `waitpid` call above.
            if unsafe { libc::WIFEXITED(wstatus) } {
                // SAFETY: WIFEXITED(wstatus) was just confirmed true.
                match unsafe { libc::WEXITSTATUS(wstatus) } {
                    EXIT_OK => Ok(ReplicationStatus::Ok),
                    EXIT_CORRUPT_PAGE => Ok(ReplicationStatus::CorruptPage),
                    _ => Ok(ReplicationStatus::Unknown),
                }
            } else {
                // Killed by a signal (e.g. SIGABRT from the backend's
                // assertion channel on a hard corruption abort).
                Ok(ReplicationStatus::Unknown)
            }
        }
    }
}

#[cfg(not(unix))]
fn fork_and_replicate(src_path: &Path, dst_path: &Path) -> Result<ReplicationStatus, Error> {
    // No `fork` on this platform; run in-process. Loses the isolation
    // guarantee but preserves the status classification.
    match do_replicate(src_path, dst_path) {
        Ok(()) => Ok(ReplicationStatus::Ok),
        Err(Error::Corrupt { .. }) => Ok(ReplicationStatus::CorruptPage),
        Err(_) => Ok(ReplicationStatus::Unknown),
    }
}

fn do_replicate(src_path: &Path, dst_path: &Path) -> Result<(), Error> {
    // SAFETY: read-only open of a source we don't hold any other
    // transaction against in this process.
    let src_env = unsafe {
        EnvOpenOptions::new()
            .flags(EnvFlags::NO_TLS | EnvFlags::READ_ONLY)
            .max_dbs(1)
            .open(src_path)
            .map_err(heed::Error::from)?
    };
    let src_rtxn = src_env.read_txn().map_err(heed::Error::from)?;
    let src_db: Database<Bytes, Bytes> = src_env
        .open_database(&src_rtxn, Some("main"))
        .map_err(heed::Error::from)?
        .ok_or_else(|| Error::Backend("source database missing".into()))?;

    std::fs::create_dir_all(dst_path).map_err(|e| Error::Io(e.to_string()))?;
    // SAFETY: `dst_path` is a freshly created, empty directory this
    // function exclusively controls.
    let dst_env = unsafe {
        EnvOpenOptions::new()
            .map_size(1024 * 1024 * 1024)
            .max_dbs(1)
            .open(dst_path)
            .map_err(heed::Error::from)?
    };
    let mut dst_wtxn = dst_env.write_txn().map_err(heed::Error::from)?;
    let dst_db: Database<Bytes, Bytes> = dst_env
        .create_database(&mut dst_wtxn, Some("main"))
        .map_err(heed::Error::from)?;

    for item in src_db.iter(&src_rtxn).map_err(heed::Error::from)? {
        let (k, v) = item.map_err(heed::Error::from)?;
        dst_db.put(&mut dst_wtxn, k, v).map_err(heed::Error::from)?;
    }

    dst_wtxn.commit().map_err(heed::Error::from)?;
    Ok(())
}
