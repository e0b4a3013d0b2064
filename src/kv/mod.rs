//! The pluggable embedded key-value store (§4.B).
//!
//! We implement the MVCC-capable backend with `heed` (safe bindings to
//! LMDB) and emulate the non-MVCC backend's serialization discipline with a
//! `parking_lot::Mutex` guarding each handle's write path — the choice
//! SPEC_FULL.md §4 records for the source's stated Open Question. Every
//! database name in [`DbName`] gets its own LMDB environment file under
//! `state/`, matching §6's one-file-per-handle layout.
//!
//! Corruption handling follows `dashflow::checkpoint`'s integrity-header
//! pattern (magic bytes + CRC32 + declared length) generalized from a
//! single checkpoint blob to a whole environment: [`diagnose`] inspects a
//! path for the LMDB equivalent of those failure modes, and [`open`]
//! attempts [`replicate`]-based repair exactly once before giving up.

pub mod backend;
pub mod cursor;
pub mod migration;
pub mod replicate;

pub use backend::Handle;
pub use cursor::Cursor;
pub use migration::{merge_legacy_checksums_and_filestats, SchemaMigration};
pub use replicate::{replicate, ReplicationStatus};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// The fixed enumeration of database names (§3 KV database handle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbName {
    Lastseen,
    Checksums,
    Locks,
    State,
    Observations,
    Filestats,
    Performance,
    Measurements,
}

impl DbName {
    /// File name under `state/`, with the backend's fixed extension.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            DbName::Lastseen => "cf_lastseen.lmdb",
            DbName::Checksums => "cf_checksums.lmdb",
            DbName::Locks => "cf_lock.lmdb",
            DbName::State => "cf_state.lmdb",
            DbName::Observations => "cf_observations.lmdb",
            DbName::Filestats => "cf_filestats.lmdb",
            DbName::Performance => "cf_performance.lmdb",
            DbName::Measurements => "cf_measurements.lmdb",
        }
    }
}

/// KV store errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The backend reported structural corruption that survived one repair
    /// attempt; the caller should delete and recreate the database.
    #[error("database at {path} is corrupt and could not be repaired")]
    Corrupt { path: PathBuf },

    /// A second cursor was requested on a handle that already has one open.
    #[error("handle already has an open cursor")]
    CursorAlreadyOpen,

    /// Underlying LMDB/heed failure that isn't itself corruption.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// I/O failure opening or manipulating environment files.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<heed::Error> for Error {
    fn from(e: heed::Error) -> Self {
        if is_corruption(&e) {
            Error::Corrupt { path: PathBuf::new() }
        } else {
            Error::Backend(e.to_string())
        }
    }
}

fn is_corruption(e: &heed::Error) -> bool {
    matches!(e, heed::Error::Mdb(heed::MdbError::Corrupted | heed::MdbError::PageNotFound))
}

/// Open outcome: either a live handle, or `Broken` when the backend
/// reported corruption that survived repair (§4.B).
pub enum OpenOutcome {
    Open(Arc<Handle>),
    Broken,
}

/// Owns all open handles for a process. Handles are opened lazily on first
/// access and reference-counted; at most one `write_txn` per handle may be
/// outstanding at a time (enforced inside [`Handle`]).
pub struct Store {
    state_dir: PathBuf,
    handles: parking_lot::Mutex<HashMap<DbName, Arc<Handle>>>,
}

impl Store {
    #[must_use]
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self { state_dir: state_dir.into(), handles: parking_lot::Mutex::new(HashMap::new()) }
    }

    /// Open (or return the already-open) handle for `name`. On backend
    /// corruption, attempts [`replicate`]-based repair once; on continued
    /// failure returns [`OpenOutcome::Broken`] so the caller may delete and
    /// recreate the database.
    pub fn open(&self, name: DbName) -> Result<OpenOutcome, Error> {
        let mut handles = self.handles.lock();
        if let Some(h) = handles.get(&name) {
            return Ok(OpenOutcome::Open(Arc::clone(h)));
        }

        let path = self.state_dir.join(name.file_name());
        match backend::Handle::open(name, &path) {
            Ok(handle) => {
                let handle = Arc::new(handle);
                handles.insert(name, Arc::clone(&handle));
                Ok(OpenOutcome::Open(handle))
            }
            Err(Error::Corrupt { .. }) => {
                tracing::warn!(db = ?name, path = %path.display(), "corruption detected on open, attempting replication repair");
                match repair_in_place(&path) {
                    Ok(()) => match backend::Handle::open(name, &path) {
                        Ok(handle) => {
                            let handle = Arc::new(handle);
                            handles.insert(name, Arc::clone(&handle));
                            Ok(OpenOutcome::Open(handle))
                        }
                        Err(_) => Ok(OpenOutcome::Broken),
                    },
                    Err(_) => Ok(OpenOutcome::Broken),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Human-readable description of any structural problem at `path`, or
    /// `None` if the database at that path appears healthy.
    #[must_use]
    pub fn diagnose(path: &Path) -> Option<String> {
        if !path.exists() {
            return Some(format!("{} does not exist", path.display()));
        }
        match backend::Handle::diagnose_path(path) {
            Ok(()) => None,
            Err(msg) => Some(msg),
        }
    }
}

fn repair_in_place(path: &Path) -> Result<(), Error> {
    let tmp = path.with_extension("repair.lmdb");
    let status = replicate(path, &tmp)?;
    match status {
        ReplicationStatus::Ok => {
            std::fs::remove_dir_all(path).ok();
            std::fs::rename(&tmp, path).map_err(|e| Error::Io(e.to_string()))?;
            let lock_side_file = path.with_file_name(format!(
                "{}-lock",
                path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
            ));
            let _ = std::fs::remove_file(lock_side_file);
            Ok(())
        }
        ReplicationStatus::CorruptPage | ReplicationStatus::Unknown => {
            Err(Error::Corrupt { path: path.to_path_buf() })
        }
    }
}
