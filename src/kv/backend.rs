//! LMDB-backed handle implementation (the MVCC backend, "Backend-A" in
//! spec.md §4.B). Multiple readers and one writer coexist; readers see a
//! stable snapshot for the life of their transaction, which is exactly
//! heed/LMDB's native transaction model — no extra locking is needed for
//! readers. Writers are additionally serialized through `write_lock` so
//! that "at most one process-wide write transaction per handle" (§3) holds
//! even if a future caller forgets to honor LMDB's own single-writer rule
//! across processes sharing the same environment handle.

use super::{DbName, Error};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use std::path::Path;

/// A named, opened database. Reference-counted within a process (wrapped
/// in `Arc` by [`super::Store`]).
pub struct Handle {
    pub(super) name: DbName,
    pub(super) env: Env,
    pub(super) db: Database<Bytes, Bytes>,
    /// Serializes writers (§3: at most one process-wide write txn/handle).
    pub(super) write_lock: parking_lot::Mutex<()>,
    /// Serializes cursor issuance; the write lock is acquired *inside* this
    /// lock (never the reverse) to avoid the deadlock spec.md §4.B warns
    /// about.
    pub(super) cursor_lock: parking_lot::Mutex<()>,
}

impl Handle {
    pub(super) fn open(name: DbName, path: &Path) -> Result<Self, Error> {
        std::fs::create_dir_all(path).map_err(|e| Error::Io(e.to_string()))?;
        // SAFETY: the environment is opened for exclusive use by this
        // process's handle table; no other code in-process touches this
        // path concurrently without going through `Store`.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(1024 * 1024 * 1024)
                .max_dbs(1)
                .open(path)
                .map_err(heed::Error::from)?
        };

        let mut wtxn = env.write_txn().map_err(heed::Error::from)?;
        let db: Database<Bytes, Bytes> =
            env.create_database(&mut wtxn, Some("main")).map_err(heed::Error::from)?;
        wtxn.commit().map_err(heed::Error::from)?;

        Ok(Self {
            name,
            env,
            db,
            write_lock: parking_lot::Mutex::new(()),
            cursor_lock: parking_lot::Mutex::new(()),
        })
    }

    #[must_use]
    pub fn name(&self) -> DbName {
        self.name
    }

    pub fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let rtxn = self.env.read_txn().map_err(heed::Error::from)?;
        Ok(self.db.get(&rtxn, key).map_err(heed::Error::from)?.map(<[u8]>::to_vec))
    }

    pub fn has(&self, key: &[u8]) -> Result<bool, Error> {
        Ok(self.read(key)?.is_some())
    }

    pub fn size_of_value(&self, key: &[u8]) -> Result<Option<usize>, Error> {
        Ok(self.read(key)?.map(|v| v.len()))
    }

    pub fn write(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        let _guard = self.write_lock.lock();
        let mut wtxn = self.env.write_txn().map_err(heed::Error::from)?;
        self.db.put(&mut wtxn, key, value).map_err(heed::Error::from)?;
        wtxn.commit().map_err(heed::Error::from)?;
        Ok(())
    }

    pub fn delete(&self, key: &[u8]) -> Result<bool, Error> {
        let _guard = self.write_lock.lock();
        let mut wtxn = self.env.write_txn().map_err(heed::Error::from)?;
        let existed = self.db.delete(&mut wtxn, key).map_err(heed::Error::from)?;
        wtxn.commit().map_err(heed::Error::from)?;
        Ok(existed)
    }

    pub fn clear(&self) -> Result<(), Error> {
        let _guard = self.write_lock.lock();
        let mut wtxn = self.env.write_txn().map_err(heed::Error::from)?;
        self.db.clear(&mut wtxn).map_err(heed::Error::from)?;
        wtxn.commit().map_err(heed::Error::from)?;
        Ok(())
    }

    /// All key/value pairs, in backend iteration order. Used by migration
    /// and replication, which need a full scan rather than a live cursor.
    pub fn scan_all(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        let rtxn = self.env.read_txn().map_err(heed::Error::from)?;
        let mut out = Vec::new();
        for item in self.db.iter(&rtxn).map_err(heed::Error::from)? {
            let (k, v) = item.map_err(heed::Error::from)?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    /// Best-effort structural diagnosis of a closed environment at `path`,
    /// without going through [`Store`]'s handle table. Used by `cf-check
    /// diagnose` and by [`super::Store::diagnose`].
    pub(super) fn diagnose_path(path: &Path) -> Result<(), String> {
        if !path.is_dir() {
            return Err(format!("{} is not an LMDB environment directory", path.display()));
        }
        let data_file = path.join("data.mdb");
        if !data_file.exists() {
            return Err(format!("{} is missing data.mdb", path.display()));
        }
        // SAFETY: read-only diagnostic open, not shared with a live Handle.
        let env = unsafe { EnvOpenOptions::new().max_dbs(1).open(path) };
        match env {
            Ok(env) => match env.read_txn() {
                Ok(rtxn) => match env.open_database::<Bytes, Bytes>(&rtxn, Some("main")) {
                    Ok(_) => Ok(()),
                    Err(e) => Err(format!("failed to open database: {e}")),
                },
                Err(e) => Err(format!("failed to open read transaction: {e}")),
            },
            Err(e) => Err(format!("failed to open environment: {e}")),
        }
    }
}
