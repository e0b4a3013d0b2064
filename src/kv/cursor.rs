//! Handle cursor (§4.B).
//!
//! Only one cursor per handle at a time, enforced by `cursor_lock`, which is
//! distinct from the write lock. The write lock is acquired *inside* the
//! cursor lock (the cursor holds both guards for its lifetime, outer first)
//! so a writer that also wants to iterate can never deadlock against a
//! cursor that also wants to write.

use super::backend::Handle;
use super::Error;
use heed::RwTxn;

/// A single-handle cursor. Advances key-by-key; supports in-place mutation
/// of the current record.
pub struct Cursor<'h> {
    handle: &'h Handle,
    _cursor_guard: parking_lot::MutexGuard<'h, ()>,
    _write_guard: parking_lot::MutexGuard<'h, ()>,
    wtxn: Option<RwTxn<'h>>,
    last_key: Option<Vec<u8>>,
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl<'h> Cursor<'h> {
    pub(super) fn open(handle: &'h Handle) -> Result<Self, Error> {
        let cursor_guard =
            handle.cursor_lock.try_lock().ok_or(Error::CursorAlreadyOpen)?;
        let write_guard = handle.write_lock.lock();
        let wtxn = handle.env.write_txn().map_err(heed::Error::from)?;
        Ok(Self {
            handle,
            _cursor_guard: cursor_guard,
            _write_guard: write_guard,
            wtxn: Some(wtxn),
            last_key: None,
            current: None,
        })
    }

    /// Advance to the next record in key order, or `None` when exhausted.
    pub fn next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>, Error> {
        let wtxn = self.wtxn.as_ref().ok_or_else(|| Error::Backend("cursor closed".into()))?;
        let mut found = None;
        for item in self.handle.db.iter(wtxn).map_err(heed::Error::from)? {
            let (k, v) = item.map_err(heed::Error::from)?;
            let past_last = match &self.last_key {
                None => true,
                Some(last) => k > last.as_slice(),
            };
            if past_last {
                found = Some((k.to_vec(), v.to_vec()));
                break;
            }
        }
        self.current = found.clone();
        if let Some((k, _)) = &found {
            self.last_key = Some(k.clone());
        }
        Ok(found)
    }

    /// Delete the record `next()` most recently returned.
    pub fn delete_current(&mut self) -> Result<(), Error> {
        let (key, _) = self
            .current
            .clone()
            .ok_or_else(|| Error::Backend("delete_current with no current record".into()))?;
        let wtxn = self.wtxn.as_mut().ok_or_else(|| Error::Backend("cursor closed".into()))?;
        self.handle.db.delete(wtxn, &key).map_err(heed::Error::from)?;
        self.current = None;
        Ok(())
    }

    /// Overwrite the value of the record `next()` most recently returned.
    pub fn write_current(&mut self, value: &[u8]) -> Result<(), Error> {
        let (key, _) = self
            .current
            .clone()
            .ok_or_else(|| Error::Backend("write_current with no current record".into()))?;
        let wtxn = self.wtxn.as_mut().ok_or_else(|| Error::Backend("cursor closed".into()))?;
        self.handle.db.put(wtxn, &key, value).map_err(heed::Error::from)?;
        self.current = Some((key, value.to_vec()));
        Ok(())
    }

    /// Commit and release the cursor. Dropping without calling `close`
    /// aborts any mutations made through the cursor (LMDB txn-drop
    /// semantics), so callers that mutated records must call this.
    pub fn close(mut self) -> Result<(), Error> {
        if let Some(wtxn) = self.wtxn.take() {
            wtxn.commit().map_err(heed::Error::from)?;
        }
        Ok(())
    }
}

impl Handle {
    /// Open a cursor over this handle. Fails if one is already open.
    pub fn cursor(&self) -> Result<Cursor<'_>, Error> {
        Cursor::open(self)
    }
}
