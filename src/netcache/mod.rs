//! mTLS connection cache (§4.D).
//!
//! Generalizes `dashflow-registry::cache`'s TTL-keyed `CacheStore` trait from
//! "expire after a duration" to "expire on liveness probe failure": entries
//! are keyed by `(host, port, flags)` rather than a string, and their
//! lifecycle is a state machine (`IDLE → BUSY → IDLE` on success,
//! `* → BROKEN` terminal on socket error) rather than a TTL clock. The pool
//! itself is connection-type-agnostic — it holds whatever the wire protocol
//! layer (§4.E) hands it behind [`ConnectionHandle`] — so this module has no
//! TLS dependency of its own.

use bitflags::bitflags;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

bitflags! {
    /// Per-connection negotiation flags (§3: "flags are compared field-wise,
    /// not as an opaque integer"), mirroring the original's
    /// `GetNetworkProtocolFlags` bitset.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ConnectionFlags: u8 {
        const FORCE_IPV4        = 0b0000_0001;
        const TRUST_PROVIDED_KEY = 0b0000_0010;
        const FORCE_TLS_1_2     = 0b0000_0100;
    }
}

/// Connection cache errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("no such connection in the pool")]
    NotFound,

    /// §7 Programming error: an invariant was violated (e.g. releasing a
    /// connection that was never marked busy).
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> crate::error::ErrorKind {
        match self {
            Error::NotFound => crate::error::ErrorKind::Resource,
            Error::Invariant(_) => crate::error::ErrorKind::Programming,
        }
    }
}

/// Something the pool can hold and probe for liveness. The wire protocol
/// layer's TLS-wrapped socket implements this; the pool never constructs one
/// itself (entries arrive via [`Pool::insert_busy`] after a successful dial).
pub trait ConnectionHandle: Send {
    /// Non-blocking liveness probe (§4.D: "a `getsockopt SO_ERROR` query").
    /// Returning `false` moves the entry to `BROKEN`.
    fn probe_alive(&self) -> bool;
}

/// Pool entry lifecycle (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Busy,
    Broken,
    /// Set by the caller when a dial attempt fails outright; never stored in
    /// the pool (there is no handle to hold), but returned to describe that
    /// outcome uniformly alongside the other three states.
    Offline,
}

/// Opaque token identifying one pool entry across `find_idle_mark_busy` /
/// `mark_not_busy` / `mark_broken` calls. Stable across `gc`, unlike a Vec
/// index would be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

struct Entry<H> {
    host: String,
    port: u16,
    flags: ConnectionFlags,
    status: Status,
    handle: H,
}

/// Thread-safe pool of cached connections, keyed by `(host, port, flags)`.
/// "Thread-safe... but not optimized for contention" (§5): a single mutex
/// guards the whole table, matching the spec's stated intent of a
/// single-threaded agent with room for a future multi-agent to share it.
pub struct Pool<H: ConnectionHandle> {
    entries: parking_lot::Mutex<HashMap<ConnectionId, Entry<H>>>,
    next_id: AtomicU64,
}

impl<H: ConnectionHandle> Default for Pool<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: ConnectionHandle> Pool<H> {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: parking_lot::Mutex::new(HashMap::new()), next_id: AtomicU64::new(0) }
    }

    /// Scan for an `IDLE` entry matching `(host, port, flags)` exactly
    /// (field-wise on `flags`), probe it for liveness, and mark it `BUSY` if
    /// alive. An entry that fails the probe is moved to `BROKEN` in place and
    /// the scan continues (§4.D).
    pub fn find_idle_mark_busy(
        &self,
        host: &str,
        port: u16,
        flags: ConnectionFlags,
    ) -> Option<ConnectionId> {
        let mut entries = self.entries.lock();
        let mut broken = Vec::new();
        let mut found = None;

        for (id, entry) in entries.iter() {
            if entry.status != Status::Idle || entry.host != host || entry.port != port || entry.flags != flags {
                continue;
            }
            if entry.handle.probe_alive() {
                found = Some(*id);
                break;
            }
            broken.push(*id);
        }

        for id in broken {
            if let Some(entry) = entries.get_mut(&id) {
                entry.status = Status::Broken;
            }
        }

        if let Some(id) = found {
            if let Some(entry) = entries.get_mut(&id) {
                entry.status = Status::Busy;
            }
        }
        found
    }

    /// Register a freshly dialed connection as `BUSY` (§3: "added on first
    /// successful dial... marked busy when checked out"). The caller already
    /// holds it exclusively, so it starts busy rather than idle.
    pub fn insert_busy(&self, host: impl Into<String>, port: u16, flags: ConnectionFlags, handle: H) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Entry { host: host.into(), port, flags, status: Status::Busy, handle };
        self.entries.lock().insert(id, entry);
        id
    }

    /// Release a connection back to `IDLE` after a successful call.
    pub fn mark_not_busy(&self, id: ConnectionId) -> Result<(), Error> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&id).ok_or(Error::NotFound)?;
        if entry.status != Status::Busy {
            return Err(Error::Invariant(format!(
                "mark_not_busy on entry not in BUSY state (was {:?})",
                entry.status
            )));
        }
        entry.status = Status::Idle;
        Ok(())
    }

    /// Move a connection to the terminal `BROKEN` state after an I/O or
    /// framing error (§3: "never returned again").
    pub fn mark_broken(&self, id: ConnectionId) -> Result<(), Error> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&id).ok_or(Error::NotFound)?;
        entry.status = Status::Broken;
        Ok(())
    }

    /// Opportunistically drop every `BROKEN` entry (§3: "garbage-collected
    /// opportunistically").
    pub fn gc(&self) {
        self.entries.lock().retain(|_, entry| entry.status != Status::Broken);
    }

    #[must_use]
    pub fn status_of(&self, id: ConnectionId) -> Option<Status> {
        self.entries.lock().get(&id).map(|e| e.status)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
