//! Lastseen registry (§4.C): peer key ↔ address bidirectional mapping plus
//! per-peer rolling quality statistics.
//!
//! Grounded on `dashflow/src/checkpoint.rs`'s versioned-migration pattern
//! (`versioned::VersionedCheckpoint`, gated by a version marker) generalized
//! from "migrate a single checkpoint blob" to "migrate a whole KV handle in
//! place on open."

use crate::hash::Key;
use crate::kv::backend::Handle;
use crate::kv::migration::{run_migration_if_needed, SchemaMigration};
use crate::kv::Error as KvError;
use chrono::{DateTime, Datelike, Timelike, Utc};
use thiserror::Error;

/// Lastseen errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Kv(#[from] KvError),

    #[error("malformed quality record for {key}")]
    MalformedRecord { key: String },

    /// The coherence check (§4.C) failed: the database is internally
    /// inconsistent and `open` must report `BROKEN`.
    #[error("lastseen database failed coherence check: {0}")]
    Incoherent(String),
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> crate::error::ErrorKind {
        match self {
            Error::Kv(_) => crate::error::ErrorKind::Resource,
            Error::MalformedRecord { .. } | Error::Incoherent(_) => crate::error::ErrorKind::Resource,
        }
    }
}

/// Whether a contact was initiated by the peer (incoming) or by us
/// (outgoing); selects the `qi`/`qo` quality record prefix (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Incoming,
    Outgoing,
}

impl PeerRole {
    fn quality_prefix(self) -> &'static str {
        match self {
            PeerRole::Incoming => "qi",
            PeerRole::Outgoing => "qo",
        }
    }
}

/// Smoothing constant for the Q-quality EWMA (§4.C).
pub const ALPHA: f64 = 0.7;

/// A peer's rolling link-quality estimate (§3 Quality record).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Quality {
    pub last_seen_epoch: u64,
    pub q: f64,
    pub expected: f64,
    pub variance: f64,
}

impl Quality {
    /// A never-updated record: `expected`/`variance` are NaN, meaning "not
    /// yet initialized" per §4.C.
    #[must_use]
    pub fn uninitialized(now: u64) -> Self {
        Self { last_seen_epoch: now, q: f64::NAN, expected: f64::NAN, variance: 0.0 }
    }

    /// Fold one new observation into this quality record.
    #[must_use]
    pub fn update(self, observation: f64, now: u64) -> Self {
        let prior_expected = if self.expected.is_nan() { observation } else { self.expected };
        let prior_variance = if self.variance.is_nan() { 0.0 } else { self.variance };

        let expected = ALPHA * prior_expected + (1.0 - ALPHA) * observation;
        let variance = ALPHA * prior_variance + (1.0 - ALPHA) * (observation - expected).powi(2);

        Self { last_seen_epoch: now, q: observation, expected, variance }
    }
}

/// The UTC timekey format from §4.C: `"<day>_<Mon>_Lcycle_<year mod 3>_<shift>"`.
#[must_use]
pub fn timekey(now: u64) -> String {
    let dt: DateTime<Utc> = DateTime::from_timestamp(now as i64, 0).unwrap_or_default();
    let shift = match dt.hour() {
        0..=5 => "Night",
        6..=11 => "Morning",
        12..=17 => "Afternoon",
        _ => "Evening",
    };
    format!(
        "{:02}_{}_Lcycle_{}_{}",
        dt.day(),
        dt.format("%b"),
        dt.year().rem_euclid(3),
        shift
    )
}

fn forward_key(peer: &Key) -> Vec<u8> {
    format!("k{peer}").into_bytes()
}
fn reverse_key(address: &str) -> Vec<u8> {
    format!("a{address}").into_bytes()
}
fn quality_key(role: PeerRole, peer: &Key) -> Vec<u8> {
    format!("{}{peer}", role.quality_prefix()).into_bytes()
}

/// Write/refresh the forward, reverse, and quality records for one contact.
///
/// `observation` is the raw link-quality sample (e.g. round-trip latency in
/// milliseconds) folded into the EWMA; §4.C's formula is silent on where
/// this sample comes from, so callers supply it from whatever the protocol
/// layer measured for this contact.
pub fn register(
    handle: &Handle,
    role: PeerRole,
    peer: &Key,
    address: &str,
    observation: f64,
    now: u64,
) -> Result<(), Error> {
    // Atomically move the forward/reverse pair: if this peer previously
    // pointed at a different address, drop that address's reverse record
    // only if it still points at this peer (§3 invariant: "most recent
    // claimant wins" means we never clobber a reverse record another peer
    // has since claimed).
    if let Some(prior_addr) = handle.read(&forward_key(peer))? {
        let prior_addr = String::from_utf8_lossy(&prior_addr).to_string();
        if prior_addr != address {
            if let Some(claimant) = handle.read(&reverse_key(&prior_addr))? {
                if claimant == peer.as_str().as_bytes() {
                    handle.delete(&reverse_key(&prior_addr))?;
                }
            }
        }
    }

    handle.write(&forward_key(peer), address.as_bytes())?;
    handle.write(&reverse_key(address), peer.as_str().as_bytes())?;

    let qkey = quality_key(role, peer);
    let prior = match handle.read(&qkey)? {
        Some(bytes) => bincode::deserialize::<Quality>(&bytes)
            .map_err(|_| Error::MalformedRecord { key: String::from_utf8_lossy(&qkey).to_string() })?,
        None => Quality::uninitialized(now),
    };
    let updated = prior.update(observation, now);
    let encoded = bincode::serialize(&updated)
        .map_err(|_| Error::MalformedRecord { key: String::from_utf8_lossy(&qkey).to_string() })?;
    handle.write(&qkey, &encoded)?;

    Ok(())
}

/// Look up a peer's last known address.
pub fn last_address(handle: &Handle, peer: &Key) -> Result<Option<String>, Error> {
    Ok(handle.read(&forward_key(peer))?.map(|b| String::from_utf8_lossy(&b).to_string()))
}

/// Look up the peer most recently known to use `address`.
pub fn most_recent_claimant(handle: &Handle, address: &str) -> Result<Option<String>, Error> {
    Ok(handle.read(&reverse_key(address))?.map(|b| String::from_utf8_lossy(&b).to_string()))
}

/// Delete a peer's forward, reverse, and quality records (the "forget"
/// operation named in §3's lifecycle).
pub fn forget(handle: &Handle, peer: &Key) -> Result<(), Error> {
    if let Some(addr) = handle.read(&forward_key(peer))? {
        let addr = String::from_utf8_lossy(&addr).to_string();
        handle.delete(&reverse_key(&addr))?;
    }
    handle.delete(&forward_key(peer))?;
    handle.delete(&quality_key(PeerRole::Incoming, peer))?;
    handle.delete(&quality_key(PeerRole::Outgoing, peer))?;
    Ok(())
}

/// §4.C coherence check: for each forward record, the reverse lookup of its
/// address is either absent or points back to the same key; every quality
/// record has a corresponding forward record. Returns `Err` describing the
/// first violation found.
pub fn check_coherence(handle: &Handle) -> Result<(), Error> {
    for (k, v) in handle.scan_all()? {
        if let Some(peer_str) = k.strip_prefix(b"k") {
            let address = String::from_utf8_lossy(&v).to_string();
            if let Some(claimant) = handle.read(&reverse_key(&address))? {
                if claimant != peer_str {
                    return Err(Error::Incoherent(format!(
                        "address {address} forward-points to {} but reverse-points to {}",
                        String::from_utf8_lossy(peer_str),
                        String::from_utf8_lossy(&claimant)
                    )));
                }
            }
        } else if let Some(peer) = k.strip_prefix(b"qi").or_else(|| k.strip_prefix(b"qo")) {
            if handle.read(&forward_key_raw(peer))?.is_none() {
                return Err(Error::Incoherent(format!(
                    "quality record for {} has no forward record",
                    String::from_utf8_lossy(peer)
                )));
            }
        }
    }
    Ok(())
}

fn forward_key_raw(peer: &[u8]) -> Vec<u8> {
    let mut k = vec![b'k'];
    k.extend_from_slice(peer);
    k
}

/// The pre-version on-disk shape of a single incoming/outgoing quality
/// record, keyed by `-<hash>` (incoming) / `+<hash>` (outgoing) before this
/// schema's `qi`/`qo` prefixes existed (original_source
/// `tests/unit/lastseen_migration_test.c`'s `KeyHostSeen0`). The first field
/// is named `q` for historical reasons but actually carries the last-seen
/// timestamp; `expect`/`var` are the EWMA state the record was closed out
/// at.
#[derive(serde::Serialize, serde::Deserialize)]
struct LegacyQuality {
    address: String,
    q: f64,
    expect: f64,
    var: f64,
}

/// Pre-version-to-versioned migration (§4.C). `-`/`+`-prefixed legacy
/// quality records are renamed to this schema's `qi`/`qo` prefixes
/// (re-encoding through [`Quality`]'s bincode schema) and gain a forward/
/// reverse address pair if they don't already have one; `k`/`a` entries
/// already in the new layout are carried forward unchanged, with only
/// stale/wrong-sized entries discarded, per original_source
/// `tests/unit/lastseen_migration_test.c`.
pub struct LastseenMigration;

impl SchemaMigration for LastseenMigration {
    const TARGET_VERSION: &'static str = "1";

    fn migrate(handle: &Handle) -> Result<(), KvError> {
        for (k, v) in handle.scan_all()? {
            match k.first() {
                Some(b'-') | Some(b'+') => {
                    let role = if k[0] == b'-' { PeerRole::Incoming } else { PeerRole::Outgoing };
                    let peer_hash = &k[1..];
                    if let Ok(legacy) = bincode::deserialize::<LegacyQuality>(&v) {
                        let quality = Quality {
                            last_seen_epoch: legacy.q as u64,
                            q: legacy.expect,
                            expected: legacy.expect,
                            variance: legacy.var,
                        };
                        if let Ok(encoded) = bincode::serialize(&quality) {
                            handle.write(&forward_key_raw(peer_hash), legacy.address.as_bytes())?;
                            handle.write(&reverse_key(&legacy.address), peer_hash)?;
                            let mut qkey = role.quality_prefix().as_bytes().to_vec();
                            qkey.extend_from_slice(peer_hash);
                            handle.write(&qkey, &encoded)?;
                        }
                    }
                    handle.delete(&k)?;
                }
                Some(b'k') | Some(b'a') if v.is_empty() => {
                    handle.delete(&k)?;
                }
                Some(b'q') if k.len() > 1 && (k[1] == b'i' || k[1] == b'o') => {
                    if bincode::deserialize::<Quality>(&v).is_err() {
                        handle.delete(&k)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Open the lastseen handle, running migration if needed and then the
/// coherence check; a failing check means `open` reports `BROKEN` per §4.C.
pub fn open_and_check(handle: &Handle) -> Result<(), Error> {
    run_migration_if_needed::<LastseenMigration>(handle)?;
    check_coherence(handle)
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::DbName;
    use tempfile::tempdir;

    fn open_handle() -> (tempfile::TempDir, Handle) {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DbName::Lastseen.file_name());
        let handle = Handle::open(DbName::Lastseen, &path).unwrap();
        (dir, handle)
    }

    #[test]
    fn register_then_lookup_is_bijective() {
        let (_dir, handle) = open_handle();
        let peer = crate::hash::hash_bytes(crate::hash::Algorithm::Sha256, b"peer-one").printable();

        register(&handle, PeerRole::Incoming, &peer, "10.0.0.1", 12.0, 1_000).unwrap();
        assert_eq!(last_address(&handle, &peer).unwrap().as_deref(), Some("10.0.0.1"));
        assert_eq!(most_recent_claimant(&handle, "10.0.0.1").unwrap().as_deref(), Some(peer.as_str()));
        check_coherence(&handle).unwrap();
    }

    #[test]
    fn moving_address_updates_both_records_atomically() {
        let (_dir, handle) = open_handle();
        let peer = crate::hash::hash_bytes(crate::hash::Algorithm::Sha256, b"peer-two").printable();

        register(&handle, PeerRole::Outgoing, &peer, "10.0.0.1", 5.0, 1_000).unwrap();
        register(&handle, PeerRole::Outgoing, &peer, "10.0.0.2", 5.0, 1_100).unwrap();

        assert_eq!(last_address(&handle, &peer).unwrap().as_deref(), Some("10.0.0.2"));
        assert_eq!(most_recent_claimant(&handle, "10.0.0.2").unwrap().as_deref(), Some(peer.as_str()));
        // Stale reverse record for the old address is gone, not dangling.
        assert_eq!(most_recent_claimant(&handle, "10.0.0.1").unwrap(), None);
        check_coherence(&handle).unwrap();
    }

    #[test]
    fn address_reuse_lets_most_recent_claimant_win() {
        let (_dir, handle) = open_handle();
        let peer_a = crate::hash::hash_bytes(crate::hash::Algorithm::Sha256, b"peer-a").printable();
        let peer_b = crate::hash::hash_bytes(crate::hash::Algorithm::Sha256, b"peer-b").printable();

        register(&handle, PeerRole::Incoming, &peer_a, "10.0.0.9", 1.0, 1_000).unwrap();
        register(&handle, PeerRole::Incoming, &peer_b, "10.0.0.9", 1.0, 1_100).unwrap();

        assert_eq!(most_recent_claimant(&handle, "10.0.0.9").unwrap().as_deref(), Some(peer_b.as_str()));
    }

    #[test]
    fn quality_converges_from_nan_to_steady_observation() {
        let mut q = Quality::uninitialized(0);
        for i in 1..200 {
            q = q.update(42.0, i);
        }
        assert!((q.expected - 42.0).abs() < 1e-6);
        assert!(q.variance.abs() < 1e-6);
    }

    #[test]
    fn migration_is_idempotent_and_stamps_version() {
        let (_dir, handle) = open_handle();
        let peer = crate::hash::hash_bytes(crate::hash::Algorithm::Sha256, b"peer-migrate").printable();
        register(&handle, PeerRole::Incoming, &peer, "10.0.0.3", 3.0, 1_000).unwrap();

        open_and_check(&handle).unwrap();
        let snapshot_after_first = handle.scan_all().unwrap();

        open_and_check(&handle).unwrap();
        let snapshot_after_second = handle.scan_all().unwrap();

        assert_eq!(snapshot_after_first, snapshot_after_second);
    }

    fn legacy_key(role: PeerRole, hash: &str) -> Vec<u8> {
        let prefix = match role {
            PeerRole::Incoming => b'-',
            PeerRole::Outgoing => b'+',
        };
        let mut k = vec![prefix];
        k.extend_from_slice(hash.as_bytes());
        k
    }

    fn migrate_single(role: PeerRole) {
        let (_dir, handle) = open_handle();
        let hash = "SHA=f7b335bef201230c7bf573b8dedf299fa745efe71e34a9002369248ff8519089";
        let legacy = LegacyQuality { address: "1.2.3.4".to_string(), q: 666777.0, expect: 12345.0, var: 6543210.0 };
        handle.write(&legacy_key(role, hash), &bincode::serialize(&legacy).unwrap()).unwrap();

        LastseenMigration::migrate(&handle).unwrap();

        assert!(!handle.has(&legacy_key(role, hash)).unwrap());

        let peer = Key::parse(hash).unwrap();
        let quality_bytes = handle.read(&quality_key(role, &peer)).unwrap().unwrap();
        let quality: Quality = bincode::deserialize(&quality_bytes).unwrap();
        assert_eq!(quality.last_seen_epoch, 666777);
        assert!((quality.expected - 12345.0).abs() < 1e-9);
        assert!((quality.variance - 6543210.0).abs() < 1e-9);

        assert_eq!(last_address(&handle, &peer).unwrap().as_deref(), Some("1.2.3.4"));
        assert_eq!(most_recent_claimant(&handle, "1.2.3.4").unwrap().as_deref(), Some(hash));
    }

    #[test]
    fn migration_renames_legacy_incoming_quality_to_qi_prefix() {
        migrate_single(PeerRole::Incoming);
    }

    #[test]
    fn migration_renames_legacy_outgoing_quality_to_qo_prefix() {
        migrate_single(PeerRole::Outgoing);
    }

    #[test]
    fn migration_discards_malformed_legacy_entries_without_a_trace() {
        let (_dir, handle) = open_handle();
        handle.write(b"+++", b"+").unwrap();

        LastseenMigration::migrate(&handle).unwrap();

        assert!(!handle.has(b"+++").unwrap());
        assert!(!handle.has(b"k++").unwrap());
        assert!(!handle.has(b"qo++").unwrap());
        assert!(!handle.has(b"a+").unwrap());
    }

    #[test]
    fn forget_removes_forward_and_reverse_records() {
        let (_dir, handle) = open_handle();
        let peer = crate::hash::hash_bytes(crate::hash::Algorithm::Sha256, b"peer-forget").printable();
        register(&handle, PeerRole::Incoming, &peer, "10.0.0.4", 1.0, 1_000).unwrap();

        forget(&handle, &peer).unwrap();
        assert_eq!(last_address(&handle, &peer).unwrap(), None);
        assert_eq!(most_recent_claimant(&handle, "10.0.0.4").unwrap(), None);
    }
}
