//! Schema migration driver (§4.B).
//!
//! A migration runs atomically within a single write transaction on open
//! and is gated by the presence of a `version` marker entry: if present, no
//! migration is attempted. Concrete migrations (e.g. lastseen's pre- to
//! post-version layout, §4.C) implement [`SchemaMigration`]; this module
//! only supplies the gating driver.

use super::backend::Handle;
use super::Error;

const VERSION_KEY: &[u8] = b"version";

/// A one-shot, idempotent schema migration for a single database handle.
pub trait SchemaMigration {
    /// The version string this migration brings a database up to, written
    /// to the `version` key once migration completes.
    const TARGET_VERSION: &'static str;

    /// Perform the migration. Called only when no `version` marker is
    /// present. Must leave the handle with a `version` entry on success.
    fn migrate(handle: &Handle) -> Result<(), Error>;
}

/// Run `M`'s migration on `handle` unless a `version` marker is already
/// present, in which case this is a no-op (idempotence, §8 property 4).
pub fn run_migration_if_needed<M: SchemaMigration>(handle: &Handle) -> Result<(), Error> {
    if handle.has(VERSION_KEY)? {
        return Ok(());
    }
    M::migrate(handle)?;
    if !handle.has(VERSION_KEY)? {
        handle.write(VERSION_KEY, M::TARGET_VERSION.as_bytes())?;
    }
    Ok(())
}

/// One-time merge of the separate legacy `checksums` and `filestats`
/// databases into a single combined handle, namespacing each source's keys
/// with `H_`/`S_` so they can never collide (§8 scenario S1). Unlike
/// [`SchemaMigration`], this merges two source handles into a third rather
/// than migrating one handle in place, so it's a plain function rather than
/// a trait impl; it is still idempotent (re-running overwrites the same
/// namespaced keys with the same values).
pub fn merge_legacy_checksums_and_filestats(
    checksums: &Handle,
    filestats: &Handle,
    dest: &Handle,
) -> Result<(), Error> {
    for (k, v) in checksums.scan_all()? {
        let mut namespaced = b"H_".to_vec();
        namespaced.extend_from_slice(&k);
        dest.write(&namespaced, &v)?;
    }
    for (k, v) in filestats.scan_all()? {
        let mut namespaced = b"S_".to_vec();
        namespaced.extend_from_slice(&k);
        dest.write(&namespaced, &v)?;
    }
    Ok(())
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::DbName;
    use tempfile::tempdir;

    struct NoopMigration;
    impl SchemaMigration for NoopMigration {
        const TARGET_VERSION: &'static str = "1";
        fn migrate(_handle: &Handle) -> Result<(), Error> {
            Ok(())
        }
    }

    #[test]
    fn migration_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DbName::State.file_name());
        let handle = Handle::open(DbName::State, &path).unwrap();

        run_migration_if_needed::<NoopMigration>(&handle).unwrap();
        assert_eq!(handle.read(VERSION_KEY).unwrap().as_deref(), Some(b"1".as_slice()));

        // Running again must not touch anything (no marker overwrite, no error).
        run_migration_if_needed::<NoopMigration>(&handle).unwrap();
        assert_eq!(handle.read(VERSION_KEY).unwrap().as_deref(), Some(b"1".as_slice()));
    }
}
