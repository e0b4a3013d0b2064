//! Resolved file-layout configuration (§6), read once at [`crate::Agent`]
//! construction.
//!
//! Grounded on `dashflow::core::config_loader::env_vars`'s small typed
//! accessors over `std::env::var` (seen from `dashflow-registry/src/cache.rs`'s
//! `env_bool`/`env_duration_secs` call sites) rather than a generic config
//! framework: this crate has exactly two environment hooks, both testing
//! overrides, so a handful of functions is all the teacher's own pattern
//! would reach for.

use std::path::{Path, PathBuf};

const WORKDIR_OVERRIDE_VAR: &str = "CFENGINE_TEST_OVERRIDE_WORKDIR";
const EXTENSION_LIBRARY_DIR_OVERRIDE_VAR: &str = "CFENGINE_TEST_OVERRIDE_EXTENSION_LIBRARY_DIR";

/// Default work directory used when no override is set, matching the
/// upstream convention of installing under `/var/cfengine` for the
/// privileged agent.
const DEFAULT_WORKDIR: &str = "/var/cfengine";

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var_os(var).map(PathBuf::from)
}

/// Unprivileged callers (policy hub tooling run as a regular user, tests
/// run outside a container) fall back to a per-user work directory rather
/// than failing to create `/var/cfengine`.
#[cfg(unix)]
fn unprivileged_default_workdir() -> PathBuf {
    // SAFETY: `geteuid` takes no arguments and cannot fail.
    let euid = unsafe { libc::geteuid() };
    if euid == 0 {
        PathBuf::from(DEFAULT_WORKDIR)
    } else {
        dirs::home_dir().map(|home| home.join(".cfagent")).unwrap_or_else(|| PathBuf::from(DEFAULT_WORKDIR))
    }
}

#[cfg(not(unix))]
fn unprivileged_default_workdir() -> PathBuf {
    dirs::home_dir().map(|home| home.join(".cfagent")).unwrap_or_else(|| PathBuf::from(DEFAULT_WORKDIR))
}

/// Resolved §6 file layout: `inputs/`, `masterfiles/`, `state/`, `backups/`,
/// `ppkeys/`, all relative to a single work directory unless overridden.
#[derive(Debug, Clone)]
pub struct Config {
    pub work_dir: PathBuf,
    pub inputs_dir: PathBuf,
    pub masterfiles_dir: PathBuf,
    pub state_dir: PathBuf,
    pub backups_dir: PathBuf,
    pub ppkeys_dir: PathBuf,
    /// Enterprise extension library directory; `None` unless the testing
    /// override is set (§6: out of scope for discovery beyond this hook).
    pub extension_library_dir: Option<PathBuf>,
}

impl Config {
    /// Resolve from the environment (§6's two testing-only variables),
    /// falling back to [`DEFAULT_WORKDIR`].
    #[must_use]
    pub fn from_env() -> Self {
        let work_dir = env_path(WORKDIR_OVERRIDE_VAR).unwrap_or_else(unprivileged_default_workdir);
        let extension_library_dir = env_path(EXTENSION_LIBRARY_DIR_OVERRIDE_VAR);
        Self::from_work_dir(work_dir, extension_library_dir)
    }

    #[must_use]
    pub fn from_work_dir(work_dir: impl Into<PathBuf>, extension_library_dir: Option<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        Self {
            inputs_dir: work_dir.join("inputs"),
            masterfiles_dir: work_dir.join("masterfiles"),
            state_dir: work_dir.join("state"),
            backups_dir: work_dir.join("backups"),
            ppkeys_dir: work_dir.join("ppkeys"),
            extension_library_dir,
            work_dir,
        }
    }

    /// `backups/<unix-ts>/` for a backup taken at `timestamp` (§6).
    #[must_use]
    pub fn backup_dir_for(&self, timestamp: u64) -> PathBuf {
        self.backups_dir.join(timestamp.to_string())
    }

    #[must_use]
    pub fn randseed_path(&self) -> PathBuf {
        self.state_dir.join("randseed")
    }

    #[must_use]
    pub fn ts_key_path(&self) -> PathBuf {
        self.state_dir.join("ts_key")
    }

    /// Create every directory this configuration names, if missing.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [&self.inputs_dir, &self.masterfiles_dir, &self.state_dir, &self.backups_dir, &self.ppkeys_dir] {
            std::fs::create_dir_all(dir)?;
        }
        if let Some(dir) = &self.extension_library_dir {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Private-key permission/type check (§6: exactly `0600`, regular file).
#[cfg(unix)]
#[must_use]
pub fn private_key_permissions_valid(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o777 == 0o600)
        .unwrap_or(false)
}

/// Public-key permission/type/length check (§6: `0600`, exactly 426 bytes —
/// the OpenSSH RSA public DER length for the canonical key size).
#[cfg(unix)]
#[must_use]
pub fn public_key_permissions_valid(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o777 == 0o600 && m.len() == 426)
        .unwrap_or(false)
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_work_dir_derives_every_layout_path() {
        let cfg = Config::from_work_dir("/tmp/cfwork", None);
        assert_eq!(cfg.inputs_dir, Path::new("/tmp/cfwork/inputs"));
        assert_eq!(cfg.state_dir, Path::new("/tmp/cfwork/state"));
        assert_eq!(cfg.backups_dir, Path::new("/tmp/cfwork/backups"));
        assert_eq!(cfg.ppkeys_dir, Path::new("/tmp/cfwork/ppkeys"));
        assert_eq!(cfg.randseed_path(), Path::new("/tmp/cfwork/state/randseed"));
    }

    #[test]
    fn backup_dir_is_keyed_by_unix_timestamp() {
        let cfg = Config::from_work_dir("/tmp/cfwork", None);
        assert_eq!(cfg.backup_dir_for(1_700_000_000), Path::new("/tmp/cfwork/backups/1700000000"));
    }

    #[test]
    fn ensure_directories_creates_the_full_layout() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::from_work_dir(dir.path(), None);
        cfg.ensure_directories().unwrap();
        assert!(cfg.inputs_dir.is_dir());
        assert!(cfg.state_dir.is_dir());
        assert!(cfg.backups_dir.is_dir());
        assert!(cfg.ppkeys_dir.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn private_key_permission_check_rejects_world_readable_files() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");
        std::fs::write(&path, b"fake key").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        assert!(private_key_permissions_valid(&path));

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(!private_key_permissions_valid(&path));
    }
}
