//! PRNG seeding (§4.A).

use rand::{rngs::StdRng, RngCore, SeedableRng};
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Owns the strong PRNG for the process lifetime and knows where its seed
/// file lives. Created once by `Agent` (§9 "Global mutable state") and torn
/// down in reverse construction order.
pub struct CryptoContext {
    seed_path: PathBuf,
    rng: StdRng,
    /// Whether a seed file already existed at construction time. Teardown
    /// only writes a fresh seed back when this is `false`, per §4.A.
    had_prior_seed: bool,
}

impl CryptoContext {
    /// Initialize from OS entropy plus any persisted seed at `seed_path`
    /// (conventionally `state/randseed`).
    pub fn init(seed_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let seed_path = seed_path.as_ref().to_path_buf();
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);

        let had_prior_seed = match fs::read(&seed_path) {
            Ok(bytes) => {
                for (i, b) in bytes.iter().take(32).enumerate() {
                    seed[i] ^= b;
                }
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e),
        };

        Ok(Self { seed_path, rng: StdRng::from_seed(seed), had_prior_seed })
    }

    /// The strong PRNG, for key generation and nonces.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Write a fresh seed back to `seed_path`, mode 0600, but only if no
    /// seed existed there at init time.
    pub fn teardown(&mut self) -> std::io::Result<()> {
        if self.had_prior_seed {
            return Ok(());
        }
        let mut fresh = [0u8; 32];
        self.rng.fill_bytes(&mut fresh);
        write_seed_file(&self.seed_path, &fresh)
    }
}

#[cfg(unix)]
fn write_seed_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut f = OpenOptions::new().write(true).create(true).truncate(true).mode(0o600).open(path)?;
    f.write_all(bytes)
}

#[cfg(not(unix))]
fn write_seed_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    fs::write(path, bytes)
}

/// Deterministic per-process splay seed from `(pid, starttime, hostname,
/// now)`, used to derive scheduling jitter. Not cryptographically strong;
/// the weak PRNG exists only to spread scheduled runs across hosts.
#[must_use]
pub fn splay_seed(pid: u32, starttime_epoch: u64, hostname: &str, now_epoch: u64) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    pid.hash(&mut hasher);
    starttime_epoch.hash(&mut hasher);
    hostname.hash(&mut hasher);
    now_epoch.hash(&mut hasher);
    hasher.finish()
}

/// Convenience for callers that don't track their own start time.
#[must_use]
pub fn now_epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn teardown_writes_seed_only_when_absent() {
        let dir = tempdir().unwrap();
        let seed_path = dir.path().join("randseed");

        let mut ctx = CryptoContext::init(&seed_path).unwrap();
        assert!(!seed_path.exists());
        ctx.teardown().unwrap();
        assert!(seed_path.exists());
        let written = fs::read(&seed_path).unwrap();

        // Re-init: seed file now exists, teardown must not rewrite it.
        let mut ctx2 = CryptoContext::init(&seed_path).unwrap();
        ctx2.teardown().unwrap();
        assert_eq!(fs::read(&seed_path).unwrap(), written);
    }

    #[test]
    fn splay_seed_is_deterministic_per_inputs() {
        let a = splay_seed(100, 1000, "host", 2000);
        let b = splay_seed(100, 1000, "host", 2000);
        assert_eq!(a, b);
        let c = splay_seed(101, 1000, "host", 2000);
        assert_ne!(a, c);
    }
}
