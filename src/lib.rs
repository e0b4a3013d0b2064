//! Core evaluation, storage, and protocol subsystems of a distributed
//! configuration-management agent.
//!
//! This crate implements the three tightly-coupled subsystems a CFEngine-style
//! agent core needs: the lastseen/KV store layer (§4.B-C), the mTLS wire
//! protocol and connection cache (§4.D-E), and the policy evaluator core
//! (§4.F-H). The policy parser, actuators beyond the handful modeled natively,
//! CLI frontends beyond `cf-check`, and the upgrade tool are out of scope;
//! this crate meets them only at interface boundaries (the `Promise`/
//! `PromiseAttributes` shapes in [`actuation`]).
//!
//! Global mutable state is encapsulated in a single [`Agent`] value created
//! once by a caller (typically `main`, or a test's fixture); there is no
//! process-wide static state in this crate.

pub mod actuation;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod expr;
pub mod hash;
pub mod kv;
pub mod lastseen;
pub mod netcache;
pub mod protocol;

pub use error::{Error, ErrorKind, Result};

use config::Config;
use context::EvalContext;
use crypto::CryptoContext;
use kv::{DbName, OpenOutcome, Store};
use std::sync::Arc;

/// The process-wide resources a running agent needs, constructed once and
/// torn down in reverse order (§5 "shared resources"): crypto context, KV
/// store, evaluation context. The connection pool is intentionally generic
/// over the caller's chosen [`netcache::ConnectionHandle`] and so isn't
/// held here; callers construct a `netcache::Pool<H>` alongside an `Agent`.
pub struct Agent {
    pub config: Config,
    pub crypto: CryptoContext,
    pub kv: Store,
    pub context: EvalContext,
}

impl Agent {
    /// Construct an agent from a resolved [`Config`], initializing crypto
    /// (§4.A: seeded from `state/randseed`) and the KV store handle table.
    /// Directories are created if missing so a fresh work directory is
    /// usable immediately.
    pub fn new(config: Config) -> Result<Self> {
        config
            .ensure_directories()
            .map_err(|e| Error::FatalEnvironment(format!("could not create work directory layout: {e}")))?;

        let crypto = CryptoContext::init(config.randseed_path())
            .map_err(|e| Error::FatalEnvironment(format!("crypto init failed: {e}")))?;

        let kv = Store::new(&config.state_dir);

        Ok(Self { config, crypto, kv, context: EvalContext::new() })
    }

    /// Open (or reuse) the lastseen database handle (§4.C).
    pub fn lastseen_handle(&self) -> Result<Arc<kv::Handle>> {
        self.open_handle(DbName::Lastseen)
    }

    /// Open (or reuse) the locks database handle (§4.H).
    pub fn locks_handle(&self) -> Result<Arc<kv::Handle>> {
        self.open_handle(DbName::Locks)
    }

    fn open_handle(&self, name: DbName) -> Result<Arc<kv::Handle>> {
        match self.kv.open(name)? {
            OpenOutcome::Open(handle) => Ok(handle),
            OpenOutcome::Broken => {
                Err(Error::FatalEnvironment(format!("{} is corrupt and could not be repaired", name.file_name())))
            }
        }
    }

    /// Teardown in reverse construction order (§5): write back a fresh
    /// PRNG seed only if none existed at init, per §4.A.
    pub fn shutdown(mut self) -> Result<()> {
        self.crypto
            .teardown()
            .map_err(|e| Error::FatalEnvironment(format!("crypto teardown failed: {e}")))
    }
}
