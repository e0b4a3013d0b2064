//! Crate-wide error aggregation.
//!
//! Every subsystem module defines its own `thiserror` enum (`kv::Error`,
//! `lastseen::Error`, `netcache::Error`, `protocol::Error`, `expr::Error`,
//! `context::Error`, `actuation::Error`). This module aggregates them behind
//! one `Error` so call sites that cross subsystem boundaries (the actuation
//! pipeline calling into the KV store and the connection cache) don't have to
//! juggle N error types.
//!
//! The taxonomy in §7 of the specification (Policy, Context, Resource,
//! Programming, Fatal environment) is not a parallel type — it's a
//! classification of the variants below, recovered via [`Error::kind`]. This
//! lets the actuation pipeline implement the propagation policy ("continue
//! past Resource/Context errors, abort past Programming/Fatal") by matching
//! on `kind()` once instead of on every leaf variant.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The §7 error taxonomy. A classification, not a parallel error hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The AST is internally inconsistent; reject the run before actuation.
    Policy,
    /// An expression references something unresolvable; contaminate and skip.
    Context,
    /// A file, socket, or key is broken; recovered locally or reported as Fail.
    Resource,
    /// An invariant was violated; abort the current run after releasing locks.
    Programming,
    /// Crypto init failure or unwritable work directory; abort the process.
    FatalEnvironment,
}

/// Aggregate error type for `cfengine_core`.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// KV store failure (§4.B).
    #[error(transparent)]
    Kv(#[from] crate::kv::Error),

    /// Lastseen registry failure (§4.C).
    #[error(transparent)]
    Lastseen(#[from] crate::lastseen::Error),

    /// Connection cache failure (§4.D).
    #[error(transparent)]
    NetCache(#[from] crate::netcache::Error),

    /// Wire protocol failure (§4.E).
    #[error(transparent)]
    Protocol(#[from] crate::protocol::Error),

    /// Expression engine failure (§4.F).
    #[error(transparent)]
    Expr(#[from] crate::expr::Error),

    /// Evaluation context failure (§4.G).
    #[error(transparent)]
    Context(#[from] crate::context::Error),

    /// Promise actuation failure (§4.H).
    #[error(transparent)]
    Actuation(#[from] crate::actuation::Error),

    /// Hashing/crypto primitive failure (§4.A).
    #[error(transparent)]
    Hash(#[from] crate::hash::Error),

    /// Unwritable work directory, missing `ppkeys/`, or similar environment
    /// failure that must abort the process after cleanup (§7 Fatal).
    #[error("fatal environment error: {0}")]
    FatalEnvironment(String),

    /// An invariant was violated (§7 Programming error): logged with
    /// call-site context and aborts the current run after releasing locks.
    #[error("programming error at {site}: {detail}")]
    Programming {
        /// `file:line` of the call site that detected the violation.
        site: &'static str,
        /// Human-readable description of the violated invariant.
        detail: String,
    },
}

impl Error {
    /// Classify this error per the §7 taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Kv(_) | Error::NetCache(_) | Error::Protocol(_) => ErrorKind::Resource,
            Error::Lastseen(e) => e.kind(),
            Error::Expr(_) | Error::Context(_) => ErrorKind::Context,
            Error::Actuation(e) => e.kind(),
            Error::Hash(_) => ErrorKind::FatalEnvironment,
            Error::FatalEnvironment(_) => ErrorKind::FatalEnvironment,
            Error::Programming { .. } => ErrorKind::Programming,
        }
    }

    /// Whether the evaluation core should abort the current run (as opposed
    /// to recording a `Fail` outcome for one promise and continuing).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Programming | ErrorKind::FatalEnvironment)
    }

    /// Construct a [`Error::Programming`] tagged with the call site.
    #[must_use]
    pub fn programming(site: &'static str, detail: impl Into<String>) -> Self {
        Error::Programming { site, detail: detail.into() }
    }
}
