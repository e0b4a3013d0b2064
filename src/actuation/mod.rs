//! The promise actuation pipeline (§4.H): class-guard evaluation, global
//! and per-promise locking, actuator dispatch, outcome classification and
//! logging.
//!
//! Grounded on `dashflow/src/approval.rs`'s node pipeline shape (a guard
//! check, a risk-scoped gate, a dispatch to pluggable handling, a result
//! fed back to the surrounding graph) generalized from "approve or deny a
//! single action" to "evaluate a guard, acquire locks, dispatch to an
//! actuator, classify the outcome" (§4.H steps 1-6).

pub mod file_promiser;
pub mod lock;
pub mod outcome;
pub mod version_compare;

pub use outcome::Outcome;

use crate::context::EvalContext;
use crate::expr::class_expr::ClassExpr;
use crate::expr::Tristate;
use crate::kv::backend::Handle as KvHandle;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Actuation-pipeline errors (§4.H).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Lock(#[from] lock::Error),

    #[error(transparent)]
    Context(#[from] crate::context::Error),

    /// No actuator is registered for this promise type. A policy error
    /// (§7): the AST named a promise type the agent doesn't know how to
    /// actuate.
    #[error("no actuator registered for promise type {0:?}")]
    UnknownPromiseType(String),

    /// `methods`-type recursion exceeded [`MAX_BUNDLE_RECURSION_DEPTH`]
    /// (§5).
    #[error("bundle recursion exceeded depth {0}")]
    RecursionOverflow(usize),
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> crate::error::ErrorKind {
        match self {
            Error::Lock(_) => crate::error::ErrorKind::Resource,
            Error::Context(e) => e.kind(),
            Error::UnknownPromiseType(_) => crate::error::ErrorKind::Policy,
            Error::RecursionOverflow(_) => crate::error::ErrorKind::Resource,
        }
    }
}

/// Default bundle-recursion bound for `methods`-type promises (§5):
/// exceeding it is a `Fail`, not a crash.
pub const MAX_BUNDLE_RECURSION_DEPTH: usize = 15;

/// Duck-typed per-promise-type attribute bundle (§9): the dispatch table
/// maps a promise type name to an actuator plus (implicitly, via the
/// actuator's own parsing) an attribute extractor. No inheritance is
/// required — a new promise type adds a variant and an actuator, nothing
/// else.
#[derive(Debug, Clone)]
pub enum PromiseAttributes {
    Files(FilesAttrs),
    Packages(PackagesAttrs),
    Services(ServicesAttrs),
    /// Any promise type the crate doesn't model natively; actuators for
    /// these read out of the embedded JSON by convention.
    Generic(serde_json::Value),
}

#[derive(Debug, Clone, Default)]
pub struct FilesAttrs {
    pub create: bool,
    pub mode: Option<u32>,
    pub content_hash: Option<crate::hash::Key>,
}

#[derive(Debug, Clone, Default)]
pub struct PackagesAttrs {
    pub version: Option<String>,
    pub package_select: PackageSelect,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PackageSelect {
    #[default]
    Equal,
    LessThan,
    GreaterThan,
}

#[derive(Debug, Clone, Default)]
pub struct ServicesAttrs {
    pub should_be_running: bool,
}

/// The actuator contract (§4.H step 4): given an expanded promise and
/// context, attempt convergence and return a classified outcome.
pub trait Actuator: Send + Sync {
    fn actuate(&self, ctx: &mut EvalContext, promise: &Promise, attres: &PromiseAttributes) -> Outcome;
}

/// A concrete, fully-expanded promise ready for actuation (the AST itself
/// is out of scope — produced by the policy parser; this is the minimal
/// shape the pipeline needs at its interface with that external
/// collaborator).
#[derive(Debug, Clone)]
pub struct Promise {
    pub promise_type: String,
    pub promiser: String,
    pub handle: String,
    /// The actuator/module name folded into the lock handle string
    /// (§4.H step 3), e.g. the package manager module for a packages
    /// promise.
    pub module: String,
    pub guard: Option<ClassExpr>,
    pub ifelapsed: Duration,
    pub expireafter: Duration,
    /// Whether this promise type requires the global lock (§4.H step 2),
    /// and which key to serialize on (e.g. [`lock::GLOBAL_PACKAGES_LOCK`]).
    pub global_lock_key: Option<&'static str>,
}

/// Maps promise type name to its actuator (§9 dispatch table).
#[derive(Default)]
pub struct Dispatch {
    actuators: HashMap<String, Box<dyn Actuator>>,
}

impl Dispatch {
    #[must_use]
    pub fn new() -> Self {
        Self { actuators: HashMap::new() }
    }

    pub fn register(&mut self, promise_type: impl Into<String>, actuator: Box<dyn Actuator>) {
        self.actuators.insert(promise_type.into(), actuator);
    }
}

/// Identity of the process/host acquiring locks, threaded through so tests
/// can supply deterministic values without touching the real environment.
#[derive(Debug, Clone, Copy)]
pub struct AgentIdentity {
    pub pid: u32,
    pub host_hash: u64,
}

/// Run the full §4.H pipeline for one concrete promise. Guaranteed to
/// release every lock it acquires before returning, on every path
/// (`LockGuard`'s `Drop` covers panics and early returns alike).
pub fn actuate_promise(
    ctx: &mut EvalContext,
    locks_db: &KvHandle,
    dispatch: &Dispatch,
    attrs: &PromiseAttributes,
    promise: &Promise,
    now: u64,
    identity: AgentIdentity,
) -> Result<Outcome, Error> {
    // Step 1: class guard.
    if let Some(guard) = &promise.guard {
        match ctx.eval_class_expr(guard) {
            Tristate::True => {}
            Tristate::False | Tristate::Error => {
                return Ok(finish(ctx, promise, Outcome::Skipped));
            }
        }
    }

    // Step 2: global lock, if this promise type needs one.
    let _global_guard = match promise.global_lock_key {
        Some(key) => {
            match lock::try_acquire_global(
                locks_db,
                key,
                now,
                Duration::from_secs(600),
                identity.pid,
                identity.host_hash,
                3,
                Duration::from_millis(50),
            )? {
                Some(guard) => Some(guard),
                None => return Ok(finish(ctx, promise, Outcome::Skipped)),
            }
        }
        None => None,
    };

    // Step 3: per-promise lock honoring ifelapsed/expireafter.
    let handle_str = lock::lock_handle_string(&promise.promise_type, &promise.promiser, &promise.module);
    let _promise_guard = match lock::try_acquire(
        locks_db,
        &handle_str,
        now,
        promise.ifelapsed,
        promise.expireafter,
        identity.pid,
        identity.host_hash,
    )? {
        Some(guard) => guard,
        None => return Ok(finish(ctx, promise, Outcome::Skipped)),
    };

    // Step 4: dispatch.
    let outcome = match dispatch.actuators.get(&promise.promise_type) {
        Some(actuator) => actuator.actuate(ctx, promise, attrs),
        None => return Err(Error::UnknownPromiseType(promise.promise_type.clone())),
    };

    // Steps 5-6: locks release via drop (in reverse acquisition order,
    // since `_promise_guard` was declared after `_global_guard`); log and
    // report.
    Ok(finish(ctx, promise, outcome))
}

fn finish(ctx: &mut EvalContext, promise: &Promise, outcome: Outcome) -> Outcome {
    let level = outcome.log_level();
    let prefix = outcome.yes_no_prefix();
    match level {
        tracing::Level::ERROR => tracing::error!(promiser = %promise.promiser, outcome = %outcome, "[ {prefix} ]"),
        tracing::Level::WARN => tracing::warn!(promiser = %promise.promiser, outcome = %outcome, "[ {prefix} ]"),
        _ => tracing::info!(promiser = %promise.promiser, outcome = %outcome, "[ {prefix} ]"),
    }
    // report_outcome takes a `'static str`; promise types are a small,
    // known set at the pipeline boundary, so we intern via match rather
    // than leaking the owned String.
    let interned = intern_promise_type(&promise.promise_type);
    ctx.report_outcome(interned, outcome);
    outcome
}

fn intern_promise_type(s: &str) -> &'static str {
    match s {
        "files" => "files",
        "packages" => "packages",
        "services" => "services",
        "methods" => "methods",
        "commands" => "commands",
        _ => "other",
    }
}

/// Track `methods`-type recursion depth; exceeding [`MAX_BUNDLE_RECURSION_DEPTH`]
/// is a `Fail`, never a stack overflow (§5).
pub fn check_recursion_depth(depth: usize) -> Result<(), Error> {
    if depth > MAX_BUNDLE_RECURSION_DEPTH {
        Err(Error::RecursionOverflow(depth))
    } else {
        Ok(())
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Lifetime;
    use crate::kv::{DbName, OpenOutcome, Store};
    use std::sync::Arc;
    use tempfile::tempdir;

    struct AlwaysChange;
    impl Actuator for AlwaysChange {
        fn actuate(&self, _ctx: &mut EvalContext, _promise: &Promise, _attrs: &PromiseAttributes) -> Outcome {
            Outcome::Change
        }
    }

    fn setup() -> (tempfile::TempDir, Arc<KvHandle>, Dispatch) {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        let db = match store.open(DbName::Locks).unwrap() {
            OpenOutcome::Open(h) => h,
            OpenOutcome::Broken => panic!("locks db reported broken on fresh open"),
        };
        let mut dispatch = Dispatch::new();
        dispatch.register("files", Box::new(AlwaysChange));
        (dir, db, dispatch)
    }

    fn promise() -> Promise {
        Promise {
            promise_type: "files".into(),
            promiser: "/etc/hosts".into(),
            handle: "fix_hosts".into(),
            module: "editfile".into(),
            guard: None,
            ifelapsed: Duration::from_secs(60),
            expireafter: Duration::from_secs(600),
            global_lock_key: None,
        }
    }

    #[test]
    fn guard_false_skips_without_touching_locks() {
        let (_dir, db, dispatch) = setup();
        let mut ctx = EvalContext::new();
        let mut p = promise();
        p.guard = Some(crate::expr::class_expr::parse("never_set").unwrap());

        let outcome = actuate_promise(
            &mut ctx,
            &db,
            &dispatch,
            &PromiseAttributes::Generic(serde_json::Value::Null),
            &p,
            0,
            AgentIdentity { pid: 1, host_hash: 1 },
        )
        .unwrap();
        assert_eq!(outcome, Outcome::Skipped);
    }

    #[test]
    fn guard_true_dispatches_to_actuator() {
        let (_dir, db, dispatch) = setup();
        let mut ctx = EvalContext::new();
        ctx.class_put("default", "always", true, Lifetime::Namespace, vec![]);
        let mut p = promise();
        p.guard = Some(crate::expr::class_expr::parse("always").unwrap());

        let outcome = actuate_promise(
            &mut ctx,
            &db,
            &dispatch,
            &PromiseAttributes::Generic(serde_json::Value::Null),
            &p,
            0,
            AgentIdentity { pid: 1, host_hash: 1 },
        )
        .unwrap();
        assert_eq!(outcome, Outcome::Change);
        assert_eq!(ctx.outcome_count("files"), 1);
    }

    #[test]
    fn scenario_s6_ifelapsed_suppresses_immediate_rerun_then_allows_after_interval() {
        let (_dir, db, dispatch) = setup();
        let mut ctx = EvalContext::new();
        let p = promise();
        let identity = AgentIdentity { pid: 1, host_hash: 1 };

        let first = actuate_promise(
            &mut ctx,
            &db,
            &dispatch,
            &PromiseAttributes::Generic(serde_json::Value::Null),
            &p,
            0,
            identity,
        )
        .unwrap();
        assert_eq!(first, Outcome::Change);

        let second = actuate_promise(
            &mut ctx,
            &db,
            &dispatch,
            &PromiseAttributes::Generic(serde_json::Value::Null),
            &p,
            1,
            identity,
        )
        .unwrap();
        assert_eq!(second, Outcome::Skipped);

        let third = actuate_promise(
            &mut ctx,
            &db,
            &dispatch,
            &PromiseAttributes::Generic(serde_json::Value::Null),
            &p,
            61,
            identity,
        )
        .unwrap();
        assert_eq!(third, Outcome::Change);

        // §7 compliance summary: two repaired (Change), one kept (Skipped).
        let summary = ctx.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.repaired, 2);
        assert_eq!(summary.kept, 1);
        assert_eq!(summary.not_repaired, 0);
    }

    #[test]
    fn unknown_promise_type_is_a_policy_error() {
        let (_dir, db, dispatch) = setup();
        let mut ctx = EvalContext::new();
        let mut p = promise();
        p.promise_type = "exotic".into();

        let err = actuate_promise(
            &mut ctx,
            &db,
            &dispatch,
            &PromiseAttributes::Generic(serde_json::Value::Null),
            &p,
            0,
            AgentIdentity { pid: 1, host_hash: 1 },
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Policy);
    }

    #[test]
    fn recursion_overflow_past_default_depth_is_an_error() {
        assert!(check_recursion_depth(MAX_BUNDLE_RECURSION_DEPTH).is_ok());
        assert!(check_recursion_depth(MAX_BUNDLE_RECURSION_DEPTH + 1).is_err());
    }
}
