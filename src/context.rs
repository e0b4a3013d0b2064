//! Evaluation context (§4.G): stacked scopes of classes and variables, a
//! class table scanned by regex, a weakly-typed variable table, and the
//! iterator driver that expands `@(list)` references into a promise's
//! cartesian product.
//!
//! Grounded on `dashflow/src/introspection`'s stacked execution-state
//! pattern (push on entry, pop on exit, guaranteed pop via an RAII guard)
//! generalized from "track one execution's call stack" to "track nested
//! bundle scopes with classes and variables that expire at scope exit
//! unless tagged namespace-lifetime."

use crate::expr::class_expr::ClassExpr;
use crate::expr::regex_engine::CompiledRegex;
use crate::expr::string_expr::RefKind;
use crate::expr::varref::VarRef;
use crate::expr::Tristate;
use indexmap::IndexMap;
use std::collections::HashMap;
use thiserror::Error;

/// Evaluation-context errors (§4.G, §7 "Context error").
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A variable was re-assigned within the same promise with a different
    /// declared type than its existing binding (§4.G invariant).
    #[error("variable {lval} retyped from {old:?} to {new:?} within the same promise")]
    TypeConflict { lval: String, old: DataType, new: DataType },

    /// A referenced variable or class could not be resolved and was not
    /// declared optional; contaminates the enclosing expression.
    #[error("unresolved reference: {0}")]
    Unresolved(String),

    #[error(transparent)]
    Expr(#[from] crate::expr::Error),
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> crate::error::ErrorKind {
        crate::error::ErrorKind::Context
    }
}

/// Weak variable typing: every binding carries a type tag (§4.G).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Scalar,
    List,
    Data,
}

/// Where a class or variable's lifetime ends: at namespace teardown (never,
/// for the process lifetime) or at the owning bundle scope's exit (§3
/// Class.scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    Namespace,
    Bundle,
}

/// A class as defined in §3: namespace + canonicalized name, hard/soft,
/// lifetime, and free-form tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Class {
    pub namespace: String,
    pub name: String,
    pub is_hard: bool,
    pub lifetime: Lifetime,
    pub tags: Vec<String>,
}

impl Class {
    #[must_use]
    pub fn fully_qualified(&self) -> String {
        format!("{}:{}", self.namespace, self.name)
    }
}

/// Canonicalize a class or variable name: non-alphanumerics become `_`
/// (§3: "`my.host` and `my_host` collide by design").
#[must_use]
pub fn canonicalize_name(name: &str) -> String {
    name.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect()
}

const DEFAULT_NAMESPACE: &str = "default";

#[derive(Clone)]
struct VarBinding {
    value: String,
    datatype: DataType,
    tags: Vec<String>,
    lifetime: Lifetime,
}

/// One frame of the scope stack, pushed on bundle entry and popped on
/// exit. Tracks which class/variable keys this frame introduced so `pop`
/// can evict bundle-lifetime entries without scanning the whole table.
struct Frame {
    kind: Lifetime,
    #[allow(dead_code)]
    name: String,
    classes_added: Vec<String>,
    vars_added: Vec<String>,
}

/// The process-wide evaluation context (§9: "Global mutable state...
/// encapsulate in an `Agent` value"; this is that value's class/variable
/// half). Not `Clone` — there is exactly one per agent run.
pub struct EvalContext {
    scopes: Vec<Frame>,
    classes: IndexMap<String, Class>,
    vars: HashMap<String, VarBinding>,
    outcome_counts: HashMap<&'static str, u64>,
    summary: crate::actuation::outcome::Summary,
}

impl Default for EvalContext {
    fn default() -> Self {
        Self::new()
    }
}

impl EvalContext {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scopes: Vec::new(),
            classes: IndexMap::new(),
            vars: HashMap::new(),
            outcome_counts: HashMap::new(),
            summary: crate::actuation::outcome::Summary::default(),
        }
    }

    /// Push a new scope frame (bundle entry). Must be paired with exactly
    /// one [`EvalContext::pop_scope`] on every exit path — callers that
    /// want an RAII guarantee should use [`EvalContext::scoped`].
    pub fn push_scope(&mut self, kind: Lifetime, name: impl Into<String>) {
        self.scopes.push(Frame { kind, name: name.into(), classes_added: Vec::new(), vars_added: Vec::new() });
    }

    /// Pop the current scope. Deletes every class/variable this frame
    /// introduced whose own lifetime is [`Lifetime::Bundle`]; entries
    /// tagged [`Lifetime::Namespace`] survive regardless of which frame
    /// added them (§4.G).
    pub fn pop_scope(&mut self) {
        let Some(frame) = self.scopes.pop() else { return };
        if frame.kind == Lifetime::Namespace {
            // A namespace-kind frame never evicts namespace-lifetime
            // entries; only its own bundle-lifetime locals, same as any
            // other frame.
        }
        for key in frame.classes_added {
            if self.classes.get(&key).map(|c| c.lifetime) == Some(Lifetime::Bundle) {
                self.classes.shift_remove(&key);
            }
        }
        for key in frame.vars_added {
            if self.vars.get(&key).map(|v| v.lifetime) == Some(Lifetime::Bundle) {
                self.vars.remove(&key);
            }
        }
    }

    /// Run `f` inside a pushed scope, guaranteeing the matching pop even if
    /// `f` returns early (§3 Lifecycle: "push on bundle entry, pop on
    /// exit, guaranteed pop on all exit paths").
    pub fn scoped<T>(&mut self, kind: Lifetime, name: impl Into<String>, f: impl FnOnce(&mut Self) -> T) -> T {
        self.push_scope(kind, name);
        let result = f(self);
        self.pop_scope();
        result
    }

    /// Insert or overwrite a class. Name is canonicalized on insert (§3).
    pub fn class_put(&mut self, namespace: &str, name: &str, is_hard: bool, lifetime: Lifetime, tags: Vec<String>) {
        let canon = canonicalize_name(name);
        let class = Class { namespace: namespace.to_string(), name: canon, is_hard, lifetime, tags };
        let key = class.fully_qualified();
        self.classes.insert(key.clone(), class);
        if let Some(frame) = self.scopes.last_mut() {
            frame.classes_added.push(key);
        }
    }

    pub fn class_remove(&mut self, namespace: &str, name: &str) {
        let key = format!("{namespace}:{}", canonicalize_name(name));
        self.classes.shift_remove(&key);
    }

    #[must_use]
    pub fn class_is_set(&self, namespace: &str, name: &str) -> bool {
        let key = format!("{namespace}:{}", canonicalize_name(name));
        self.classes.contains_key(&key)
    }

    /// Scan all classes (insertion order) for the first whose fully
    /// qualified name matches `regex` (§4.G `class_match`).
    #[must_use]
    pub fn class_match(&self, regex: &CompiledRegex) -> Option<&Class> {
        self.classes.values().find(|c| regex.partial_match(&c.fully_qualified()))
    }

    fn var_key(r: &VarRef) -> String {
        format!(
            "{}:{}.{}",
            r.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE),
            r.scope.as_deref().unwrap_or(""),
            r.lval
        )
    }

    /// Bind a variable. If a binding already exists for this reference with
    /// a *different* declared type, this is a [`Error::TypeConflict`]
    /// (§4.G: type tags must not change on re-assignment within the same
    /// promise).
    pub fn var_put(
        &mut self,
        r: &VarRef,
        value: impl Into<String>,
        datatype: DataType,
        lifetime: Lifetime,
        tags: Vec<String>,
    ) -> Result<(), Error> {
        let key = Self::var_key(r);
        if let Some(existing) = self.vars.get(&key) {
            if existing.datatype != datatype {
                return Err(Error::TypeConflict { lval: r.lval.clone(), old: existing.datatype, new: datatype });
            }
        }
        self.vars.insert(key.clone(), VarBinding { value: value.into(), datatype, tags, lifetime });
        if let Some(frame) = self.scopes.last_mut() {
            frame.vars_added.push(key);
        }
        Ok(())
    }

    #[must_use]
    pub fn var_get(&self, r: &VarRef) -> Option<(&str, DataType)> {
        self.vars.get(&Self::var_key(r)).map(|b| (b.value.as_str(), b.datatype))
    }

    pub fn var_remove(&mut self, r: &VarRef) {
        self.vars.remove(&Self::var_key(r));
    }

    /// Evaluate a class expression against this context: unresolved names
    /// are [`Tristate::Error`] (§4.F/§4.G integration).
    pub fn eval_class_expr(&self, expr: &ClassExpr) -> Tristate {
        let mut name_eval = |name: &str| -> Tristate { self.class_is_set(DEFAULT_NAMESPACE, name).into() };
        let mut varref_eval = |name: &str, _kind: RefKind| -> Result<String, crate::expr::Error> {
            let r = crate::expr::varref::parse(name).map_err(crate::expr::Error::from)?;
            match self.var_get(&r) {
                Some((value, _)) => Ok(value.to_string()),
                None => Err(crate::expr::Error::Syntax(format!("unresolved variable {name}"))),
            }
        };
        expr.eval(&mut name_eval, &mut varref_eval)
    }

    /// Record that `promise_type` produced `outcome`, for the run summary
    /// (§4.G `report_outcome`, §7 compliance summary line).
    pub fn report_outcome(&mut self, promise_type: &'static str, outcome: crate::actuation::outcome::Outcome) {
        *self.outcome_counts.entry(promise_type).or_insert(0) += 1;
        self.summary.record(outcome);
    }

    #[must_use]
    pub fn outcome_count(&self, promise_type: &'static str) -> u64 {
        self.outcome_counts.get(promise_type).copied().unwrap_or(0)
    }

    /// The running §7 compliance tally (kept/repaired/not-repaired) across
    /// every outcome reported so far this run.
    #[must_use]
    pub fn summary(&self) -> crate::actuation::outcome::Summary {
        self.summary
    }
}

/// Lazy, restartable cartesian-product driver over a promise's `@(list)`
/// references (§4.G `iterate`, §9 "Iterator expansion"). Holds only the
/// source lists and a cursor vector; allocation is proportional to the
/// cartesian *width* (number of lists), not the product.
///
/// Iteration order is the cartesian product in the textual order the list
/// references appeared in the promise, lexicographic within each list
/// unless the caller has already sorted a list marked "ordered" (§5).
pub struct CartesianProduct {
    lists: Vec<Vec<String>>,
    cursor: Option<Vec<usize>>,
}

impl CartesianProduct {
    /// `lists` is one entry per distinct `@(list)` reference, in the
    /// textual order those references appeared.
    #[must_use]
    pub fn new(lists: Vec<Vec<String>>) -> Self {
        let cursor = if lists.iter().any(Vec::is_empty) { None } else { Some(vec![0; lists.len()]) };
        Self { lists, cursor }
    }
}

impl Iterator for CartesianProduct {
    type Item = Vec<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.cursor.as_mut()?;
        if self.lists.is_empty() {
            self.cursor = None;
            return Some(Vec::new());
        }
        let tuple: Vec<String> =
            cursor.iter().zip(&self.lists).map(|(&i, list)| list[i].clone()).collect();

        let mut carry = self.lists.len();
        loop {
            if carry == 0 {
                self.cursor = None;
                break;
            }
            carry -= 1;
            cursor[carry] += 1;
            if cursor[carry] < self.lists[carry].len() {
                break;
            }
            cursor[carry] = 0;
        }
        Some(tuple)
    }
}
