//! Variable-reference parsing and qualification (§4.F).
//!
//! Syntax: `plain`, `scope.lval`, `ns:scope.lval`, any of these followed by
//! one or more `[index]` terms. Indices may contain dots, colons, and
//! nested variable references; the parser recovers each index substring
//! verbatim so inner expansion can happen later, at evaluation time.

use super::Error;

/// The handful of names the language reserves and rejects as variables
/// (§4.F).
pub const RESERVED_NAMES: &[&str] =
    &["promiser", "handle", "promise_filename", "promise_dirname", "promise_linenumber", "this"];

/// Special scopes that, when they appear as the first dotted component of
/// an unqualified reference, absorb only the scope (leaving namespace
/// empty) rather than being treated as an ordinary bundle-local lval.
const SPECIAL_SCOPES: &[&str] = &["sys", "const", "this", "match", "mon", "def"];

/// A parsed (and possibly qualified) variable reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarRef {
    pub namespace: Option<String>,
    pub scope: Option<String>,
    pub lval: String,
    pub indices: Vec<String>,
}

impl VarRef {
    /// Render back to the canonical textual form: `ns:scope.lval[i1][i2]`,
    /// omitting `ns:`/`scope.` when absent.
    #[must_use]
    pub fn to_string_qualified(&self) -> String {
        let mut out = String::new();
        if let Some(ns) = &self.namespace {
            out.push_str(ns);
            out.push(':');
        }
        if let Some(scope) = &self.scope {
            out.push_str(scope);
            out.push('.');
        }
        out.push_str(&self.lval);
        for idx in &self.indices {
            out.push('[');
            out.push_str(idx);
            out.push(']');
        }
        out
    }

    /// Qualify an unqualified reference against `default_bundle`'s
    /// namespace and scope, unless the reference's scope component matches
    /// a special scope (§4.F: "only the scope is set and the namespace is
    /// left empty").
    #[must_use]
    pub fn qualify(mut self, default_namespace: &str, default_bundle: &str) -> Self {
        if self.namespace.is_some() {
            return self;
        }
        match &self.scope {
            Some(scope) if SPECIAL_SCOPES.contains(&scope.as_str()) => self,
            Some(_) => {
                self.namespace = Some(default_namespace.to_string());
                self
            }
            None => {
                self.namespace = Some(default_namespace.to_string());
                self.scope = Some(default_bundle.to_string());
                self
            }
        }
    }
}

/// Parse a variable reference from its textual form.
pub fn parse(input: &str) -> Result<VarRef, Error> {
    let chars: Vec<char> = input.chars().collect();
    let mut pos = 0;

    // Namespace: `ident:` only recognized before any `.` or `[`.
    let namespace = {
        let mut i = pos;
        while i < chars.len() && chars[i] != ':' && chars[i] != '.' && chars[i] != '[' {
            i += 1;
        }
        if i < chars.len() && chars[i] == ':' {
            let ns: String = chars[pos..i].iter().collect();
            pos = i + 1;
            Some(ns)
        } else {
            None
        }
    };

    // scope.lval: look for a `.` before any `[`.
    let head_end = {
        let mut i = pos;
        while i < chars.len() && chars[i] != '[' {
            i += 1;
        }
        i
    };
    let head: String = chars[pos..head_end].iter().collect();
    pos = head_end;

    let (scope, lval) = match head.split_once('.') {
        Some((s, l)) => (Some(s.to_string()), l.to_string()),
        None => (None, head),
    };

    if lval.is_empty() {
        return Err(Error::Syntax("empty variable name".into()));
    }
    if RESERVED_NAMES.contains(&lval.as_str()) {
        return Err(Error::ReservedName { name: lval });
    }

    let mut indices = Vec::new();
    while pos < chars.len() {
        if chars[pos] != '[' {
            return Err(Error::Syntax(format!("unexpected character at offset {pos}")));
        }
        let open = pos;
        let close = find_matching_bracket(&chars, open)?;
        indices.push(chars[open + 1..close].iter().collect());
        pos = close + 1;
    }

    Ok(VarRef { namespace, scope, lval, indices })
}

fn find_matching_bracket(chars: &[char], open: usize) -> Result<usize, Error> {
    let mut depth = 0usize;
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    Err(Error::Syntax("unterminated index".into()))
}
