//! Expression engines (§4.F): class expressions, string expressions,
//! variable-reference parsing, and the regex wrapper they're all built on.

pub mod class_expr;
pub mod regex_engine;
pub mod string_expr;
pub mod varref;

use thiserror::Error;

/// Expression engine errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("syntax error in expression: {0}")]
    Syntax(String),

    #[error("invalid regular expression: {0}")]
    Regex(String),

    #[error("{name} is a reserved variable name")]
    ReservedName { name: String },
}

/// Three-valued logic result of evaluating a class expression (§4.F): an
/// unresolved reference contaminates the result rather than defaulting to
/// either boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tristate {
    True,
    False,
    Error,
}

impl From<bool> for Tristate {
    fn from(b: bool) -> Self {
        if b {
            Tristate::True
        } else {
            Tristate::False
        }
    }
}
