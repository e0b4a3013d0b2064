//! String expressions (§4.F): literal text interleaved with `$(scalar)` and
//! `@(list)` variable references, evaluated left to right with fail-fast
//! concatenation.

use super::Error;

/// Which sigil introduced a variable reference — flows through to the
/// caller so list references can become iteration sources instead of flat
/// strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// `$(...)`.
    Scalar,
    /// `@(...)`.
    List,
}

/// A parsed string expression.
#[derive(Debug, Clone, PartialEq)]
pub enum StringExpr {
    Literal(String),
    Concat(Box<StringExpr>, Box<StringExpr>),
    VarRef { name_expr: Box<StringExpr>, kind: RefKind },
}

impl StringExpr {
    #[must_use]
    pub fn literal(s: impl Into<String>) -> Self {
        StringExpr::Literal(s.into())
    }

    #[must_use]
    pub fn concat(a: StringExpr, b: StringExpr) -> Self {
        StringExpr::Concat(Box::new(a), Box::new(b))
    }

    /// Evaluate this expression. `varref_eval` is called with the evaluated
    /// name and the sigil kind; it returns the substituted text (for a list
    /// reference, the caller decides what "the evaluated text" of a list
    /// means — e.g. joining, or a sentinel the iterator layer recognizes).
    pub fn eval(&self, varref_eval: &mut dyn FnMut(&str, RefKind) -> Result<String, Error>) -> Result<String, Error> {
        match self {
            StringExpr::Literal(s) => Ok(s.clone()),
            StringExpr::Concat(a, b) => {
                let left = a.eval(varref_eval)?;
                let right = b.eval(varref_eval)?;
                Ok(left + &right)
            }
            StringExpr::VarRef { name_expr, kind } => {
                let name = name_expr.eval(varref_eval)?;
                varref_eval(&name, *kind)
            }
        }
    }
}

/// Parse `input` into a [`StringExpr`], recognizing `$(...)` and `@(...)`
/// references (which may nest, since an index or variable name may itself
/// contain a reference) interleaved with literal text.
pub fn parse(input: &str) -> Result<StringExpr, Error> {
    let chars: Vec<char> = input.chars().collect();
    let (expr, consumed) = parse_sequence(&chars, 0)?;
    if consumed != chars.len() {
        return Err(Error::Syntax(format!("trailing input at offset {consumed}")));
    }
    Ok(expr)
}

fn parse_sequence(chars: &[char], mut pos: usize) -> Result<(StringExpr, usize), Error> {
    let mut result: Option<StringExpr> = None;
    let mut literal = String::new();

    let flush_literal = |result: &mut Option<StringExpr>, literal: &mut String| {
        if !literal.is_empty() {
            let piece = StringExpr::Literal(std::mem::take(literal));
            *result = Some(match result.take() {
                Some(existing) => StringExpr::concat(existing, piece),
                None => piece,
            });
        }
    };

    while pos < chars.len() {
        let kind = match (chars.get(pos), chars.get(pos + 1)) {
            (Some('$'), Some('(')) => Some(RefKind::Scalar),
            (Some('@'), Some('(')) => Some(RefKind::List),
            _ => None,
        };

        if let Some(kind) = kind {
            flush_literal(&mut result, &mut literal);
            let open = pos + 1;
            let close = find_matching_paren(chars, open)?;
            let (inner, inner_consumed) = parse_sequence(&chars[open + 1..close], 0)?;
            if inner_consumed != close - open - 1 {
                return Err(Error::Syntax("malformed variable reference body".into()));
            }
            let node = StringExpr::VarRef { name_expr: Box::new(inner), kind };
            result = Some(match result.take() {
                Some(existing) => StringExpr::concat(existing, node),
                None => node,
            });
            pos = close + 1;
            continue;
        }

        if chars[pos] == ')' {
            // End of an enclosing reference body; let the caller consume it.
            break;
        }

        literal.push(chars[pos]);
        pos += 1;
    }

    flush_literal(&mut result, &mut literal);
    Ok((result.unwrap_or_else(|| StringExpr::literal("")), pos))
}

fn find_matching_paren(chars: &[char], open: usize) -> Result<usize, Error> {
    let mut depth = 0usize;
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    Err(Error::Syntax("unterminated variable reference".into()))
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn eval_with(expr: &StringExpr, vars: &[(&str, &str)]) -> String {
        expr.eval(&mut |name, _kind| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
                .ok_or_else(|| Error::Syntax(format!("unresolved {name}")))
        })
        .unwrap()
    }

    #[test]
    fn literal_only() {
        let expr = parse("plain text").unwrap();
        assert_eq!(eval_with(&expr, &[]), "plain text");
    }

    #[test]
    fn scalar_reference_is_substituted() {
        let expr = parse("hello $(name)!").unwrap();
        assert_eq!(eval_with(&expr, &[("name", "world")]), "hello world!");
    }

    #[test]
    fn list_reference_kind_is_reported() {
        let expr = parse("@(mylist)").unwrap();
        let mut seen_kind = None;
        let result = expr
            .eval(&mut |name, kind| {
                seen_kind = Some(kind);
                Ok(format!("<{name}>"))
            })
            .unwrap();
        assert_eq!(result, "<mylist>");
        assert_eq!(seen_kind, Some(RefKind::List));
    }

    #[test]
    fn nested_reference_in_index_evaluates_inner_first() {
        let expr = parse("$(other[$(x)])").unwrap();
        let result = expr
            .eval(&mut |name, _kind| {
                if name == "x" {
                    Ok("0".to_string())
                } else {
                    Ok(format!("value_of_{name}"))
                }
            })
            .unwrap();
        assert_eq!(result, "value_of_other[0]");
    }

    #[test]
    fn failing_sub_evaluation_fails_the_whole_expression() {
        let expr = parse("a$(missing)b").unwrap();
        let err = expr.eval(&mut |_name, _kind| Err(Error::Syntax("boom".into())));
        assert!(err.is_err());
    }

    #[test]
    fn unterminated_reference_is_a_syntax_error() {
        assert!(parse("$(unterminated").is_err());
    }
}
