//! Class expressions (§4.F): boolean combinations of string-expression
//! primaries, evaluated against a caller-supplied `name_eval`.
//!
//! Grammar, lowest to highest precedence: `|`/`||` (or) → `.`/`&` (and) →
//! `!` (not) → `(…)` → primary. A primary is a string expression; its
//! evaluated value is tested by `name_eval(name) -> Tristate`.

use super::string_expr::{self, RefKind, StringExpr};
use super::{Error, Tristate};

/// A parsed class expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassExpr {
    Primary(StringExpr),
    Not(Box<ClassExpr>),
    And(Box<ClassExpr>, Box<ClassExpr>),
    Or(Box<ClassExpr>, Box<ClassExpr>),
}

impl ClassExpr {
    /// Evaluate with De Morgan / short-circuit semantics (§4.F, §8 property
    /// 9): `Or(True, _) = True`, `And(False, _) = False`; an `Error`
    /// anywhere else contaminates the result unless the other branch is
    /// decisive.
    pub fn eval(
        &self,
        name_eval: &mut dyn FnMut(&str) -> Tristate,
        varref_eval: &mut dyn FnMut(&str, RefKind) -> Result<String, Error>,
    ) -> Tristate {
        match self {
            ClassExpr::Primary(expr) => match expr.eval(varref_eval) {
                Ok(name) => name_eval(&name),
                Err(_) => Tristate::Error,
            },
            ClassExpr::Not(inner) => match inner.eval(name_eval, varref_eval) {
                Tristate::True => Tristate::False,
                Tristate::False => Tristate::True,
                Tristate::Error => Tristate::Error,
            },
            ClassExpr::And(a, b) => {
                let left = a.eval(name_eval, varref_eval);
                if left == Tristate::False {
                    return Tristate::False;
                }
                let right = b.eval(name_eval, varref_eval);
                match (left, right) {
                    (_, Tristate::False) => Tristate::False,
                    (Tristate::True, Tristate::True) => Tristate::True,
                    _ => Tristate::Error,
                }
            }
            ClassExpr::Or(a, b) => {
                let left = a.eval(name_eval, varref_eval);
                if left == Tristate::True {
                    return Tristate::True;
                }
                let right = b.eval(name_eval, varref_eval);
                match (left, right) {
                    (_, Tristate::True) => Tristate::True,
                    (Tristate::False, Tristate::False) => Tristate::False,
                    _ => Tristate::Error,
                }
            }
        }
    }
}

/// Recursive-descent parser over the precedence chain `or → and → not →
/// parenthesized → primary`.
pub fn parse(input: &str) -> Result<ClassExpr, Error> {
    let tokens: Vec<char> = input.chars().filter(|c| !c.is_whitespace()).collect();
    let mut pos = 0;
    let expr = parse_or(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(Error::Syntax(format!("unexpected trailing input at offset {pos}")));
    }
    Ok(expr)
}

fn parse_or(tokens: &[char], pos: &mut usize) -> Result<ClassExpr, Error> {
    let mut left = parse_and(tokens, pos)?;
    while matches!(tokens.get(*pos), Some('|')) {
        *pos += 1;
        if matches!(tokens.get(*pos), Some('|')) {
            *pos += 1;
        }
        let right = parse_and(tokens, pos)?;
        left = ClassExpr::Or(Box::new(left), Box::new(right));
    }
    Ok(left)
}

fn parse_and(tokens: &[char], pos: &mut usize) -> Result<ClassExpr, Error> {
    let mut left = parse_not(tokens, pos)?;
    while matches!(tokens.get(*pos), Some('.') | Some('&')) {
        *pos += 1;
        let right = parse_not(tokens, pos)?;
        left = ClassExpr::And(Box::new(left), Box::new(right));
    }
    Ok(left)
}

fn parse_not(tokens: &[char], pos: &mut usize) -> Result<ClassExpr, Error> {
    if matches!(tokens.get(*pos), Some('!')) {
        *pos += 1;
        let inner = parse_not(tokens, pos)?;
        return Ok(ClassExpr::Not(Box::new(inner)));
    }
    parse_group(tokens, pos)
}

fn parse_group(tokens: &[char], pos: &mut usize) -> Result<ClassExpr, Error> {
    if matches!(tokens.get(*pos), Some('(')) {
        *pos += 1;
        let inner = parse_or(tokens, pos)?;
        if !matches!(tokens.get(*pos), Some(')')) {
            return Err(Error::Syntax("expected closing ')'".into()));
        }
        *pos += 1;
        return Ok(inner);
    }
    parse_primary(tokens, pos)
}

fn parse_primary(tokens: &[char], pos: &mut usize) -> Result<ClassExpr, Error> {
    let start = *pos;
    let mut depth = 0usize;
    while *pos < tokens.len() {
        match tokens[*pos] {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            '|' | '.' | '&' | '!' | ')' if depth == 0 => break,
            _ => {}
        }
        *pos += 1;
    }
    if *pos == start {
        return Err(Error::Syntax(format!("expected a primary at offset {start}")));
    }
    let text: String = tokens[start..*pos].iter().collect();
    let expr = string_expr::parse(&text)?;
    Ok(ClassExpr::Primary(expr))
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn eval(input: &str, names: &[(&str, bool)]) -> Tristate {
        let expr = parse(input).unwrap();
        expr.eval(
            &mut |name| names.iter().find(|(n, _)| *n == name).map_or(Tristate::Error, |(_, v)| (*v).into()),
            &mut |name, _kind| Ok(name.to_string()),
        )
    }

    #[test]
    fn de_morgan_not_or() {
        // !(a|b) == !a & !b
        for (a, b) in [(true, true), (true, false), (false, true), (false, false)] {
            let names = [("a", a), ("b", b)];
            let lhs = eval("!(a|b)", &names);
            let rhs = eval("!a&!b", &names);
            assert_eq!(lhs, rhs, "a={a} b={b}");
        }
    }

    #[test]
    fn de_morgan_not_and() {
        for (a, b) in [(true, true), (true, false), (false, true), (false, false)] {
            let names = [("a", a), ("b", b)];
            let lhs = eval("!(a.b)", &names);
            let rhs = eval("!a|!b", &names);
            assert_eq!(lhs, rhs, "a={a} b={b}");
        }
    }

    #[test]
    fn decisive_branch_short_circuits_the_error() {
        // Or(True, Error) = True; the unresolved branch never contaminates
        // a decisive result.
        assert_eq!(eval("a|unresolved", &[("a", true)]), Tristate::True);
        assert_eq!(eval("a&unresolved", &[("a", false)]), Tristate::False);
    }

    #[test]
    fn error_propagates_when_not_decisive() {
        assert_eq!(eval("a|unresolved", &[("a", false)]), Tristate::Error);
        assert_eq!(eval("a&unresolved", &[("a", true)]), Tristate::Error);
    }

    #[test]
    fn scenario_s3_nested_not_or_and() {
        let names = [("linux", true), ("x86_64", true), ("darwin", false), ("any", true)];
        assert_eq!(eval("!(linux.x86_64|darwin)&any", &names), Tristate::False);
    }
}
