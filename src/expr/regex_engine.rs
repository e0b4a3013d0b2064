//! Thin wrapper around `regex` (§4.F), configured MULTILINE + DOTALL to
//! match the PCRE-compatible behavior the policy language expects.

use super::Error;
use regex::Regex;

/// A compiled regular expression.
pub struct CompiledRegex {
    inner: Regex,
}

/// One capture, either positional or named. §8 property 12: named captures
/// appear in enumeration order, and every named capture also has a numeric
/// alias equal to its group index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    Positional { index: usize, value: Option<String> },
    Named { name: String, index: usize, value: Option<String> },
}

impl CompiledRegex {
    /// Compile `pattern` with MULTILINE (`^`/`$` match at line boundaries)
    /// and DOTALL (`.` matches newlines) enabled, as §4.F requires.
    pub fn compile(pattern: &str) -> Result<Self, Error> {
        let wrapped = format!("(?ms){pattern}");
        let inner = Regex::new(&wrapped).map_err(|e| Error::Regex(e.to_string()))?;
        Ok(Self { inner })
    }

    #[must_use]
    pub fn full_match(&self, text: &str) -> bool {
        self.inner.find(text).is_some_and(|m| m.start() == 0 && m.end() == text.len())
    }

    #[must_use]
    pub fn partial_match(&self, text: &str) -> bool {
        self.inner.is_match(text)
    }

    /// All captures from the first match, positional entries interleaved
    /// with their named aliases in group-index order.
    #[must_use]
    pub fn captures(&self, text: &str) -> Option<Vec<Capture>> {
        let caps = self.inner.captures(text)?;
        let names: Vec<Option<&str>> = self.inner.capture_names().collect();

        let mut out = Vec::with_capacity(names.len());
        for (index, name) in names.into_iter().enumerate() {
            let value = caps.get(index).map(|m| m.as_str().to_string());
            if let Some(name) = name {
                out.push(Capture::Named { name: name.to_string(), index, value: value.clone() });
            }
            out.push(Capture::Positional { index, value });
        }
        Some(out)
    }

    #[must_use]
    pub fn replace_all(&self, text: &str, replacement: &str) -> String {
        self.inner.replace_all(text, replacement).into_owned()
    }
}
