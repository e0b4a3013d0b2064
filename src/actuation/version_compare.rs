//! Package version comparison (§4.H).
//!
//! Two version strings are split into runs of alphanumerics separated by
//! runs of non-alphanumerics; `~` sorts before every other character
//! (including end-of-string); numeric runs compare by magnitude with
//! leading zeros stripped; the longer tail wins if heads tie. Epoch-colon
//! (`1:2.3`) and release-dash (`2.3-4`) are honored as in standard package
//! versioning — this is dpkg's `verrevcmp`, which the source's built-in
//! comparator is itself modeled on.

use std::cmp::Ordering;

/// Compare two full version strings: `[epoch:]upstream[-revision]`.
///
/// Epoch defaults to `0` when absent and is compared numerically first;
/// ties fall through to comparing `upstream` then `revision` as version
/// parts (§8 property 8: this is a total order — antisymmetric,
/// transitive, and `a<b` iff `!(b<a) && a≠b`).
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (epoch_a, rest_a) = split_epoch(a);
    let (epoch_b, rest_b) = split_epoch(b);
    match epoch_a.cmp(&epoch_b) {
        Ordering::Equal => {}
        other => return other,
    }

    let (upstream_a, revision_a) = split_revision(rest_a);
    let (upstream_b, revision_b) = split_revision(rest_b);
    match compare_version_part(upstream_a, upstream_b) {
        Ordering::Equal => compare_version_part(revision_a, revision_b),
        other => other,
    }
}

fn split_epoch(v: &str) -> (u64, &str) {
    match v.split_once(':') {
        Some((epoch, rest)) if epoch.chars().all(|c| c.is_ascii_digit()) && !epoch.is_empty() => {
            (epoch.parse().unwrap_or(0), rest)
        }
        _ => (0, v),
    }
}

fn split_revision(v: &str) -> (&str, &str) {
    match v.rfind('-') {
        Some(idx) => (&v[..idx], &v[idx + 1..]),
        None => (v, ""),
    }
}

/// `order()` from dpkg's `verrevcmp`: `~` sorts lowest of all, digits sort
/// as `0` (handled separately by the numeric-run branch below), letters
/// sort by codepoint, and every other byte sorts above letters.
fn char_order(c: Option<char>) -> i32 {
    match c {
        None => 0,
        Some('~') => -1,
        Some(c) if c.is_ascii_digit() => 0,
        Some(c) if c.is_ascii_alphabetic() => c as i32,
        Some(c) => c as i32 + 256,
    }
}

/// Compare one version part (upstream or revision) per the alternating
/// non-digit/digit-run algorithm.
fn compare_version_part(a: &str, b: &str) -> Ordering {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (mut i, mut j) = (0, 0);

    loop {
        // Non-digit run: compare character by character via `char_order`
        // until both sides hit a digit or end.
        while (i < a.len() && !a[i].is_ascii_digit()) || (j < b.len() && !b[j].is_ascii_digit()) {
            let ac = char_order(a.get(i).copied());
            let bc = char_order(b.get(j).copied());
            if ac != bc {
                return ac.cmp(&bc);
            }
            if i < a.len() && !a[i].is_ascii_digit() {
                i += 1;
            }
            if j < b.len() && !b[j].is_ascii_digit() {
                j += 1;
            }
        }

        while a.get(i) == Some(&'0') {
            i += 1;
        }
        while b.get(j) == Some(&'0') {
            j += 1;
        }

        let digits_start = (i, j);
        while i < a.len() && a[i].is_ascii_digit() && j < b.len() && b[j].is_ascii_digit() {
            i += 1;
            j += 1;
        }

        let a_has_more_digits = i < a.len() && a[i].is_ascii_digit();
        let b_has_more_digits = j < b.len() && b[j].is_ascii_digit();
        if a_has_more_digits && !b_has_more_digits {
            return Ordering::Greater;
        }
        if b_has_more_digits && !a_has_more_digits {
            return Ordering::Less;
        }

        // Equal-length digit runs: compare lexicographically (no leading
        // zeros left after stripping, so this is magnitude comparison).
        let a_run: String = a[digits_start.0..i].iter().collect();
        let b_run: String = b[digits_start.1..j].iter().collect();
        match a_run.cmp(&b_run) {
            Ordering::Equal => {}
            other => return other,
        }

        if i >= a.len() && j >= b.len() {
            return Ordering::Equal;
        }
    }
}

/// A policy-supplied external comparator: the built-in algorithm above is
/// used unless the policy supplies explicit `<`/`=` commands, in which case
/// those are invoked with the two versions bound to reserved variables and
/// their exit code consulted (§4.H).
pub trait ExternalComparator {
    /// Errors are caller-defined; a failing invocation should propagate as
    /// a Resource error per §7.
    fn less_than(&self, a: &str, b: &str) -> Result<bool, crate::error::Error>;
}

/// `a == b` synthesized from `<` alone, per §4.H: `!(a<b) && !(b<a)`.
pub fn equal_via_less_than(cmp: &dyn ExternalComparator, a: &str, b: &str) -> Result<bool, crate::error::Error> {
    Ok(!cmp.less_than(a, b)? && !cmp.less_than(b, a)?)
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_s2_numeric_magnitude_beats_lexical_order() {
        assert_eq!(compare_versions("1.2.3", "1.2.10"), Ordering::Less);
    }

    #[test]
    fn scenario_s2_tilde_sorts_before_suffix() {
        assert_eq!(compare_versions("1.2-3", "1.2-3~rc1"), Ordering::Greater);
    }

    #[test]
    fn epoch_dominates_upstream_version() {
        assert_eq!(compare_versions("1:0.9", "2.0"), Ordering::Greater);
    }

    #[test]
    fn longer_tail_wins_when_heads_tie() {
        assert_eq!(compare_versions("1.0", "1.0.1"), Ordering::Less);
    }

    #[test]
    fn leading_zeros_are_stripped_before_magnitude_compare() {
        assert_eq!(compare_versions("1.007", "1.7"), Ordering::Equal);
    }

    #[test]
    fn totality_antisymmetric_and_transitive_over_a_sample_set() {
        let versions = ["1.0~rc1", "1.0", "1.0.1", "1.0-2", "2:0.1", "1.0a", "1.0-1~beta"];
        for &a in &versions {
            assert_eq!(compare_versions(a, a), Ordering::Equal);
            for &b in &versions {
                let ab = compare_versions(a, b);
                let ba = compare_versions(b, a);
                assert_eq!(ab, ba.reverse(), "antisymmetry failed for {a} vs {b}");
                for &c in &versions {
                    let bc = compare_versions(b, c);
                    let ac = compare_versions(a, c);
                    if ab == Ordering::Less && bc == Ordering::Less {
                        assert_eq!(ac, Ordering::Less, "transitivity failed for {a} < {b} < {c}");
                    }
                }
            }
        }
    }

    struct FakeComparator;
    impl ExternalComparator for FakeComparator {
        fn less_than(&self, a: &str, b: &str) -> Result<bool, crate::error::Error> {
            Ok(compare_versions(a, b) == Ordering::Less)
        }
    }

    #[test]
    fn equal_via_less_than_matches_direct_comparison() {
        let cmp = FakeComparator;
        assert!(equal_via_less_than(&cmp, "1.0", "1.0").unwrap());
        assert!(!equal_via_less_than(&cmp, "1.0", "1.1").unwrap());
    }
}
