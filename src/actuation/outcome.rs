//! The promise outcome lattice (§3, §4.H): `Skipped < NoOp < Change < Warn
//! < Fail`, combined by taking the maximum. `Skipped` is the identity
//! element (§8 property 11: `combine` is commutative, associative, with
//! identity `Skipped`).

use std::cmp::Ordering;

/// Per-promise outcome classification (§4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Outcome {
    Skipped,
    NoOp,
    Change,
    Warn,
    Fail,
}

impl Outcome {
    /// Combine two outcomes by taking the maximum in lattice order.
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        self.max(other)
    }

    /// The `tracing` level this outcome is logged at (§1.2, §7: "every
    /// promise emits one log line... Warn outcomes and recoverable
    /// corruption [at] `warn!`, Fail outcomes and Programming errors [at]
    /// `error!`").
    #[must_use]
    pub fn log_level(self) -> tracing::Level {
        match self {
            Outcome::Skipped | Outcome::NoOp => tracing::Level::INFO,
            Outcome::Change => tracing::Level::INFO,
            Outcome::Warn => tracing::Level::WARN,
            Outcome::Fail => tracing::Level::ERROR,
        }
    }

    /// The `[ YES/NO ]` prefix §7 requires on every promise log line:
    /// `YES` for anything that didn't fail, `NO` for `Fail`.
    #[must_use]
    pub fn yes_no_prefix(self) -> &'static str {
        if self == Outcome::Fail {
            "NO"
        } else {
            "YES"
        }
    }

    /// Terminal-colored rendering for human-facing summaries (`cf-check`,
    /// promise.log tailing): green for a kept/repaired promise, yellow for
    /// `Warn`, red for `Fail`, plain for `Skipped`.
    #[must_use]
    pub fn colored_label(self) -> colored::ColoredString {
        use colored::Colorize;
        match self {
            Outcome::Skipped => "Skipped".normal(),
            Outcome::NoOp => "NoOp".green(),
            Outcome::Change => "Change".green(),
            Outcome::Warn => "Warn".yellow(),
            Outcome::Fail => "Fail".red(),
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Outcome::Skipped => "Skipped",
            Outcome::NoOp => "NoOp",
            Outcome::Change => "Change",
            Outcome::Warn => "Warn",
            Outcome::Fail => "Fail",
        };
        f.write_str(s)
    }
}

/// Running tallies for the §7 compliance summary line ("Promises observed
/// to be kept X%, repaired Y%, not repaired Z%").
#[derive(Debug, Clone, Copy, Default)]
pub struct Summary {
    pub kept: u64,
    pub repaired: u64,
    pub not_repaired: u64,
    pub total: u64,
}

impl Summary {
    pub fn record(&mut self, outcome: Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Skipped | Outcome::NoOp => self.kept += 1,
            Outcome::Change => self.repaired += 1,
            Outcome::Warn | Outcome::Fail => self.not_repaired += 1,
        }
    }

    /// Render the §7 summary line. Percentages are of `total`; an empty run
    /// reports all-zero percentages rather than dividing by zero.
    #[must_use]
    pub fn render_line(self) -> String {
        let pct = |n: u64| if self.total == 0 { 0.0 } else { 100.0 * n as f64 / self.total as f64 };
        format!(
            "Promises observed to be kept {:.1}%, repaired {:.1}%, not repaired {:.1}%",
            pct(self.kept),
            pct(self.repaired),
            pct(self.not_repaired)
        )
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_is_commutative_and_associative_with_skipped_identity() {
        let outcomes = [Outcome::Skipped, Outcome::NoOp, Outcome::Change, Outcome::Warn, Outcome::Fail];
        for &a in &outcomes {
            assert_eq!(a.combine(Outcome::Skipped), a);
            assert_eq!(Outcome::Skipped.combine(a), a);
            for &b in &outcomes {
                assert_eq!(a.combine(b), b.combine(a));
                for &c in &outcomes {
                    assert_eq!(a.combine(b).combine(c), a.combine(b.combine(c)));
                }
            }
        }
    }

    #[test]
    fn fail_dominates_every_other_outcome() {
        for outcome in [Outcome::Skipped, Outcome::NoOp, Outcome::Change, Outcome::Warn] {
            assert_eq!(outcome.combine(Outcome::Fail), Outcome::Fail);
        }
    }

    #[test]
    fn only_fail_gets_the_no_prefix() {
        assert_eq!(Outcome::Fail.yes_no_prefix(), "NO");
        for outcome in [Outcome::Skipped, Outcome::NoOp, Outcome::Change, Outcome::Warn] {
            assert_eq!(outcome.yes_no_prefix(), "YES");
        }
    }

    #[test]
    fn summary_line_reports_zero_percent_on_empty_run() {
        let summary = Summary::default();
        assert_eq!(
            summary.render_line(),
            "Promises observed to be kept 0.0%, repaired 0.0%, not repaired 0.0%"
        );
    }

    #[test]
    fn colored_label_carries_the_same_word_as_display() {
        for outcome in [Outcome::Skipped, Outcome::NoOp, Outcome::Change, Outcome::Warn, Outcome::Fail] {
            assert!(outcome.colored_label().to_string().contains(&outcome.to_string()));
        }
    }

    #[test]
    fn summary_buckets_outcomes_as_spec_describes() {
        let mut summary = Summary::default();
        for outcome in [Outcome::NoOp, Outcome::Change, Outcome::Warn, Outcome::Fail] {
            summary.record(outcome);
        }
        assert_eq!(summary.total, 4);
        assert_eq!(summary.kept, 1);
        assert_eq!(summary.repaired, 1);
        assert_eq!(summary.not_repaired, 2);
    }
}
