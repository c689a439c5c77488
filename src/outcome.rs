//! Per-unit results of best-effort fan-outs.
//!
//! A request over many partitions (or groups) never fails because one of them did. Each unit of work
//! ends as an [`Outcome`]; aggregates fold over the resolved ones and keep the [`Skipped`] reasons around
//! for observability.
use std::fmt::Display;

use serde::Serialize;
use tracing::warn;

/// Result of one unit of a fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Outcome<T> {
    Resolved(T),
    Skipped(Skipped),
}

impl<T> Outcome<T> {
    /// Builds an [`Outcome`] from a fallible result, logging the skip.
    pub fn from_result<E: Display>(target: impl Into<String>, res: Result<T, E>) -> Self {
        match res {
            Ok(v) => Self::Resolved(v),
            Err(e) => Self::skipped(target, e),
        }
    }

    pub fn skipped(target: impl Into<String>, reason: impl Display) -> Self {
        Self::Skipped(Skipped::new(target, reason))
    }

    pub fn resolved(self) -> Option<T> {
        match self {
            Self::Resolved(v) => Some(v),
            Self::Skipped(_) => None,
        }
    }
}

/// Why a unit of work did not contribute to an aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skipped {
    /// What was skipped, e.g. `orders/2` or `group g1`.
    pub target: String,
    pub reason: String,
}

impl Skipped {
    /// Logs the skip.
    pub fn new(target: impl Into<String>, reason: impl Display) -> Self {
        let skipped = Self {
            target: target.into(),
            reason: reason.to_string(),
        };
        warn!(unit = %skipped.target, reason = %skipped.reason, "skipping unit of work");
        skipped
    }
}

/// An aggregate over the units that resolved, with the reasons the others were left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partial<T> {
    pub items: Vec<T>,
    pub skipped: Vec<Skipped>,
}

/// Splits outcomes into resolved values and skip reasons.
pub(crate) fn partition_outcomes<K, T>(
    outcomes: impl IntoIterator<Item = (K, Outcome<T>)>,
) -> (Vec<(K, T)>, Vec<Skipped>) {
    let mut resolved = vec![];
    let mut skipped = vec![];
    for (k, outcome) in outcomes {
        match outcome {
            Outcome::Resolved(v) => resolved.push((k, v)),
            Outcome::Skipped(s) => skipped.push(s),
        }
    }
    (resolved, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_outcomes() {
        let outcomes = vec![
            (0, Outcome::Resolved(10)),
            (1, Outcome::from_result("orders/1", Err::<i64, _>("broker down"))),
            (2, Outcome::Resolved(5)),
        ];
        let (resolved, skipped) = partition_outcomes(outcomes);
        assert_eq!(resolved, vec![(0, 10), (2, 5)]);
        assert_eq!(
            skipped,
            vec![Skipped {
                target: "orders/1".to_owned(),
                reason: "broker down".to_owned(),
            }]
        );
    }

    #[test]
    fn test_resolved() {
        assert_eq!(Outcome::Resolved(1).resolved(), Some(1));
        assert_eq!(Outcome::<i32>::skipped("g", "nope").resolved(), None);
    }
}
