//! Build-failing vulnerability thresholds.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{ScanResultSummary, Severity};

/// Maximum tolerated result count per severity. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub high: Option<u64>,
    pub medium: Option<u64>,
    pub low: Option<u64>,
}

/// A severity whose count is above its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThresholdViolation {
    pub severity: Severity,
    pub count: u64,
    pub threshold: u64,
}

impl fmt::Display for ThresholdViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} severity results ({}) exceed the threshold ({})",
            self.severity, self.count, self.threshold
        )
    }
}

impl Thresholds {
    /// Whether any threshold is set.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.high.is_some() || self.medium.is_some() || self.low.is_some()
    }

    /// Severities whose count is strictly greater than the threshold, most
    /// severe first.
    #[must_use]
    pub fn evaluate(&self, summary: &ScanResultSummary) -> Vec<ThresholdViolation> {
        [
            (Severity::High, self.high),
            (Severity::Medium, self.medium),
            (Severity::Low, self.low),
        ]
        .into_iter()
        .filter_map(|(severity, threshold)| {
            let threshold = threshold?;
            let count = summary.count(severity);
            (count > threshold).then_some(ThresholdViolation {
                severity,
                count,
                threshold,
            })
        })
        .collect()
    }
}
