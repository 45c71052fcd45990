//! Scan result summaries.
//!
//! A [`ScanResultSummary`] is built once from the downloaded XML report by
//! [`parse_report`] and is read-only afterwards. [`Thresholds`] decide
//! whether the counts should fail the build.

pub mod parser;
pub mod threshold;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use parser::{parse_report, parse_report_file, ReportParseError};
pub use threshold::{ThresholdViolation, Thresholds};

/// Result severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
}

impl Severity {
    /// Map a report `SeverityIndex` (0 = info .. 3 = high).
    #[must_use]
    pub fn from_index(index: &str) -> Option<Self> {
        match index.trim() {
            "0" => Some(Self::Info),
            "1" => Some(Self::Low),
            "2" => Some(Self::Medium),
            "3" => Some(Self::High),
            _ => None,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Info => "Info",
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Non-false-positive result count of one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    pub name: String,
    pub severity: Severity,
    pub count: u64,
}

/// Counts and metadata of one scan report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResultSummary {
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub info: u64,
    /// Queries in report order.
    pub queries: Vec<QueryResult>,
    /// Link to the results in the server's web client.
    pub deep_link: String,
    pub scan_start: String,
    pub scan_time: String,
    pub lines_of_code_scanned: Option<u64>,
    pub files_scanned: Option<u64>,
    pub scan_type: String,
}

impl ScanResultSummary {
    /// Count for one severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> u64 {
        match severity {
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => self.info,
        }
    }

    /// Total results across all severities.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.high + self.medium + self.low + self.info
    }

    /// Queries of one severity, in report order.
    pub fn queries_with(&self, severity: Severity) -> impl Iterator<Item = &QueryResult> {
        self.queries.iter().filter(move |q| q.severity == severity)
    }

    pub(crate) fn record(&mut self, severity: Severity) {
        match severity {
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
    }
}
