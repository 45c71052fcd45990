//! JSON output for scan result summaries.
//!
//! # Output Schema
//!
//! ```json
//! {
//!   "generated_at": "2024-03-03T10:17:00Z",
//!   "scan_id": 1000042,
//!   "report_path": "sast-reports/scan-1000042.xml",
//!   "summary": {
//!     "high": 1, "medium": 2, "low": 0, "info": 2, "total": 5,
//!     "lines_of_code_scanned": 15230,
//!     "files_scanned": 212,
//!     "scan_type": "Full",
//!     "scan_start": "Sunday, March 3, 2024 10:12:04 AM",
//!     "scan_time": "00h:04m:31s",
//!     "deep_link": "https://sast.example.com/CxWebClient/ViewerMain.aspx?scanid=1000042"
//!   },
//!   "queries": [{ "name": "SQL_Injection", "severity": "high", "count": 2 }],
//!   "violations": [{ "severity": "high", "count": 1, "threshold": 0 }],
//!   "exit_code": 2,
//!   "exit_code_name": "SB002"
//! }
//! ```

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ExitCode;
use crate::results::{QueryResult, ScanResultSummary, ThresholdViolation};

/// Severity counts and report metadata.
#[derive(Debug, Clone, Serialize)]
pub struct JsonSummary {
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub info: u64,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines_of_code_scanned: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_scanned: Option<u64>,
    pub scan_type: String,
    pub scan_start: String,
    pub scan_time: String,
    /// Link to the results in the server's web client
    pub deep_link: String,
}

impl From<&ScanResultSummary> for JsonSummary {
    fn from(summary: &ScanResultSummary) -> Self {
        Self {
            high: summary.high,
            medium: summary.medium,
            low: summary.low,
            info: summary.info,
            total: summary.total(),
            lines_of_code_scanned: summary.lines_of_code_scanned,
            files_scanned: summary.files_scanned,
            scan_type: summary.scan_type.clone(),
            scan_start: summary.scan_start.clone(),
            scan_time: summary.scan_time.clone(),
            deep_link: summary.deep_link.clone(),
        }
    }
}

/// Complete JSON output structure.
#[derive(Debug, Clone, Serialize)]
pub struct JsonOutput {
    /// When this document was produced
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_id: Option<i64>,
    /// XML report the summary was read from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<String>,
    pub summary: JsonSummary,
    /// Per-query counts in report order
    pub queries: Vec<QueryResult>,
    /// Thresholds the counts exceed, most severe first
    pub violations: Vec<ThresholdViolation>,
    /// The exit code number
    pub exit_code: i32,
    /// The machine-readable exit code name (e.g., "SB002")
    pub exit_code_name: String,
}

impl JsonOutput {
    /// Create a JSON output from a summary, its threshold violations and the
    /// exit code of the run.
    ///
    /// # Example
    ///
    /// ```
    /// use sastbridge::error::ExitCode;
    /// use sastbridge::output::json::JsonOutput;
    /// use sastbridge::results::ScanResultSummary;
    ///
    /// let output = JsonOutput::new(&ScanResultSummary::default(), &[], ExitCode::Success);
    /// assert_eq!(output.summary.total, 0);
    /// assert_eq!(output.exit_code_name, "SB000");
    /// ```
    #[must_use]
    pub fn new(summary: &ScanResultSummary, violations: &[ThresholdViolation], exit_code: ExitCode) -> Self {
        Self {
            generated_at: Utc::now(),
            scan_id: None,
            report_path: None,
            summary: JsonSummary::from(summary),
            queries: summary.queries.clone(),
            violations: violations.to_vec(),
            exit_code: exit_code.as_i32(),
            exit_code_name: exit_code.code_prefix().to_string(),
        }
    }

    /// Attach the scan the summary belongs to.
    #[must_use]
    pub fn with_scan(mut self, scan_id: i64, report_path: &Path) -> Self {
        self.scan_id = Some(scan_id);
        self.report_path = Some(report_path.display().to_string());
        self
    }

    /// Serialize to compact JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (unlikely for valid data).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize to pretty-printed JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (unlikely for valid data).
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write JSON to a writer, followed by a newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_to<W: Write>(&self, mut writer: W, pretty: bool) -> Result<(), JsonOutputError> {
        let json = if pretty {
            self.to_json_pretty()?
        } else {
            self.to_json()?
        };
        writeln!(writer, "{json}")?;
        writer.flush()?;
        Ok(())
    }
}

/// Errors that can occur during JSON output.
#[derive(Debug, thiserror::Error)]
pub enum JsonOutputError {
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{Severity, Thresholds};

    fn sample_summary() -> ScanResultSummary {
        ScanResultSummary {
            high: 1,
            medium: 2,
            low: 0,
            info: 2,
            queries: vec![QueryResult {
                name: "SQL_Injection".to_string(),
                severity: Severity::High,
                count: 1,
            }],
            deep_link: "https://sast.example.com/CxWebClient/ViewerMain.aspx?scanid=42".to_string(),
            scan_type: "Full".to_string(),
            lines_of_code_scanned: Some(1200),
            ..Default::default()
        }
    }

    #[test]
    fn test_json_contains_counts_and_queries() {
        let output = JsonOutput::new(&sample_summary(), &[], ExitCode::Success);
        let value: serde_json::Value = serde_json::from_str(&output.to_json().unwrap()).unwrap();

        assert_eq!(value["summary"]["high"], 1);
        assert_eq!(value["summary"]["total"], 5);
        assert_eq!(value["summary"]["lines_of_code_scanned"], 1200);
        assert!(value["summary"].get("files_scanned").is_none());
        assert_eq!(value["queries"][0]["name"], "SQL_Injection");
        assert_eq!(value["queries"][0]["severity"], "high");
        assert!(value.get("scan_id").is_none());
        assert!(value["generated_at"].is_string());
    }

    #[test]
    fn test_json_violations_and_exit_code() {
        let summary = sample_summary();
        let violations = Thresholds {
            high: Some(0),
            ..Default::default()
        }
        .evaluate(&summary);
        let output = JsonOutput::new(&summary, &violations, ExitCode::ThresholdExceeded)
            .with_scan(42, Path::new("reports/scan-42.xml"));
        let value: serde_json::Value = serde_json::from_str(&output.to_json().unwrap()).unwrap();

        assert_eq!(value["scan_id"], 42);
        assert_eq!(value["violations"][0]["severity"], "high");
        assert_eq!(value["violations"][0]["threshold"], 0);
        assert_eq!(value["exit_code"], 2);
        assert_eq!(value["exit_code_name"], "SB002");
    }

    #[test]
    fn test_write_to_pretty() {
        let output = JsonOutput::new(&sample_summary(), &[], ExitCode::Success);
        let mut buffer = Vec::new();
        output.write_to(&mut buffer, true).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("\n  \"summary\""));
        assert!(text.ends_with('\n'));
    }
}
