//! Human-readable result summary.

use std::io::{self, Write};
use std::path::Path;

use crate::results::{ScanResultSummary, Severity, ThresholdViolation};

/// Queries listed per severity before the rest are elided.
const MAX_QUERIES_PER_SEVERITY: usize = 10;

/// Plain-text rendering of a [`ScanResultSummary`].
#[derive(Debug)]
pub struct TextOutput<'a> {
    summary: &'a ScanResultSummary,
    violations: &'a [ThresholdViolation],
    report_path: Option<&'a Path>,
}

impl<'a> TextOutput<'a> {
    #[must_use]
    pub fn new(summary: &'a ScanResultSummary, violations: &'a [ThresholdViolation]) -> Self {
        Self {
            summary,
            violations,
            report_path: None,
        }
    }

    #[must_use]
    pub fn with_report_path(mut self, path: &'a Path) -> Self {
        self.report_path = Some(path);
        self
    }

    /// Write the summary.
    ///
    /// # Errors
    ///
    /// Returns any error from the writer.
    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        let summary = self.summary;

        write!(writer, "Scan results")?;
        let mut details = Vec::new();
        if !summary.scan_type.is_empty() {
            details.push(format!("{} scan", summary.scan_type));
        }
        if let Some(loc) = summary.lines_of_code_scanned {
            details.push(format!("{loc} lines of code"));
        }
        if let Some(files) = summary.files_scanned {
            details.push(format!("{files} files"));
        }
        if !summary.scan_time.is_empty() {
            details.push(format!("took {}", summary.scan_time));
        }
        if details.is_empty() {
            writeln!(writer)?;
        } else {
            writeln!(writer, " ({})", details.join(", "))?;
        }

        for severity in [Severity::High, Severity::Medium, Severity::Low, Severity::Info] {
            writeln!(writer, "  {:<8}{:>6}", format!("{severity}:"), summary.count(severity))?;
            let queries: Vec<_> = summary.queries_with(severity).filter(|q| q.count > 0).collect();
            for query in queries.iter().take(MAX_QUERIES_PER_SEVERITY) {
                writeln!(writer, "      {} ({})", query.name, query.count)?;
            }
            if queries.len() > MAX_QUERIES_PER_SEVERITY {
                writeln!(writer, "      ... and {} more", queries.len() - MAX_QUERIES_PER_SEVERITY)?;
            }
        }

        if !summary.deep_link.is_empty() {
            writeln!(writer, "Results: {}", summary.deep_link)?;
        }
        if let Some(path) = self.report_path {
            writeln!(writer, "Report: {}", path.display())?;
        }
        for violation in self.violations {
            writeln!(writer, "Threshold exceeded: {violation}")?;
        }
        writer.flush()
    }
}
