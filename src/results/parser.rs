//! Streaming parser for the XML scan report.
//!
//! The report can list many thousands of results, so it is read event by
//! event and only counters are kept. Missing attributes are logged and
//! skipped, matching what older servers emit.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use quick_xml::events::BytesStart;
use quick_xml::events::Event;
use quick_xml::Reader;

use super::{QueryResult, ScanResultSummary, Severity};

/// Path segment of the web client in deep links.
const WEB_CLIENT_TOKEN: &str = "CxWebClient";

#[derive(Debug, thiserror::Error)]
pub enum ReportParseError {
    #[error("Failed to open report {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed report XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Report has no <CxXMLResults> root element")]
    MissingRoot,
}

/// Summarize an XML report from a file.
///
/// # Errors
///
/// As [`parse_report`], plus failure to open `path`.
pub fn parse_report_file(path: &Path, server_url: &str) -> Result<ScanResultSummary, ReportParseError> {
    let file = File::open(path).map_err(|source| ReportParseError::Open {
        path: path.display().to_string(),
        source,
    })?;
    parse_report(BufReader::new(file), server_url)
}

/// Summarize an XML report.
///
/// Results flagged `FalsePositive="True"` are not counted. The deep link is
/// rebuilt against `server_url` so it points at the server the build talked
/// to rather than the host name the server knows itself by.
///
/// # Errors
///
/// Malformed XML, or a document without a `CxXMLResults` element.
pub fn parse_report<R: BufRead>(reader: R, server_url: &str) -> Result<ScanResultSummary, ReportParseError> {
    let mut reader = Reader::from_reader(reader);
    reader.config_mut().trim_text(true);

    let mut summary = ScanResultSummary::default();
    let mut seen_root = false;
    let mut current: Option<QueryResult> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"CxXMLResults" => {
                    seen_root = true;
                    read_metadata(&e, server_url, &mut summary);
                }
                b"Query" => current = start_query(&e),
                b"Result" => count_result(&e, &mut summary, current.as_mut()),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"CxXMLResults" => {
                    seen_root = true;
                    read_metadata(&e, server_url, &mut summary);
                }
                b"Query" => {
                    if let Some(query) = start_query(&e) {
                        summary.queries.push(query);
                    }
                }
                b"Result" => count_result(&e, &mut summary, current.as_mut()),
                _ => {}
            },
            Event::End(e) if e.local_name().as_ref() == b"Query" => {
                if let Some(query) = current.take() {
                    summary.queries.push(query);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !seen_root {
        return Err(ReportParseError::MissingRoot);
    }
    log::debug!(
        "Report summary: {} high, {} medium, {} low, {} info in {} queries",
        summary.high,
        summary.medium,
        summary.low,
        summary.info,
        summary.queries.len()
    );
    Ok(summary)
}

fn attribute(element: &BytesStart<'_>, name: &str) -> Option<String> {
    match element.try_get_attribute(name) {
        Ok(Some(attr)) => attr
            .unescape_value()
            .ok()
            .map(std::borrow::Cow::into_owned),
        _ => None,
    }
}

fn read_metadata(element: &BytesStart<'_>, server_url: &str, summary: &mut ScanResultSummary) {
    summary.deep_link = match attribute(element, "DeepLink") {
        Some(raw) => deep_link(&raw, server_url),
        None => {
            log::warn!("\"DeepLink\" attribute was not found in element \"CxXMLResults\" in XML report");
            String::new()
        }
    };
    summary.scan_start = attribute(element, "ScanStart").unwrap_or_default();
    summary.scan_time = attribute(element, "ScanTime").unwrap_or_default();
    summary.scan_type = attribute(element, "ScanType").unwrap_or_default();
    summary.lines_of_code_scanned =
        attribute(element, "LinesOfCodeScanned").and_then(|v| v.trim().parse().ok());
    summary.files_scanned = attribute(element, "FilesScanned").and_then(|v| v.trim().parse().ok());
}

fn start_query(element: &BytesStart<'_>) -> Option<QueryResult> {
    let name = attribute(element, "name").unwrap_or_else(|| {
        log::warn!("\"name\" attribute was not found in element \"Query\" in XML report");
        String::new()
    });
    let index = attribute(element, "SeverityIndex");
    match index.as_deref().and_then(Severity::from_index) {
        Some(severity) => Some(QueryResult {
            name,
            severity,
            count: 0,
        }),
        None => {
            log::warn!(
                "Query '{}' has unknown severity {:?}, it is left out of the summary",
                name,
                index
            );
            None
        }
    }
}

fn count_result(element: &BytesStart<'_>, summary: &mut ScanResultSummary, query: Option<&mut QueryResult>) {
    if attribute(element, "FalsePositive").as_deref() == Some("True") {
        return;
    }
    if let Some(query) = query {
        query.count += 1;
    }
    match attribute(element, "SeverityIndex") {
        Some(index) => match Severity::from_index(&index) {
            Some(severity) => summary.record(severity),
            None => log::warn!("Result has unknown SeverityIndex '{index}'"),
        },
        None => log::warn!(
            "\"SeverityIndex\" attribute was not found in element \"Result\" in XML report"
        ),
    }
}

/// Rebuild a report deep link against `server_url`.
///
/// Everything after the `CxWebClient` segment is kept; a link without that
/// segment is returned unchanged.
#[must_use]
pub fn deep_link(raw: &str, server_url: &str) -> String {
    match raw.split_once(WEB_CLIENT_TOKEN) {
        Some((_, suffix)) => format!(
            "{}/{}{}",
            server_url.trim_end_matches('/'),
            WEB_CLIENT_TOKEN,
            suffix
        ),
        None => {
            log::warn!("DeepLink value found in XML report is of unexpected format: {raw}");
            raw.to_string()
        }
    }
}
