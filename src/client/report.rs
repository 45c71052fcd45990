//! Report generation and retrieval.

use std::cell::Cell;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::signal::sleep_interruptibly;

use super::envelope::{
    self, CANCEL_SCAN_REPORT, CREATE_SCAN_REPORT, GET_SCAN_REPORT, GET_SCAN_REPORT_STATUS,
};
use super::response::{ResponseError, SoapResponse};
use super::session::Session;
use super::transport::{RequestBody, Transport};
use super::{check_success, response_error, ClientError, ServiceClient};

/// Element carrying the base64 report bytes.
const REPORT_PAYLOAD_FIELD: &str = "ScanResults";

/// Report formats the server can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    Xml,
    Pdf,
}

impl ReportKind {
    /// Name used on the wire.
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Xml => "XML",
            Self::Pdf => "PDF",
        }
    }

    /// File extension for a downloaded report.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Xml => "xml",
            Self::Pdf => "pdf",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// A report being generated on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportHandle {
    pub report_id: i64,
    pub kind: ReportKind,
}

impl<T: Transport> ServiceClient<T> {
    /// Request a report for a finished scan.
    ///
    /// Unlike submission, a server refusal is retried here too, up to the
    /// report retry policy.
    ///
    /// # Errors
    ///
    /// [`ClientError::RetriesExhausted`] once the attempts run out, or any
    /// non-retryable failure such as failed re-authentication.
    pub fn generate_report(
        &self,
        session: &mut Session,
        scan_id: i64,
        kind: ReportKind,
    ) -> Result<ReportHandle, ClientError> {
        log::info!("Requesting {kind} scan report generation");
        let retryable =
            |e: &ClientError| e.is_retryable() || matches!(e, ClientError::Rejected { .. });

        self.settings().report_retry.run_if(
            "Report generation request",
            self.shutdown(),
            retryable,
            |_| {
                self.with_session(session, |session| {
                    let document = envelope::create_report_request(
                        session.token()?,
                        scan_id,
                        kind.wire_name(),
                    );
                    let response =
                        self.invoke_checked(session.endpoint(), &CREATE_SCAN_REPORT, document)?;
                    let report_id = response
                        .required_number::<i64>("ID")
                        .map_err(|source| response_error(&CREATE_SCAN_REPORT, source))?;
                    Ok(ReportHandle { report_id, kind })
                })
            },
        )
    }

    /// Poll until the report is ready.
    ///
    /// # Errors
    ///
    /// [`ClientError::ReportFailed`] as soon as the server reports failure,
    /// status call failures, and [`ClientError::Interrupted`] after a
    /// best-effort cancel of the report.
    pub fn await_report(
        &self,
        session: &mut Session,
        handle: &ReportHandle,
    ) -> Result<(), ClientError> {
        loop {
            let response = self.with_session(session, |session| {
                let document =
                    envelope::report_status_request(session.token()?, handle.report_id);
                self.invoke_checked(session.endpoint(), &GET_SCAN_REPORT_STATUS, document)
            })?;
            let flag = |name: &str| {
                response
                    .flag(name)
                    .map(Option::unwrap_or_default)
                    .map_err(|source| response_error(&GET_SCAN_REPORT_STATUS, source))
            };

            if flag("IsFailed")? {
                log::error!("Server reported report {} as failed", handle.report_id);
                return Err(ClientError::ReportFailed {
                    report_id: handle.report_id,
                    kind: handle.kind.to_string(),
                });
            }
            if flag("IsReady")? {
                log::info!("Scan report generated on server");
                return Ok(());
            }

            log::info!("Report generation in progress");
            if sleep_interruptibly(self.settings().report_poll_interval, self.shutdown()).is_err() {
                log::warn!("Interrupted while waiting for the report, cancelling it");
                self.cancel_report(session, handle);
                return Err(ClientError::interrupted("waiting for the scan report"));
            }
        }
    }

    /// Download a ready report into `destination`, decoding it on the fly.
    ///
    /// Returns the number of bytes written. A file created by this call is
    /// removed on failure; an existing file is left alone when the request
    /// fails before the download starts.
    ///
    /// # Errors
    ///
    /// [`ClientError::ReportWrite`] naming `destination` when the file
    /// cannot be created or written, server refusals, and decoding errors.
    pub fn download_report(
        &self,
        session: &mut Session,
        handle: &ReportHandle,
        destination: &Path,
    ) -> Result<u64, ClientError> {
        let created = Cell::new(false);
        let result = self.with_session(session, |session| {
            self.download_once(session, handle, destination, &created)
        });
        match result {
            Ok(written) => {
                log::info!("Scan report written to: {}", destination.display());
                Ok(written)
            }
            Err(e) => {
                if created.get() {
                    let _ = fs::remove_file(destination);
                }
                Err(e)
            }
        }
    }

    fn download_once(
        &self,
        session: &Session,
        handle: &ReportHandle,
        destination: &Path,
        created: &Cell<bool>,
    ) -> Result<u64, ClientError> {
        let write_error = |source| ClientError::ReportWrite {
            path: destination.to_path_buf(),
            source,
        };

        let document = envelope::get_report_request(session.token()?, handle.report_id);
        let body = self.transport.post(
            session.endpoint(),
            &GET_SCAN_REPORT.soap_action(),
            RequestBody::from_bytes(document.into_bytes()),
        )?;

        let file = File::create(destination).map_err(write_error)?;
        created.set(true);
        let mut writer = BufWriter::new(file);
        let (response, written) = SoapResponse::read_with_payload(
            BufReader::new(body),
            REPORT_PAYLOAD_FIELD,
            &mut writer,
        )
        .map_err(|source| match source {
            ResponseError::PayloadWrite(e) => write_error(e),
            other => response_error(&GET_SCAN_REPORT, other),
        })?;
        writer.flush().map_err(write_error)?;

        check_success(&GET_SCAN_REPORT, response)?;
        written.ok_or_else(|| {
            response_error(
                &GET_SCAN_REPORT,
                ResponseError::MissingField(REPORT_PAYLOAD_FIELD.to_string()),
            )
        })
    }

    /// Ask the server to drop an in-flight report. Failures are logged and
    /// ignored.
    pub fn cancel_report(&self, session: &mut Session, handle: &ReportHandle) {
        let result = self.with_session(session, |session| {
            let document = envelope::cancel_report_request(session.token()?, handle.report_id);
            self.invoke_checked(session.endpoint(), &CANCEL_SCAN_REPORT, document)
        });
        if let Err(e) = result {
            log::warn!("Failed to cancel report {}: {e}", handle.report_id);
        }
    }
}
