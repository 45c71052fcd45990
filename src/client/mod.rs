//! Client for the remote scan service.
//!
//! [`ServiceClient`] owns the transport, the per-build settings and the
//! shutdown handle. Its operations are spread over submodules by concern:
//!
//! - [`session`]: endpoint resolution, login and re-authentication
//! - [`submit`]: streaming archive upload
//! - [`tracker`]: scan status polling
//! - [`report`]: report generation, download and cancellation
//!
//! All calls are blocking and run on the caller's thread. A single
//! [`session::Session`] is threaded through them by `&mut` so a token
//! replaced by re-authentication is what the very next request uses.

pub mod envelope;
pub mod report;
pub mod response;
pub mod retry;
pub mod session;
pub mod submit;
pub mod tracker;
pub mod transport;

use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;

use crate::progress::ProgressCallback;
use crate::signal::ShutdownHandler;

use envelope::{Operation, SpliceError, DEFAULT_LCID};
use response::{ResponseError, SoapResponse};
use retry::RetryPolicy;
use transport::{RequestBody, Transport, TransportError};

/// Server messages that mean the session token is no longer accepted.
const SESSION_EXPIRED_SIGNATURES: &[&str] = &[
    "unauthorized",
    "session expired",
    "invalid session",
    "session id is not valid",
];

/// Whether a server error text signals an expired session.
#[must_use]
pub fn is_session_expired(message: &str) -> bool {
    let lower = message.to_lowercase();
    SESSION_EXPIRED_SIGNATURES
        .iter()
        .any(|signature| lower.contains(signature))
}

fn display_scan_id(scan_id: &Option<i64>) -> String {
    scan_id.map_or_else(|| "none".to_string(), |id| id.to_string())
}

/// Errors from the scan service client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The configured server URL is unusable.
    #[error("Invalid server URL '{url}': {reason}")]
    InvalidServerUrl { url: String, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The response could not be decoded.
    #[error("Unexpected response to {operation}: {source}")]
    Response {
        operation: &'static str,
        #[source]
        source: ResponseError,
    },

    /// The server answered but refused the operation.
    #[error("{operation} was rejected by the server: {message}")]
    Rejected {
        operation: &'static str,
        message: String,
    },

    /// Login was refused.
    #[error("Login failed: {server_message}")]
    AuthenticationFailed { server_message: String },

    /// The session token was not accepted.
    #[error("Session expired during {operation}: {message}")]
    SessionExpired {
        operation: &'static str,
        message: String,
    },

    /// A session operation ran before the first successful login.
    #[error("Not logged in")]
    NotLoggedIn,

    #[error(transparent)]
    Splice(#[from] SpliceError),

    /// The archive to upload could not be opened.
    #[error("Cannot read archive {}: {source}", .path.display())]
    ArchiveRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Every attempt failed; `last` is the final underlying failure.
    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: Box<ClientError>,
    },

    /// The scan reached a failure state on the server.
    #[error("Scan {state} (run id {run_id}, scan id {}): {stage_message}", display_scan_id(.scan_id))]
    ScanTerminatedAbnormally {
        state: String,
        stage_message: String,
        run_id: String,
        scan_id: Option<i64>,
    },

    /// The server gave up generating a report.
    #[error("Server failed to generate {kind} report {report_id}")]
    ReportFailed { report_id: i64, kind: String },

    /// The downloaded report could not be written.
    #[error("Failed to write report to {}: {source}", .path.display())]
    ReportWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The build was interrupted.
    #[error("Interrupted while {activity}")]
    Interrupted { activity: String },
}

impl ClientError {
    /// Whether a full re-attempt of the failed operation may succeed.
    ///
    /// Transport failures (except authentication challenges) and malformed
    /// responses qualify. Server refusals, splice bugs and terminal scan
    /// states do not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::Response { .. } => true,
            _ => false,
        }
    }

    /// Whether this is a user interruption.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        match self {
            Self::Interrupted { .. } => true,
            Self::RetriesExhausted { last, .. } => last.is_interrupted(),
            _ => false,
        }
    }

    pub(crate) fn interrupted(activity: impl Into<String>) -> Self {
        Self::Interrupted {
            activity: activity.into(),
        }
    }
}

/// Per-build client settings.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Retry policy for the archive upload.
    pub submit_retry: RetryPolicy,
    /// Retry policy for report generation requests.
    pub report_retry: RetryPolicy,
    /// Failed status polls tolerated over a whole tracking run.
    pub poll_retries: u32,
    /// Sleep before each scan status poll.
    pub scan_poll_interval: Duration,
    /// Sleep between report status polls.
    pub report_poll_interval: Duration,
    /// Stop tracking after this long; `None` waits indefinitely.
    pub scan_timeout: Option<Duration>,
    /// Locale id sent on login.
    pub lcid: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            submit_retry: RetryPolicy::default(),
            report_retry: RetryPolicy::default(),
            poll_retries: 3,
            scan_poll_interval: Duration::from_secs(10),
            report_poll_interval: Duration::from_secs(2),
            scan_timeout: None,
            lcid: DEFAULT_LCID,
        }
    }
}

/// Blocking client for one build.
pub struct ServiceClient<T: Transport> {
    transport: T,
    settings: ClientSettings,
    shutdown: ShutdownHandler,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl<T: Transport> ServiceClient<T> {
    #[must_use]
    pub fn new(transport: T, settings: ClientSettings, shutdown: ShutdownHandler) -> Self {
        Self {
            transport,
            settings,
            shutdown,
            progress: None,
        }
    }

    /// Report scan progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    #[must_use]
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    #[must_use]
    pub fn shutdown(&self) -> &ShutdownHandler {
        &self.shutdown
    }

    pub(crate) fn progress(&self) -> Option<&Arc<dyn ProgressCallback>> {
        self.progress.as_ref()
    }

    /// Send one request and decode the response.
    ///
    /// Faults whose text signals session expiry become
    /// [`ClientError::SessionExpired`].
    pub(crate) fn invoke(
        &self,
        endpoint: &Url,
        operation: &Operation,
        body: RequestBody,
    ) -> Result<SoapResponse, ClientError> {
        let response = self
            .transport
            .post(endpoint, &operation.soap_action(), body)?;
        SoapResponse::read(BufReader::new(response))
            .map_err(|source| response_error(operation, source))
    }

    /// [`invoke`](Self::invoke) with an in-memory request document, failing
    /// unless the server reports success.
    pub(crate) fn invoke_checked(
        &self,
        endpoint: &Url,
        operation: &Operation,
        document: String,
    ) -> Result<SoapResponse, ClientError> {
        let response = self.invoke(endpoint, operation, RequestBody::from_bytes(document.into_bytes()))?;
        check_success(operation, response)
    }
}

/// Map a decoding failure, recognizing expired-session faults.
pub(crate) fn response_error(operation: &Operation, source: ResponseError) -> ClientError {
    match source.fault_message() {
        Some(message) if is_session_expired(message) => ClientError::SessionExpired {
            operation: operation.name,
            message: message.to_string(),
        },
        _ => ClientError::Response {
            operation: operation.name,
            source,
        },
    }
}

/// Turn an unsuccessful result into [`ClientError::Rejected`] or
/// [`ClientError::SessionExpired`].
pub(crate) fn check_success(
    operation: &Operation,
    response: SoapResponse,
) -> Result<SoapResponse, ClientError> {
    if response.is_successful() {
        return Ok(response);
    }
    let message = response.error_message().to_string();
    if is_session_expired(&message) {
        Err(ClientError::SessionExpired {
            operation: operation.name,
            message,
        })
    } else {
        Err(ClientError::Rejected {
            operation: operation.name,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_expiry_signatures() {
        assert!(is_session_expired("Unauthorized"));
        assert!(is_session_expired("The Session ID is not valid."));
        assert!(is_session_expired("error: SESSION EXPIRED"));
        assert!(!is_session_expired("Project not found"));
        assert!(!is_session_expired(""));
    }

    #[test]
    fn test_retryable_classification() {
        let transport = ClientError::Transport(TransportError::Timeout {
            endpoint: "https://sast.example.com".to_string(),
        });
        assert!(transport.is_retryable());

        let malformed = ClientError::Response {
            operation: "Scan",
            source: ResponseError::MissingField("RunId".to_string()),
        };
        assert!(malformed.is_retryable());

        let rejected = ClientError::Rejected {
            operation: "Scan",
            message: "no license".to_string(),
        };
        assert!(!rejected.is_retryable());

        let challenge = ClientError::Transport(TransportError::AuthenticationRequired {
            endpoint: "https://sast.example.com".to_string(),
            status: 407,
        });
        assert!(!challenge.is_retryable());
    }

    #[test]
    fn test_fault_with_expiry_text_maps_to_session_expired() {
        let err = response_error(
            &envelope::GET_STATUS_OF_SINGLE_SCAN,
            ResponseError::Fault("Invalid session".to_string()),
        );
        assert!(matches!(err, ClientError::SessionExpired { .. }));

        let err = response_error(
            &envelope::GET_STATUS_OF_SINGLE_SCAN,
            ResponseError::Fault("Server was unable to process request".to_string()),
        );
        assert!(matches!(err, ClientError::Response { .. }));
    }

    #[test]
    fn test_abnormal_termination_message() {
        let err = ClientError::ScanTerminatedAbnormally {
            state: "Failed".to_string(),
            stage_message: "Source code is empty".to_string(),
            run_id: "run-7".to_string(),
            scan_id: None,
        };
        let text = err.to_string();
        assert!(text.contains("Failed"));
        assert!(text.contains("run-7"));
        assert!(text.contains("scan id none"));
        assert!(text.contains("Source code is empty"));
    }

    #[test]
    fn test_interrupted_seen_through_retries() {
        let err = ClientError::RetriesExhausted {
            operation: "Scan submission".to_string(),
            attempts: 2,
            last: Box::new(ClientError::interrupted("uploading")),
        };
        assert!(err.is_interrupted());
    }
}
