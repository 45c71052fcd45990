//! Structured error handling and exit codes.

use serde::Serialize;

use crate::archive::ArchiveError;
use crate::client::ClientError;

/// Exit codes for the sastbridge application.
///
/// - 0: Success (scan completed, thresholds respected)
/// - 1: General error (configuration, archive, network or server failure)
/// - 2: Thresholds exceeded (scan completed, too many results)
/// - 3: Timed out (the scan did not finish within the configured timeout)
/// - 130: Interrupted by user (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Success: the command completed normally.
    Success = 0,
    /// General error: the build step failed.
    GeneralError = 1,
    /// Thresholds exceeded: results are above a configured threshold.
    ThresholdExceeded = 2,
    /// Timed out: no scan id was obtained before the timeout.
    TimedOut = 3,
    /// Interrupted: the run was interrupted by user (Ctrl+C).
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "SB000",
            Self::GeneralError => "SB001",
            Self::ThresholdExceeded => "SB002",
            Self::TimedOut => "SB003",
            Self::Interrupted => "SB130",
        }
    }

    /// Exit code for an error that ended the run.
    ///
    /// Interruptions anywhere in the chain map to [`ExitCode::Interrupted`];
    /// everything else is a general error.
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Self {
        let interrupted = err.chain().any(|cause| {
            cause
                .downcast_ref::<ClientError>()
                .is_some_and(ClientError::is_interrupted)
                || matches!(
                    cause.downcast_ref::<ArchiveError>(),
                    Some(ArchiveError::Interrupted { .. })
                )
                || cause.is::<crate::signal::Interrupted>()
        });
        if interrupted {
            Self::Interrupted
        } else {
            Self::GeneralError
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "SB001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message including its causes
    pub message: String,
    /// Whether the operation was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{err:#}"),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}
