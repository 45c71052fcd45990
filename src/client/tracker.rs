//! Scan status tracking.
//!
//! The server is authoritative: every poll replaces the current state
//! wholesale and nothing is inferred client-side. [`ScanTracker::step`] is
//! the pure part of the state machine, deciding from one report whether to
//! keep polling; [`ScanTracker::track`] adds the sleeping, timeout, session
//! renewal and retry credits around it.

use std::fmt;
use std::time::{Duration, Instant};

use crate::signal::sleep_interruptibly;

use super::envelope::{self, CANCEL_SCAN, GET_STATUS_OF_SINGLE_SCAN};
use super::response::{ResponseError, SoapResponse};
use super::retry::RetryBudget;
use super::session::Session;
use super::submit::ScanRunHandle;
use super::transport::Transport;
use super::{response_error, ClientError, ServiceClient};

/// Progress phase name reported while the server scans.
pub const PHASE_SCANNING: &str = "scanning";

/// Server-side state of a scan.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanStatus {
    WaitingToProcess,
    Queued {
        position: Option<u32>,
    },
    Unzipping {
        percent: Option<u32>,
    },
    Working {
        stage_message: String,
        stage_percent: Option<u32>,
        total_percent: Option<u32>,
    },
    Finished {
        scan_id: i64,
    },
    Failed,
    Deleted,
    Unknown,
    Canceled,
}

impl ScanStatus {
    /// No further progress is possible from this state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished { .. } | Self::Failed | Self::Deleted | Self::Unknown | Self::Canceled
        )
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::WaitingToProcess => "WaitingToProcess",
            Self::Queued { .. } => "Queued",
            Self::Unzipping { .. } => "Unzipping",
            Self::Working { .. } => "Working",
            Self::Finished { .. } => "Finished",
            Self::Failed => "Failed",
            Self::Deleted => "Deleted",
            Self::Unknown => "Unknown",
            Self::Canceled => "Canceled",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One `GetStatusOfSingleScan` result.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub status: ScanStatus,
    pub run_id: String,
    pub scan_id: Option<i64>,
    pub lines_of_code: Option<u64>,
    pub stage_name: String,
    pub stage_message: String,
    pub step_message: String,
    pub step_details: String,
}

impl StatusReport {
    /// Report with only a status, as tests and callers without server
    /// details need.
    #[must_use]
    pub fn new(run_id: impl Into<String>, status: ScanStatus) -> Self {
        let scan_id = match status {
            ScanStatus::Finished { scan_id } => Some(scan_id),
            _ => None,
        };
        Self {
            status,
            run_id: run_id.into(),
            scan_id,
            lines_of_code: None,
            stage_name: String::new(),
            stage_message: String::new(),
            step_message: String::new(),
            step_details: String::new(),
        }
    }

    /// Build from a decoded response.
    ///
    /// # Errors
    ///
    /// Unknown `CurrentStatus` values, malformed numbers, and a `Finished`
    /// state without a scan id.
    pub fn from_response(response: &SoapResponse) -> Result<Self, ResponseError> {
        let text = |name: &str| response.text(name).unwrap_or_default().to_string();
        let scan_id = response.number::<i64>("ScanId")?.filter(|id| *id > 0);
        let stage_percent = response.number::<u32>("CurrentStagePercent")?;
        let stage_message = text("StageMessage");

        let raw = response.required("CurrentStatus")?;
        let normalized: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        let status = match normalized.as_str() {
            "waitingtoprocess" => ScanStatus::WaitingToProcess,
            "queued" => ScanStatus::Queued {
                position: response.number("QueuePosition")?,
            },
            "unzipping" => ScanStatus::Unzipping {
                percent: stage_percent,
            },
            "working" => ScanStatus::Working {
                stage_message: stage_message.clone(),
                stage_percent,
                total_percent: response.number("TotalPercent")?,
            },
            "finished" => ScanStatus::Finished {
                scan_id: scan_id.ok_or_else(|| ResponseError::MissingField("ScanId".to_string()))?,
            },
            "failed" => ScanStatus::Failed,
            "deleted" => ScanStatus::Deleted,
            "unknown" => ScanStatus::Unknown,
            "canceled" | "cancelled" => ScanStatus::Canceled,
            _ => {
                return Err(ResponseError::InvalidField {
                    field: "CurrentStatus".to_string(),
                    value: raw.to_string(),
                })
            }
        };

        Ok(Self {
            status,
            run_id: text("RunId"),
            scan_id,
            lines_of_code: response.number("LOC")?,
            stage_name: text("StageName"),
            stage_message,
            step_message: text("StepMessage"),
            step_details: text("StepDetails"),
        })
    }
}

/// What one poll decided.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStep {
    /// Still running; poll again after the interval.
    Continue(StatusReport),
    /// Finished with this scan id.
    Finished(i64),
}

/// How tracking ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    Completed { scan_id: i64 },
    /// The configured timeout elapsed before a terminal state; no scan id.
    TimedOut { elapsed: Duration },
}

/// Polls one scan run to a terminal state.
pub struct ScanTracker<'c, T: Transport> {
    client: &'c ServiceClient<T>,
    loc_reported: bool,
}

impl<'c, T: Transport> ScanTracker<'c, T> {
    #[must_use]
    pub fn new(client: &'c ServiceClient<T>) -> Self {
        Self {
            client,
            loc_reported: false,
        }
    }

    /// Decide what a status report means, logging progress details.
    ///
    /// # Errors
    ///
    /// [`ClientError::ScanTerminatedAbnormally`] for `Failed`, `Deleted`,
    /// `Unknown` and `Canceled`.
    pub fn step(&mut self, report: StatusReport) -> Result<PollStep, ClientError> {
        if let Some(loc) = report.lines_of_code.filter(|loc| *loc > 0) {
            if !self.loc_reported {
                log::info!("Source contains: {loc} lines of code.");
                self.loc_reported = true;
            }
        }

        match &report.status {
            ScanStatus::WaitingToProcess => {
                log::info!("Scan job waiting for processing");
            }
            ScanStatus::Queued { position } => {
                log::info!(
                    "Scan job queued at position: {}",
                    position.map_or_else(|| "?".to_string(), |p| p.to_string())
                );
            }
            ScanStatus::Unzipping { percent } => {
                log::info!("Unzipping: {}% finished", percent.unwrap_or(0));
                log::debug!(
                    "Stage: {} / Step: {} {}",
                    report.stage_message,
                    report.step_message,
                    report.step_details
                );
            }
            ScanStatus::Working {
                stage_message,
                stage_percent,
                total_percent,
            } => {
                log::info!(
                    "Scanning: {} {} (stage: {}%, total: {}%)",
                    stage_message,
                    report.step_details,
                    stage_percent.unwrap_or(0),
                    total_percent.unwrap_or(0)
                );
            }
            ScanStatus::Finished { scan_id } => {
                log::info!(
                    "Scan finished successfully - RunID: {} ScanID: {}",
                    report.run_id,
                    scan_id
                );
                return Ok(PollStep::Finished(*scan_id));
            }
            ScanStatus::Failed | ScanStatus::Deleted | ScanStatus::Unknown | ScanStatus::Canceled => {
                let state = if report.stage_name.is_empty() {
                    report.status.name().to_string()
                } else {
                    report.stage_name.clone()
                };
                log::error!(
                    "Scan {} - RunID: {} ScanID: {:?}. Stage message: {}",
                    state,
                    report.run_id,
                    report.scan_id,
                    report.stage_message
                );
                return Err(ClientError::ScanTerminatedAbnormally {
                    state,
                    stage_message: report.stage_message,
                    run_id: report.run_id,
                    scan_id: report.scan_id,
                });
            }
        }

        Ok(PollStep::Continue(report))
    }

    /// Fetch the current status once.
    ///
    /// # Errors
    ///
    /// Transport, decoding and server errors of the status call.
    pub fn fetch_status(
        &self,
        session: &Session,
        handle: &ScanRunHandle,
    ) -> Result<StatusReport, ClientError> {
        let document = envelope::scan_status_request(session.token()?, &handle.run_id);
        let response =
            self.client
                .invoke_checked(session.endpoint(), &GET_STATUS_OF_SINGLE_SCAN, document)?;
        let mut report = StatusReport::from_response(&response)
            .map_err(|source| response_error(&GET_STATUS_OF_SINGLE_SCAN, source))?;
        if report.run_id.is_empty() {
            report.run_id.clone_from(&handle.run_id);
        }
        Ok(report)
    }

    /// Fetch and evaluate one status, renewing an expired session first.
    ///
    /// # Errors
    ///
    /// As [`fetch_status`](Self::fetch_status) and [`step`](Self::step).
    pub fn poll_once(
        &mut self,
        session: &mut Session,
        handle: &ScanRunHandle,
    ) -> Result<PollStep, ClientError> {
        let report = self
            .client
            .with_session(session, |session| self.fetch_status(session, handle))?;
        self.step(report)
    }

    /// Poll until the scan finishes, fails, times out or is interrupted.
    ///
    /// Each cycle sleeps the poll interval first. Transient poll failures and
    /// server refusals draw from a pool of retry credits shared by the whole
    /// run; other failures end tracking at once. An expired session is
    /// renewed without drawing a credit.
    ///
    /// # Errors
    ///
    /// Abnormal terminal states, an empty credit pool (wrapping the last
    /// poll failure), failed re-authentication, and interruption. On
    /// interruption the scan is cancelled on the server first.
    pub fn track(
        &mut self,
        session: &mut Session,
        handle: &ScanRunHandle,
    ) -> Result<TrackOutcome, ClientError> {
        let settings = self.client.settings();
        let interval = settings.scan_poll_interval;
        let timeout = settings.scan_timeout;
        let mut budget = RetryBudget::new(settings.poll_retries);
        let started = Instant::now();

        if let Some(progress) = self.client.progress() {
            progress.on_phase_start(PHASE_SCANNING, 100);
        }
        let outcome = self.poll_loop(session, handle, interval, timeout, &mut budget, started);
        if let Some(progress) = self.client.progress() {
            progress.on_phase_end(PHASE_SCANNING);
        }

        if matches!(&outcome, Err(e) if e.is_interrupted()) {
            log::warn!("Interrupted while waiting for scan results, cancelling scan");
            self.client.cancel_scan(session, handle);
        }
        outcome
    }

    fn poll_loop(
        &mut self,
        session: &mut Session,
        handle: &ScanRunHandle,
        interval: Duration,
        timeout: Option<Duration>,
        budget: &mut RetryBudget,
        started: Instant,
    ) -> Result<TrackOutcome, ClientError> {
        let shutdown = self.client.shutdown().clone();
        let mut polls = 0u32;
        loop {
            sleep_interruptibly(interval, &shutdown)
                .map_err(|_| ClientError::interrupted("waiting for scan results"))?;

            let elapsed = started.elapsed();
            if let Some(limit) = timeout {
                if elapsed > limit {
                    log::warn!(
                        "Scan timed out after {} minutes, run {} is left running on the server",
                        elapsed.as_secs() / 60,
                        handle.run_id
                    );
                    return Ok(TrackOutcome::TimedOut { elapsed });
                }
            }

            polls += 1;
            match self.poll_once(session, handle) {
                Ok(PollStep::Finished(scan_id)) => return Ok(TrackOutcome::Completed { scan_id }),
                Ok(PollStep::Continue(report)) => self.report_progress(&report),
                Err(e @ ClientError::ScanTerminatedAbnormally { .. })
                | Err(e @ ClientError::AuthenticationFailed { .. })
                | Err(e @ ClientError::NotLoggedIn)
                | Err(e @ ClientError::Interrupted { .. }) => return Err(e),
                Err(e) if !e.is_retryable() && !matches!(e, ClientError::Rejected { .. }) => {
                    log::error!("Scan status polling failed: {e}");
                    return Err(e);
                }
                Err(e) => {
                    if !budget.consume() {
                        log::error!("Giving up on scan status after poll {polls}: {e}");
                        return Err(ClientError::RetriesExhausted {
                            operation: "Scan status polling".to_string(),
                            attempts: polls,
                            last: Box::new(e),
                        });
                    }
                    log::info!(
                        "Failed to get scan status: {e}. {} retries left",
                        budget.remaining()
                    );
                }
            }
        }
    }

    fn report_progress(&self, report: &StatusReport) {
        let Some(progress) = self.client.progress() else {
            return;
        };
        let (percent, detail) = match &report.status {
            ScanStatus::Working {
                stage_message,
                total_percent,
                ..
            } => (total_percent.unwrap_or(0), stage_message.clone()),
            ScanStatus::Unzipping { percent } => (0, format!("Unzipping {}%", percent.unwrap_or(0))),
            ScanStatus::Queued { position } => (
                0,
                format!(
                    "Queued at position {}",
                    position.map_or_else(|| "?".to_string(), |p| p.to_string())
                ),
            ),
            other => (0, other.name().to_string()),
        };
        progress.on_progress(percent as usize, &detail);
    }
}

impl<T: Transport> ServiceClient<T> {
    /// Ask the server to cancel a scan run. Failures are logged and ignored.
    pub fn cancel_scan(&self, session: &mut Session, handle: &ScanRunHandle) {
        let result = self.with_session(session, |session| {
            let document = envelope::cancel_scan_request(session.token()?, &handle.run_id);
            self.invoke_checked(session.endpoint(), &CANCEL_SCAN, document)
        });
        match result {
            Ok(_) => log::info!("Scan run {} cancelled on the server", handle.run_id),
            Err(e) => log::warn!("Failed to cancel scan run {}: {e}", handle.run_id),
        }
    }
}
