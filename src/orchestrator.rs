//! One scan of one source tree, start to finish.
//!
//! [`run_scan`] drives the whole pipeline on the calling thread:
//! resolve the service endpoint, log in, archive the sources into a
//! temporary base64 file, upload it, wait for the scan, then fetch and
//! summarize the XML report (and optionally a PDF).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::archive::{ArchiveEncoding, ArchiveError, Archiver};
use crate::client::report::ReportKind;
use crate::client::session::Session;
use crate::client::submit::ArchivePayload;
use crate::client::tracker::{ScanTracker, TrackOutcome};
use crate::client::transport::Transport;
use crate::client::{ClientError, ServiceClient};
use crate::config::Config;
use crate::error::ExitCode;
use crate::progress::ProgressCallback;
use crate::results::{parse_report_file, ScanResultSummary, ThresholdViolation};
use crate::signal::ShutdownHandler;

/// A scan that ran to completion and whose report was summarized.
#[derive(Debug, Clone)]
pub struct CompletedScan {
    pub scan_id: i64,
    pub summary: ScanResultSummary,
    /// Downloaded XML report.
    pub report_path: PathBuf,
    /// Downloaded PDF report, when requested and available.
    pub pdf_path: Option<PathBuf>,
    pub violations: Vec<ThresholdViolation>,
}

/// How a scan run ended.
#[derive(Debug, Clone)]
pub enum ScanOutcome {
    Completed(CompletedScan),
    /// The scan was still running when the timeout elapsed. It is left
    /// running on the server.
    TimedOut { run_id: String, elapsed: Duration },
}

impl ScanOutcome {
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Completed(scan) if scan.violations.is_empty() => ExitCode::Success,
            Self::Completed(_) => ExitCode::ThresholdExceeded,
            Self::TimedOut { .. } => ExitCode::TimedOut,
        }
    }
}

/// Archive `base_dir`, scan it on the configured server and summarize the
/// results.
///
/// # Errors
///
/// Invalid configuration, archiving failures, and every fatal client
/// error, each with context naming the stage that failed. Interruptions
/// keep their [`ClientError::Interrupted`] or [`ArchiveError::Interrupted`]
/// cause so the caller can map them to exit code 130.
pub fn run_scan<T: Transport>(
    config: &Config,
    base_dir: &Path,
    transport: T,
    shutdown: &ShutdownHandler,
    progress: Option<Arc<dyn ProgressCallback>>,
) -> Result<ScanOutcome> {
    config.validate_for_scan()?;
    let filter = config.filter_spec().context("Invalid archive filter")?;

    let mut client = ServiceClient::new(transport, config.client_settings(), shutdown.clone());
    if let Some(ref progress) = progress {
        client = client.with_progress(Arc::clone(progress));
    }

    let endpoint = client
        .resolve(&config.server_url)
        .context("Failed to resolve the scan service endpoint")?;
    let mut session = client
        .login(endpoint, config.credentials())
        .context("Login failed")?;

    let staging = tempfile::Builder::new()
        .prefix("sastbridge-")
        .suffix(".zip.b64")
        .tempfile()
        .context("Failed to create a temporary file for the source archive")?;
    let mut archiver = Archiver::new(ArchiveEncoding::Base64).with_shutdown_flag(shutdown.get_flag());
    if let Some(ref progress) = progress {
        archiver = archiver.with_progress(Arc::clone(progress));
    }
    log::info!("Archiving sources in {}", base_dir.display());
    let archived = archiver
        .archive_to_file(base_dir, &filter, staging.path(), config.archive.max_size_bytes)
        .map_err(|e| {
            log_manifest(&e);
            e
        })
        .context("Failed to archive sources")?;

    let payload = ArchivePayload::try_from(&archived)?;
    let handle = client
        .submit(
            &mut session,
            &config.project_settings(),
            &config.scan_options(),
            &payload,
        )
        .context("Scan submission failed")?;
    if let Err(e) = staging.close() {
        log::debug!("Failed to remove temporary archive: {e}");
    }

    let scan_id = match ScanTracker::new(&client)
        .track(&mut session, &handle)
        .context("Scan did not complete")?
    {
        TrackOutcome::Completed { scan_id } => scan_id,
        TrackOutcome::TimedOut { elapsed } => {
            log::warn!(
                "Scan {} still running after {}s, giving up without cancelling it",
                handle.run_id,
                elapsed.as_secs()
            );
            return Ok(ScanOutcome::TimedOut {
                run_id: handle.run_id,
                elapsed,
            });
        }
    };

    let report_dir = &config.report.output_dir;
    fs::create_dir_all(report_dir)
        .with_context(|| format!("Failed to create report directory {}", report_dir.display()))?;

    let report_path = report_file(report_dir, scan_id, ReportKind::Xml);
    fetch_report(&client, &mut session, scan_id, ReportKind::Xml, &report_path)
        .context("Failed to retrieve the XML report")?;
    let summary = parse_report_file(&report_path, &config.server_url)
        .context("Failed to read the XML report")?;

    let violations = config.thresholds.evaluate(&summary);
    for violation in &violations {
        log::warn!("{violation}");
    }

    let pdf_path = if config.report.generate_pdf {
        let path = report_file(report_dir, scan_id, ReportKind::Pdf);
        match fetch_report(&client, &mut session, scan_id, ReportKind::Pdf, &path) {
            Ok(()) => Some(path),
            Err(e) if e.is_interrupted() => {
                return Err(anyhow::Error::new(e).context("Failed to retrieve the PDF report"))
            }
            Err(e) => {
                log::error!("PDF report not available: {e}");
                None
            }
        }
    } else {
        None
    };

    Ok(ScanOutcome::Completed(CompletedScan {
        scan_id,
        summary,
        report_path,
        pdf_path,
        violations,
    }))
}

/// Location of a downloaded report inside `dir`.
#[must_use]
pub fn report_file(dir: &Path, scan_id: i64, kind: ReportKind) -> PathBuf {
    dir.join(format!("scan-{scan_id}.{}", kind.extension()))
}

fn fetch_report<T: Transport>(
    client: &ServiceClient<T>,
    session: &mut Session,
    scan_id: i64,
    kind: ReportKind,
    destination: &Path,
) -> Result<(), ClientError> {
    let handle = client.generate_report(session, scan_id, kind)?;
    client.await_report(session, &handle)?;
    client.download_report(session, &handle, destination)?;
    Ok(())
}

fn log_manifest(error: &ArchiveError) {
    if let Some(manifest) = error.manifest() {
        log::error!(
            "Archiving stopped after {} files ({} compressed bytes)",
            manifest.files_written,
            manifest.compressed_bytes
        );
        for line in &manifest.log {
            log::info!("{line}");
        }
    }
}
