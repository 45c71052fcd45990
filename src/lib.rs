//! sastbridge - remote SAST scan orchestration
//!
//! Archives a source tree, uploads it to a static-analysis server over its
//! SOAP interface, waits for the scan and summarizes the results report.
//!
//! The library is usable without the CLI: [`orchestrator::run_scan`] runs a
//! complete scan against any [`client::transport::Transport`].

pub mod archive;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod output;
pub mod progress;
pub mod results;
pub mod signal;

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::archive::Archiver;
use crate::cli::{ArchiveArgs, Cli, Commands, OutputFormat, ScanArgs, SummarizeArgs};
use crate::client::transport::HttpTransport;
use crate::config::{Config, ConfigOverrides};
use crate::error::ExitCode;
use crate::orchestrator::ScanOutcome;
use crate::output::{JsonOutput, TextOutput};
use crate::progress::{Progress, ProgressCallback};
use crate::results::{parse_report_file, ScanResultSummary, ThresholdViolation};
use crate::signal::ShutdownHandler;

/// Run the command selected on the command line.
///
/// Returns the exit code for runs that completed, including ones whose
/// results exceed a threshold or whose scan timed out.
///
/// # Errors
///
/// Any failure that ends the run. [`ExitCode::for_error`] maps it to an
/// exit code.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    let Cli {
        verbose,
        quiet,
        config,
        log_file,
        command,
        ..
    } = cli;

    logging::init_logging(verbose, quiet, log_file.as_deref())
        .context("Failed to initialize logging")?;
    let shutdown = signal::install_handler().context("Failed to install Ctrl+C handler")?;
    let config_path = config.as_deref();

    match command {
        Commands::Scan(args) => scan(config_path, args, quiet, &shutdown),
        Commands::Archive(args) => archive(config_path, args, quiet, &shutdown),
        Commands::Summarize(args) => summarize(config_path, args),
        Commands::Config => show_config(config_path),
    }
}

fn progress_reporter(enabled: bool) -> Option<Arc<dyn ProgressCallback>> {
    enabled.then(|| Arc::new(Progress::new(false)) as Arc<dyn ProgressCallback>)
}

fn scan(config_path: Option<&Path>, args: ScanArgs, quiet: bool, shutdown: &ShutdownHandler) -> Result<ExitCode> {
    let config = Config::load(config_path, args.overrides())?;
    let transport = HttpTransport::new(config.connect_timeout(), config.request_timeout())?;
    let progress = progress_reporter(!quiet && !args.no_progress);

    let outcome = orchestrator::run_scan(&config, &args.path, transport, shutdown, progress)?;
    let exit_code = outcome.exit_code();
    match outcome {
        ScanOutcome::Completed(scan) => print_summary(
            args.output,
            &scan.summary,
            &scan.violations,
            exit_code,
            Some((scan.scan_id, &scan.report_path)),
        )?,
        ScanOutcome::TimedOut { run_id, elapsed } => match args.output {
            OutputFormat::Json => {
                let value = serde_json::json!({
                    "generated_at": chrono::Utc::now(),
                    "run_id": run_id,
                    "timed_out": true,
                    "elapsed_secs": elapsed.as_secs(),
                    "exit_code": exit_code.as_i32(),
                    "exit_code_name": exit_code.code_prefix(),
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
            OutputFormat::Text => println!(
                "Scan {run_id} did not finish within {} minutes",
                elapsed.as_secs() / 60
            ),
        },
    }
    Ok(exit_code)
}

fn archive(config_path: Option<&Path>, args: ArchiveArgs, quiet: bool, shutdown: &ShutdownHandler) -> Result<ExitCode> {
    let config = Config::load(config_path, args.overrides())?;
    let filter = config.filter_spec().context("Invalid archive filter")?;

    let mut archiver = Archiver::new(args.encoding.into()).with_shutdown_flag(shutdown.get_flag());
    if let Some(progress) = progress_reporter(!quiet) {
        archiver = archiver.with_progress(progress);
    }

    let archived = match archiver.archive_to_file(
        &args.path,
        &filter,
        &args.output,
        config.archive.max_size_bytes,
    ) {
        Ok(archived) => archived,
        Err(e) => {
            let _ = fs::remove_file(&args.output);
            return Err(e).context("Failed to archive sources");
        }
    };

    if !quiet {
        println!(
            "Archived {} files into {} ({})",
            archived.manifest.files_written,
            archived.path.display(),
            bytesize::ByteSize::b(archived.length)
        );
    }
    Ok(ExitCode::Success)
}

fn summarize(config_path: Option<&Path>, args: SummarizeArgs) -> Result<ExitCode> {
    let config = Config::load(config_path, args.overrides())?;
    let summary = parse_report_file(&args.report, &config.server_url)?;
    let violations = config.thresholds.evaluate(&summary);
    let exit_code = if violations.is_empty() {
        ExitCode::Success
    } else {
        ExitCode::ThresholdExceeded
    };
    print_summary(args.output, &summary, &violations, exit_code, None)?;
    Ok(exit_code)
}

fn show_config(config_path: Option<&Path>) -> Result<ExitCode> {
    let config = Config::load(config_path, ConfigOverrides::default())?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    print!("{rendered}");
    Ok(ExitCode::Success)
}

fn print_summary(
    format: OutputFormat,
    summary: &ScanResultSummary,
    violations: &[ThresholdViolation],
    exit_code: ExitCode,
    scan: Option<(i64, &Path)>,
) -> Result<()> {
    let stdout = io::stdout().lock();
    match format {
        OutputFormat::Json => {
            let mut output = JsonOutput::new(summary, violations, exit_code);
            if let Some((scan_id, path)) = scan {
                output = output.with_scan(scan_id, path);
            }
            output.write_to(stdout, true)?;
        }
        OutputFormat::Text => {
            let mut output = TextOutput::new(summary, violations);
            if let Some((_, path)) = scan {
                output = output.with_report_path(path);
            }
            output.write_to(stdout)?;
        }
    }
    Ok(())
}
