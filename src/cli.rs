//! Command-line interface definitions for sastbridge.
//!
//! Global options (verbosity, log file, configuration file) apply to every
//! subcommand. Every scan setting can also come from the configuration file
//! or `SASTBRIDGE_*` environment variables; flags given here win.
//!
//! # Example
//!
//! ```bash
//! # Archive, upload and scan the current workspace
//! sastbridge scan . --server-url https://sast.example.com --project Payments
//!
//! # Only build the archive, to check what the filters keep
//! sastbridge archive ./service --out sources.zip --encoding raw
//!
//! # Summarize a downloaded report as JSON and apply thresholds
//! sastbridge summarize sast-reports/report.xml --output json --high-threshold 0
//! ```

use std::fmt;
use std::path::PathBuf;

use bytesize::ByteSize;
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::archive::ArchiveEncoding;
use crate::config::ConfigOverrides;

/// Archive a source tree, scan it on a remote SAST server and collect the report.
#[derive(Debug, Parser)]
#[command(name = "sastbridge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, value_name = "FILE", env = "SASTBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write the log to this file instead of stderr
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Report fatal errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Archive a source tree, submit it for scanning and fetch the report
    Scan(ScanArgs),
    /// Build the source archive only
    Archive(ArchiveArgs),
    /// Summarize a downloaded XML report
    Summarize(SummarizeArgs),
    /// Print the effective configuration (password omitted)
    Config,
}

/// Server connection flags.
#[derive(Debug, Clone, Default, Args)]
pub struct ServerArgs {
    /// Server root URL, without a path (e.g. https://sast.example.com)
    #[arg(long, value_name = "URL")]
    pub server_url: Option<String>,

    /// User name to log in with
    #[arg(short, long, value_name = "USER")]
    pub username: Option<String>,

    /// Password to log in with (prefer the SASTBRIDGE_PASSWORD variable)
    #[arg(long, value_name = "PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

/// Archive filter flags shared by `scan` and `archive`.
#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    /// Include/exclude patterns, comma separated; prefix excludes with '!'
    ///
    /// Example: "**/*.java, !**/test/**/*"
    #[arg(long, value_name = "PATTERNS")]
    pub filter: Option<String>,

    /// Folder names to exclude at any depth, comma separated
    #[arg(long, value_name = "FOLDERS")]
    pub exclude_folders: Option<String>,

    /// Maximum compressed archive size (e.g. 200MiB, 0 for no limit)
    ///
    /// Checked before each file using an estimated 4:1 compression ratio.
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub max_archive_size: Option<u64>,
}

/// Threshold flags shared by `scan` and `summarize`.
#[derive(Debug, Clone, Default, Args)]
pub struct ThresholdArgs {
    /// Fail when there are more high severity results than this
    #[arg(long, value_name = "N")]
    pub high_threshold: Option<u64>,

    /// Fail when there are more medium severity results than this
    #[arg(long, value_name = "N")]
    pub medium_threshold: Option<u64>,

    /// Fail when there are more low severity results than this
    #[arg(long, value_name = "N")]
    pub low_threshold: Option<u64>,
}

/// Arguments for the scan subcommand.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Source tree to scan
    #[arg(value_name = "PATH", default_value = ".")]
    pub path: PathBuf,

    #[command(flatten)]
    pub server: ServerArgs,

    /// Project name on the server
    #[arg(short, long = "project", value_name = "NAME")]
    pub project_name: Option<String>,

    /// Scan preset id
    #[arg(long, value_name = "ID")]
    pub preset_id: Option<i64>,

    /// Owning team id
    #[arg(long, value_name = "ID")]
    pub team_id: Option<String>,

    /// Comment attached to the scan
    #[arg(long, value_name = "TEXT")]
    pub comment: Option<String>,

    /// Run an incremental scan
    #[arg(long)]
    pub incremental: bool,

    /// Run a private scan
    #[arg(long)]
    pub private: bool,

    #[command(flatten)]
    pub filter: FilterArgs,

    /// Stop waiting for the scan after this many minutes (exit code 3)
    #[arg(long, value_name = "MINUTES")]
    pub timeout_minutes: Option<u64>,

    /// Directory for downloaded reports
    #[arg(long, value_name = "DIR")]
    pub report_dir: Option<PathBuf>,

    /// Also download a PDF report
    #[arg(long)]
    pub pdf: bool,

    #[command(flatten)]
    pub thresholds: ThresholdArgs,

    /// Output format for the result summary
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Disable progress bars
    #[arg(long)]
    pub no_progress: bool,
}

impl ScanArgs {
    /// Command-line values as configuration overrides.
    #[must_use]
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            server_url: self.server.server_url.clone(),
            username: self.server.username.clone(),
            password: self.server.password.clone(),
            project_name: self.project_name.clone(),
            preset_id: self.preset_id,
            team_id: self.team_id.clone(),
            comment: self.comment.clone(),
            incremental: self.incremental.then_some(true),
            private: self.private.then_some(true),
            filter: self.filter.filter.clone(),
            exclude_folders: self.filter.exclude_folders.clone(),
            max_archive_bytes: self.filter.max_archive_size,
            scan_timeout_minutes: self.timeout_minutes,
            report_dir: self.report_dir.clone(),
            generate_pdf: self.pdf.then_some(true),
            high_threshold: self.thresholds.high_threshold,
            medium_threshold: self.thresholds.medium_threshold,
            low_threshold: self.thresholds.low_threshold,
        }
    }
}

/// Arguments for the archive subcommand.
#[derive(Debug, Args)]
pub struct ArchiveArgs {
    /// Source tree to archive
    #[arg(value_name = "PATH", default_value = ".")]
    pub path: PathBuf,

    /// Output file
    #[arg(short = 'o', long = "out", value_name = "FILE")]
    pub output: PathBuf,

    /// Output encoding
    #[arg(long, value_enum, default_value = "raw")]
    pub encoding: EncodingArg,

    #[command(flatten)]
    pub filter: FilterArgs,
}

impl ArchiveArgs {
    #[must_use]
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            filter: self.filter.filter.clone(),
            exclude_folders: self.filter.exclude_folders.clone(),
            max_archive_bytes: self.filter.max_archive_size,
            ..Default::default()
        }
    }
}

/// Arguments for the summarize subcommand.
#[derive(Debug, Args)]
pub struct SummarizeArgs {
    /// XML report file
    #[arg(value_name = "REPORT")]
    pub report: PathBuf,

    /// Server root used to rebuild the results deep link
    #[arg(long, value_name = "URL")]
    pub server_url: Option<String>,

    #[command(flatten)]
    pub thresholds: ThresholdArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

impl SummarizeArgs {
    #[must_use]
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            server_url: self.server_url.clone(),
            high_threshold: self.thresholds.high_threshold,
            medium_threshold: self.thresholds.medium_threshold,
            low_threshold: self.thresholds.low_threshold,
            ..Default::default()
        }
    }
}

/// Output format for result summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON for scripting
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Archive output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EncodingArg {
    /// Plain zip bytes
    Raw,
    /// Base64 text, as uploaded to the server
    Base64,
}

impl From<EncodingArg> for ArchiveEncoding {
    fn from(arg: EncodingArg) -> Self {
        match arg {
            EncodingArg::Raw => ArchiveEncoding::Raw,
            EncodingArg::Base64 => ArchiveEncoding::Base64,
        }
    }
}

/// Parse a human-readable size string into bytes.
///
/// Accepts plain byte counts and bytesize units (`KB`, `KiB`, `MB`, `MiB`, ...).
///
/// # Examples
///
/// ```
/// use sastbridge::cli::parse_size;
///
/// assert_eq!(parse_size("1024").unwrap(), 1024);
/// assert_eq!(parse_size("200 MiB").unwrap(), 200 * 1024 * 1024);
/// ```
///
/// # Errors
///
/// Returns an error for empty input, invalid numbers and unknown units.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Size cannot be empty".to_string());
    }
    s.parse::<ByteSize>()
        .map(|size| size.as_u64())
        .map_err(|e| format!("Invalid size '{s}': {e}"))
}
