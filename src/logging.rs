//! Logging setup for a build invocation.
//!
//! Uses the `log` facade with an `env_logger` backend. The level comes from
//! (highest priority first):
//!
//! 1. `RUST_LOG`
//! 2. `--quiet` (errors only) or `--verbose` (debug, trace)
//! 3. info
//!
//! Build consoles are the usual destination, so lines carry a timestamp and
//! level. With a log file configured everything at debug and above goes to
//! that file instead, mirroring the per-build scan log kept next to the
//! report.

use std::env;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use env_logger::{Builder, Target};
use log::LevelFilter;

/// Initialize logging for this process.
///
/// # Arguments
///
/// * `verbose` - Verbosity count from CLI (0=info, 1=debug, 2+=trace)
/// * `quiet` - If true, only show errors (overridden by `RUST_LOG`)
/// * `log_file` - Optional file that receives the log instead of stderr
///
/// # Errors
///
/// Returns an error if the log file cannot be opened. Calling this twice
/// is not an error; the second call leaves the first logger in place.
pub fn init_logging(verbose: u8, quiet: bool, log_file: Option<&Path>) -> io::Result<()> {
    let mut builder = Builder::new();

    if env::var("RUST_LOG").is_ok() {
        builder.parse_default_env();
    } else {
        let mut level = determine_level(verbose, quiet);
        if log_file.is_some() && level < LevelFilter::Debug {
            level = LevelFilter::Debug;
        }
        builder.filter_level(level);
        // Dependencies are noisy at debug level
        builder.filter_module("reqwest", LevelFilter::Warn);
        builder.filter_module("rustls", LevelFilter::Warn);
    }

    let detailed = verbose >= 1;
    builder.format(move |buf, record| {
        let level = record.level();
        let style = buf.default_level_style(level);
        if detailed {
            writeln!(
                buf,
                "{} {style}{:<5}{style:#} [{}] {}",
                buf.timestamp_seconds(),
                level,
                record.module_path().unwrap_or("unknown"),
                record.args()
            )
        } else {
            writeln!(
                buf,
                "{} {style}{:<5}{style:#} {}",
                buf.timestamp_seconds(),
                level,
                record.args()
            )
        }
    });

    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(file)));
        builder.write_style(env_logger::WriteStyle::Never);
    }

    if builder.try_init().is_err() {
        log::debug!("Logger already initialized");
    }
    Ok(())
}

/// Determine the log level from CLI flags.
fn determine_level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}
