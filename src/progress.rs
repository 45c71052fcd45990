//! Progress reporting utilities using indicatif.
//!
//! [`ProgressCallback`] is the event interface the archiver and the scan
//! tracker report through; [`Progress`] renders those events as terminal
//! progress bars for interactive runs. CI consoles that are not terminals
//! get nothing from indicatif and rely on the log lines instead.

use std::sync::Mutex;
use std::time::Duration;

use bytesize::ByteSize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::archive::PHASE_ARCHIVING;
use crate::client::tracker::PHASE_SCANNING;

/// Progress callback for the archive and scan phases.
pub trait ProgressCallback: Send + Sync {
    /// Called when a phase starts.
    ///
    /// # Arguments
    ///
    /// * `phase` - Name of the phase (e.g., "archiving", "scanning")
    /// * `total` - Total number of units (files, or 100 for percentages)
    fn on_phase_start(&self, phase: &str, total: usize);

    /// Called when a unit of work completes.
    ///
    /// # Arguments
    ///
    /// * `current` - Units completed so far
    /// * `detail` - File name or stage description
    fn on_progress(&self, current: usize, detail: &str);

    /// Called with the compressed size of each archived file.
    fn on_item_completed(&self, _bytes: u64) {}

    /// Called when a phase completes.
    fn on_phase_end(&self, phase: &str);

    /// Called to update the progress message.
    fn on_message(&self, _message: &str) {}
}

/// Progress reporter using indicatif.
pub struct Progress {
    multi: MultiProgress,
    archiving: Mutex<Option<ProgressBar>>,
    scanning: Mutex<Option<ProgressBar>>,
    compressed: Mutex<u64>,
    quiet: bool,
}

impl Progress {
    /// Create a new progress reporter.
    ///
    /// # Arguments
    ///
    /// * `quiet` - If true, no progress bars will be displayed.
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            archiving: Mutex::new(None),
            scanning: Mutex::new(None),
            compressed: Mutex::new(0),
            quiet,
        }
    }

    fn archiving_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█>-")
    }

    fn scanning_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.green/blue}] {pos}% {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
    }
}

impl ProgressCallback for Progress {
    fn on_phase_start(&self, phase: &str, total: usize) {
        if self.quiet {
            return;
        }

        let pb = self.multi.add(ProgressBar::new(total as u64));
        match phase {
            PHASE_ARCHIVING => {
                pb.set_style(Self::archiving_style());
                *self.compressed.lock().unwrap() = 0;
                *self.archiving.lock().unwrap() = Some(pb);
            }
            PHASE_SCANNING => {
                pb.set_style(Self::scanning_style());
                pb.enable_steady_tick(Duration::from_millis(200));
                *self.scanning.lock().unwrap() = Some(pb);
            }
            _ => {
                pb.set_style(Self::archiving_style());
                pb.set_message(phase.to_string());
            }
        }
    }

    fn on_progress(&self, current: usize, detail: &str) {
        if self.quiet {
            return;
        }

        if let Some(ref pb) = *self.archiving.lock().unwrap() {
            pb.set_position(current as u64);
            let compressed = *self.compressed.lock().unwrap();
            pb.set_message(format!(
                "({}) {}",
                ByteSize::b(compressed),
                truncate_path(detail, 40)
            ));
        } else if let Some(ref pb) = *self.scanning.lock().unwrap() {
            pb.set_position(current as u64);
            pb.set_message(detail.to_string());
        }
    }

    fn on_item_completed(&self, bytes: u64) {
        *self.compressed.lock().unwrap() += bytes;
    }

    fn on_phase_end(&self, phase: &str) {
        if self.quiet {
            return;
        }

        match phase {
            PHASE_ARCHIVING => {
                if let Some(pb) = self.archiving.lock().unwrap().take() {
                    pb.finish_with_message("Archiving complete");
                }
            }
            PHASE_SCANNING => {
                if let Some(pb) = self.scanning.lock().unwrap().take() {
                    pb.finish_with_message("Scan complete");
                }
            }
            _ => {}
        }
    }

    fn on_message(&self, message: &str) {
        if self.quiet {
            return;
        }

        if let Some(ref pb) = *self.scanning.lock().unwrap() {
            pb.set_message(message.to_string());
        } else if let Some(ref pb) = *self.archiving.lock().unwrap() {
            pb.set_message(message.to_string());
        }
    }
}

/// Truncate a path for display in the progress bar.
fn truncate_path(path: &str, max_len: usize) -> String {
    if path.len() <= max_len {
        return path.to_string();
    }

    let file_name = path.rsplit('/').next().unwrap_or(path);
    if file_name.len() + 4 > max_len {
        let tail: String = file_name
            .chars()
            .rev()
            .take(max_len.saturating_sub(3))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        return format!("...{tail}");
    }

    format!(".../{file_name}")
}
