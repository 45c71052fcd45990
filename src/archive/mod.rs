//! Filtered, size-bounded workspace archiving.
//!
//! This module provides functionality for:
//! - Ant-style include/exclude filtering of a directory tree
//! - Streaming the matched files into a zip container, one file at a time
//! - Enforcing a compressed-size budget at file boundaries
//! - Optional base64 output for inline embedding in an XML request
//!
//! # Architecture
//!
//! - [`filter`]: filter string parsing and path matching
//! - [`zip`]: sequential zip writer (no seeking, works on any sink)
//! - [`encoding`]: raw/base64 output sinks
//!
//! # Example
//!
//! ```no_run
//! use sastbridge::archive::{Archiver, ArchiveEncoding, FilterSpec};
//! use std::path::Path;
//!
//! let filter = FilterSpec::parse("**/*.java, !**/test/**/*").unwrap();
//! let archiver = Archiver::new(ArchiveEncoding::Raw);
//! let file = std::fs::File::create("sources.zip").unwrap();
//! let (manifest, _file) = archiver
//!     .archive(Path::new("."), &filter, file, 200 * 1024 * 1024)
//!     .unwrap();
//! println!("{} files archived", manifest.files_written);
//! ```

pub mod encoding;
pub mod filter;
pub mod zip;

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use bytesize::ByteSize;
use walkdir::WalkDir;

use crate::progress::ProgressCallback;

pub use encoding::{ArchiveEncoding, ArchiveSink};
pub use filter::{FilterError, FilterRule, FilterSpec};
pub use zip::ZipStreamWriter;

/// Average deflate ratio assumed when estimating a file's compressed size.
///
/// This is a heuristic, not a bound: the size check uses it to predict the
/// running total before a file is written, so the real archive may end up
/// slightly above or below the limit. Files whose real sizes add up to no
/// more than the limit are always accepted.
pub const AVERAGE_COMPRESSION_RATIO: u64 = 4;

/// Whether adding a file of `file_len` bytes stays within `max_bytes`.
///
/// Accepted outright while the uncompressed total fits; otherwise the
/// compressed total plus `file_len / 4` (unrounded) must not exceed the limit.
fn within_limit(raw_so_far: u64, compressed_so_far: u64, file_len: u64, max_bytes: u64) -> bool {
    if max_bytes == 0 || u128::from(raw_so_far) + u128::from(file_len) <= u128::from(max_bytes) {
        return true;
    }
    let ratio = u128::from(AVERAGE_COMPRESSION_RATIO);
    u128::from(compressed_so_far) * ratio + u128::from(file_len) <= u128::from(max_bytes) * ratio
}

/// Progress phase name reported while archiving.
pub const PHASE_ARCHIVING: &str = "archiving";

/// Summary of an archiving run, complete or partial.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveManifest {
    /// Number of files written into the container.
    pub files_written: usize,
    /// Sum of the real compressed sizes of the written entries.
    pub compressed_bytes: u64,
    /// Per-file log lines, in order.
    pub log: Vec<String>,
}

impl ArchiveManifest {
    fn record(&mut self, message: String) {
        log::debug!("{}", message);
        self.log.push(message);
    }
}

/// Why an archiving run did not produce an archive.
///
/// Every variant that can occur after enumeration carries the manifest
/// accumulated up to the failure so callers can print diagnostics.
#[derive(thiserror::Error, Debug)]
pub enum ArchiveError {
    /// The base directory is missing or not a directory.
    #[error("Cannot archive {path}: not a readable directory")]
    InvalidBaseDir {
        /// The configured base directory.
        path: PathBuf,
    },

    /// Nothing matched the filter.
    #[error("No files to archive")]
    NoFilesToArchive {
        /// Manifest at the time of failure.
        manifest: ArchiveManifest,
    },

    /// Adding the next file would push the estimated size past the limit.
    #[error(
        "Archive size limit of {} reached at {current_file} ({} archived so far)",
        human(.limit),
        human(.bytes_so_far)
    )]
    MaxSizeExceeded {
        /// The file that would have crossed the limit.
        current_file: String,
        /// Compressed bytes written before that file.
        bytes_so_far: u64,
        /// The configured limit.
        limit: u64,
        /// Manifest at the time of failure.
        manifest: ArchiveManifest,
    },

    /// Archiving was interrupted by a shutdown request.
    #[error("Archiving interrupted")]
    Interrupted {
        /// Manifest at the time of interruption.
        manifest: ArchiveManifest,
    },

    /// An I/O error stopped archiving.
    #[error("Archiving failed: {source}")]
    Failure {
        /// The underlying I/O error.
        #[source]
        source: io::Error,
        /// Manifest at the time of failure.
        manifest: ArchiveManifest,
    },
}

impl ArchiveError {
    /// The partial manifest, when the failure happened after enumeration.
    #[must_use]
    pub fn manifest(&self) -> Option<&ArchiveManifest> {
        match self {
            Self::InvalidBaseDir { .. } => None,
            Self::NoFilesToArchive { manifest }
            | Self::MaxSizeExceeded { manifest, .. }
            | Self::Interrupted { manifest }
            | Self::Failure { manifest, .. } => Some(manifest),
        }
    }
}

fn human(bytes: &u64) -> ByteSize {
    ByteSize::b(*bytes)
}

/// An archive written to disk, ready for upload.
#[derive(Debug)]
pub struct ArchivedFile {
    /// Location of the (possibly encoded) archive.
    pub path: PathBuf,
    /// Exact length of the file in bytes.
    pub length: u64,
    /// Encoding of the file contents.
    pub encoding: ArchiveEncoding,
    /// What went into the archive.
    pub manifest: ArchiveManifest,
}

/// A file selected for archiving.
#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    name: String,
}

/// Walks a base directory and writes matching files into a zip stream.
#[derive(Clone, Default)]
pub struct Archiver {
    encoding: ArchiveEncoding,
    progress: Option<Arc<dyn ProgressCallback>>,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl std::fmt::Debug for Archiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archiver")
            .field("encoding", &self.encoding)
            .field("progress", &self.progress.is_some())
            .field("shutdown_flag", &self.shutdown_flag.is_some())
            .finish()
    }
}

impl Archiver {
    /// Create an archiver producing the given output encoding.
    #[must_use]
    pub fn new(encoding: ArchiveEncoding) -> Self {
        Self {
            encoding,
            progress: None,
            shutdown_flag: None,
        }
    }

    /// Report per-file progress to `callback`.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Stop between files once `flag` is set.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Output encoding used by this archiver.
    #[must_use]
    pub fn encoding(&self) -> ArchiveEncoding {
        self.encoding
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Archive every file under `base_dir` accepted by `filter` into `output`.
    ///
    /// `max_bytes == 0` disables the size check. On success the finished
    /// sink is handed back; on failure it is dropped, which closes it.
    ///
    /// # Errors
    ///
    /// See [`ArchiveError`]. Unreadable files are skipped, not errors.
    pub fn archive<W: Write>(
        &self,
        base_dir: &Path,
        filter: &FilterSpec,
        output: W,
        max_bytes: u64,
    ) -> Result<(ArchiveManifest, W), ArchiveError> {
        if !base_dir.is_dir() {
            return Err(ArchiveError::InvalidBaseDir {
                path: base_dir.to_path_buf(),
            });
        }

        let mut manifest = ArchiveManifest::default();
        let candidates = self.collect_candidates(base_dir, filter);
        if candidates.is_empty() {
            manifest.record("No files to archive".to_string());
            return Err(ArchiveError::NoFilesToArchive { manifest });
        }

        if let Some(ref progress) = self.progress {
            progress.on_phase_start(PHASE_ARCHIVING, candidates.len());
        }
        let result = self.write_entries(&candidates, output, max_bytes, &mut manifest);
        if let Some(ref progress) = self.progress {
            progress.on_phase_end(PHASE_ARCHIVING);
        }

        match result {
            Ok(output) => Ok((manifest, output)),
            Err(kind) => Err(kind.into_error(manifest)),
        }
    }

    /// Archive into a new file at `destination` and report its exact length.
    ///
    /// # Errors
    ///
    /// See [`ArchiveError`]. Creating the file is reported as `Failure`.
    pub fn archive_to_file(
        &self,
        base_dir: &Path,
        filter: &FilterSpec,
        destination: &Path,
        max_bytes: u64,
    ) -> Result<ArchivedFile, ArchiveError> {
        let file = File::create(destination).map_err(|source| ArchiveError::Failure {
            source,
            manifest: ArchiveManifest::default(),
        })?;
        let (manifest, writer) =
            self.archive(base_dir, filter, BufWriter::new(file), max_bytes)?;

        let finish = |writer: BufWriter<File>| -> io::Result<u64> {
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            Ok(fs::metadata(destination)?.len())
        };
        let length = match finish(writer) {
            Ok(length) => length,
            Err(source) => return Err(ArchiveError::Failure { source, manifest }),
        };

        log::info!(
            "Archived {} files ({} compressed, {} on disk) to {}",
            manifest.files_written,
            ByteSize::b(manifest.compressed_bytes),
            ByteSize::b(length),
            destination.display()
        );

        Ok(ArchivedFile {
            path: destination.to_path_buf(),
            length,
            encoding: self.encoding,
            manifest,
        })
    }

    /// Enumerate regular files below `base_dir` that pass the filter, sorted by path.
    fn collect_candidates(&self, base_dir: &Path, filter: &FilterSpec) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        for entry in WalkDir::new(base_dir)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable path: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(base_dir)
                .unwrap_or_else(|_| entry.path());
            if !filter.matches(relative) {
                log::trace!("Filtered out: {}", relative.display());
                continue;
            }

            candidates.push(Candidate {
                name: filter::to_slash_path(relative),
                path: entry.into_path(),
            });
        }

        candidates
    }

    fn write_entries<W: Write>(
        &self,
        candidates: &[Candidate],
        output: W,
        max_bytes: u64,
        manifest: &mut ArchiveManifest,
    ) -> Result<W, StopReason> {
        let mut zip = ZipStreamWriter::new(ArchiveSink::new(output, self.encoding));
        let mut raw_so_far = 0u64;

        for (index, candidate) in candidates.iter().enumerate() {
            if self.is_shutdown_requested() {
                log::debug!("Archiver: Shutdown requested, stopping");
                return Err(StopReason::Interrupted);
            }

            manifest.record(format!("Adding file to archive: {}", candidate.name));
            let mut file = match File::open(&candidate.path) {
                Ok(file) => file,
                Err(e) => {
                    log::warn!("Skipping unreadable file {}: {}", candidate.path.display(), e);
                    manifest.record(format!("Skipping unreadable file: {}", candidate.name));
                    continue;
                }
            };
            let metadata = file.metadata().map_err(StopReason::Io)?;

            if !within_limit(raw_so_far, manifest.compressed_bytes, metadata.len(), max_bytes) {
                manifest.record(format!(
                    "Maximum archive size reached. Archive size: {} bytes Limit: {} bytes",
                    manifest.compressed_bytes, max_bytes
                ));
                return Err(StopReason::SizeLimit {
                    current_file: candidate.name.clone(),
                    limit: max_bytes,
                });
            }

            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let sizes = zip
                .add_entry(&candidate.name, &mut file, modified)
                .map_err(StopReason::Io)?;

            raw_so_far = raw_so_far.saturating_add(metadata.len());
            manifest.compressed_bytes += sizes.compressed;
            manifest.files_written += 1;
            manifest.record(format!(
                "Archived ({}): {}",
                ByteSize::b(manifest.compressed_bytes),
                candidate.name
            ));

            if let Some(ref progress) = self.progress {
                progress.on_progress(index + 1, &candidate.name);
                progress.on_item_completed(sizes.compressed);
            }
        }

        if manifest.files_written == 0 {
            manifest.record("No readable files to archive".to_string());
            return Err(StopReason::NothingWritten);
        }

        let sink = zip.finish().map_err(StopReason::Io)?;
        sink.finish().map_err(StopReason::Io)
    }
}

/// Internal stop signal, turned into an [`ArchiveError`] once the manifest is final.
enum StopReason {
    SizeLimit { current_file: String, limit: u64 },
    NothingWritten,
    Interrupted,
    Io(io::Error),
}

impl StopReason {
    fn into_error(self, manifest: ArchiveManifest) -> ArchiveError {
        match self {
            Self::SizeLimit {
                current_file,
                limit,
            } => ArchiveError::MaxSizeExceeded {
                current_file,
                bytes_so_far: manifest.compressed_bytes,
                limit,
                manifest,
            },
            Self::NothingWritten => ArchiveError::NoFilesToArchive { manifest },
            Self::Interrupted => ArchiveError::Interrupted { manifest },
            Self::Io(source) => ArchiveError::Failure { source, manifest },
        }
    }
}
