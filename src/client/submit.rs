//! Streaming scan submission.
//!
//! The `Scan` request is serialized once with an empty archive field and
//! split around it. Each attempt then streams `head`, the base64 archive
//! file and `tail` as one body of precomputed length, so the archive is
//! never held in memory or re-encoded by the XML writer.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use crate::archive::{ArchiveEncoding, ArchivedFile};

use super::envelope::{ProjectSettings, ScanRequest, SplicedMessage, PAYLOAD_FIELD, SCAN};
use super::session::Session;
use super::transport::{RequestBody, Transport};
use super::{check_success, response_error, ClientError, ServiceClient};

/// Archive name reported to the server.
pub const DEFAULT_FILE_NAME: &str = "src.zip";

/// Identifies a submitted scan until it finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRunHandle {
    pub run_id: String,
}

/// Per-scan options that are not part of the project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOptions {
    pub is_incremental: bool,
    pub is_private: bool,
    pub comment: String,
}

/// A base64-encoded archive on disk, ready to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePayload {
    path: PathBuf,
    length: u64,
}

impl ArchivePayload {
    /// Payload of `length` base64 bytes stored at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, length: u64) -> Self {
        Self {
            path: path.into(),
            length,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn length(&self) -> u64 {
        self.length
    }
}

impl TryFrom<&ArchivedFile> for ArchivePayload {
    type Error = ClientError;

    /// Only base64 archives can be embedded in the request.
    fn try_from(archive: &ArchivedFile) -> Result<Self, Self::Error> {
        if archive.encoding != ArchiveEncoding::Base64 {
            return Err(ClientError::ArchiveRead {
                path: archive.path.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "archive must be base64 encoded for upload",
                ),
            });
        }
        Ok(Self::new(archive.path.clone(), archive.length))
    }
}

impl<T: Transport> ServiceClient<T> {
    /// Upload `archive` and start a scan.
    ///
    /// Transport failures and malformed responses are retried under the
    /// submit retry policy, re-sending the whole archive each time. An
    /// expired session is renewed once without using up an attempt.
    ///
    /// # Errors
    ///
    /// [`ClientError::Rejected`] if the server refuses the scan,
    /// [`ClientError::Splice`] if the request template is broken, and
    /// [`ClientError::RetriesExhausted`] with the last failure otherwise.
    pub fn submit(
        &self,
        session: &mut Session,
        project: &ProjectSettings,
        options: &ScanOptions,
        archive: &ArchivePayload,
    ) -> Result<ScanRunHandle, ClientError> {
        // Fail on a broken template before any upload is attempted
        self.spliced_request(session.token()?, project, options)?;

        log::info!(
            "Submitting {} of sources for scan of project '{}'",
            bytesize::ByteSize::b(archive.length()),
            project.project_name
        );
        let handle = self
            .settings()
            .submit_retry
            .run("Scan submission", self.shutdown(), |attempt| {
                if attempt > 1 {
                    log::info!("Re-submitting sources (attempt {attempt})");
                }
                self.with_session(session, |session| {
                    self.submit_once(session, project, options, archive)
                })
            })?;

        log::info!("Scan submitted, run id {}", handle.run_id);
        Ok(handle)
    }

    fn spliced_request(
        &self,
        session_id: &str,
        project: &ProjectSettings,
        options: &ScanOptions,
    ) -> Result<SplicedMessage, ClientError> {
        let request = ScanRequest {
            session_id,
            project,
            is_incremental: options.is_incremental,
            is_private: options.is_private,
            comment: &options.comment,
            file_name: DEFAULT_FILE_NAME,
            zipped_file: "",
        };
        Ok(SplicedMessage::split(&request.to_envelope(), PAYLOAD_FIELD)?)
    }

    fn submit_once(
        &self,
        session: &Session,
        project: &ProjectSettings,
        options: &ScanOptions,
        archive: &ArchivePayload,
    ) -> Result<ScanRunHandle, ClientError> {
        let message = self.spliced_request(session.token()?, project, options)?;
        let length = message.content_length(archive.length());

        let file = File::open(archive.path()).map_err(|source| ClientError::ArchiveRead {
            path: archive.path().to_path_buf(),
            source,
        })?;
        let (head, tail) = message.into_parts();
        let body = Cursor::new(head)
            .chain(file.take(archive.length()))
            .chain(Cursor::new(tail));

        let response = self.invoke(
            session.endpoint(),
            &SCAN,
            RequestBody::sized(body, length),
        )?;
        let response = check_success(&SCAN, response)?;
        let run_id = response
            .required("RunId")
            .map_err(|source| response_error(&SCAN, source))?;

        Ok(ScanRunHandle {
            run_id: run_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_payload_from_base64_archive() {
        let archived = ArchivedFile {
            path: PathBuf::from("/tmp/src.zip.b64"),
            length: 1200,
            encoding: ArchiveEncoding::Base64,
            manifest: Default::default(),
        };
        let payload = ArchivePayload::try_from(&archived).unwrap();
        assert_eq!(payload.length(), 1200);
        assert_eq!(payload.path(), Path::new("/tmp/src.zip.b64"));
    }

    #[test]
    fn test_raw_archive_is_not_uploadable() {
        let archived = ArchivedFile {
            path: PathBuf::from("/tmp/src.zip"),
            length: 900,
            encoding: ArchiveEncoding::Raw,
            manifest: Default::default(),
        };
        let err = ArchivePayload::try_from(&archived).unwrap_err();
        assert!(err.to_string().contains("base64"));
    }
}
