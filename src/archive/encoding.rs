//! Byte sinks for archive output.
//!
//! The upload step embeds archive bytes inside an XML element, so the
//! archive can be written already base64-encoded. [`ArchiveSink`] hides the
//! difference between a raw and an encoding sink from the zip writer.

use std::io::{self, Write};

use base64::engine::general_purpose::STANDARD;
use base64::write::EncoderWriter;

/// How archive bytes are written to the output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveEncoding {
    /// Plain zip bytes.
    Raw,
    /// Zip bytes encoded as standard base64 (with padding).
    #[default]
    Base64,
}

/// Output sink that optionally base64-encodes everything written to it.
pub enum ArchiveSink<W: Write> {
    /// Bytes go straight through.
    Raw(W),
    /// Bytes are base64-encoded on the way through.
    Base64(EncoderWriter<'static, base64::engine::GeneralPurpose, W>),
}

impl<W: Write> ArchiveSink<W> {
    /// Wrap `inner` according to `encoding`.
    pub fn new(inner: W, encoding: ArchiveEncoding) -> Self {
        match encoding {
            ArchiveEncoding::Raw => Self::Raw(inner),
            ArchiveEncoding::Base64 => Self::Base64(EncoderWriter::new(inner, &STANDARD)),
        }
    }

    /// Flush any pending encoder state and hand back the inner writer.
    ///
    /// For base64 output this writes the final padded quantum.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Self::Raw(mut inner) => {
                inner.flush()?;
                Ok(inner)
            }
            Self::Base64(mut encoder) => {
                let mut inner = encoder.finish()?;
                inner.flush()?;
                Ok(inner)
            }
        }
    }
}

impl<W: Write> Write for ArchiveSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Raw(inner) => inner.write(buf),
            Self::Base64(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Raw(inner) => inner.flush(),
            Self::Base64(encoder) => encoder.flush(),
        }
    }
}

/// Writer adapter that counts the bytes passed through it.
#[derive(Debug)]
pub struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    /// Wrap a writer with a zero count.
    pub fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    /// Bytes written so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Unwrap the inner writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.count += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Length of the base64 text produced for `raw_len` input bytes.
#[must_use]
pub fn base64_len(raw_len: u64) -> u64 {
    raw_len.div_ceil(3) * 4
}
