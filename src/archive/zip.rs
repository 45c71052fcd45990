//! Sequential zip container writer.
//!
//! Entries are written strictly front to back so the output can be any
//! [`Write`] sink, including a base64 encoder or a socket. Each entry is a
//! local header with the data-descriptor flag set, the deflate stream, and a
//! data descriptor carrying the CRC and sizes. The central directory follows
//! the last entry.
//!
//! Output is Zip32-only: entries and the archive as a whole must stay below
//! 4 GiB and 65535 entries.

use std::io::{self, Read, Write};
use std::time::SystemTime;

use chrono::{DateTime, Datelike, Local, Timelike};
use flate2::write::DeflateEncoder;
use flate2::{Compression, Crc};

use super::encoding::CountingWriter;

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x0605_4b50;

/// Version needed to extract: 2.0 (deflate).
const VERSION: u16 = 20;
/// Bit 3: sizes in data descriptor. Bit 11: UTF-8 names.
const FLAGS: u16 = 0x0808;
const METHOD_DEFLATE: u16 = 8;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Sizes recorded for one written entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySizes {
    /// Bytes of deflate data written for the entry.
    pub compressed: u64,
    /// Bytes read from the source.
    pub uncompressed: u64,
}

/// Streaming zip writer over any byte sink.
pub struct ZipStreamWriter<W: Write> {
    out: CountingWriter<W>,
    central_directory: Vec<u8>,
    entries: u64,
}

impl<W: Write> ZipStreamWriter<W> {
    /// Start a new archive on `inner`.
    pub fn new(inner: W) -> Self {
        Self {
            out: CountingWriter::new(inner),
            central_directory: Vec::new(),
            entries: 0,
        }
    }

    /// Number of entries written so far.
    #[must_use]
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Container bytes written so far (before any output encoding).
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.out.count()
    }

    /// Compress everything `source` yields into a new entry called `name`.
    ///
    /// `name` must use `/` separators and be relative.
    pub fn add_entry<R: Read>(
        &mut self,
        name: &str,
        source: &mut R,
        modified: SystemTime,
    ) -> io::Result<EntrySizes> {
        if self.entries >= u64::from(u16::MAX) {
            return Err(zip32_limit("too many entries"));
        }
        let name_bytes = name.as_bytes();
        let name_len = u16::try_from(name_bytes.len())
            .map_err(|_| zip32_limit("entry name too long"))?;
        let offset = u32::try_from(self.out.count())
            .map_err(|_| zip32_limit("archive larger than 4 GiB"))?;
        let (dos_time, dos_date) = dos_timestamp(modified);

        let mut header = Vec::with_capacity(30 + name_bytes.len());
        put_u32(&mut header, LOCAL_HEADER_SIG);
        put_u16(&mut header, VERSION);
        put_u16(&mut header, FLAGS);
        put_u16(&mut header, METHOD_DEFLATE);
        put_u16(&mut header, dos_time);
        put_u16(&mut header, dos_date);
        put_u32(&mut header, 0); // crc, in descriptor
        put_u32(&mut header, 0); // compressed size, in descriptor
        put_u32(&mut header, 0); // uncompressed size, in descriptor
        put_u16(&mut header, name_len);
        put_u16(&mut header, 0);
        header.extend_from_slice(name_bytes);
        self.out.write_all(&header)?;

        let data_start = self.out.count();
        let mut crc = Crc::new();
        let mut uncompressed: u64 = 0;
        {
            let mut encoder = DeflateEncoder::new(&mut self.out, Compression::default());
            let mut buf = vec![0u8; COPY_BUFFER_SIZE];
            loop {
                let n = match source.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                };
                crc.update(&buf[..n]);
                uncompressed += n as u64;
                encoder.write_all(&buf[..n])?;
            }
            encoder.finish()?;
        }
        let compressed = self.out.count() - data_start;

        let compressed32 =
            u32::try_from(compressed).map_err(|_| zip32_limit("entry larger than 4 GiB"))?;
        let uncompressed32 =
            u32::try_from(uncompressed).map_err(|_| zip32_limit("entry larger than 4 GiB"))?;

        let mut descriptor = Vec::with_capacity(16);
        put_u32(&mut descriptor, DATA_DESCRIPTOR_SIG);
        put_u32(&mut descriptor, crc.sum());
        put_u32(&mut descriptor, compressed32);
        put_u32(&mut descriptor, uncompressed32);
        self.out.write_all(&descriptor)?;

        let cd = &mut self.central_directory;
        put_u32(cd, CENTRAL_HEADER_SIG);
        put_u16(cd, VERSION); // made by
        put_u16(cd, VERSION); // needed
        put_u16(cd, FLAGS);
        put_u16(cd, METHOD_DEFLATE);
        put_u16(cd, dos_time);
        put_u16(cd, dos_date);
        put_u32(cd, crc.sum());
        put_u32(cd, compressed32);
        put_u32(cd, uncompressed32);
        put_u16(cd, name_len);
        put_u16(cd, 0); // extra
        put_u16(cd, 0); // comment
        put_u16(cd, 0); // disk
        put_u16(cd, 0); // internal attrs
        put_u32(cd, 0); // external attrs
        put_u32(cd, offset);
        cd.extend_from_slice(name_bytes);

        self.entries += 1;
        Ok(EntrySizes {
            compressed,
            uncompressed,
        })
    }

    /// Write the central directory and return the inner sink.
    pub fn finish(mut self) -> io::Result<W> {
        let cd_start = u32::try_from(self.out.count())
            .map_err(|_| zip32_limit("archive larger than 4 GiB"))?;
        let cd_size = u32::try_from(self.central_directory.len())
            .map_err(|_| zip32_limit("central directory too large"))?;
        // entries is capped at u16::MAX in add_entry
        let entries = self.entries as u16;

        let central_directory = std::mem::take(&mut self.central_directory);
        self.out.write_all(&central_directory)?;

        let mut end = Vec::with_capacity(22);
        put_u32(&mut end, END_OF_CENTRAL_DIR_SIG);
        put_u16(&mut end, 0);
        put_u16(&mut end, 0);
        put_u16(&mut end, entries);
        put_u16(&mut end, entries);
        put_u32(&mut end, cd_size);
        put_u32(&mut end, cd_start);
        put_u16(&mut end, 0);
        self.out.write_all(&end)?;
        self.out.flush()?;

        Ok(self.out.into_inner())
    }
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn zip32_limit(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("zip32 limit: {what}"))
}

/// MS-DOS (time, date) pair for a timestamp, clamped to the 1980-2107 range.
fn dos_timestamp(time: SystemTime) -> (u16, u16) {
    let local: DateTime<Local> = DateTime::from(time);
    let year = local.year().clamp(1980, 2107);
    if year != local.year() {
        return (0, (((year - 1980) as u16) << 9) | (1 << 5) | 1);
    }
    let date = (((year - 1980) as u16) << 9) | ((local.month() as u16) << 5) | local.day() as u16;
    let time = ((local.hour() as u16) << 11)
        | ((local.minute() as u16) << 5)
        | (local.second() as u16 / 2);
    (time, date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::DeflateDecoder;

    fn read_u16(buf: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([buf[at], buf[at + 1]])
    }

    fn read_u32(buf: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
    }

    #[test]
    fn test_single_entry_layout() {
        let content = b"fn main() { println!(\"hi\"); }\n".repeat(20);
        let mut zip = ZipStreamWriter::new(Vec::new());
        let sizes = zip
            .add_entry("src/main.rs", &mut content.as_slice(), SystemTime::now())
            .unwrap();
        assert_eq!(sizes.uncompressed, content.len() as u64);
        assert!(sizes.compressed < sizes.uncompressed);
        let bytes = zip.finish().unwrap();

        assert_eq!(read_u32(&bytes, 0), LOCAL_HEADER_SIG);
        assert_eq!(read_u16(&bytes, 6), FLAGS);
        let name_len = read_u16(&bytes, 26) as usize;
        assert_eq!(&bytes[30..30 + name_len], b"src/main.rs");

        let data_start = 30 + name_len;
        let data_end = data_start + sizes.compressed as usize;
        let mut decoded = Vec::new();
        DeflateDecoder::new(&bytes[data_start..data_end])
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, content);

        assert_eq!(read_u32(&bytes, data_end), DATA_DESCRIPTOR_SIG);
        let mut crc = Crc::new();
        crc.update(&content);
        assert_eq!(read_u32(&bytes, data_end + 4), crc.sum());

        let eocd = bytes.len() - 22;
        assert_eq!(read_u32(&bytes, eocd), END_OF_CENTRAL_DIR_SIG);
        assert_eq!(read_u16(&bytes, eocd + 10), 1);
        let cd_start = read_u32(&bytes, eocd + 16) as usize;
        assert_eq!(read_u32(&bytes, cd_start), CENTRAL_HEADER_SIG);
    }

    #[test]
    fn test_entry_count_and_offsets() {
        let mut zip = ZipStreamWriter::new(Vec::new());
        zip.add_entry("a.txt", &mut &b"aaaa"[..], SystemTime::now())
            .unwrap();
        let second_offset = zip.bytes_written();
        zip.add_entry("b.txt", &mut &b"bbbb"[..], SystemTime::now())
            .unwrap();
        assert_eq!(zip.entries(), 2);
        let bytes = zip.finish().unwrap();

        let eocd = bytes.len() - 22;
        assert_eq!(read_u16(&bytes, eocd + 8), 2);
        let cd_start = read_u32(&bytes, eocd + 16) as usize;
        let first_name_len = read_u16(&bytes, cd_start + 28) as usize;
        let second_cd = cd_start + 46 + first_name_len;
        assert_eq!(read_u32(&bytes, second_cd + 42) as u64, second_offset);
        assert_eq!(read_u32(&bytes, second_offset as usize), LOCAL_HEADER_SIG);
    }

    #[test]
    fn test_empty_archive_is_just_end_record() {
        let zip = ZipStreamWriter::new(Vec::new());
        let bytes = zip.finish().unwrap();
        assert_eq!(bytes.len(), 22);
        assert_eq!(read_u32(&bytes, 0), END_OF_CENTRAL_DIR_SIG);
    }

    #[test]
    fn test_dos_timestamp_clamps_before_1980() {
        let (time, date) = dos_timestamp(SystemTime::UNIX_EPOCH);
        assert_eq!(time, 0);
        assert_eq!(date, (1 << 5) | 1);
    }
}
