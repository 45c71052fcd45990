//! Streaming decoding of SOAP responses.
//!
//! Responses are read event by event with quick-xml and flattened into a
//! map from element local name to text. Every response this client reads
//! has unique leaf names, so the first occurrence of a name wins. A SOAP
//! fault is turned into [`ResponseError::Fault`] carrying the server text.
//!
//! One field can be diverted instead of stored: [`SoapResponse::read_with_payload`]
//! base64-decodes that element's text straight into a writer, which is how
//! report files are downloaded without holding them in memory twice.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use quick_xml::events::Event;
use quick_xml::Reader;

/// Result flag of every service response (the server spells it this way).
pub const SUCCESS_FIELD: &str = "IsSuccesfull";
/// Server error text accompanying an unsuccessful result.
pub const ERROR_MESSAGE_FIELD: &str = "ErrorMessage";

#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    #[error("Failed to read response: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("SOAP fault: {0}")]
    Fault(String),

    #[error("Response is missing <{0}>")]
    MissingField(String),

    #[error("Response field <{field}> has invalid value '{value}'")]
    InvalidField { field: String, value: String },

    #[error("Payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Writing the decoded payload failed; the response itself was fine.
    #[error("Failed to write payload: {0}")]
    PayloadWrite(#[source] io::Error),
}

impl ResponseError {
    /// Server text of a fault, if this is one.
    #[must_use]
    pub fn fault_message(&self) -> Option<&str> {
        match self {
            Self::Fault(message) => Some(message),
            _ => None,
        }
    }
}

/// Flattened response fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoapResponse {
    fields: HashMap<String, String>,
}

impl SoapResponse {
    /// Parse a whole response.
    ///
    /// # Errors
    ///
    /// Fails on malformed XML, read errors, or a SOAP fault.
    pub fn read<R: BufRead>(reader: R) -> Result<Self, ResponseError> {
        let mut sink = io::sink();
        Self::parse(reader, None, &mut sink).map(|(response, _)| response)
    }

    /// Parse a response, decoding the base64 text of `field` into `sink`.
    ///
    /// Returns the remaining fields and the number of decoded bytes written;
    /// `None` if the element never appeared.
    ///
    /// # Errors
    ///
    /// As [`SoapResponse::read`], plus [`ResponseError::Base64`] for bad
    /// payload text and [`ResponseError::PayloadWrite`] if `sink` fails.
    pub fn read_with_payload<R: BufRead, W: Write>(
        reader: R,
        field: &str,
        sink: &mut W,
    ) -> Result<(Self, Option<u64>), ResponseError> {
        Self::parse(reader, Some(field), sink)
    }

    fn parse<R: BufRead, W: Write>(
        reader: R,
        payload_field: Option<&str>,
        sink: &mut W,
    ) -> Result<(Self, Option<u64>), ResponseError> {
        let mut reader = Reader::from_reader(reader);
        reader.config_mut().trim_text(true);

        let mut fields = HashMap::new();
        let mut stack: Vec<String> = Vec::new();
        let mut text = String::new();
        let mut in_fault = false;
        let mut payload: Option<Base64Sink> = None;
        let mut payload_written = None;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    if name == "Fault" {
                        in_fault = true;
                    }
                    if payload_field == Some(name.as_str()) && payload_written.is_none() {
                        payload = Some(Base64Sink::default());
                    }
                    text.clear();
                    stack.push(name);
                }
                Event::Text(t) => {
                    let unescaped = t.unescape()?;
                    match payload.as_mut() {
                        Some(decoder) => decoder.feed(&unescaped, sink)?,
                        None => text.push_str(&unescaped),
                    }
                }
                Event::CData(c) => {
                    let raw = String::from_utf8_lossy(&c).into_owned();
                    match payload.as_mut() {
                        Some(decoder) => decoder.feed(&raw, sink)?,
                        None => text.push_str(&raw),
                    }
                }
                Event::End(_) => {
                    let name = stack.pop().unwrap_or_default();
                    if let Some(decoder) = payload.take() {
                        payload_written = Some(decoder.finish(sink)?);
                    } else if !text.is_empty() {
                        fields.entry(name).or_insert_with(|| text.clone());
                    }
                    text.clear();
                }
                Event::Empty(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    if payload_field == Some(name.as_str()) && payload_written.is_none() {
                        payload_written = Some(0);
                    }
                    fields.entry(name).or_default();
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        let response = Self { fields };
        if in_fault {
            let message = response
                .text("faultstring")
                .or_else(|| response.text("Text"))
                .unwrap_or("unspecified fault")
                .to_string();
            return Err(ResponseError::Fault(message));
        }
        Ok((response, payload_written))
    }

    /// Text of `name`, if present.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Required text field.
    ///
    /// # Errors
    ///
    /// Returns [`ResponseError::MissingField`] if absent or empty.
    pub fn required(&self, name: &str) -> Result<&str, ResponseError> {
        self.text(name)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ResponseError::MissingField(name.to_string()))
    }

    /// Optional boolean field (`true`/`false`, case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`ResponseError::InvalidField`] for other values.
    pub fn flag(&self, name: &str) -> Result<Option<bool>, ResponseError> {
        match self.text(name) {
            None | Some("") => Ok(None),
            Some(v) if v.eq_ignore_ascii_case("true") => Ok(Some(true)),
            Some(v) if v.eq_ignore_ascii_case("false") => Ok(Some(false)),
            Some(v) => Err(ResponseError::InvalidField {
                field: name.to_string(),
                value: v.to_string(),
            }),
        }
    }

    /// Optional numeric field.
    ///
    /// # Errors
    ///
    /// Returns [`ResponseError::InvalidField`] if present but not a number.
    pub fn number<N: std::str::FromStr>(&self, name: &str) -> Result<Option<N>, ResponseError> {
        match self.text(name) {
            None | Some("") => Ok(None),
            Some(v) => v.trim().parse().map(Some).map_err(|_| ResponseError::InvalidField {
                field: name.to_string(),
                value: v.to_string(),
            }),
        }
    }

    /// Required numeric field.
    ///
    /// # Errors
    ///
    /// Missing or unparsable values are errors.
    pub fn required_number<N: std::str::FromStr>(&self, name: &str) -> Result<N, ResponseError> {
        self.number(name)?
            .ok_or_else(|| ResponseError::MissingField(name.to_string()))
    }

    /// `IsSuccesfull` is present and true.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        matches!(self.flag(SUCCESS_FIELD), Ok(Some(true)))
    }

    /// Server error text, empty if none.
    #[must_use]
    pub fn error_message(&self) -> &str {
        self.text(ERROR_MESSAGE_FIELD).unwrap_or("")
    }
}

/// Incremental base64 decoder.
///
/// Text can arrive in several events and may contain line breaks, so input
/// is buffered up to the next multiple of four significant characters.
#[derive(Default)]
struct Base64Sink {
    pending: String,
    written: u64,
}

impl Base64Sink {
    fn feed<W: Write>(&mut self, text: &str, sink: &mut W) -> Result<(), ResponseError> {
        self.pending
            .extend(text.chars().filter(|c| !c.is_ascii_whitespace()));
        let ready = self.pending.len() / 4 * 4;
        if ready > 0 {
            self.decode(ready, sink)?;
        }
        Ok(())
    }

    fn decode<W: Write>(&mut self, len: usize, sink: &mut W) -> Result<(), ResponseError> {
        let bytes = STANDARD.decode(&self.pending[..len])?;
        sink.write_all(&bytes).map_err(ResponseError::PayloadWrite)?;
        self.written += bytes.len() as u64;
        self.pending.drain(..len);
        Ok(())
    }

    fn finish<W: Write>(mut self, sink: &mut W) -> Result<u64, ResponseError> {
        if !self.pending.is_empty() {
            let len = self.pending.len();
            self.decode(len, sink)?;
        }
        sink.flush().map_err(ResponseError::PayloadWrite)?;
        Ok(self.written)
    }
}
