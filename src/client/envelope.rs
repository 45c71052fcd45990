//! SOAP 1.1 request envelopes.
//!
//! Requests are small and have a fixed shape, so they are written by hand
//! with [`XmlWriter`] instead of going through a serializer. Empty text
//! fields are always written as an explicit `<Name></Name>` pair; the scan
//! upload depends on this to find the archive placeholder (see
//! [`SplicedMessage`]).

use std::borrow::Cow;
use std::fmt::Write as _;

/// Namespace of the SOAP 1.1 envelope.
pub const SOAP_NAMESPACE: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Namespace of the CLI web service (API version 7).
pub const SERVICE_NAMESPACE: &str = "http://Checkmarx.com/v7";

/// Namespace of the resolver service.
pub const RESOLVER_NAMESPACE: &str = "http://Checkmarx.com";

/// Locale sent with the login request (en-US).
pub const DEFAULT_LCID: u32 = 1033;

/// Element carrying the base64 archive in a scan request.
pub const PAYLOAD_FIELD: &str = "ZippedFile";

/// A remote operation: element name plus namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    /// Local name of the request element.
    pub name: &'static str,
    /// Namespace the request element lives in.
    pub namespace: &'static str,
}

impl Operation {
    const fn service(name: &'static str) -> Self {
        Self {
            name,
            namespace: SERVICE_NAMESPACE,
        }
    }

    /// Value of the `SOAPAction` header.
    #[must_use]
    pub fn soap_action(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

pub const GET_WEB_SERVICE_URL: Operation = Operation {
    name: "GetWebServiceUrl",
    namespace: RESOLVER_NAMESPACE,
};
pub const LOGIN: Operation = Operation::service("Login");
pub const SCAN: Operation = Operation::service("Scan");
pub const GET_STATUS_OF_SINGLE_SCAN: Operation = Operation::service("GetStatusOfSingleScan");
pub const CANCEL_SCAN: Operation = Operation::service("CancelScan");
pub const CREATE_SCAN_REPORT: Operation = Operation::service("CreateScanReport");
pub const GET_SCAN_REPORT_STATUS: Operation = Operation::service("GetScanReportStatus");
pub const GET_SCAN_REPORT: Operation = Operation::service("GetScanReport");
pub const CANCEL_SCAN_REPORT: Operation = Operation::service("CancelScanReport");

/// Escape the five XML special characters.
#[must_use]
pub fn escape_xml(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Minimal append-only XML writer.
#[derive(Debug, Default)]
pub struct XmlWriter {
    buf: String,
}

impl XmlWriter {
    /// Open `<name>`.
    pub fn start(&mut self, name: &str) -> &mut Self {
        let _ = write!(self.buf, "<{name}>");
        self
    }

    /// Close `</name>`.
    pub fn end(&mut self, name: &str) -> &mut Self {
        let _ = write!(self.buf, "</{name}>");
        self
    }

    /// `<name>text</name>`, escaped. Empty text still produces both tags.
    pub fn element(&mut self, name: &str, text: &str) -> &mut Self {
        let _ = write!(self.buf, "<{name}>{}</{name}>", escape_xml(text));
        self
    }

    /// Element holding a value written with `Display`.
    pub fn value(&mut self, name: &str, value: impl std::fmt::Display) -> &mut Self {
        self.element(name, &value.to_string())
    }

    /// `true`/`false` element.
    pub fn flag(&mut self, name: &str, value: bool) -> &mut Self {
        self.element(name, if value { "true" } else { "false" })
    }

    /// Finished text.
    #[must_use]
    pub fn into_string(self) -> String {
        self.buf
    }
}

/// Wrap a request body in a SOAP envelope for `operation`.
pub fn envelope(operation: &Operation, body: impl FnOnce(&mut XmlWriter)) -> String {
    let mut writer = XmlWriter::default();
    let _ = write!(
        writer.buf,
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
         <soap:Envelope xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" \
         xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\" xmlns:soap=\"{SOAP_NAMESPACE}\">\
         <soap:Body><{} xmlns=\"{}\">",
        operation.name, operation.namespace
    );
    body(&mut writer);
    let _ = write!(writer.buf, "</{}></soap:Body></soap:Envelope>", operation.name);
    writer.into_string()
}

/// Project the scan is filed under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectSettings {
    /// Project name as shown on the server.
    pub project_name: String,
    /// Scan preset id (0 = server default).
    pub preset_id: i64,
    /// Owning team id.
    pub team_id: String,
    /// Scan configuration (source encoding) id.
    pub scan_configuration_id: i64,
    /// Free-text project description.
    pub description: String,
}

/// Arguments of the `Scan` operation.
#[derive(Debug, Clone)]
pub struct ScanRequest<'a> {
    pub session_id: &'a str,
    pub project: &'a ProjectSettings,
    pub is_incremental: bool,
    pub is_private: bool,
    pub comment: &'a str,
    /// Name the server gives the uploaded archive.
    pub file_name: &'a str,
    /// Base64 archive text; empty when the message is built for splicing.
    pub zipped_file: &'a str,
}

impl ScanRequest<'_> {
    /// Serialize to a SOAP envelope.
    #[must_use]
    pub fn to_envelope(&self) -> String {
        envelope(&SCAN, |w| {
            w.element("sessionId", self.session_id).start("args");

            w.start("PrjSettings")
                .value("projectID", 0)
                .element("ProjectName", &self.project.project_name)
                .value("PresetID", self.project.preset_id)
                .element("AssociatedGroupID", &self.project.team_id)
                .value("ScanConfigurationID", self.project.scan_configuration_id)
                .element("Description", &self.project.description)
                .end("PrjSettings");

            w.start("SrcCodeSettings")
                .element("SourceOrigin", "Local")
                .start("PackagedCode")
                .element(PAYLOAD_FIELD, self.zipped_file)
                .element("FileName", self.file_name)
                .end("PackagedCode")
                .end("SrcCodeSettings");

            w.flag("IsPrivateScan", self.is_private)
                .flag("IsIncremental", self.is_incremental)
                .element("Comment", self.comment)
                .end("args");
        })
    }
}

/// `GetWebServiceUrl` for the CLI client, API version 7.
#[must_use]
pub fn resolver_request() -> String {
    envelope(&GET_WEB_SERVICE_URL, |w| {
        w.element("ClientType", "CLI").value("APIVersion", 7);
    })
}

#[must_use]
pub fn login_request(username: &str, password: &str, lcid: u32) -> String {
    envelope(&LOGIN, |w| {
        w.start("applicationCredentials")
            .element("User", username)
            .element("Pass", password)
            .end("applicationCredentials")
            .value("lcid", lcid);
    })
}

#[must_use]
pub fn scan_status_request(session_id: &str, run_id: &str) -> String {
    envelope(&GET_STATUS_OF_SINGLE_SCAN, |w| {
        w.element("sessionID", session_id).element("RunId", run_id);
    })
}

#[must_use]
pub fn cancel_scan_request(session_id: &str, run_id: &str) -> String {
    envelope(&CANCEL_SCAN, |w| {
        w.element("SessionID", session_id).element("RunId", run_id);
    })
}

#[must_use]
pub fn create_report_request(session_id: &str, scan_id: i64, report_type: &str) -> String {
    envelope(&CREATE_SCAN_REPORT, |w| {
        w.element("SessionID", session_id)
            .start("Report")
            .value("ScanID", scan_id)
            .element("Type", report_type)
            .end("Report");
    })
}

#[must_use]
pub fn report_status_request(session_id: &str, report_id: i64) -> String {
    envelope(&GET_SCAN_REPORT_STATUS, |w| {
        w.element("SessionID", session_id).value("ID", report_id);
    })
}

#[must_use]
pub fn get_report_request(session_id: &str, report_id: i64) -> String {
    envelope(&GET_SCAN_REPORT, |w| {
        w.element("SessionID", session_id).value("ID", report_id);
    })
}

#[must_use]
pub fn cancel_report_request(session_id: &str, report_id: i64) -> String {
    envelope(&CANCEL_SCAN_REPORT, |w| {
        w.element("SessionID", session_id).value("ReportID", report_id);
    })
}

/// The placeholder tag pair was missing or ambiguous.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Cannot splice payload into message: expected exactly one empty <{field}></{field}> element, found {occurrences}")]
pub struct SpliceError {
    /// Placeholder element name.
    pub field: String,
    /// Number of empty tag pairs found.
    pub occurrences: usize,
}

/// A request document split around an empty payload element.
///
/// `head` ends right after the payload's open tag and `tail` starts at its
/// close tag, so `head ++ payload ++ tail` is the complete request with the
/// payload in place. The payload itself never passes through the XML writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplicedMessage {
    head: Vec<u8>,
    tail: Vec<u8>,
}

impl SplicedMessage {
    /// Split `document` at the single `<field></field>` pair.
    ///
    /// # Errors
    ///
    /// Returns [`SpliceError`] unless the empty pair occurs exactly once.
    pub fn split(document: &str, field: &str) -> Result<Self, SpliceError> {
        let open = format!("<{field}>");
        let pair = format!("<{field}></{field}>");

        let mut found = document.match_indices(&pair);
        let first = found.next();
        let occurrences = usize::from(first.is_some()) + found.count();
        match first {
            Some((start, _)) if occurrences == 1 => {
                let cut = start + open.len();
                Ok(Self {
                    head: document.as_bytes()[..cut].to_vec(),
                    tail: document.as_bytes()[cut..].to_vec(),
                })
            }
            _ => Err(SpliceError {
                field: field.to_string(),
                occurrences,
            }),
        }
    }

    /// Bytes before the payload.
    #[must_use]
    pub fn head(&self) -> &[u8] {
        &self.head
    }

    /// Bytes after the payload.
    #[must_use]
    pub fn tail(&self) -> &[u8] {
        &self.tail
    }

    /// Total request length for a payload of `payload_len` bytes.
    #[must_use]
    pub fn content_length(&self, payload_len: u64) -> u64 {
        self.head.len() as u64 + payload_len + self.tail.len() as u64
    }

    /// Split into owned `(head, tail)`.
    #[must_use]
    pub fn into_parts(self) -> (Vec<u8>, Vec<u8>) {
        (self.head, self.tail)
    }
}
