//! Shared helpers for integration tests: an in-memory transport that replays
//! scripted SOAP responses and records every request it sees.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use base64::Engine;
use reqwest::Url;

use sastbridge::client::retry::RetryPolicy;
use sastbridge::client::session::{Credentials, Session};
use sastbridge::client::transport::{RequestBody, ResponseBody, Transport, TransportError};
use sastbridge::client::{ClientSettings, ServiceClient};
use sastbridge::signal::ShutdownHandler;

pub const SERVER_URL: &str = "https://sast.example.com";
pub const SERVICE_URL: &str = "https://sast.example.com/cxwebinterface/CLI/CxCLIWebServiceV1.asmx";

/// One scripted reaction to a request.
pub enum Reply {
    Body(String),
    Fail(TransportError),
    /// Request shutdown on `handler`, then answer with the body.
    InterruptThen(ShutdownHandler, String),
}

impl Reply {
    /// The response text of a `Body` reply.
    pub fn into_body(self) -> String {
        match self {
            Reply::Body(text) | Reply::InterruptThen(_, text) => text,
            Reply::Fail(error) => panic!("not a body reply: {error}"),
        }
    }
}

/// A request as the server would have received it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub endpoint: String,
    pub soap_action: String,
    pub declared_length: u64,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// Operation name, the last segment of the SOAP action.
    pub fn operation(&self) -> &str {
        self.soap_action.rsplit('/').next().unwrap_or_default()
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Replays replies in order. Running out of replies is a connection error.
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn operations(&self) -> Vec<String> {
        self.requests().iter().map(|r| r.operation().to_string()).collect()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

impl Transport for ScriptedTransport {
    fn post(
        &self,
        endpoint: &Url,
        soap_action: &str,
        body: RequestBody,
    ) -> Result<ResponseBody, TransportError> {
        let declared_length = body.length();
        let mut bytes = Vec::new();
        body.into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| TransportError::Connect {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;
        self.requests.lock().unwrap().push(RecordedRequest {
            endpoint: endpoint.to_string(),
            soap_action: soap_action.to_string(),
            declared_length,
            body: bytes,
        });

        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Body(text)) => Ok(Box::new(Cursor::new(text.into_bytes()))),
            Some(Reply::Fail(error)) => Err(error),
            Some(Reply::InterruptThen(handler, text)) => {
                handler.request_shutdown();
                Ok(Box::new(Cursor::new(text.into_bytes())))
            }
            None => Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                message: "no scripted reply left".to_string(),
            }),
        }
    }
}

/// Settings with no waiting anywhere.
pub fn fast_settings() -> ClientSettings {
    ClientSettings {
        submit_retry: RetryPolicy::new(3, Duration::ZERO),
        report_retry: RetryPolicy::new(3, Duration::ZERO),
        poll_retries: 3,
        scan_poll_interval: Duration::ZERO,
        report_poll_interval: Duration::ZERO,
        scan_timeout: None,
        lcid: 1033,
    }
}

pub fn client(transport: &ScriptedTransport) -> ServiceClient<&ScriptedTransport> {
    ServiceClient::new(transport, fast_settings(), ShutdownHandler::new())
}

pub fn service_url() -> Url {
    Url::parse(SERVICE_URL).unwrap()
}

pub fn credentials() -> Credentials {
    Credentials::new("builder", "s3cret")
}

/// Log in through the script; the first reply must be a login answer.
pub fn logged_in<T: Transport>(client: &ServiceClient<T>) -> Session {
    client.login(service_url(), credentials()).unwrap()
}

// Response documents

pub fn envelope(body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
         <soap:Envelope xmlns:soap=\"http://schemas.xmlsoap.org/soap/envelope/\">\
         <soap:Body>{body}</soap:Body></soap:Envelope>"
    )
}

pub fn success(fields: &str) -> Reply {
    Reply::Body(envelope(&format!(
        "<OperationResponse xmlns=\"http://Checkmarx.com/v7\"><OperationResult>\
         <IsSuccesfull>true</IsSuccesfull>{fields}</OperationResult></OperationResponse>"
    )))
}

pub fn failure(message: &str) -> Reply {
    Reply::Body(envelope(&format!(
        "<OperationResponse xmlns=\"http://Checkmarx.com/v7\"><OperationResult>\
         <IsSuccesfull>false</IsSuccesfull><ErrorMessage>{message}</ErrorMessage>\
         </OperationResult></OperationResponse>"
    )))
}

pub fn fault(message: &str) -> Reply {
    Reply::Body(envelope(&format!(
        "<soap:Fault><faultcode>soap:Server</faultcode><faultstring>{message}</faultstring></soap:Fault>"
    )))
}

pub fn connection_refused() -> Reply {
    Reply::Fail(TransportError::Connect {
        endpoint: SERVICE_URL.to_string(),
        message: "connection refused".to_string(),
    })
}

pub fn resolved() -> Reply {
    success(&format!("<ServiceURL>{SERVICE_URL}</ServiceURL>"))
}

pub fn logged_in_as(token: &str) -> Reply {
    success(&format!("<SessionId>{token}</SessionId>"))
}

pub fn scan_started(run_id: &str) -> Reply {
    success(&format!("<RunId>{run_id}</RunId>"))
}

pub fn status(current: &str, extra: &str) -> Reply {
    success(&format!("<RunId>run-1</RunId><CurrentStatus>{current}</CurrentStatus>{extra}"))
}

pub fn finished(scan_id: i64) -> Reply {
    status("Finished", &format!("<ScanId>{scan_id}</ScanId><TotalPercent>100</TotalPercent>"))
}

pub fn report_created(report_id: i64) -> Reply {
    success(&format!("<ID>{report_id}</ID>"))
}

pub fn report_status(ready: bool, failed: bool) -> Reply {
    success(&format!("<IsReady>{ready}</IsReady><IsFailed>{failed}</IsFailed>"))
}

pub fn report_payload(bytes: &[u8]) -> Reply {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    success(&format!("<ScanResults>{encoded}</ScanResults>"))
}

/// A small XML report: 1 high, 2 medium, 0 low, 1 info (one false positive).
pub const SAMPLE_REPORT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<CxXMLResults ScanId="1000042" DeepLink="http://cx-internal/CxWebClient/ViewerMain.aspx?scanid=1000042&amp;projectid=7"
    ScanStart="Sunday, March 3, 2024 10:12:04 AM" ScanTime="00h:04m:31s"
    LinesOfCodeScanned="15230" FilesScanned="212" ScanType="Full">
  <Query name="SQL_Injection" SeverityIndex="3">
    <Result FalsePositive="False" SeverityIndex="3"/>
    <Result FalsePositive="True" SeverityIndex="3"/>
  </Query>
  <Query name="Hardcoded_Password" SeverityIndex="2">
    <Result FalsePositive="False" SeverityIndex="2"/>
    <Result FalsePositive="False" SeverityIndex="2"/>
  </Query>
  <Query name="Dead_Code" SeverityIndex="0">
    <Result FalsePositive="False" SeverityIndex="0"/>
  </Query>
</CxXMLResults>"#;

/// Write `files` (relative path, contents) under `root`.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (path, contents) in files {
        let full = root.join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, contents).unwrap();
    }
}
