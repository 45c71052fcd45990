//! HTTP transport for SOAP calls.
//!
//! Every call is a POST with a body of known length. Large uploads are sent
//! with a predeclared `Content-Length` rather than chunked encoding, because
//! the server rejects chunked SOAP requests; the body is still streamed from
//! its reader and never collected in memory.
//!
//! [`Transport`] is the seam between the protocol logic and the network, so
//! the session, submission, tracking and report code can be driven by a
//! scripted transport in tests.

use std::fmt;
use std::io::{Cursor, Read};
use std::time::Duration;

use reqwest::blocking::{Body, Client};
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{StatusCode, Url};

/// Longest server error body quoted in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Streaming response body.
pub type ResponseBody = Box<dyn Read + Send>;

/// Request body with an exact, predeclared length.
pub struct RequestBody {
    reader: Box<dyn Read + Send>,
    length: u64,
}

impl RequestBody {
    /// Body from an in-memory buffer.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let length = bytes.len() as u64;
        Self {
            reader: Box::new(Cursor::new(bytes)),
            length,
        }
    }

    /// Body streamed from `reader`, which must yield exactly `length` bytes.
    pub fn sized(reader: impl Read + Send + 'static, length: u64) -> Self {
        Self {
            reader: Box::new(reader),
            length,
        }
    }

    /// Declared body length in bytes.
    #[must_use]
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Consume the body as a reader.
    pub fn into_reader(self) -> Box<dyn Read + Send> {
        self.reader
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBody")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// Failures below the SOAP layer.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// The HTTP client could not be built.
    #[error("Failed to initialize HTTP client: {0}")]
    Setup(String),

    /// Connecting, sending or receiving failed.
    #[error("Connection to {endpoint} failed: {message}")]
    Connect {
        /// Target URL.
        endpoint: String,
        /// Description of the failure.
        message: String,
    },

    /// The request timed out.
    #[error("Request to {endpoint} timed out")]
    Timeout {
        /// Target URL.
        endpoint: String,
    },

    /// The server demanded HTTP-level authentication.
    ///
    /// A streamed body cannot be replayed for an authentication handshake,
    /// so this is reported rather than retried.
    #[error(
        "Server at {endpoint} answered HTTP {status} and requested HTTP authentication. \
         Streaming uploads cannot answer an authentication challenge; check proxy settings \
         or whether the server URL points behind an authenticating gateway"
    )]
    AuthenticationRequired {
        /// Target URL.
        endpoint: String,
        /// 401 or 407.
        status: u16,
    },

    /// Unexpected HTTP status.
    #[error("Server at {endpoint} answered HTTP {status}: {message}")]
    Status {
        /// Target URL.
        endpoint: String,
        /// HTTP status code.
        status: u16,
        /// Start of the response body.
        message: String,
    },
}

impl TransportError {
    /// Whether re-running the request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Setup(_) | Self::AuthenticationRequired { .. }
        )
    }
}

/// Sends one SOAP request and returns the response body as a stream.
pub trait Transport {
    /// POST `body` to `endpoint` with the given `SOAPAction`.
    ///
    /// Responses with HTTP 200 and HTTP 500 are both returned as bodies;
    /// SOAP faults travel with status 500 and are decoded by the caller.
    fn post(
        &self,
        endpoint: &Url,
        soap_action: &str,
        body: RequestBody,
    ) -> Result<ResponseBody, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn post(
        &self,
        endpoint: &Url,
        soap_action: &str,
        body: RequestBody,
    ) -> Result<ResponseBody, TransportError> {
        (**self).post(endpoint, soap_action, body)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn post(
        &self,
        endpoint: &Url,
        soap_action: &str,
        body: RequestBody,
    ) -> Result<ResponseBody, TransportError> {
        (**self).post(endpoint, soap_action, body)
    }
}

/// Blocking reqwest-based transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Build a transport.
    ///
    /// `request_timeout` bounds a whole request including the upload;
    /// `None` lets large uploads run as long as they need.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Setup`] if the TLS backend fails to initialize.
    pub fn new(
        connect_timeout: Duration,
        request_timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| TransportError::Setup(e.to_string()))?;
        Ok(Self { client })
    }

    fn map_error(endpoint: &Url, error: &reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout {
                endpoint: endpoint.to_string(),
            }
        } else {
            TransportError::Connect {
                endpoint: endpoint.to_string(),
                message: error.to_string(),
            }
        }
    }
}

impl Transport for HttpTransport {
    fn post(
        &self,
        endpoint: &Url,
        soap_action: &str,
        body: RequestBody,
    ) -> Result<ResponseBody, TransportError> {
        let length = body.length();
        log::debug!(
            "POST {} SOAPAction={} ({} bytes)",
            endpoint,
            soap_action,
            length
        );

        let response = self
            .client
            .post(endpoint.clone())
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header(USER_AGENT, concat!("sastbridge/", env!("CARGO_PKG_VERSION")))
            .header("SOAPAction", format!("\"{soap_action}\""))
            .body(Body::sized(body.into_reader(), length))
            .send()
            .map_err(|e| Self::map_error(endpoint, &e))?;

        let status = response.status();
        match status {
            s if s.is_success() || s == StatusCode::INTERNAL_SERVER_ERROR => {
                Ok(Box::new(response))
            }
            StatusCode::UNAUTHORIZED | StatusCode::PROXY_AUTHENTICATION_REQUIRED => {
                Err(TransportError::AuthenticationRequired {
                    endpoint: endpoint.to_string(),
                    status: status.as_u16(),
                })
            }
            _ => {
                let mut message = response.text().unwrap_or_default();
                if message.len() > MAX_ERROR_BODY {
                    let mut cut = MAX_ERROR_BODY;
                    while !message.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    message.truncate(cut);
                }
                Err(TransportError::Status {
                    endpoint: endpoint.to_string(),
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}
