//! Endpoint resolution, login and re-authentication.

use std::fmt;

use reqwest::Url;

use super::envelope::{self, GET_WEB_SERVICE_URL, LOGIN};
use super::transport::Transport;
use super::{ClientError, ServiceClient};

/// Resolver service path, relative to the server root.
pub const RESOLVER_PATH: &str = "/cxwebinterface/cxwsresolver.asmx";

/// Login credentials. `Debug` never shows the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An authenticated session against one service endpoint.
#[derive(Debug, Clone)]
pub struct Session {
    endpoint: Url,
    token: Option<String>,
    credentials: Credentials,
}

impl Session {
    /// Session that has not logged in yet.
    #[must_use]
    pub fn new(endpoint: Url, credentials: Credentials) -> Self {
        Self {
            endpoint,
            token: None,
            credentials,
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Current session token.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotLoggedIn`] before the first successful login.
    pub fn token(&self) -> Result<&str, ClientError> {
        self.token.as_deref().ok_or(ClientError::NotLoggedIn)
    }

    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.token.is_some()
    }

    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

/// Check that `server_url` is a bare server root and build the resolver URL.
///
/// # Errors
///
/// [`ClientError::InvalidServerUrl`] for unparsable URLs, non-HTTP schemes
/// or URLs with a path.
pub fn resolver_url(server_url: &str) -> Result<Url, ClientError> {
    let invalid = |reason: &str| ClientError::InvalidServerUrl {
        url: server_url.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = server_url.trim_end_matches('/');
    let url = Url::parse(trimmed).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.path() != "/" && !url.path().is_empty() {
        return Err(invalid("server URL must not contain a path"));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("server URL must not contain a query or fragment"));
    }

    url.join(RESOLVER_PATH).map_err(|e| invalid(&e.to_string()))
}

impl<T: Transport> ServiceClient<T> {
    /// Ask the server's resolver for the CLI service endpoint.
    ///
    /// # Errors
    ///
    /// Fails if the URL is not a bare server root, the resolver is
    /// unreachable, or it reports failure.
    pub fn resolve(&self, server_url: &str) -> Result<Url, ClientError> {
        log::info!("Establishing connection with server at: {server_url}");
        let resolver = resolver_url(server_url)?;
        log::debug!("Resolver url: {resolver}");

        let response =
            self.invoke_checked(&resolver, &GET_WEB_SERVICE_URL, envelope::resolver_request())?;
        let service_url = response
            .required("ServiceURL")
            .map_err(|source| super::response_error(&GET_WEB_SERVICE_URL, source))?;
        let endpoint = Url::parse(service_url).map_err(|e| ClientError::InvalidServerUrl {
            url: service_url.to_string(),
            reason: format!("resolver returned an unusable service URL: {e}"),
        })?;
        log::debug!("Web service url: {endpoint}");
        Ok(endpoint)
    }

    /// Log in and return a fresh session.
    ///
    /// # Errors
    ///
    /// [`ClientError::AuthenticationFailed`] with the server's text when the
    /// login is refused. Transport failures are returned as-is; login is
    /// never retried here.
    pub fn login(&self, endpoint: Url, credentials: Credentials) -> Result<Session, ClientError> {
        let mut session = Session::new(endpoint, credentials);
        self.reauthenticate(&mut session)?;
        Ok(session)
    }

    /// Log in again with the stored credentials and replace the token.
    ///
    /// # Errors
    ///
    /// As [`login`](Self::login). The old token is dropped even on failure.
    pub fn reauthenticate(&self, session: &mut Session) -> Result<(), ClientError> {
        session.token = None;
        let document = envelope::login_request(
            &session.credentials.username,
            session.credentials.password(),
            self.settings().lcid,
        );
        let response = self.invoke(
            &session.endpoint,
            &LOGIN,
            super::transport::RequestBody::from_bytes(document.into_bytes()),
        )?;
        if !response.is_successful() {
            let server_message = response.error_message().to_string();
            log::error!("Login to server failed: {server_message}");
            return Err(ClientError::AuthenticationFailed { server_message });
        }

        let token = response
            .required("SessionId")
            .map_err(|source| super::response_error(&LOGIN, source))?;
        session.token = Some(token.to_string());
        log::debug!("Login successful");
        Ok(())
    }

    /// Run `op` with the session, re-authenticating once if it reports an
    /// expired session.
    ///
    /// The re-run after re-authentication does not count as a retry. A
    /// second expiry in a row is returned to the caller.
    ///
    /// # Errors
    ///
    /// Whatever `op` or the re-authentication returns.
    pub fn with_session<R>(
        &self,
        session: &mut Session,
        mut op: impl FnMut(&Session) -> Result<R, ClientError>,
    ) -> Result<R, ClientError> {
        match op(session) {
            Err(ClientError::SessionExpired { operation, message }) => {
                log::info!("Session expired during {operation} ({message}), logging in again");
                self.reauthenticate(session)?;
                op(session)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolver_url_from_bare_server() {
        let url = resolver_url("https://sast.example.com").unwrap();
        assert_eq!(
            url.as_str(),
            "https://sast.example.com/cxwebinterface/cxwsresolver.asmx"
        );
        let url = resolver_url("http://10.0.0.5:8080/").unwrap();
        assert_eq!(
            url.as_str(),
            "http://10.0.0.5:8080/cxwebinterface/cxwsresolver.asmx"
        );
    }

    #[test]
    fn test_resolver_url_rejects_path() {
        let err = resolver_url("https://sast.example.com/CxWebClient").unwrap_err();
        assert!(err.to_string().contains("must not contain a path"));
    }

    #[test]
    fn test_resolver_url_rejects_garbage() {
        assert!(resolver_url("not a url").is_err());
        assert!(resolver_url("ftp://sast.example.com").is_err());
    }

    #[test]
    fn test_session_requires_login() {
        let session = Session::new(
            Url::parse("https://sast.example.com/cxwebinterface/CLI/CxCLIWebServiceV1.asmx").unwrap(),
            Credentials::new("admin", "secret"),
        );
        assert!(!session.is_logged_in());
        assert!(matches!(session.token(), Err(ClientError::NotLoggedIn)));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("admin", "hunter2");
        let debug = format!("{creds:?}");
        assert!(debug.contains("admin"));
        assert!(!debug.contains("hunter2"));
    }
}
