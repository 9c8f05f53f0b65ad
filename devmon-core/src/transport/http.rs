//! Request/response transport over HTTP(S)

use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::stream::millis;
use super::{Transport, TransportError, TransportKind, TransportResult, target_name};
use crate::operation::{
    AttachedCredential, HttpAuthMode, HttpMethod, HttpRequest, Operation, RawResult, Target,
};

/// Default timeout for establishing connections (seconds)
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

/// URL scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpScheme {
    /// Plain HTTP
    Http,
    /// HTTP over TLS
    #[default]
    Https,
}

impl HttpScheme {
    /// Port used when none is configured
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// HTTP transport configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Device address (host name or IP)
    pub address: String,
    /// Port, or the scheme default
    pub port: Option<u16>,
    /// URL scheme
    pub scheme: HttpScheme,
    /// Verify server certificates
    pub tls_verify: bool,
    /// Keep cookies set by the device across requests
    pub cookie_jar: bool,
    /// Follow redirects automatically
    pub follow_redirects: bool,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Headers sent with every request
    pub default_headers: Vec<(String, String)>,
}

impl HttpConfig {
    /// Creates an HTTPS configuration with certificate verification, a
    /// cookie jar and automatic redirects
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: None,
            scheme: HttpScheme::Https,
            tls_verify: true,
            cookie_jar: true,
            follow_redirects: true,
            connect_timeout: Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS),
            default_headers: Vec::new(),
        }
    }

    /// Sets the scheme
    #[must_use]
    pub const fn with_scheme(mut self, scheme: HttpScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Sets the port
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Enables or disables certificate verification
    #[must_use]
    pub const fn with_tls_verify(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Enables or disables automatic redirects
    #[must_use]
    pub const fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    /// Base URL without a trailing slash
    #[must_use]
    pub fn base_url(&self) -> String {
        let port = self.port.unwrap_or_else(|| self.scheme.default_port());
        format!("{}://{}:{port}", self.scheme.as_str(), self.address)
    }
}

/// HTTP(S) transport backed by a `reqwest` client
#[derive(Debug)]
pub struct HttpTransport {
    config: HttpConfig,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Builds the client. No connection is made until the first request.
    pub fn open(config: HttpConfig) -> TransportResult<Self> {
        let redirect = if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        };

        let client = reqwest::Client::builder()
            .redirect(redirect)
            .cookie_store(config.cookie_jar)
            .danger_accept_invalid_certs(!config.tls_verify)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| TransportError::InvalidConfig(format!("HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.config.base_url();
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    fn build(&self, request: &HttpRequest, operation: &Operation) -> reqwest::RequestBuilder {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, self.url(&request.path))
            .timeout(operation.timeout());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in self.config.default_headers.iter().chain(&request.headers) {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        match (request.auth, &operation.credential) {
            (HttpAuthMode::None, _) | (_, None) => builder,
            (
                HttpAuthMode::Basic | HttpAuthMode::Session,
                Some(
                    AttachedCredential::Basic { username, password }
                    | AttachedCredential::Login { username, password },
                ),
            ) => builder.basic_auth(username, Some(password.expose_secret())),
            (HttpAuthMode::Basic, Some(_)) => {
                tracing::warn!(
                    operation = %operation.name,
                    "Basic authentication requested but the session holds a token"
                );
                builder
            }
            (HttpAuthMode::Session, Some(AttachedCredential::Bearer(token))) => {
                builder.bearer_auth(token.expose_secret())
            }
            (HttpAuthMode::Session, Some(AttachedCredential::Cookie { name, value })) => builder
                .header(
                    reqwest::header::COOKIE,
                    format!("{name}={}", value.expose_secret()),
                ),
            (HttpAuthMode::Session, Some(AttachedCredential::Header { name, value })) => {
                builder.header(name.as_str(), value.expose_secret())
            }
        }
    }
}

/// Maps a `reqwest` error onto the transport taxonomy
fn map_request_error(error: &reqwest::Error, url: &str, started: Instant) -> TransportError {
    if error.is_timeout() {
        return TransportError::Timeout {
            after_ms: millis(started.elapsed()),
            received: 0,
        };
    }
    if error.is_connect() {
        let mut detail = error.to_string();
        let mut source = error.source();
        while let Some(inner) = source {
            detail.push_str(": ");
            detail.push_str(&inner.to_string());
            source = inner.source();
        }
        let lower = detail.to_lowercase();
        if lower.contains("refused") {
            return TransportError::ConnectionRefused(url.to_string());
        }
        return TransportError::Unreachable(format!("{url} ({detail})"));
    }
    TransportError::Io(error.to_string())
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn send(&self, operation: &Operation) -> TransportResult<RawResult> {
        let Target::Http(request) = &operation.target else {
            return Err(TransportError::UnsupportedTarget {
                transport: TransportKind::Http,
                target: target_name(operation),
            });
        };

        let url = self.url(&request.path);
        let started = Instant::now();
        let response = self
            .build(request, operation)
            .send()
            .await
            .map_err(|e| map_request_error(&e, &url, started))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| map_request_error(&e, &url, started))?;

        tracing::debug!(
            operation = %operation.name,
            method = %request.method,
            status,
            bytes = body.len(),
            "HTTP response received"
        );

        Ok(RawResult {
            body,
            status: Some(status),
            headers,
            elapsed: started.elapsed(),
            ..RawResult::default()
        })
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ErrorClassification;
    use crate::transport::fixtures::HttpFixture;
    use secrecy::SecretString;

    fn transport(port: u16) -> HttpTransport {
        HttpTransport::open(
            HttpConfig::new("127.0.0.1")
                .with_scheme(HttpScheme::Http)
                .with_port(port)
                .with_follow_redirects(false),
        )
        .unwrap()
    }

    #[test]
    fn test_base_url_uses_scheme_default_port() {
        assert_eq!(HttpConfig::new("10.0.0.1").base_url(), "https://10.0.0.1:443");
        assert_eq!(
            HttpConfig::new("sw1")
                .with_scheme(HttpScheme::Http)
                .with_port(8080)
                .base_url(),
            "http://sw1:8080"
        );
    }

    #[tokio::test]
    async fn test_get_with_bearer_and_query() {
        let fixture = HttpFixture::serve(vec![HttpFixture::response(
            200,
            &[("X-Device", "sw1")],
            r#"{"ok":true}"#,
        )])
        .await;
        let transport = transport(fixture.port);

        let mut op = Operation::http(
            "status",
            HttpRequest::get("/api/status").with_query("detail", "full"),
        );
        op.credential = Some(AttachedCredential::Bearer(SecretString::from("tok-1")));

        let result = transport.send(&op).await.unwrap();
        assert_eq!(result.status, Some(200));
        assert_eq!(result.body, r#"{"ok":true}"#);
        assert_eq!(result.header("x-device"), Some("sw1"));

        let requests = fixture.requests().await;
        assert!(requests[0].starts_with("GET /api/status?detail=full HTTP/1.1"));
        assert!(requests[0].to_lowercase().contains("authorization: bearer tok-1"));
    }

    #[tokio::test]
    async fn test_redirect_returned_when_not_following() {
        let fixture = HttpFixture::serve(vec![HttpFixture::response(
            302,
            &[("Location", "/login?next=1")],
            "",
        )])
        .await;
        let transport = transport(fixture.port);

        let op = Operation::http("home", HttpRequest::get("/"));
        let result = transport.send(&op).await.unwrap();
        assert_eq!(result.status, Some(302));
        assert_eq!(result.redirect_location(), Some("/login?next=1"));
    }

    #[tokio::test]
    async fn test_auth_mode_none_sends_no_credentials() {
        let fixture = HttpFixture::serve(vec![HttpFixture::response(200, &[], "")]).await;
        let transport = transport(fixture.port);

        let mut op = Operation::http(
            "public",
            HttpRequest::get("/public").with_auth(HttpAuthMode::None),
        );
        op.credential = Some(AttachedCredential::Basic {
            username: "admin".into(),
            password: SecretString::from("pw"),
        });
        transport.send(&op).await.unwrap();

        let requests = fixture.requests().await;
        assert!(!requests[0].to_lowercase().contains("authorization:"));
    }

    #[tokio::test]
    async fn test_refused_connection_is_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = transport(port)
            .send(&Operation::http("probe", HttpRequest::get("/")))
            .await
            .unwrap_err();
        assert_eq!(
            err.classified("probe").classification,
            ErrorClassification::ResourceUnavailable
        );
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let fixture = HttpFixture::silent().await;
        let op = Operation::http("slow", HttpRequest::get("/"))
            .with_timeout(Duration::from_millis(150));

        let err = transport(fixture.port).send(&op).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout { received: 0, .. }));
    }
}
