//! Policy-enforcing HTTP client
//!
//! [`HttpClient`] checks every URL, including each redirect hop, against
//! the [`NetworkAllowlist`] before handing the request to an
//! [`HttpTransport`]. Transports never follow redirects themselves.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::allowlist::{NetworkAllowlist, UrlMatch};
use crate::error::{Error, Result};

/// Default maximum response body size (10 MB)
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

/// Default request timeout (30 seconds)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Redirect hops `curl -L` will follow.
pub const MAX_REDIRECTS: usize = 10;

/// HTTP request method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Patch,
}

impl Method {
    /// Parse a `curl -X` argument.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "DELETE" => Some(Self::Delete),
            "HEAD" => Some(Self::Head),
            "PATCH" => Some(Self::Patch),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Patch => "PATCH",
        }
    }
}

/// Outgoing request, already validated by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Whole-request timeout; `None` means the transport default
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }
}

/// HTTP response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers (key-value pairs)
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Get the body as a UTF-8 string (lossy)
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Check if the response was successful (2xx status)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header with this name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }
}

/// Performs a single request/response exchange.
///
/// Implementations must not follow redirects; [`HttpClient`] does that so
/// every hop passes the allowlist. Tests plug in canned transports.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// HTTP client with allowlist-based access control.
#[derive(Clone)]
pub struct HttpClient {
    transport: Arc<dyn HttpTransport>,
    allowlist: NetworkAllowlist,
    max_response_bytes: usize,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("allowlist", &self.allowlist)
            .field("max_response_bytes", &self.max_response_bytes)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    pub fn new(allowlist: NetworkAllowlist, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            allowlist,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }

    /// Cap response bodies; larger responses fail with a network error.
    pub fn max_response_bytes(mut self, bytes: usize) -> Self {
        self.max_response_bytes = bytes;
        self
    }

    pub fn allowlist(&self) -> &NetworkAllowlist {
        &self.allowlist
    }

    fn authorize(&self, url: &str) -> Result<()> {
        match self.allowlist.check(url) {
            UrlMatch::Allowed => Ok(()),
            UrlMatch::Blocked { reason } => {
                #[cfg(feature = "logging")]
                tracing::warn!(target: "sandbash::network", %reason, "request denied");
                Err(Error::Network(format!("access denied: {reason}")))
            }
            UrlMatch::Invalid { reason } => Err(Error::Network(format!("invalid URL: {reason}"))),
        }
    }

    /// Send one request without following redirects.
    pub async fn request(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.authorize(&request.url)?;
        let response = self.transport.send(request).await?;
        if response.body.len() > self.max_response_bytes {
            return Err(Error::Network(format!(
                "response too large: {} bytes (max: {} bytes)",
                response.body.len(),
                self.max_response_bytes
            )));
        }
        Ok(response)
    }

    /// Send a request and follow up to `max_redirects` redirects.
    ///
    /// Returns every response in order, the last being final. Each
    /// `Location` is resolved against the current URL and must itself be
    /// allowed. 301/302/303 switch to a bodiless GET.
    pub async fn follow(
        &self,
        mut request: HttpRequest,
        max_redirects: usize,
    ) -> Result<Vec<HttpResponse>> {
        let mut chain = Vec::new();
        loop {
            let response = self.request(request.clone()).await?;
            let location = response
                .is_redirect()
                .then(|| response.header("location").map(str::to_string))
                .flatten();
            let status = response.status;
            chain.push(response);

            let Some(location) = location else {
                return Ok(chain);
            };
            if chain.len() > max_redirects {
                return Err(Error::Network(format!(
                    "maximum ({max_redirects}) redirects followed"
                )));
            }
            let next = url::Url::parse(&request.url)
                .and_then(|base| base.join(&location))
                .map_err(|e| Error::Network(format!("invalid redirect location: {e}")))?;
            request.url = next.to_string();
            if matches!(status, 301..=303) {
                request.method = Method::Get;
                request.body = None;
            }
        }
    }
}

#[cfg(feature = "http_client")]
pub use reqwest_transport::ReqwestTransport;

#[cfg(feature = "http_client")]
mod reqwest_transport {
    use super::*;
    use futures_util::StreamExt;
    use reqwest::Client;

    /// Real network transport.
    ///
    /// Redirects are disabled and responses are never decompressed, so a
    /// small compressed payload cannot expand past the size cap.
    pub struct ReqwestTransport {
        client: Client,
        max_response_bytes: usize,
    }

    impl ReqwestTransport {
        pub fn new() -> Result<Self> {
            Self::with_timeout(DEFAULT_TIMEOUT)
        }

        pub fn with_timeout(timeout: Duration) -> Result<Self> {
            // Already-installed providers are fine.
            let _ = rustls::crypto::ring::default_provider().install_default();
            let client = Client::builder()
                .timeout(timeout)
                .connect_timeout(timeout.min(Duration::from_secs(10)))
                .user_agent(concat!("sandbash/", env!("CARGO_PKG_VERSION")))
                .redirect(reqwest::redirect::Policy::none())
                .no_gzip()
                .no_brotli()
                .no_deflate()
                .build()
                .map_err(|e| Error::Network(format!("failed to create client: {e}")))?;
            Ok(Self {
                client,
                max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            })
        }

        fn method(method: Method) -> reqwest::Method {
            match method {
                Method::Get => reqwest::Method::GET,
                Method::Post => reqwest::Method::POST,
                Method::Put => reqwest::Method::PUT,
                Method::Delete => reqwest::Method::DELETE,
                Method::Head => reqwest::Method::HEAD,
                Method::Patch => reqwest::Method::PATCH,
            }
        }
    }

    #[async_trait]
    impl HttpTransport for ReqwestTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            let mut builder = self
                .client
                .request(Self::method(request.method), &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }
            if let Some(timeout) = request.timeout {
                builder = builder.timeout(timeout);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    Error::Network("operation timed out".to_string())
                } else {
                    Error::Network(format!("request failed: {e}"))
                }
            })?;

            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect();

            if let Some(len) = response.content_length()
                && len > self.max_response_bytes as u64
            {
                return Err(Error::Network(format!(
                    "response too large: {len} bytes (max: {} bytes)",
                    self.max_response_bytes
                )));
            }

            let mut body = Vec::new();
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk
                    .map_err(|e| Error::Network(format!("failed to read response: {e}")))?;
                if body.len() + chunk.len() > self.max_response_bytes {
                    return Err(Error::Network(format!(
                        "response too large: exceeded {} bytes limit",
                        self.max_response_bytes
                    )));
                }
                body.extend_from_slice(&chunk);
            }

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned responses by URL and records what was requested.
    #[derive(Default)]
    struct CannedTransport {
        routes: HashMap<String, HttpResponse>,
        seen: Mutex<Vec<(Method, String)>>,
    }

    impl CannedTransport {
        fn route(mut self, url: &str, status: u16, headers: &[(&str, &str)], body: &str) -> Self {
            self.routes.insert(
                url.to_string(),
                HttpResponse {
                    status,
                    headers: headers
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                    body: body.as_bytes().to_vec(),
                },
            );
            self
        }
    }

    #[async_trait]
    impl HttpTransport for CannedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.seen
                .lock()
                .unwrap()
                .push((request.method, request.url.clone()));
            self.routes
                .get(&request.url)
                .cloned()
                .ok_or_else(|| Error::Network(format!("no route to {}", request.url)))
        }
    }

    #[tokio::test]
    async fn test_denied_before_transport() {
        let transport = Arc::new(CannedTransport::default());
        let client = HttpClient::new(NetworkAllowlist::new(), transport.clone());

        let err = client
            .request(HttpRequest::new(Method::Get, "https://example.com"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("access denied"));
        assert!(transport.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_allowed_request() {
        let transport =
            Arc::new(CannedTransport::default().route("https://api.test/v1", 200, &[], "ok"));
        let client = HttpClient::new(NetworkAllowlist::new().allow("https://api.test"), transport);

        let response = client
            .request(HttpRequest::new(Method::Get, "https://api.test/v1"))
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(response.body_string(), "ok");
    }

    #[tokio::test]
    async fn test_redirect_rechecked_against_allowlist() {
        let transport = Arc::new(CannedTransport::default().route(
            "https://api.test/start",
            302,
            &[("Location", "https://evil.test/steal")],
            "",
        ));
        let client = HttpClient::new(NetworkAllowlist::new().allow("https://api.test"), transport.clone());

        let err = client
            .follow(HttpRequest::new(Method::Get, "https://api.test/start"), MAX_REDIRECTS)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("access denied"));
        assert_eq!(transport.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_relative_redirect_switches_to_get() {
        let transport = Arc::new(
            CannedTransport::default()
                .route("https://api.test/a", 303, &[("location", "/b")], "")
                .route("https://api.test/b", 200, &[], "done"),
        );
        let client = HttpClient::new(NetworkAllowlist::new().allow("https://api.test"), transport.clone());

        let mut request = HttpRequest::new(Method::Post, "https://api.test/a");
        request.body = Some(b"x".to_vec());
        let chain = client.follow(request, MAX_REDIRECTS).await.unwrap();

        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].body_string(), "done");
        assert_eq!(
            transport.seen.lock().unwrap()[1],
            (Method::Get, "https://api.test/b".to_string())
        );
    }

    #[tokio::test]
    async fn test_redirect_loop_is_bounded() {
        let transport = Arc::new(CannedTransport::default().route(
            "https://api.test/loop",
            301,
            &[("Location", "https://api.test/loop")],
            "",
        ));
        let client = HttpClient::new(NetworkAllowlist::new().allow("https://api.test"), transport);

        let err = client
            .follow(HttpRequest::new(Method::Get, "https://api.test/loop"), 3)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("redirects"));
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let transport =
            Arc::new(CannedTransport::default().route("https://api.test/big", 200, &[], "0123456789"));
        let client = HttpClient::new(NetworkAllowlist::allow_all(), transport).max_response_bytes(4);

        let err = client
            .request(HttpRequest::new(Method::Get, "https://api.test/big"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_method_parse() {
        assert_eq!(Method::parse("post"), Some(Method::Post));
        assert_eq!(Method::parse("BREW"), None);
        assert_eq!(Method::Delete.as_str(), "DELETE");
    }
}
