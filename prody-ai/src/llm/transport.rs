//! HTTP transport seam used by provider clients.
//!
//! Clients never talk to `reqwest` directly; they issue a POST through
//! [`HttpTransport`] so tests can script exchanges without a network.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{Error, Result, TransportError};

/// An outgoing JSON POST.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn post(url: impl Into<String>, body: serde_json::Value, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            body,
            timeout,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status and raw body of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Issues a POST and returns the body/status, or a transport failure.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError>;
}

/// Production transport backed by `reqwest`.
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_http_client(connect_timeout)?,
        })
    }
}

fn build_http_client(connect_timeout: Duration) -> Result<Client> {
    // Some sandboxed environments panic during proxy auto-detection in
    // reqwest's default builder. Fall back to no-proxy in that case.
    match catch_unwind(AssertUnwindSafe(|| {
        Client::builder().connect_timeout(connect_timeout).build()
    })) {
        Ok(Ok(client)) => Ok(client),
        Ok(Err(_)) | Err(_) => Client::builder()
            .no_proxy()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {}", e))),
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if err.is_connect() {
        TransportError::Unreachable(err.to_string())
    } else {
        TransportError::Interrupted(err.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        let timeout = request.timeout;
        let mut builder = self
            .http
            .post(&request.url)
            .timeout(timeout)
            .header("content-type", "application/json")
            .json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|e| classify(e, timeout))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| classify(e, timeout))?;

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_headers_are_case_insensitive() {
        let request = HttpRequest::post("http://x", json!({}), Duration::from_secs(1))
            .with_header("Authorization", "Bearer k");
        assert_eq!(request.header("authorization"), Some("Bearer k"));
        assert_eq!(request.header("x-goog-api-key"), None);
    }

    #[test]
    fn test_response_success_range() {
        assert!(HttpResponse::new(200, "").is_success());
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(401, "").is_success());
        assert!(!HttpResponse::new(503, "").is_success());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_failure() {
        let transport = ReqwestTransport::new(Duration::from_millis(200)).unwrap();
        // Port 9 on localhost is discard; nothing listens there in test envs.
        let request = HttpRequest::post("http://127.0.0.1:9/", json!({}), Duration::from_millis(500));
        let err = transport.post(request).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Unreachable(_) | TransportError::Timeout(_) | TransportError::Interrupted(_)
        ));
    }
}
