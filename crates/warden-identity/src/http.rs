//! Outbound HTTP collaborator.
//!
//! Federation providers talk to IdP endpoints through this trait so tests
//! can swap in a scripted double; [`ReqwestHttpClient`] is the production
//! implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::{IdentityError, IdentityResult};

/// Default timeout for token/userinfo calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Metadata documents are larger and fetched rarely.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// A minimal HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> IdentityResult<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| IdentityError::MalformedResponse(e.to_string()))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// The `error_description`/`error` message of an OAuth error body, or
    /// a generic status line.
    pub fn upstream_error(&self) -> String {
        if let Ok(body) = self.json::<serde_json::Value>() {
            if let Some(description) = body.get("error_description").and_then(|v| v.as_str()) {
                return description.to_string();
            }
            if let Some(error) = body.get("error").and_then(|v| v.as_str()) {
                return error.to_string();
            }
        }
        format!("HTTP {}", self.status)
    }
}

/// Outbound HTTP contract consumed by the federation providers.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> IdentityResult<HttpResponse>;

    async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
        headers: &[(String, String)],
        timeout: Duration,
    ) -> IdentityResult<HttpResponse>;
}

/// Production HTTP client backed by `reqwest` with rustls.
#[derive(Debug, Clone, Default)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> IdentityResult<HttpResponse> {
        let mut request = self.client.get(url).timeout(timeout);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
        headers: &[(String, String)],
        timeout: Duration,
    ) -> IdentityResult<HttpResponse> {
        let mut request = self.client.post(url).timeout(timeout).form(form);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_error_prefers_description() {
        let response = HttpResponse {
            status: 400,
            body: br#"{"error":"invalid_grant","error_description":"Code expired"}"#.to_vec(),
        };
        assert_eq!(response.upstream_error(), "Code expired");

        let response = HttpResponse {
            status: 400,
            body: br#"{"error":"invalid_grant"}"#.to_vec(),
        };
        assert_eq!(response.upstream_error(), "invalid_grant");

        let response = HttpResponse {
            status: 502,
            body: Vec::new(),
        };
        assert_eq!(response.upstream_error(), "HTTP 502");
    }
}
