//! Outbound calls to the backend deployments.
//!
//! `BackendClient` attaches the backend credential and captures the reply as
//! raw `(status, content-type, body)` so callers can relay it untouched.

use actix_web::HttpResponse;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};

use crate::error::{GatewayError, Result};

/// A backend reply captured verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl UpstreamReply {
    /// Relay the reply to the client: same status, same body, same content type.
    pub fn into_http_response(self) -> HttpResponse {
        let status = actix_web::http::StatusCode::from_u16(self.status)
            .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY);
        let mut builder = HttpResponse::build(status);
        if let Some(ct) = self.content_type {
            builder.insert_header(("content-type", ct));
        }
        builder.body(self.body)
    }
}

/// POST seam between the dispatch logic and the network.
#[async_trait]
pub trait BackendTransport: Send + Sync {
    async fn post(&self, url: &str, content_type: &str, body: Bytes) -> Result<UpstreamReply>;
}

/// reqwest-backed transport carrying the backend credential.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    auth_header: HeaderName,
    auth_value: HeaderValue,
}

impl std::fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendClient")
            .field("auth_header", &self.auth_header)
            .finish_non_exhaustive()
    }
}

impl BackendClient {
    pub fn new(http: reqwest::Client, auth_header: &str, api_key: &str) -> Result<Self> {
        let auth_header = HeaderName::from_bytes(auth_header.as_bytes()).map_err(|e| {
            GatewayError::Config(format!("invalid backend auth header {auth_header}: {e}"))
        })?;
        let mut auth_value = HeaderValue::from_str(api_key)
            .map_err(|e| GatewayError::Config(format!("invalid backend api key: {e}")))?;
        auth_value.set_sensitive(true);
        Ok(Self {
            http,
            auth_header,
            auth_value,
        })
    }

    pub fn auth_header(&self) -> &HeaderName {
        &self.auth_header
    }

    pub fn auth_value(&self) -> &HeaderValue {
        &self.auth_value
    }
}

#[async_trait]
impl BackendTransport for BackendClient {
    async fn post(&self, url: &str, content_type: &str, body: Bytes) -> Result<UpstreamReply> {
        let resp = self
            .http
            .post(url)
            .header(self.auth_header.clone(), self.auth_value.clone())
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.bytes().await?;

        tracing::debug!(url, status, bytes = body.len(), "backend replied");

        Ok(UpstreamReply {
            status,
            content_type,
            body,
        })
    }
}
