//! 1:1 forwarding for audio endpoints.
//!
//! Transcription (multipart upload) and speech (JSON in, audio out) have a
//! single configured deployment each. Payloads are relayed byte-for-byte with
//! the caller's content type, so multipart boundaries survive untouched.

use bytes::Bytes;

use crate::endpoints::{EndpointKind, EndpointRegistry};
use crate::error::{GatewayError, Result};
use crate::upstream::{BackendTransport, UpstreamReply};

const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Forward `body` to the registry's endpoint for `kind` and return its reply as-is.
pub async fn forward<T>(
    registry: &EndpointRegistry,
    transport: &T,
    kind: EndpointKind,
    body: Bytes,
    content_type: Option<&str>,
) -> Result<UpstreamReply>
where
    T: BackendTransport + ?Sized,
{
    let endpoint = registry
        .capability(kind)
        .ok_or_else(|| GatewayError::UnsupportedModel(kind.as_str().to_string()))?;
    let content_type = content_type
        .filter(|ct| !ct.trim().is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE);

    tracing::debug!(
        capability = kind.as_str(),
        target = %endpoint.name,
        bytes = body.len(),
        "passthrough request"
    );
    transport.post(&endpoint.url, content_type, body).await
}

/// Speech-to-text: relay a multipart upload.
pub async fn transcribe<T>(
    registry: &EndpointRegistry,
    transport: &T,
    body: Bytes,
    content_type: Option<&str>,
) -> Result<UpstreamReply>
where
    T: BackendTransport + ?Sized,
{
    forward(
        registry,
        transport,
        EndpointKind::Transcription,
        body,
        content_type,
    )
    .await
}

/// Text-to-speech: relay a JSON request, return the audio reply.
pub async fn speak<T>(
    registry: &EndpointRegistry,
    transport: &T,
    body: Bytes,
    content_type: Option<&str>,
) -> Result<UpstreamReply>
where
    T: BackendTransport + ?Sized,
{
    forward(registry, transport, EndpointKind::Speech, body, content_type).await
}
