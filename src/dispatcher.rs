//! Chat Dispatcher Module
//!
//! Load-balances chat completion requests:
//! - Pooled models rotate across interchangeable deployments via a shared
//!   round-robin cursor, retrying on rate limits (bounded by pool size)
//! - Content-policy rejections are replaced by a uniform refusal completion
//! - Rate-limit exhaustion is replaced by a uniform "busy" completion
//! - Standalone chat models are forwarded once and relayed verbatim

use bytes::Bytes;
use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::endpoints::EndpointRegistry;
use crate::error::{GatewayError, Result};
use crate::round_robin::RoundRobinCursor;
use crate::upstream::{BackendTransport, UpstreamReply};

/// Wait between a rate-limited attempt and the next one.
pub const RATE_LIMIT_BACKOFF: Duration = Duration::from_millis(200);

/// Marker phrase in the vendor's 400 body for moderation refusals.
pub const POLICY_REJECTION_MARKER: &str = "content management policy";

pub const REFUSAL_MESSAGE: &str = "I’m sorry, I can’t answer that. Please rephrase.";
pub const BUSY_MESSAGE: &str = "Service busy, try again shortly.";

const JSON_CONTENT_TYPE: &str = "application/json";

/// How a backend reply is treated by the pooled path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClass {
    RateLimited,
    PolicyRejected,
    /// Success or any other error: relayed as-is
    Final,
}

/// True when a backend reply is a content-policy refusal.
pub fn is_policy_rejection(status: u16, body: &[u8]) -> bool {
    status == 400
        && body
            .windows(POLICY_REJECTION_MARKER.len())
            .any(|w| w == POLICY_REJECTION_MARKER.as_bytes())
}

pub fn classify(reply: &UpstreamReply) -> ReplyClass {
    if reply.status == 429 {
        ReplyClass::RateLimited
    } else if is_policy_rejection(reply.status, &reply.body) {
        ReplyClass::PolicyRejected
    } else {
        ReplyClass::Final
    }
}

/// Result of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Backend reply relayed unmodified
    Upstream(UpstreamReply),
    /// Backend refused on content policy; answer with the refusal completion
    PolicyRefusal,
    /// Every pool attempt was rate limited; answer with the busy completion
    Busy,
}

impl DispatchOutcome {
    /// Materialize the outcome as a reply the HTTP layer can relay.
    pub fn into_reply(self, model: &str) -> UpstreamReply {
        match self {
            DispatchOutcome::Upstream(reply) => reply,
            DispatchOutcome::PolicyRefusal => synthesized_reply(model, REFUSAL_MESSAGE),
            DispatchOutcome::Busy => synthesized_reply(model, BUSY_MESSAGE),
        }
    }
}

/// Chat-completion body carrying a fixed assistant message.
pub fn synthesized_completion(model: &str, content: &str) -> Value {
    let created = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        "object": "chat.completion",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

fn synthesized_reply(model: &str, content: &str) -> UpstreamReply {
    UpstreamReply {
        status: 200,
        content_type: Some(JSON_CONTENT_TYPE.to_string()),
        body: Bytes::from(synthesized_completion(model, content).to_string()),
    }
}

/// Routes chat requests to pools or standalone deployments.
#[derive(Debug)]
pub struct ChatDispatcher {
    registry: std::sync::Arc<EndpointRegistry>,
    /// One cursor per registry pool, same order as `registry.pools()`
    cursors: Vec<RoundRobinCursor>,
    backoff: Duration,
}

impl ChatDispatcher {
    pub fn new(registry: std::sync::Arc<EndpointRegistry>) -> Result<Self> {
        let cursors = registry
            .pools()
            .iter()
            .map(RoundRobinCursor::new)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            registry,
            cursors,
            backoff: RATE_LIMIT_BACKOFF,
        })
    }

    /// Override the rate-limit backoff.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// Dispatch a chat request for `model`.
    ///
    /// `body` is the raw client payload. Pooled requests have their `model`
    /// field rewritten per attempt; standalone requests are sent byte-for-byte.
    pub async fn dispatch<T>(&self, transport: &T, body: Bytes, model: &str) -> Result<DispatchOutcome>
    where
        T: BackendTransport + ?Sized,
    {
        if let Some(idx) = self.registry.pool_index_for(model) {
            let cursor = self.cursors.get(idx).ok_or_else(|| {
                GatewayError::Config(format!("no cursor for pool of model {model}"))
            })?;
            let payload: Value = serde_json::from_slice(&body)
                .map_err(|e| GatewayError::InvalidRequest(format!("body is not valid JSON: {e}")))?;
            return self.dispatch_pooled(transport, cursor, payload, model).await;
        }

        if let Some(endpoint) = self.registry.chat_single(model) {
            tracing::debug!(model, target = %endpoint.name, "forwarding to standalone chat endpoint");
            let reply = transport.post(&endpoint.url, JSON_CONTENT_TYPE, body).await?;
            return Ok(DispatchOutcome::Upstream(reply));
        }

        Err(GatewayError::UnsupportedModel(model.to_string()))
    }

    async fn dispatch_pooled<T>(
        &self,
        transport: &T,
        cursor: &RoundRobinCursor,
        mut payload: Value,
        model: &str,
    ) -> Result<DispatchOutcome>
    where
        T: BackendTransport + ?Sized,
    {
        let Some(obj) = payload.as_object_mut() else {
            return Err(GatewayError::InvalidRequest(
                "body must be a JSON object".to_string(),
            ));
        };

        let attempts = cursor.size();
        for attempt in 1..=attempts {
            let target = cursor.next();
            obj.insert("model".to_string(), Value::String(target.name.clone()));
            let outbound = serde_json::to_vec(obj)
                .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;

            let reply = transport
                .post(&target.url, JSON_CONTENT_TYPE, Bytes::from(outbound))
                .await?;

            match classify(&reply) {
                ReplyClass::RateLimited => {
                    tracing::warn!(
                        pool = cursor.name(),
                        target = %target.name,
                        attempt,
                        attempts,
                        "backend rate limited, rotating"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
                ReplyClass::PolicyRejected => {
                    tracing::info!(
                        pool = cursor.name(),
                        target = %target.name,
                        attempt,
                        "backend rejected content on policy, returning refusal"
                    );
                    return Ok(DispatchOutcome::PolicyRefusal);
                }
                ReplyClass::Final => {
                    tracing::debug!(
                        pool = cursor.name(),
                        target = %target.name,
                        attempt,
                        status = reply.status,
                        "pooled dispatch finished"
                    );
                    return Ok(DispatchOutcome::Upstream(reply));
                }
            }
        }

        tracing::warn!(
            pool = cursor.name(),
            requested = model,
            attempts,
            "every pool member rate limited, returning busy"
        );
        Ok(DispatchOutcome::Busy)
    }
}
