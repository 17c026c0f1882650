/* poolgate/src/auth.rs

Shared-secret gate for every entry point.

- HTTP endpoints: the caller presents `Authorization: Bearer <token>`.
- Realtime endpoint: the bearer header, or a `key` query parameter for
  browser clients that cannot set headers on a WebSocket handshake. The
  header wins when both are present.

Tokens are opaque and compared by exact equality against PROXY_API_KEY.
*/

#![forbid(unsafe_code)]

use std::collections::HashMap;

/// Outcome of checking a caller credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Authorized,
    Unauthorized,
}

impl Verification {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Verification::Authorized)
    }
}

/// Validates caller credentials against the configured proxy secret.
#[derive(Clone)]
pub struct AuthGate {
    secret: String,
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate").finish_non_exhaustive()
    }
}

impl AuthGate {
    /// Build a gate for `secret`. Returns `None` for an empty secret so the
    /// gateway can never run with authentication silently disabled.
    pub fn new(secret: impl Into<String>) -> Option<Self> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return None;
        }
        Some(Self { secret })
    }

    /// Read the secret from PROXY_API_KEY.
    pub fn from_env() -> Option<Self> {
        std::env::var("PROXY_API_KEY").ok().and_then(Self::new)
    }

    pub fn authenticate(&self, credential: Option<&str>) -> Verification {
        match credential {
            Some(token) if token == self.secret => Verification::Authorized,
            _ => Verification::Unauthorized,
        }
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &actix_web::http::header::HeaderMap) -> Option<String> {
    let raw = headers
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())?;
    parse_bearer(raw)
}

fn parse_bearer(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.len() < 7 {
        return None;
    }
    let (scheme, rest) = s.split_at(6);
    if !scheme.eq_ignore_ascii_case("bearer") || !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let token = rest.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Credential for the realtime handshake: bearer header first, then `?key=`.
pub fn realtime_credential(
    headers: &actix_web::http::header::HeaderMap,
    query: &HashMap<String, String>,
) -> Option<String> {
    bearer_token(headers).or_else(|| query.get("key").filter(|k| !k.is_empty()).cloned())
}
