use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use crate::auth::AuthGate;
use crate::dispatcher::ChatDispatcher;
use crate::endpoints::{EndpointKind, EndpointRegistry};
use crate::realtime::BackendConnector;
use crate::upstream::BackendClient;

/// Default upper bound for one backend HTTP call.
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 60;

/// Default request body limit; large enough for a 25 MB audio upload.
pub const DEFAULT_MAX_BODY_BYTES: usize = 25 * 1024 * 1024 + 64 * 1024;

/// Initialize dotenv and structured tracing based on RUST_LOG.
/// - Supports explicit env file paths via ENV_FILE, DOTENV_PATH
/// - Falls back to default .env discovery
/// - Logs the source used
pub fn init_tracing() {
    let mut env_source: String = "none".into();
    for key in ["ENV_FILE", "DOTENV_PATH"] {
        if let Ok(p) = std::env::var(key) {
            let p = p.trim();
            if !p.is_empty()
                && std::path::Path::new(p).is_file()
                && dotenvy::from_filename(p).is_ok()
            {
                env_source = format!("{p} ({key})");
                break;
            }
        }
    }

    if env_source == "none" && dotenvy::dotenv().is_ok() {
        env_source = ".env".into();
    }

    // Initialize tracing (respects RUST_LOG potentially provided by the env file)
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let subscriber = fmt().with_env_filter(EnvFilter::new(filter)).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    tracing::info!("Environment loaded from: {}", env_source);
}

fn env_truthy(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v.trim().to_ascii_lowercase())
        .map(|v| v == "1" || v == "true" || v == "yes" || v == "on")
        .unwrap_or(false)
}

/// Request body limit from POOLGATE_MAX_BODY_BYTES.
pub fn max_body_bytes_from_env() -> usize {
    std::env::var("POOLGATE_MAX_BODY_BYTES")
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_MAX_BODY_BYTES)
}

/// Backend call bound from POOLGATE_HTTP_TIMEOUT_SECONDS. Also bounds the
/// realtime backend handshake.
pub fn http_timeout_from_env() -> std::time::Duration {
    let secs = std::env::var("POOLGATE_HTTP_TIMEOUT_SECONDS")
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECONDS);
    std::time::Duration::from_secs(secs)
}

/// Build an HTTP client honoring proxy and timeout environment variables.
///
/// Environment:
/// - POOLGATE_NO_PROXY = 1|true|yes|on   -> disable all proxies
/// - POOLGATE_PROXY_URL = <url>          -> proxy for all schemes
/// - POOLGATE_HTTP_TIMEOUT_SECONDS       -> per-call timeout (u64, default 60)
pub fn build_http_client_from_env() -> reqwest::Client {
    let mut builder = reqwest::Client::builder().timeout(http_timeout_from_env());

    if env_truthy("POOLGATE_NO_PROXY") {
        builder = builder.no_proxy();
    } else if let Ok(url) = std::env::var("POOLGATE_PROXY_URL") {
        let u = url.trim();
        if !u.is_empty() {
            match reqwest::Proxy::all(u) {
                Ok(p) => builder = builder.proxy(p),
                Err(e) => tracing::warn!("Ignoring invalid POOLGATE_PROXY_URL {}: {}", u, e),
            }
        }
    }

    builder = builder.user_agent(format!("poolgate/{}", env!("CARGO_PKG_VERSION")));

    builder.build().unwrap_or_else(|e| {
        tracing::warn!("Falling back to default HTTP client: {}", e);
        reqwest::Client::new()
    })
}

/// Shared application state used by the HTTP server and handlers.
///
/// Built once at startup and shared across workers through `web::Data`, so
/// every worker rotates the same pool cursors.
pub struct AppState {
    pub auth: AuthGate,
    pub registry: Arc<EndpointRegistry>,
    pub backend: BackendClient,
    pub dispatcher: ChatDispatcher,
    /// Present when the registry has a realtime endpoint
    pub realtime: Option<BackendConnector>,
}

impl AppState {
    pub fn new(
        auth: AuthGate,
        registry: Arc<EndpointRegistry>,
        backend: BackendClient,
    ) -> crate::error::Result<Self> {
        let dispatcher = ChatDispatcher::new(registry.clone())?;
        let realtime = registry
            .capability(EndpointKind::Realtime)
            .map(|endpoint| {
                BackendConnector::new(
                    endpoint.websocket_url(),
                    backend.auth_header().clone(),
                    backend.auth_value().clone(),
                )
            });
        Ok(Self {
            auth,
            registry,
            backend,
            dispatcher,
            realtime,
        })
    }

    /// Assemble state from the registry plus PROXY_API_KEY and the backend key env var.
    pub fn from_env(registry: EndpointRegistry) -> anyhow::Result<Self> {
        let auth = AuthGate::from_env()
            .ok_or_else(|| anyhow::anyhow!("PROXY_API_KEY must be set to a non-empty value"))?;

        let key_env = registry.backend_key_env().to_string();
        let api_key = std::env::var(&key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("{key_env} must be set to the backend API key"))?;

        let backend = BackendClient::new(
            build_http_client_from_env(),
            registry.backend_auth_header(),
            &api_key,
        )?;
        let mut state = Self::new(auth, Arc::new(registry), backend)?;
        let handshake_timeout = http_timeout_from_env();
        state.realtime = state
            .realtime
            .map(|connector| connector.with_handshake_timeout(handshake_timeout));
        Ok(state)
    }

    /// Verify the incoming `Authorization: Bearer` header.
    pub fn verify_bearer_header(
        &self,
        headers: &actix_web::http::header::HeaderMap,
    ) -> crate::auth::Verification {
        let token = crate::auth::bearer_token(headers);
        self.auth.authenticate(token.as_deref())
    }
}

/// Build a JSON error response with the given HTTP status and message.
pub fn error_response(status: StatusCode, msg: &str) -> HttpResponse {
    let body = serde_json::json!({ "error": { "message": msg } });
    HttpResponse::build(status).json(body)
}
