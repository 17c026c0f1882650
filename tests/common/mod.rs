#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::post, Router};
use bytes::Bytes;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use actix_web::web;
use poolgate::auth::AuthGate;
use poolgate::dispatcher::ChatDispatcher;
use poolgate::endpoints::EndpointRegistry;
use poolgate::upstream::BackendClient;
use poolgate::util::AppState;

pub const PROXY_KEY: &str = "proxy-secret";
pub const BACKEND_KEY: &str = "backend-secret";

/// One request as seen by a mock deployment.
#[derive(Debug, Clone)]
pub struct Call {
    pub deployment: String,
    pub api_key: Option<String>,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl Call {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone)]
pub struct Scripted {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Bytes,
}

impl Scripted {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: Bytes::from(body.to_string()),
        }
    }
}

#[derive(Clone, Default)]
struct MockState {
    calls: Arc<AsyncMutex<Vec<Call>>>,
    script: Arc<AsyncMutex<HashMap<String, VecDeque<Scripted>>>>,
}

async fn handle_deployment(
    State(state): State<MockState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header_str = |key: &str| {
        headers
            .get(key)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    state.calls.lock().await.push(Call {
        deployment: name.clone(),
        api_key: header_str("api-key"),
        content_type: header_str("content-type"),
        body,
    });

    let scripted = state
        .script
        .lock()
        .await
        .get_mut(&name)
        .and_then(|queue| queue.pop_front())
        .unwrap_or_else(|| {
            Scripted::json(
                200,
                json!({
                    "id": "chatcmpl-upstream",
                    "object": "chat.completion",
                    "served_by": name,
                    "choices": [{
                        "index": 0,
                        "message": {"role": "assistant", "content": "hello"},
                        "finish_reason": "stop"
                    }]
                }),
            )
        });

    let status = StatusCode::from_u16(scripted.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(header::CONTENT_TYPE, scripted.content_type)], scripted.body).into_response()
}

/// Axum server standing in for a set of Azure deployments at `/deployments/{name}`.
pub struct MockBackend {
    pub base_url: String,
    state: MockState,
    join: JoinHandle<()>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = MockState::default();
        let app = Router::new()
            .route("/deployments/:name", post(handle_deployment))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind upstream");
        let addr = listener.local_addr().expect("local addr");
        let base_url = format!("http://{}", addr);

        let join = tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("upstream server error");
        });

        Self {
            base_url,
            state,
            join,
        }
    }

    pub fn url(&self, deployment: &str) -> String {
        format!("{}/deployments/{}", self.base_url, deployment)
    }

    /// Queue replies for `deployment`; unscripted calls get a 200 completion.
    pub async fn script(&self, deployment: &str, replies: Vec<Scripted>) {
        self.state
            .script
            .lock()
            .await
            .entry(deployment.to_string())
            .or_default()
            .extend(replies);
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().await.clone()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.join.abort();
    }
}

/// App state for `registry` with a 1 ms rate-limit backoff.
pub fn app_state(registry: Value) -> web::Data<AppState> {
    let registry =
        Arc::new(EndpointRegistry::from_json_str(&registry.to_string()).expect("registry"));
    let backend = BackendClient::new(
        reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("http client"),
        "api-key",
        BACKEND_KEY,
    )
    .expect("backend client");
    let auth = AuthGate::new(PROXY_KEY).expect("auth gate");
    let mut state = AppState::new(auth, registry.clone(), backend).expect("app state");
    state.dispatcher = ChatDispatcher::new(registry)
        .expect("dispatcher")
        .with_backoff(Duration::from_millis(1));
    web::Data::new(state)
}
