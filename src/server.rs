use actix_web::http::header;
use actix_web::{rt, web, HttpRequest, HttpResponse, Responder};
use bytes::Bytes;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::time::Duration;

use crate::auth::realtime_credential;
use crate::endpoints::EndpointKind;
use crate::error::GatewayError;
use crate::passthrough;
use crate::realtime::{self, ClientSink, ClientSource, FrameSink, RelaySession};
use crate::util::AppState;

/// How long a refused realtime client gets to acknowledge the close frame.
const REJECT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const ROUTES: [&str; 5] = [
    "/status",
    "/v1/chat/completions",
    "/v1/audio/transcriptions",
    "/v1/audio/speech",
    "/v1/realtime/sessions",
];

/// Configure Actix-web routes with AppState.
pub fn config_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("")
            .route("/status", web::get().to(status))
            .route("/v1/chat/completions", web::post().to(chat_completions))
            .route("/v1/audio/transcriptions", web::post().to(transcriptions))
            .route("/v1/audio/speech", web::post().to(speech))
            .route(
                "/v1/realtime/sessions",
                web::method(actix_web::http::Method::OPTIONS).to(realtime_preflight),
            )
            .route("/v1/realtime/sessions", web::get().to(realtime_sessions)),
    );
}

/// Service status endpoint exposing version, routes and registry layout.
async fn status(state: web::Data<AppState>) -> impl Responder {
    let stats = state.registry.stats();
    web::Json(serde_json::json!({
        "name": "poolgate",
        "version": env!("CARGO_PKG_VERSION"),
        "routes": ROUTES,
        "features": {
            "realtime": state.realtime.is_some(),
            "transcription": state.registry.capability(EndpointKind::Transcription).is_some(),
            "speech": state.registry.capability(EndpointKind::Speech).is_some(),
        },
        "registry": stats,
    }))
}

fn require_bearer(state: &AppState, req: &HttpRequest) -> Result<(), GatewayError> {
    if state.verify_bearer_header(req.headers()).is_authorized() {
        Ok(())
    } else {
        Err(GatewayError::Unauthorized)
    }
}

fn request_content_type(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
}

/// Requested model from a chat completion payload.
fn requested_model(body: &[u8]) -> Result<String, GatewayError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| GatewayError::InvalidRequest(format!("body is not valid JSON: {e}")))?;
    Ok(value
        .get("model")
        .and_then(|m| m.as_str())
        .unwrap_or_default()
        .to_string())
}

/// Chat completions: pooled models rotate across deployments, standalone
/// models are forwarded once.
async fn chat_completions(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: Bytes,
) -> Result<HttpResponse, GatewayError> {
    require_bearer(&state, &req)?;
    let model = requested_model(&body)?;

    let outcome = state
        .dispatcher
        .dispatch(&state.backend, body, &model)
        .await
        .inspect_err(|e| tracing::warn!(model = %model, error = %e, "chat dispatch failed"))?;
    Ok(outcome.into_reply(&model).into_http_response())
}

async fn transcriptions(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: Bytes,
) -> Result<HttpResponse, GatewayError> {
    require_bearer(&state, &req)?;
    let reply = passthrough::transcribe(
        &state.registry,
        &state.backend,
        body,
        request_content_type(&req),
    )
    .await?;
    Ok(reply.into_http_response())
}

async fn speech(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: Bytes,
) -> Result<HttpResponse, GatewayError> {
    require_bearer(&state, &req)?;
    let reply = passthrough::speak(
        &state.registry,
        &state.backend,
        body,
        request_content_type(&req),
    )
    .await?;
    Ok(reply.into_http_response())
}

/// Fixed CORS preflight answer for browser realtime clients.
async fn realtime_preflight() -> HttpResponse {
    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .insert_header((
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            "Authorization, Content-Type",
        ))
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "OPTIONS, GET, POST"))
        .body("ok")
}

/// Realtime WebSocket: authenticate, then splice the client onto one backend socket.
async fn realtime_sessions(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<HashMap<String, String>>,
    payload: web::Payload,
) -> actix_web::Result<HttpResponse> {
    let credential = realtime_credential(req.headers(), &query);
    let verdict = state.auth.authenticate(credential.as_deref());

    let (response, session, mut msg_stream) = actix_ws::handle(&req, payload)?;

    if !verdict.is_authorized() {
        tracing::warn!(peer = ?req.peer_addr(), "realtime session refused");
        rt::spawn(async move {
            realtime::reject_forbidden(session).await;
            let _ = tokio::time::timeout(REJECT_DRAIN_TIMEOUT, async {
                while msg_stream.next().await.is_some() {}
            })
            .await;
        });
        return Ok(response);
    }

    let Some(connector) = state.realtime.clone() else {
        tracing::warn!("realtime session requested but no realtime endpoint is configured");
        rt::spawn(async move {
            let mut sink = ClientSink::new(session);
            sink.close(realtime::ERROR_CLOSE_CODE).await;
            drop(msg_stream);
        });
        return Ok(response);
    };

    rt::spawn(async move {
        let relay = RelaySession::new();
        let mut client_rx = ClientSource::new(msg_stream, session.clone());
        let mut client_tx = ClientSink::new(session);
        relay
            .run(&mut client_rx, &mut client_tx, connector.connect())
            .await;
    });

    Ok(response)
}
