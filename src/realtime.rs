//! Realtime relay: bridges a client WebSocket to one backend WebSocket.
//!
//! ```text
//! client ws ──> ClientSource ──pump──> BackendSink ──> backend wss
//! client ws <── ClientSink  <──pump── BackendSource <── backend wss
//! ```
//!
//! Both pumps run concurrently; whichever finishes first (close, error or a
//! failed send) ends the session and both legs are closed. Text and binary
//! frames are forwarded as opaque units in arrival order. Control frames stay
//! on their own leg.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use http::header::{HeaderName, HeaderValue};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Close code sent to clients that fail authentication.
pub const FORBIDDEN_CLOSE_CODE: u16 = 4403;
/// Normal closure.
pub const NORMAL_CLOSE_CODE: u16 = 1000;
/// Closure after an unexpected failure on the other leg.
pub const ERROR_CLOSE_CODE: u16 = 1011;

/// Largest message accepted on either leg (32 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1 << 25;

/// Upper bound for the backend WebSocket handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

/// A data frame relayed between the legs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("client connection error: {0}")]
    Client(String),
    #[error("backend connection error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Backend,
}

/// Why a relay session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEnd {
    /// The given side closed its connection
    Closed(Side),
    /// The given side failed (connect, read or write error)
    Failed(Side, String),
}

impl RelayEnd {
    fn close_code(&self) -> u16 {
        match self {
            RelayEnd::Closed(_) => NORMAL_CLOSE_CODE,
            RelayEnd::Failed(..) => ERROR_CLOSE_CODE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Receiving half of a leg. `None` means the peer closed.
#[async_trait(?Send)]
pub trait FrameSource {
    async fn recv(&mut self) -> Option<Result<Frame, RelayError>>;
}

/// Sending half of a leg. `close` must be idempotent.
#[async_trait(?Send)]
pub trait FrameSink {
    async fn send(&mut self, frame: Frame) -> Result<(), RelayError>;
    async fn close(&mut self, code: u16);
}

/// Move frames from `source` to `sink` until one of them gives out.
async fn pump<S, K>(source: &mut S, sink: &mut K, from: Side) -> RelayEnd
where
    S: FrameSource + ?Sized,
    K: FrameSink + ?Sized,
{
    let to = match from {
        Side::Client => Side::Backend,
        Side::Backend => Side::Client,
    };
    loop {
        match source.recv().await {
            None => return RelayEnd::Closed(from),
            Some(Err(e)) => return RelayEnd::Failed(from, e.to_string()),
            Some(Ok(frame)) => {
                if let Err(e) = sink.send(frame).await {
                    tracing::debug!(error = %e, "relay send failed");
                    return RelayEnd::Closed(to);
                }
            }
        }
    }
}

/// Splice two legs together until either side finishes, then close both.
pub async fn splice<CR, CW, BR, BW>(
    client_rx: &mut CR,
    client_tx: &mut CW,
    backend_rx: &mut BR,
    backend_tx: &mut BW,
) -> RelayEnd
where
    CR: FrameSource + ?Sized,
    CW: FrameSink + ?Sized,
    BR: FrameSource + ?Sized,
    BW: FrameSink + ?Sized,
{
    let end = tokio::select! {
        end = pump(client_rx, backend_tx, Side::Client) => end,
        end = pump(backend_rx, client_tx, Side::Backend) => end,
    };
    let code = end.close_code();
    client_tx.close(code).await;
    backend_tx.close(code).await;
    end
}

/// Read the client leg into `held` until it closes or fails.
async fn hold_client<S>(source: &mut S, held: &mut Vec<Frame>) -> RelayEnd
where
    S: FrameSource + ?Sized,
{
    loop {
        match source.recv().await {
            None => return RelayEnd::Closed(Side::Client),
            Some(Err(e)) => return RelayEnd::Failed(Side::Client, e.to_string()),
            Some(Ok(frame)) => held.push(frame),
        }
    }
}

/// One client connection paired with one backend connection.
#[derive(Debug)]
pub struct RelaySession {
    id: uuid::Uuid,
    state: SessionState,
}

impl Default for RelaySession {
    fn default() -> Self {
        Self::new()
    }
}

impl RelaySession {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            state: SessionState::Connecting,
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(session = %self.id, from = ?self.state, to = ?next, "relay state");
        self.state = next;
    }

    /// Drive the session: open the backend leg, relay until either side ends,
    /// then tear both down. The client leg must already be accepted.
    ///
    /// The client leg is read while the backend handshake is pending. Frames
    /// that arrive early are held and flushed in order once the backend is up;
    /// a client that leaves first ends the session without waiting for the
    /// handshake.
    pub async fn run<CR, CW, F, BR, BW>(
        mut self,
        client_rx: &mut CR,
        client_tx: &mut CW,
        connect_backend: F,
    ) -> RelayEnd
    where
        CR: FrameSource + ?Sized,
        CW: FrameSink + ?Sized,
        F: Future<Output = Result<(BR, BW), RelayError>>,
        BR: FrameSource,
        BW: FrameSink,
    {
        let mut early = Vec::new();
        let connected = tokio::select! {
            biased;
            result = connect_backend => result,
            end = hold_client(client_rx, &mut early) => {
                tracing::info!(session = %self.id, "client left before backend connected");
                self.transition(SessionState::Closing);
                client_tx.close(end.close_code()).await;
                self.transition(SessionState::Closed);
                return end;
            }
        };

        let (mut backend_rx, mut backend_tx) = match connected {
            Ok(legs) => legs,
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "backend connection failed");
                self.transition(SessionState::Closing);
                client_tx.close(ERROR_CLOSE_CODE).await;
                self.transition(SessionState::Closed);
                return RelayEnd::Failed(Side::Backend, e.to_string());
            }
        };

        self.transition(SessionState::Active);
        tracing::info!(session = %self.id, held = early.len(), "realtime session active");

        let mut end = None;
        for frame in early {
            if let Err(e) = backend_tx.send(frame).await {
                tracing::debug!(error = %e, "relay send failed");
                end = Some(RelayEnd::Closed(Side::Backend));
                break;
            }
        }
        let end = match end {
            Some(end) => {
                client_tx.close(end.close_code()).await;
                backend_tx.close(end.close_code()).await;
                end
            }
            None => splice(client_rx, client_tx, &mut backend_rx, &mut backend_tx).await,
        };
        self.transition(SessionState::Closing);
        drop(backend_rx);
        drop(backend_tx);
        self.transition(SessionState::Closed);

        match &end {
            RelayEnd::Closed(side) => {
                tracing::info!(session = %self.id, closed_by = ?side, "realtime session ended")
            }
            RelayEnd::Failed(side, reason) => {
                tracing::warn!(session = %self.id, failed = ?side, reason = %reason, "realtime session failed")
            }
        }
        end
    }
}

// ==============================
// Client leg (actix-ws)
// ==============================

pub struct ClientSource {
    stream: actix_ws::AggregatedMessageStream,
    session: actix_ws::Session,
}

impl ClientSource {
    pub fn new(stream: actix_ws::MessageStream, session: actix_ws::Session) -> Self {
        let stream = stream
            .max_frame_size(MAX_MESSAGE_SIZE)
            .aggregate_continuations()
            .max_continuation_size(MAX_MESSAGE_SIZE);
        Self { stream, session }
    }
}

#[async_trait(?Send)]
impl FrameSource for ClientSource {
    async fn recv(&mut self) -> Option<Result<Frame, RelayError>> {
        loop {
            match self.stream.recv().await? {
                Ok(actix_ws::AggregatedMessage::Text(text)) => {
                    return Some(Ok(Frame::Text(text.to_string())))
                }
                Ok(actix_ws::AggregatedMessage::Binary(bin)) => {
                    return Some(Ok(Frame::Binary(bin)))
                }
                Ok(actix_ws::AggregatedMessage::Ping(payload)) => {
                    if self.session.pong(&payload).await.is_err() {
                        return None;
                    }
                }
                Ok(actix_ws::AggregatedMessage::Pong(_)) => {}
                Ok(actix_ws::AggregatedMessage::Close(_)) => return None,
                Err(e) => return Some(Err(RelayError::Client(e.to_string()))),
            }
        }
    }
}

pub struct ClientSink {
    session: Option<actix_ws::Session>,
}

impl ClientSink {
    pub fn new(session: actix_ws::Session) -> Self {
        Self {
            session: Some(session),
        }
    }
}

fn close_reason(code: u16) -> actix_ws::CloseReason {
    actix_ws::CloseReason {
        code: actix_ws::CloseCode::from(code),
        description: None,
    }
}

#[async_trait(?Send)]
impl FrameSink for ClientSink {
    async fn send(&mut self, frame: Frame) -> Result<(), RelayError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| RelayError::Client("connection closed".to_string()))?;
        let sent = match frame {
            Frame::Text(text) => session.text(text).await,
            Frame::Binary(bin) => session.binary(bin).await,
        };
        sent.map_err(|_| RelayError::Client("connection closed".to_string()))
    }

    async fn close(&mut self, code: u16) {
        if let Some(session) = self.session.take() {
            let _ = session.close(Some(close_reason(code))).await;
        }
    }
}

/// Refuse an upgraded client that failed authentication.
pub async fn reject_forbidden(session: actix_ws::Session) {
    let reason = actix_ws::CloseReason {
        code: actix_ws::CloseCode::from(FORBIDDEN_CLOSE_CODE),
        description: Some("forbidden".to_string()),
    };
    let _ = session.close(Some(reason)).await;
}

// ==============================
// Backend leg (tokio-tungstenite)
// ==============================

type BackendStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct BackendSource(SplitStream<BackendStream>);

#[async_trait(?Send)]
impl FrameSource for BackendSource {
    async fn recv(&mut self) -> Option<Result<Frame, RelayError>> {
        loop {
            match self.0.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Ok(WsMessage::Binary(bin)) => return Some(Ok(Frame::Binary(bin))),
                // tungstenite answers pings itself
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) | Ok(WsMessage::Frame(_)) => {}
                Ok(WsMessage::Close(_)) => return None,
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(RelayError::Backend(e.to_string()))),
            }
        }
    }
}

pub struct BackendSink {
    sink: SplitSink<BackendStream, WsMessage>,
    closed: bool,
}

#[async_trait(?Send)]
impl FrameSink for BackendSink {
    async fn send(&mut self, frame: Frame) -> Result<(), RelayError> {
        let msg = match frame {
            Frame::Text(text) => WsMessage::Text(text.into()),
            Frame::Binary(bin) => WsMessage::Binary(bin),
        };
        self.sink
            .send(msg)
            .await
            .map_err(|e| RelayError::Backend(e.to_string()))
    }

    async fn close(&mut self, code: u16) {
        if self.closed {
            return;
        }
        self.closed = true;
        let frame = CloseFrame {
            code: WsCloseCode::from(code),
            reason: String::new().into(),
        };
        let _ = self.sink.send(WsMessage::Close(Some(frame))).await;
        let _ = SinkExt::close(&mut self.sink).await;
    }
}

/// Opens backend WebSocket connections to the realtime endpoint.
#[derive(Clone)]
pub struct BackendConnector {
    url: String,
    auth_header: HeaderName,
    auth_value: HeaderValue,
    handshake_timeout: Duration,
}

impl std::fmt::Debug for BackendConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConnector")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl BackendConnector {
    /// `url` is the WebSocket URL; the credential is sent once, on the handshake.
    pub fn new(url: impl Into<String>, auth_header: HeaderName, auth_value: HeaderValue) -> Self {
        Self {
            url: url.into(),
            auth_header,
            auth_value,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn connect(&self) -> Result<(BackendSource, BackendSink), RelayError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| RelayError::Backend(e.to_string()))?;
        request
            .headers_mut()
            .insert(self.auth_header.clone(), self.auth_value.clone());

        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(MAX_MESSAGE_SIZE);
        config.max_frame_size = Some(MAX_MESSAGE_SIZE);

        let handshake = tokio_tungstenite::connect_async_with_config(request, Some(config), false);
        let (stream, _response) = tokio::time::timeout(self.handshake_timeout, handshake)
            .await
            .map_err(|_| {
                RelayError::Backend(format!(
                    "handshake timed out after {}s",
                    self.handshake_timeout.as_secs_f32()
                ))
            })?
            .map_err(|e| RelayError::Backend(e.to_string()))?;
        tracing::debug!(url = %self.url, "backend websocket connected");

        let (sink, source) = stream.split();
        Ok((
            BackendSource(source),
            BackendSink {
                sink,
                closed: false,
            },
        ))
    }
}
