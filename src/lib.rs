#![forbid(unsafe_code)]
#![doc = r#"
Poolgate

Put several Azure OpenAI deployments of the same model behind one OpenAI-style endpoint.

Crate highlights
- Chat completions for a pooled model rotate round-robin across its deployments; rate-limited attempts move on to the next one.
- Policy rejections and exhausted pools come back as ordinary chat completions, so clients need no special handling.
- Audio transcription and speech are forwarded byte-for-byte.
- Realtime sessions are relayed between the client WebSocket and one backend WebSocket.

Modules
- `endpoints`: Endpoint registry (JSON/YAML) and its validation.
- `round_robin`: Shared rotation cursor per pool.
- `dispatcher`: Chat dispatch, reply classification and synthesized completions.
- `passthrough`: Audio forwarding.
- `realtime`: WebSocket relay core and its actix-ws / tokio-tungstenite legs.
- `upstream`: Outbound HTTP to deployments.
- `server`: Actix-web routes and handlers.
- `util`: Shared helpers (tracing, env, app state).
"#]

pub mod auth;
pub mod dispatcher;
pub mod endpoints;
pub mod error;
pub mod passthrough;
pub mod realtime;
pub mod round_robin;
pub mod server;
pub mod upstream;
pub mod util;

pub use crate::auth::{AuthGate, Verification};
pub use crate::dispatcher::{ChatDispatcher, DispatchOutcome, ReplyClass};
pub use crate::endpoints::{Endpoint, EndpointKind, EndpointRegistry, Pool, RegistryStats};
pub use crate::error::GatewayError;
pub use crate::realtime::{RelayEnd, RelaySession, SessionState};
pub use crate::round_robin::RoundRobinCursor;
pub use crate::upstream::{BackendClient, BackendTransport, UpstreamReply};
