//! Endpoint Registry Module
//!
//! Static table of backend deployments the gateway may talk to:
//! - Logical model names mapped to concrete backend URLs
//! - Endpoint kinds (pooled chat, single chat, transcription, speech, realtime)
//! - Pools of interchangeable chat deployments behind one virtual model name
//!
//! The registry is loaded once at startup and never mutated afterwards.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// What a backend endpoint serves.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// Chat deployment that is a member of a round-robin pool
    ChatPooled,
    /// Standalone chat deployment (e.g. a model router), no balancing
    ChatSingle,
    /// Speech-to-text
    Transcription,
    /// Text-to-speech
    Speech,
    /// Realtime WebSocket session endpoint
    Realtime,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::ChatPooled => "chat_pooled",
            EndpointKind::ChatSingle => "chat_single",
            EndpointKind::Transcription => "transcription",
            EndpointKind::Speech => "speech",
            EndpointKind::Realtime => "realtime",
        }
    }

    /// Kinds that may appear at most once in a registry.
    fn is_capability(&self) -> bool {
        matches!(
            self,
            EndpointKind::Transcription | EndpointKind::Speech | EndpointKind::Realtime
        )
    }
}

/// A single backend deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    /// Logical (and concrete deployment) model name
    pub name: String,
    /// Full backend URL including any api-version query string
    pub url: String,
    pub kind: EndpointKind,
}

impl Endpoint {
    /// URL to use when opening a WebSocket to this endpoint.
    ///
    /// Realtime endpoints are usually configured with their `https://` form;
    /// the socket is opened over `wss://` against the same host and path.
    pub fn websocket_url(&self) -> String {
        if let Some(rest) = self.url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.url.clone()
        }
    }
}

/// Pool declaration as written in the registry file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Virtual model name clients use to address the pool
    pub name: String,
    /// Ordered member endpoint names
    pub members: Vec<String>,
}

/// A resolved pool: its virtual name and member endpoints in rotation order.
#[derive(Debug, Clone)]
pub struct Pool {
    pub name: String,
    pub members: Vec<Endpoint>,
}

fn default_backend_key_env() -> String {
    "AZURE_OPENAI_API_KEY".to_string()
}

fn default_backend_auth_header() -> String {
    "api-key".to_string()
}

/// On-disk registry layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Environment variable holding the backend credential
    #[serde(default = "default_backend_key_env")]
    pub backend_key_env: String,

    /// Header the backend credential is sent in
    #[serde(default = "default_backend_auth_header")]
    pub backend_auth_header: String,

    pub endpoints: Vec<Endpoint>,

    #[serde(default)]
    pub pools: Vec<PoolConfig>,
}

/// Validated, immutable endpoint registry.
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    backend_key_env: String,
    backend_auth_header: String,
    endpoints: HashMap<String, Endpoint>,
    pools: Vec<Pool>,
    /// Pool name or member name -> index into `pools`
    pool_index: HashMap<String, usize>,
}

impl EndpointRegistry {
    /// Load the registry from a JSON file, or YAML when the extension is `.yaml`/`.yml`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading endpoint registry {}", path.display()))?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let registry = if is_yaml {
            Self::from_yaml_str(&content)
        } else {
            Self::from_json_str(&content)
        }
        .with_context(|| format!("loading endpoint registry {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            endpoints = registry.endpoints.len(),
            pools = registry.pools.len(),
            "Endpoint registry loaded"
        );
        Ok(registry)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: RegistryConfig = serde_json::from_str(content)?;
        Self::from_config(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: RegistryConfig = serde_yaml::from_str(content)?;
        Self::from_config(config)
    }

    /// Validate a parsed config and build the lookup tables.
    pub fn from_config(config: RegistryConfig) -> Result<Self> {
        let mut endpoints = HashMap::new();
        let mut capabilities = HashSet::new();

        for endpoint in config.endpoints {
            reqwest::Url::parse(&endpoint.url)
                .map_err(|e| anyhow!("endpoint {} has invalid url: {}", endpoint.name, e))?;
            if endpoint.kind.is_capability() && !capabilities.insert(endpoint.kind) {
                bail!(
                    "more than one {} endpoint configured",
                    endpoint.kind.as_str()
                );
            }
            if endpoints.contains_key(&endpoint.name) {
                bail!("duplicate endpoint name: {}", endpoint.name);
            }
            endpoints.insert(endpoint.name.clone(), endpoint);
        }

        let mut pools = Vec::with_capacity(config.pools.len());
        let mut pool_index = HashMap::new();

        for pool_cfg in config.pools {
            if pool_cfg.members.is_empty() {
                bail!("pool {} has no members", pool_cfg.name);
            }
            if endpoints.contains_key(&pool_cfg.name) || pool_index.contains_key(&pool_cfg.name) {
                bail!("pool name {} collides with another name", pool_cfg.name);
            }
            let idx = pools.len();
            pool_index.insert(pool_cfg.name.clone(), idx);

            let mut members = Vec::with_capacity(pool_cfg.members.len());
            for member in &pool_cfg.members {
                let endpoint = endpoints
                    .get(member)
                    .ok_or_else(|| anyhow!("pool {} references unknown endpoint {}", pool_cfg.name, member))?;
                if endpoint.kind != EndpointKind::ChatPooled {
                    bail!(
                        "pool {} member {} must be chat_pooled, found {}",
                        pool_cfg.name,
                        member,
                        endpoint.kind.as_str()
                    );
                }
                if pool_index.insert(member.clone(), idx).is_some() {
                    bail!("endpoint {} belongs to more than one pool", member);
                }
                members.push(endpoint.clone());
            }

            pools.push(Pool {
                name: pool_cfg.name,
                members,
            });
        }

        if let Some(orphan) = endpoints
            .values()
            .find(|e| e.kind == EndpointKind::ChatPooled && !pool_index.contains_key(&e.name))
        {
            bail!("chat_pooled endpoint {} is not part of any pool", orphan.name);
        }

        Ok(Self {
            backend_key_env: config.backend_key_env,
            backend_auth_header: config.backend_auth_header,
            endpoints,
            pools,
            pool_index,
        })
    }

    pub fn backend_key_env(&self) -> &str {
        &self.backend_key_env
    }

    pub fn backend_auth_header(&self) -> &str {
        &self.backend_auth_header
    }

    pub fn pools(&self) -> &[Pool] {
        &self.pools
    }

    /// Index of the pool addressed by `model`, either by its virtual name or
    /// by any member name.
    pub fn pool_index_for(&self, model: &str) -> Option<usize> {
        self.pool_index.get(model).copied()
    }

    /// Standalone chat endpoint named `model`.
    pub fn chat_single(&self, model: &str) -> Option<&Endpoint> {
        self.endpoints
            .get(model)
            .filter(|e| e.kind == EndpointKind::ChatSingle)
    }

    /// The single endpoint serving a capability (transcription, speech, realtime).
    pub fn capability(&self, kind: EndpointKind) -> Option<&Endpoint> {
        self.endpoints.values().find(|e| e.kind == kind)
    }

    pub fn stats(&self) -> RegistryStats {
        let mut by_kind = HashMap::new();
        for endpoint in self.endpoints.values() {
            *by_kind.entry(endpoint.kind.as_str().to_string()).or_insert(0) += 1;
        }
        RegistryStats {
            total_endpoints: self.endpoints.len(),
            endpoints_by_kind: by_kind,
            pools: self
                .pools
                .iter()
                .map(|p| PoolStats {
                    name: p.name.clone(),
                    size: p.members.len(),
                })
                .collect(),
        }
    }
}

/// Registry summary exposed on `/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_endpoints: usize,
    pub endpoints_by_kind: HashMap<String, usize>,
    pub pools: Vec<PoolStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    pub name: String,
    pub size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn sample() -> serde_json::Value {
        json!({
            "endpoints": [
                {"name": "gpt-a", "url": "https://a.example.com/chat/completions", "kind": "chat_pooled"},
                {"name": "gpt-b", "url": "https://b.example.com/chat/completions", "kind": "chat_pooled"},
                {"name": "router", "url": "https://r.example.com/chat/completions", "kind": "chat_single"},
                {"name": "whisper-1", "url": "https://w.example.com/audio/transcriptions", "kind": "transcription"},
                {"name": "tts", "url": "https://t.example.com/audio/speech", "kind": "speech"},
                {"name": "realtime", "url": "https://rt.example.com/openai/realtime?deployment=x", "kind": "realtime"}
            ],
            "pools": [{"name": "gpt", "members": ["gpt-a", "gpt-b"]}]
        })
    }

    fn registry_from(value: serde_json::Value) -> Result<EndpointRegistry> {
        EndpointRegistry::from_json_str(&value.to_string())
    }

    #[test]
    fn resolves_pools_by_name_and_member() {
        let registry = registry_from(sample()).unwrap();
        assert_eq!(registry.backend_key_env(), "AZURE_OPENAI_API_KEY");
        assert_eq!(registry.backend_auth_header(), "api-key");

        let idx = registry.pool_index_for("gpt").unwrap();
        assert_eq!(registry.pool_index_for("gpt-b"), Some(idx));
        let pool = &registry.pools()[idx];
        assert_eq!(pool.name, "gpt");
        let names: Vec<_> = pool.members.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["gpt-a", "gpt-b"]);

        assert!(registry.pool_index_for("router").is_none());
        assert_eq!(registry.chat_single("router").unwrap().name, "router");
        assert!(registry.chat_single("gpt-a").is_none());
        assert!(registry.chat_single("whisper-1").is_none());
    }

    #[test]
    fn capabilities_are_unique() {
        let registry = registry_from(sample()).unwrap();
        assert_eq!(
            registry
                .capability(EndpointKind::Transcription)
                .unwrap()
                .name,
            "whisper-1"
        );

        let mut dup = sample();
        dup["endpoints"].as_array_mut().unwrap().push(json!({
            "name": "whisper-2",
            "url": "https://w2.example.com/audio/transcriptions",
            "kind": "transcription"
        }));
        let err = registry_from(dup).unwrap_err();
        assert!(err.to_string().contains("more than one transcription"));
    }

    #[test]
    fn rejects_bad_pools() {
        let mut unknown = sample();
        unknown["pools"][0]["members"] = json!(["gpt-a", "gpt-c"]);
        assert!(registry_from(unknown)
            .unwrap_err()
            .to_string()
            .contains("unknown endpoint gpt-c"));

        let mut empty = sample();
        empty["pools"] = json!([{"name": "gpt", "members": []}]);
        assert!(registry_from(empty).is_err());

        let mut wrong_kind = sample();
        wrong_kind["pools"][0]["members"] = json!(["gpt-a", "gpt-b", "router"]);
        assert!(registry_from(wrong_kind)
            .unwrap_err()
            .to_string()
            .contains("must be chat_pooled"));

        let mut orphan = sample();
        orphan["pools"][0]["members"] = json!(["gpt-a"]);
        assert!(registry_from(orphan)
            .unwrap_err()
            .to_string()
            .contains("not part of any pool"));

        let mut collision = sample();
        collision["pools"][0]["name"] = json!("router");
        assert!(registry_from(collision).is_err());
    }

    #[test]
    fn rejects_duplicates_and_bad_urls() {
        let mut dup = sample();
        dup["endpoints"].as_array_mut().unwrap().push(json!({
            "name": "router",
            "url": "https://other.example.com/",
            "kind": "chat_single"
        }));
        assert!(registry_from(dup)
            .unwrap_err()
            .to_string()
            .contains("duplicate endpoint name"));

        let mut bad_url = sample();
        bad_url["endpoints"][2]["url"] = json!("not a url");
        assert!(registry_from(bad_url).is_err());
    }

    #[test]
    fn websocket_url_swaps_scheme() {
        let registry = registry_from(sample()).unwrap();
        let rt = registry.capability(EndpointKind::Realtime).unwrap();
        assert_eq!(
            rt.websocket_url(),
            "wss://rt.example.com/openai/realtime?deployment=x"
        );

        let plain = Endpoint {
            name: "local".into(),
            url: "http://127.0.0.1:9000/realtime".into(),
            kind: EndpointKind::Realtime,
        };
        assert_eq!(plain.websocket_url(), "ws://127.0.0.1:9000/realtime");
    }

    #[test]
    fn loads_yaml_file_with_overrides() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "backend_key_env: MY_BACKEND_KEY\n\
             backend_auth_header: x-api-key\n\
             endpoints:\n  \
               - name: solo\n    url: https://solo.example.com/chat\n    kind: chat_single\n"
        )
        .unwrap();

        let registry = EndpointRegistry::load_from_file(file.path()).unwrap();
        assert_eq!(registry.backend_key_env(), "MY_BACKEND_KEY");
        assert_eq!(registry.backend_auth_header(), "x-api-key");
        assert!(registry.pools().is_empty());
        assert!(registry.chat_single("solo").is_some());
    }

    #[test]
    fn stats_count_kinds_and_pools() {
        let registry = registry_from(sample()).unwrap();
        let stats = registry.stats();
        assert_eq!(stats.total_endpoints, 6);
        assert_eq!(stats.endpoints_by_kind.get("chat_pooled"), Some(&2));
        assert_eq!(stats.pools.len(), 1);
        assert_eq!(stats.pools[0].size, 2);
    }
}
