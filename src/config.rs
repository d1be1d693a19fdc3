use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub chat: ChatConfig,
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// WebSocket endpoint for the realtime channel.
    pub ws_url: String,
    /// Base URL for the REST history endpoint.
    pub api_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8080/socket".to_string(),
            api_url: "http://127.0.0.1:8080/api".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer token used for both REST requests and the socket handshake.
    /// Absence prevents connection.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// History page size; also the batch size the scroll reconciler anchors on.
    pub page_size: u32,
    /// In-memory cap on the message list, trimmed from the oldest end.
    pub max_messages: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            page_size: 15,
            max_messages: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            chat: ChatConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn resolve_config_path() -> PathBuf {
    env::var("CHAT_SYNC_CONFIG")
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| expand_tilde("~/.chat-sync/chat-sync.json"))
}

pub fn load_config() -> Config {
    let config_path = resolve_config_path();

    let mut cfg = Config::default();

    if config_path.exists() {
        if let Ok(raw) = fs::read_to_string(&config_path) {
            if let Ok(file_cfg) = serde_json::from_str::<Config>(&raw) {
                cfg = file_cfg;
            }
        }
    }

    // Override from environment
    if let Ok(token) = env::var("CHAT_SYNC_TOKEN") {
        if !token.trim().is_empty() {
            cfg.auth.token = Some(token);
        }
    }

    if let Ok(url) = env::var("CHAT_SYNC_WS_URL") {
        if !url.trim().is_empty() {
            cfg.server.ws_url = url;
        }
    }

    if let Ok(url) = env::var("CHAT_SYNC_API_URL") {
        if !url.trim().is_empty() {
            cfg.server.api_url = url;
        }
    }

    cfg
}
