//! Client configuration
//!
//! Layering, lowest to highest: built-in defaults, the optional TOML file,
//! then explicit overrides (environment and flags, resolved by the caller).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:18790";
pub const DEFAULT_CHANNEL: &str = "cli";
pub const DEFAULT_CHAT_ID: &str = "web";

const API_PREFIX: &str = "/api/v1";
const STREAM_PATH: &str = "/api/v1/stream";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("unsupported URL scheme in {0:?} (expected http:// or https://)")]
    UnsupportedScheme(String),
}

/// Where to reach the control-room server and how to route chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub channel: String,
    pub chat_id: String,
    pub session_key: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            channel: DEFAULT_CHANNEL.to_string(),
            chat_id: DEFAULT_CHAT_ID.to_string(),
            session_key: crate::run_stream::DEFAULT_SESSION_KEY.to_string(),
        }
    }
}

/// Values that win over the file; `None` leaves the lower layer in place.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub channel: Option<String>,
    pub chat_id: Option<String>,
    pub session_key: Option<String>,
}

impl ClientConfig {
    /// Read `path` on top of the defaults. A missing file is not an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let config: ClientConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config.normalized())
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(base_url) = overrides.base_url {
            self.base_url = base_url;
        }
        if let Some(token) = overrides.token {
            self.token = Some(token);
        }
        if let Some(channel) = overrides.channel {
            self.channel = channel;
        }
        if let Some(chat_id) = overrides.chat_id {
            self.chat_id = chat_id;
        }
        if let Some(session_key) = overrides.session_key {
            self.session_key = session_key;
        }
        self.normalized()
    }

    /// Blank tokens mean "no auth".
    fn normalized(mut self) -> Self {
        if self.token.as_deref().is_some_and(|token| token.trim().is_empty()) {
            self.token = None;
        }
        self.base_url = self.base_url.trim_end_matches('/').to_string();
        self
    }

    /// REST root, e.g. `http://127.0.0.1:18790/api/v1`.
    pub fn api_base(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), API_PREFIX)
    }

    /// WebSocket URL with the token (if any) as a query parameter.
    pub fn stream_url(&self) -> Result<String, ConfigError> {
        let base = self.base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(ConfigError::UnsupportedScheme(self.base_url.clone()));
        };

        let mut url = format!("{ws_base}{STREAM_PATH}");
        if let Some(token) = &self.token {
            url.push_str("?token=");
            url.push_str(&urlencoding::encode(token));
        }
        Ok(url)
    }
}

/// Stream URL with the token value masked, for logs.
pub fn redact_token(url: &str) -> String {
    match url.split_once("?token=") {
        Some((base, _)) => format!("{base}?token=***"),
        None => url.to_string(),
    }
}
