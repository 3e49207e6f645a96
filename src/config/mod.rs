//! Configuration tree for a Sush endpoint.
//!
//! The host process owns file parsing and bootstrap; this module defines
//! the typed tree those layers deserialize into, plus validation of the
//! invariants the protocol relies on.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::auth::UserId;
use crate::core::ConfigError;

/// Top-level endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Pre-shared secret protecting handshake policy payloads.
    pub psk: String,

    /// Authorized users.
    pub users: Vec<UserConfig>,

    /// Decoy behavior for non-tunnel traffic. `None` answers with the
    /// built-in `200 OK` / `"Hello, World!"` response.
    #[serde(default)]
    pub fallback: Option<FallbackConfig>,

    /// Cosmetics of the HTTP shell around the handshake.
    #[serde(default)]
    pub handshake: HandshakeHttpConfig,

    /// Traffic morphing selection.
    #[serde(default)]
    pub traffic_shaping: TrafficShapingConfig,
}

impl Config {
    /// Check the invariants the protocol depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.users.is_empty() {
            return Err(ConfigError::NoUsers);
        }
        if self.users.iter().any(|u| u.id.is_empty()) {
            return Err(ConfigError::EmptyUserId);
        }
        if self.psk.is_empty() {
            return Err(ConfigError::EmptyPsk);
        }
        Ok(())
    }
}

/// One authorized user entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserConfig {
    /// User identifier; normalized to 16 bytes at registration.
    pub id: String,

    /// Preferred traffic policy.
    #[serde(default)]
    pub policy: Option<String>,

    /// Per-user PSK override.
    #[serde(default)]
    pub psk: Option<String>,
}

impl UserConfig {
    /// The normalized 16-byte identifier for this entry.
    pub fn user_id(&self) -> UserId {
        UserId::normalize(self.id.as_bytes())
    }
}

/// Decoy behavior for non-tunnel visitors, dispatched on the `type` key.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FallbackConfig {
    /// Proxy the request to a decoy HTTP origin.
    Http {
        /// Decoy origin, `host:port`.
        dest: String,
        /// Optional path override for the rewritten request.
        #[serde(default)]
        path: Option<String>,
        /// Extra headers injected into the rewritten request.
        #[serde(default)]
        headers: HashMap<String, String>,
    },

    /// Pipe raw bytes to a decoy TCP endpoint.
    Tcp {
        /// Decoy endpoint, `host:port`.
        dest: String,
    },

    /// Answer with a fixed response.
    Static {
        /// Status code of the canned response.
        #[serde(default = "default_status_code")]
        status_code: u16,
        /// Headers of the canned response.
        #[serde(default)]
        headers: HashMap<String, String>,
        /// Body of the canned response.
        #[serde(default)]
        response_body: String,
    },
}

fn default_status_code() -> u16 {
    200
}

/// Cosmetics of the HTTP exchange wrapping the handshake.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HandshakeHttpConfig {
    /// Request method.
    #[serde(default = "default_method")]
    pub method: String,

    /// Request path.
    #[serde(default = "default_path")]
    pub path: String,

    /// Host header value.
    #[serde(default = "default_host")]
    pub host: String,

    /// User-Agent header value.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// HTTP version token after the path.
    #[serde(default = "default_http_version")]
    pub http_version: String,

    /// Connection header value.
    #[serde(default = "default_connection_header")]
    pub connection_header: String,

    /// Additional headers emitted verbatim.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Default for HandshakeHttpConfig {
    fn default() -> Self {
        Self {
            method: default_method(),
            path: default_path(),
            host: default_host(),
            user_agent: default_user_agent(),
            http_version: default_http_version(),
            connection_header: default_connection_header(),
            headers: HashMap::new(),
        }
    }
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_path() -> String {
    "/api/v1/data".to_string()
}

fn default_host() -> String {
    "www.example.com".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}

fn default_http_version() -> String {
    "1.1".to_string()
}

fn default_connection_header() -> String {
    "keep-alive".to_string()
}

/// Traffic morphing selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrafficShapingConfig {
    /// Whether shaping is applied at all.
    #[serde(default = "default_enable")]
    pub enable: bool,

    /// Named profile to shape toward.
    #[serde(default = "default_profile")]
    pub profile: String,
}

impl Default for TrafficShapingConfig {
    fn default() -> Self {
        Self { enable: default_enable(), profile: default_profile() }
    }
}

fn default_enable() -> bool {
    true
}

fn default_profile() -> String {
    "raw".to_string()
}
