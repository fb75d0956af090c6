//! Usage: Immutable broker configuration (env-sourced, constructed once at startup).

use crate::domain::handshake::ResponseMode;
use serde::{Deserialize, Serialize};
use std::env;

const DEFAULT_DELEGATED_AUTH_ENABLED: bool = true;
const DEFAULT_SESSION_TIMEOUT_SECS: u32 = 600;
const MAX_SESSION_TIMEOUT_SECS: u32 = 24 * 60 * 60;
const DEFAULT_MAX_CONCURRENT_HANDSHAKES: usize = 10;
const MAX_MAX_CONCURRENT_HANDSHAKES: usize = 64;
const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8080/api";

pub const SIGN_IN_PATH: &str = "/auth/login";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const SIGN_OUT_PATH: &str = "/auth/logout";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Master switch for the delegated-auth broker. When off, every
    /// initiation request is rejected to the default route.
    pub delegated_auth_enabled: bool,
    /// Global override forcing every completion into one response mode.
    pub response_mode_override: Option<ResponseMode>,
    /// Redirect host patterns (exact or `*.` wildcard).
    pub allowed_redirect_patterns: Vec<String>,
    /// Age bound for pending handshakes.
    pub session_timeout_secs: u32,
    /// Capacity bound for pending handshakes.
    pub max_concurrent_handshakes: usize,
    /// Base URL the HTTP transport resolves request paths against.
    pub api_base_url: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            delegated_auth_enabled: DEFAULT_DELEGATED_AUTH_ENABLED,
            response_mode_override: None,
            allowed_redirect_patterns: Vec::new(),
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            max_concurrent_handshakes: DEFAULT_MAX_CONCURRENT_HANDSHAKES,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }
}

impl BridgeSettings {
    pub fn from_env() -> Self {
        Self::from_env_get(|key| env::var(key).ok())
    }

    pub fn from_env_get(mut get: impl FnMut(&str) -> Option<String>) -> Self {
        let delegated_auth_enabled = get("BRIDGE_DELEGATED_AUTH_ENABLED")
            .as_deref()
            .and_then(parse_bool_trimmed)
            .unwrap_or(DEFAULT_DELEGATED_AUTH_ENABLED);

        let response_mode_override = get("BRIDGE_RESPONSE_MODE")
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .and_then(|raw| {
                let parsed = ResponseMode::parse_strict(raw);
                if parsed.is_none() {
                    tracing::warn!(value = raw, "ignoring unrecognized BRIDGE_RESPONSE_MODE");
                }
                parsed
            });

        let allowed_redirect_patterns = get("BRIDGE_ALLOWED_REDIRECT_DOMAINS")
            .as_deref()
            .map(parse_domain_patterns)
            .unwrap_or_default();

        let session_timeout_secs = get("BRIDGE_SESSION_TIMEOUT_SECS")
            .as_deref()
            .and_then(parse_u32_trimmed)
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_SESSION_TIMEOUT_SECS)
            .min(MAX_SESSION_TIMEOUT_SECS);

        let max_concurrent_handshakes = get("BRIDGE_MAX_CONCURRENT_HANDSHAKES")
            .as_deref()
            .and_then(parse_usize_trimmed)
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_MAX_CONCURRENT_HANDSHAKES)
            .min(MAX_MAX_CONCURRENT_HANDSHAKES);

        let api_base_url = get("BRIDGE_API_BASE_URL")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

        Self {
            delegated_auth_enabled,
            response_mode_override,
            allowed_redirect_patterns,
            session_timeout_secs,
            max_concurrent_handshakes,
            api_base_url,
        }
    }

    pub fn session_timeout_ms(&self) -> i64 {
        i64::from(self.session_timeout_secs) * 1000
    }

    /// True when `path` (query stripped) targets one of the auth endpoints
    /// the coordinator must never intercept.
    pub fn is_auth_path(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path);
        path == SIGN_IN_PATH || path == REFRESH_PATH || path == SIGN_OUT_PATH
    }
}

fn parse_domain_patterns(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool_trimmed(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_u32_trimmed(raw: &str) -> Option<u32> {
    raw.trim().parse::<u32>().ok()
}

fn parse_usize_trimmed(raw: &str) -> Option<usize> {
    raw.trim().parse::<usize>().ok()
}
