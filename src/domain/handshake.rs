//! Usage: Pending delegated-auth handshake context (schema + storage helpers).

use crate::infra::storage::Storage;
use serde::{Deserialize, Serialize};

const RESPONSE_MODE_CODE: &str = "code";
const RESPONSE_MODE_TOKEN: &str = "token";

pub(crate) const SESSION_KEY_PREFIX: &str = "bridge.session.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    Code,
    Token,
}

impl ResponseMode {
    /// Lenient parser for the inbound `response_type` parameter; anything
    /// unrecognized falls back to the code flow.
    pub(crate) fn parse_lossy(raw: &str) -> Self {
        Self::parse_strict(raw).unwrap_or(Self::Code)
    }

    pub(crate) fn parse_strict(raw: &str) -> Option<Self> {
        match raw.trim() {
            RESPONSE_MODE_CODE => Some(Self::Code),
            RESPONSE_MODE_TOKEN => Some(Self::Token),
            _ => None,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Code => RESPONSE_MODE_CODE,
            Self::Token => RESPONSE_MODE_TOKEN,
        }
    }
}

/// One pending delegated-auth request. Created by the initiator after the
/// redirect host passed the allow-list; consumed exactly once by the
/// completer or discarded by registry cleanup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeContext {
    pub redirect_target: String,
    pub client_id: String,
    pub state: Option<String>,
    pub response_mode: ResponseMode,
    pub code_challenge: Option<String>,
    pub created_at_ms: i64,
}

impl HandshakeContext {
    pub(crate) fn is_expired(&self, now_ms: i64, timeout_ms: i64) -> bool {
        now_ms.saturating_sub(self.created_at_ms) > timeout_ms
    }
}

pub(crate) fn context_key(session_id: &str) -> String {
    format!("{SESSION_KEY_PREFIX}{session_id}")
}

/// Load a context, treating malformed JSON the same as a missing entry.
pub(crate) fn load_context(store: &dyn Storage, session_id: &str) -> Option<HandshakeContext> {
    let raw = store.get(&context_key(session_id))?;
    match serde_json::from_str(&raw) {
        Ok(context) => Some(context),
        Err(e) => {
            tracing::warn!(session_id, "discarding malformed handshake context: {e}");
            None
        }
    }
}

pub(crate) fn save_context(
    store: &mut dyn Storage,
    session_id: &str,
    context: &HandshakeContext,
) -> crate::shared::error::AppResult<()> {
    let raw = serde_json::to_string(context)
        .map_err(|e| format!("SYSTEM_ERROR: handshake context serialization failed: {e}"))?;
    store.set(&context_key(session_id), &raw);
    Ok(())
}

pub(crate) fn remove_context(store: &mut dyn Storage, session_id: &str) {
    store.remove(&context_key(session_id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::storage::MemoryStorage;

    fn sample(created_at_ms: i64) -> HandshakeContext {
        HandshakeContext {
            redirect_target: "https://partner.example.com/cb".to_string(),
            client_id: "abc".to_string(),
            state: Some("xyz".to_string()),
            response_mode: ResponseMode::Code,
            code_challenge: None,
            created_at_ms,
        }
    }

    #[test]
    fn response_mode_parsing() {
        assert_eq!(ResponseMode::parse_lossy("token"), ResponseMode::Token);
        assert_eq!(ResponseMode::parse_lossy("code"), ResponseMode::Code);
        assert_eq!(ResponseMode::parse_lossy("implicit"), ResponseMode::Code);
        assert_eq!(ResponseMode::parse_strict("implicit"), None);
        assert_eq!(ResponseMode::Token.as_str(), "token");
    }

    #[test]
    fn expiry_is_strictly_older_than_timeout() {
        let ctx = sample(1_000);
        assert!(!ctx.is_expired(1_000 + 600_000, 600_000));
        assert!(ctx.is_expired(1_000 + 600_001, 600_000));
    }

    #[test]
    fn context_round_trips_through_storage() {
        let mut store = MemoryStorage::new();
        save_context(&mut store, "s1", &sample(42)).expect("save");
        let loaded = load_context(&store, "s1").expect("load");
        assert_eq!(loaded.client_id, "abc");
        assert_eq!(loaded.created_at_ms, 42);

        remove_context(&mut store, "s1");
        assert!(load_context(&store, "s1").is_none());
    }

    #[test]
    fn malformed_context_reads_as_missing() {
        let mut store = MemoryStorage::new();
        store.set(&context_key("s1"), "{not json");
        assert!(load_context(&store, "s1").is_none());
    }
}
