//! Usage: Ephemeral authorization-code records (issue, persist, expire).

use crate::domain::handshake::HandshakeContext;
use crate::infra::storage::Storage;
use crate::shared::error::AppResult;
use crate::shared::security::generate_opaque_token;
use serde::{Deserialize, Serialize};

const CODE_TTL_MS: i64 = 10 * 60 * 1000;
const CODE_RANDOM_BYTES: usize = 24;

pub(crate) const CODE_KEY_PREFIX: &str = "bridge.code.";

/// One-time exchange artifact minted at handshake completion. The backend
/// collaborator exchanges it for tokens and is responsible for the actual
/// mark-and-check of `used`; the client-side record is informational.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub redirect_target: String,
    pub subject_id: String,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
    pub code_challenge: Option<String>,
    pub used: bool,
}

impl AuthorizationCode {
    pub(crate) fn issue(subject_id: &str, context: &HandshakeContext, now_ms: i64) -> Self {
        Self {
            code: generate_opaque_token(CODE_RANDOM_BYTES),
            client_id: context.client_id.clone(),
            redirect_target: context.redirect_target.clone(),
            subject_id: subject_id.to_string(),
            created_at_ms: now_ms,
            expires_at_ms: now_ms + CODE_TTL_MS,
            code_challenge: context.code_challenge.clone(),
            used: false,
        }
    }

    pub(crate) fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

fn code_key(code: &str) -> String {
    format!("{CODE_KEY_PREFIX}{code}")
}

pub(crate) fn save_code(store: &mut dyn Storage, record: &AuthorizationCode) -> AppResult<()> {
    let raw = serde_json::to_string(record)
        .map_err(|e| format!("SYSTEM_ERROR: authorization code serialization failed: {e}"))?;
    store.set(&code_key(&record.code), &raw);
    Ok(())
}

pub fn load_code(store: &dyn Storage, code: &str) -> Option<AuthorizationCode> {
    let raw = store.get(&code_key(code))?;
    serde_json::from_str(&raw).ok()
}

/// Drop expired or unreadable code records. Called opportunistically before
/// minting a new code so abandoned exchanges cannot grow storage unbounded.
pub(crate) fn purge_expired(store: &mut dyn Storage, now_ms: i64) {
    let stale: Vec<String> = store
        .keys()
        .into_iter()
        .filter(|key| key.starts_with(CODE_KEY_PREFIX))
        .filter(|key| {
            let parseable = store
                .get(key)
                .and_then(|raw| serde_json::from_str::<AuthorizationCode>(&raw).ok());
            match parseable {
                Some(record) => record.is_expired(now_ms),
                None => true,
            }
        })
        .collect();

    for key in stale {
        store.remove(&key);
    }
}
