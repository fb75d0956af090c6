//! Usage: Local user credential material (access/refresh pair + principal snapshot).

use crate::infra::storage::Storage;
use crate::shared::error::AppResult;
use serde::{Deserialize, Serialize};

pub(crate) const KEY_ACCESS_TOKEN: &str = "auth.access_token";
pub(crate) const KEY_REFRESH_TOKEN: &str = "auth.refresh_token";
pub(crate) const KEY_EXPIRES_AT_MS: &str = "auth.expires_at_ms";
pub(crate) const KEY_PRINCIPAL: &str = "auth.principal";

/// Identity snapshot cached alongside the tokens so an authenticated render
/// does not need a round trip to know who is signed in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub subject_id: String,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// The whole credential set is replaced wholesale on refresh and deleted on
/// sign-out; individual fields are never patched in place.
#[derive(Debug, Clone)]
pub struct TokenState {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at_ms: Option<i64>,
    pub principal: Principal,
}

impl TokenState {
    /// An expiry in the past makes the holder unauthenticated until a
    /// refresh succeeds; an absent expiry never expires locally.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expires_at_ms, Some(at) if at <= now_ms)
    }

    /// Remaining validity in whole seconds, floored at zero.
    pub fn remaining_secs(&self, now_ms: i64) -> Option<i64> {
        self.expires_at_ms
            .map(|at| (at.saturating_sub(now_ms) / 1000).max(0))
    }
}

pub(crate) fn load_token_state(store: &dyn Storage) -> Option<TokenState> {
    let access_token = store.get(KEY_ACCESS_TOKEN)?;
    let principal: Principal = serde_json::from_str(&store.get(KEY_PRINCIPAL)?).ok()?;
    let refresh_token = store.get(KEY_REFRESH_TOKEN);
    let expires_at_ms = store
        .get(KEY_EXPIRES_AT_MS)
        .and_then(|raw| raw.trim().parse::<i64>().ok());

    Some(TokenState {
        access_token,
        refresh_token,
        expires_at_ms,
        principal,
    })
}

pub(crate) fn save_token_state(store: &mut dyn Storage, state: &TokenState) -> AppResult<()> {
    let principal = serde_json::to_string(&state.principal)
        .map_err(|e| format!("SYSTEM_ERROR: principal serialization failed: {e}"))?;

    store.set(KEY_ACCESS_TOKEN, &state.access_token);
    store.set(KEY_PRINCIPAL, &principal);
    match &state.refresh_token {
        Some(token) => store.set(KEY_REFRESH_TOKEN, token),
        None => store.remove(KEY_REFRESH_TOKEN),
    }
    match state.expires_at_ms {
        Some(at) => store.set(KEY_EXPIRES_AT_MS, &at.to_string()),
        None => store.remove(KEY_EXPIRES_AT_MS),
    }
    Ok(())
}

pub(crate) fn clear_token_state(store: &mut dyn Storage) {
    store.remove(KEY_ACCESS_TOKEN);
    store.remove(KEY_REFRESH_TOKEN);
    store.remove(KEY_EXPIRES_AT_MS);
    store.remove(KEY_PRINCIPAL);
}
