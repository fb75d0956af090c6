//! Usage: Pending-handshake registry over client-local storage (expiry + FIFO capacity eviction).
//!
//! With no server-side session authority, the age and capacity bounds here
//! are the only defense against unbounded storage growth from abandoned or
//! malicious initiation attempts. Eviction is FIFO by creation time; a
//! pending handshake has no access notion between creation and completion.

use crate::domain::handshake::{self, HandshakeContext};
use crate::infra::settings::BridgeSettings;
use crate::infra::storage::Storage;
use crate::shared::error::AppResult;
use crate::shared::security::generate_opaque_token;
use std::collections::HashSet;

pub(crate) const SESSIONS_KEY: &str = "bridge.sessions";
const SESSION_ID_RANDOM_BYTES: usize = 16;

/// Read the active identifier list, tolerating a missing or malformed entry.
pub fn read_session_ids(store: &dyn Storage) -> Vec<String> {
    let Some(raw) = store.get(SESSIONS_KEY) else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<String>>(&raw) {
        Ok(ids) => ids,
        Err(e) => {
            tracing::warn!("resetting malformed session id list: {e}");
            Vec::new()
        }
    }
}

fn write_session_ids(store: &mut dyn Storage, ids: &[String]) {
    match serde_json::to_string(ids) {
        Ok(raw) => store.set(SESSIONS_KEY, &raw),
        Err(e) => tracing::error!("session id list serialization failed: {e}"),
    }
}

fn dedup_preserving_order(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

/// Drop expired, missing, and malformed entries, then evict the oldest
/// entries beyond the configured capacity. Idempotent.
pub fn cleanup(store: &mut dyn Storage, settings: &BridgeSettings, now_ms: i64) {
    let timeout_ms = settings.session_timeout_ms();
    let ids = dedup_preserving_order(read_session_ids(store));

    let mut live: Vec<(String, i64)> = Vec::with_capacity(ids.len());
    for id in ids {
        match handshake::load_context(store, &id) {
            Some(context) if !context.is_expired(now_ms, timeout_ms) => {
                live.push((id, context.created_at_ms));
            }
            _ => {
                // Missing, malformed, or past the age bound.
                handshake::remove_context(store, &id);
                tracing::debug!(session_id = %id, "dropped stale handshake");
            }
        }
    }

    live.sort_by_key(|(_, created_at_ms)| *created_at_ms);
    let max = settings.max_concurrent_handshakes;
    if live.len() > max {
        let excess = live.len() - max;
        for (id, _) in live.drain(..excess) {
            handshake::remove_context(store, &id);
            tracing::debug!(session_id = %id, "evicted handshake over capacity");
        }
    }

    let remaining: Vec<String> = live.into_iter().map(|(id, _)| id).collect();
    write_session_ids(store, &remaining);
}

/// Persist a context under a fresh identifier and append it to the registry.
/// The caller must already have passed the redirect host through the
/// allow-list; this function does not re-check it.
pub fn register(
    store: &mut dyn Storage,
    context: &HandshakeContext,
) -> AppResult<String> {
    let session_id = generate_opaque_token(SESSION_ID_RANDOM_BYTES);
    handshake::save_context(store, &session_id, context)?;

    let mut ids = read_session_ids(store);
    ids.push(session_id.clone());
    let ids = dedup_preserving_order(ids);
    write_session_ids(store, &ids);

    tracing::debug!(
        session_id = %session_id,
        client_id = %context.client_id,
        response_mode = context.response_mode.as_str(),
        "registered handshake"
    );
    Ok(session_id)
}

/// Earliest still-valid pending entry, if any. Pure over the registry; used
/// when an authenticated render arrives without explicit navigation state
/// (the user reloaded or resumed a stale tab).
pub fn peek_oldest_pending(
    store: &dyn Storage,
    settings: &BridgeSettings,
    now_ms: i64,
) -> Option<(String, HandshakeContext)> {
    let timeout_ms = settings.session_timeout_ms();
    read_session_ids(store)
        .into_iter()
        .filter_map(|id| handshake::load_context(store, &id).map(|ctx| (id, ctx)))
        .filter(|(_, ctx)| !ctx.is_expired(now_ms, timeout_ms))
        .min_by_key(|(_, ctx)| ctx.created_at_ms)
}

/// Remove a handshake's context and identifier. Sequential writes; the
/// environment is single-threaded so no stronger atomicity is assumed.
/// Completing an already-completed identifier is a no-op.
pub fn complete(store: &mut dyn Storage, session_id: &str) {
    handshake::remove_context(store, session_id);
    let ids: Vec<String> = read_session_ids(store)
        .into_iter()
        .filter(|id| id != session_id)
        .collect();
    write_session_ids(store, &ids);
}
