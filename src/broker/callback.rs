//! Usage: CSRF state verification for the app's own sign-in callback.

use crate::broker::session_registry::read_session_ids;
use crate::domain::handshake::{self, HandshakeContext};
use crate::infra::storage::Storage;
use crate::shared::error::AppResult;
use crate::shared::security::constant_time_eq;

/// Match a received callback `state` against the pending handshakes.
///
/// The callback is trusted only when some registered context carries the
/// same state; no match is treated as a CSRF failure and the caller must
/// abort sign-in completion.
pub fn verify_callback_state(
    store: &dyn Storage,
    received_state: &str,
) -> AppResult<(String, HandshakeContext)> {
    let received_state = received_state.trim();
    if received_state.is_empty() {
        return Err("SEC_INVALID_INPUT: callback state missing".into());
    }

    for session_id in read_session_ids(store) {
        let Some(context) = handshake::load_context(store, &session_id) else {
            continue;
        };
        let Some(state) = context.state.as_deref() else {
            continue;
        };
        if constant_time_eq(state.as_bytes(), received_state.as_bytes()) {
            return Ok((session_id, context));
        }
    }

    tracing::warn!("callback state matched no pending handshake");
    Err("SEC_INVALID_INPUT: callback state mismatch".into())
}
