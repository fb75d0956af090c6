//! Usage: Handshake completion on authenticated render (code/token payload + redirect).

use crate::broker::session_registry;
use crate::domain::auth_codes::{self, AuthorizationCode};
use crate::domain::handshake::{HandshakeContext, ResponseMode};
use crate::infra::settings::BridgeSettings;
use crate::infra::storage::Storage;
use crate::shared::error::AppResult;
use crate::shared::security::mask_token;
use url::Url;

/// The authenticated identity and token material the completer may hand out.
/// Derived from the token coordinator's current state.
#[derive(Debug, Clone)]
pub struct CompletionGrant<'a> {
    pub subject_id: &'a str,
    pub access_token: &'a str,
    pub expires_at_ms: Option<i64>,
}

/// Terminal navigation the shell must perform for the external caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRedirect {
    pub url: String,
}

/// Discover and complete one pending handshake.
///
/// With an explicit session identifier (transient navigation state) only
/// that handshake is eligible; a stale or consumed identifier yields
/// `None`. Without one, the oldest still-pending entry covers reloads and
/// resumed tabs. Returns `None` when nothing is pending.
///
/// Whatever happens while constructing the response payload, a discovered
/// handshake always ends in a redirect (on failure with
/// `error=server_error`), so the external caller never sees a stuck tab.
pub fn complete_pending(
    store: &mut dyn Storage,
    settings: &BridgeSettings,
    explicit_session: Option<&str>,
    grant: &CompletionGrant<'_>,
    now_ms: i64,
) -> Option<CompletionRedirect> {
    let (session_id, context) = discover(store, settings, explicit_session, now_ms)?;

    let mut target = match Url::parse(&context.redirect_target) {
        Ok(url) => url,
        Err(e) => {
            // The target parsed at initiation; a stored context that no
            // longer does is corrupt and leaves nowhere to answer.
            tracing::error!(
                session_id = %session_id,
                "dropping handshake with corrupt redirect target: {e}"
            );
            session_registry::complete(store, &session_id);
            return None;
        }
    };

    match build_response_params(store, settings, &context, grant, now_ms) {
        Ok(pairs) => {
            let mut query = target.query_pairs_mut();
            for (key, value) in &pairs {
                query.append_pair(key, value);
            }
        }
        Err(e) => {
            tracing::error!(
                session_id = %session_id,
                client_id = %context.client_id,
                "handshake completion failed, answering with server_error: {e}"
            );
            let mut query = target.query_pairs_mut();
            query.append_pair("error", "server_error");
            query.append_pair("error_description", e.message());
        }
    }
    if let Some(state) = &context.state {
        target.query_pairs_mut().append_pair("state", state);
    }

    // Remove before navigating so the context cannot be consumed twice.
    session_registry::complete(store, &session_id);
    tracing::debug!(
        session_id = %session_id,
        client_id = %context.client_id,
        "completed handshake"
    );

    Some(CompletionRedirect {
        url: target.to_string(),
    })
}

fn discover(
    store: &dyn Storage,
    settings: &BridgeSettings,
    explicit_session: Option<&str>,
    now_ms: i64,
) -> Option<(String, HandshakeContext)> {
    if let Some(session_id) = explicit_session {
        // An explicit id that no longer resolves is a consumed or expired
        // handshake; it must not consume someone else's pending entry.
        if let Some(context) = crate::domain::handshake::load_context(store, session_id) {
            if !context.is_expired(now_ms, settings.session_timeout_ms()) {
                return Some((session_id.to_string(), context));
            }
        }
        tracing::warn!(session_id, "explicit session missing or expired");
        return None;
    }
    session_registry::peek_oldest_pending(store, settings, now_ms)
}

fn build_response_params(
    store: &mut dyn Storage,
    settings: &BridgeSettings,
    context: &HandshakeContext,
    grant: &CompletionGrant<'_>,
    now_ms: i64,
) -> AppResult<Vec<(&'static str, String)>> {
    let mode = settings
        .response_mode_override
        .unwrap_or(context.response_mode);

    match mode {
        ResponseMode::Token => {
            if grant.access_token.is_empty() {
                return Err("SYSTEM_ERROR: no access token available for token response".into());
            }
            let mut pairs = vec![
                ("access_token", grant.access_token.to_string()),
                ("token_type", "Bearer".to_string()),
            ];
            if let Some(expires_at_ms) = grant.expires_at_ms {
                let remaining = (expires_at_ms.saturating_sub(now_ms) / 1000).max(0);
                pairs.push(("expires_in", remaining.to_string()));
            }
            tracing::debug!(
                client_id = %context.client_id,
                access_token = %mask_token(grant.access_token),
                "answering handshake with bearer token"
            );
            Ok(pairs)
        }
        ResponseMode::Code => {
            auth_codes::purge_expired(store, now_ms);
            let record = AuthorizationCode::issue(grant.subject_id, context, now_ms);
            auth_codes::save_code(store, &record)?;
            tracing::debug!(
                client_id = %context.client_id,
                code = %mask_token(&record.code),
                "answering handshake with authorization code"
            );
            Ok(vec![("code", record.code)])
        }
    }
}
