//! Usage: Inbound handshake initiation (validation, allow-listing, registration).

use crate::broker::allowlist::is_redirect_allowed;
use crate::broker::session_registry;
use crate::domain::handshake::{HandshakeContext, ResponseMode};
use crate::infra::settings::BridgeSettings;
use crate::infra::storage::Storage;
use url::Url;

/// Raw initiation query parameters as the routing collaborator hands them
/// over. Absent and empty parameters are equivalent.
#[derive(Debug, Clone, Default)]
pub struct InitiationParams {
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub state: Option<String>,
    pub response_type: Option<String>,
    pub code_challenge: Option<String>,
}

/// Where the shell should route after initiation. Rejections are silent
/// redirects to the neutral default route; the initiating party is an
/// external application, not the visible user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitiationOutcome {
    /// Proceed to the authentication UI, carrying the session identifier as
    /// transient navigation state for the completer.
    Login { session_id: String },
    /// Rejected; route to the in-app default.
    Home,
}

pub fn initiate(
    store: &mut dyn Storage,
    settings: &BridgeSettings,
    params: InitiationParams,
    now_ms: i64,
) -> InitiationOutcome {
    let Some(redirect_uri) = non_empty(params.redirect_uri.as_deref()) else {
        tracing::warn!("initiation rejected: missing redirect_uri");
        return InitiationOutcome::Home;
    };
    let Some(client_id) = non_empty(params.client_id.as_deref()) else {
        tracing::warn!("initiation rejected: missing client_id");
        return InitiationOutcome::Home;
    };

    let target = match Url::parse(redirect_uri) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(redirect_uri, "initiation rejected: unparseable redirect_uri: {e}");
            return InitiationOutcome::Home;
        }
    };
    if !matches!(target.scheme(), "http" | "https") {
        tracing::warn!(
            scheme = target.scheme(),
            "initiation rejected: unsupported redirect scheme"
        );
        return InitiationOutcome::Home;
    }

    if !settings.delegated_auth_enabled {
        tracing::warn!("initiation rejected: delegated auth disabled");
        return InitiationOutcome::Home;
    }

    let host = target.host_str().unwrap_or_default();
    if !is_redirect_allowed(host, &settings.allowed_redirect_patterns) {
        tracing::warn!(host, "initiation rejected: redirect host not allow-listed");
        return InitiationOutcome::Home;
    }

    // Eviction runs before the write it precedes, so a full registry is
    // pruned within the same initiation call.
    session_registry::cleanup(store, settings, now_ms);

    let context = HandshakeContext {
        redirect_target: target.to_string(),
        client_id: client_id.to_string(),
        state: non_empty(params.state.as_deref()).map(str::to_string),
        response_mode: params
            .response_type
            .as_deref()
            .map(ResponseMode::parse_lossy)
            .unwrap_or(ResponseMode::Code),
        code_challenge: non_empty(params.code_challenge.as_deref()).map(str::to_string),
        created_at_ms: now_ms,
    };

    match session_registry::register(store, &context) {
        Ok(session_id) => InitiationOutcome::Login { session_id },
        Err(e) => {
            tracing::error!("initiation failed to register handshake: {e}");
            InitiationOutcome::Home
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
