//! Usage: Token lifecycle coordination (session phases + single-flight refresh on 401).

use crate::domain::token_state::{
    self, TokenState, KEY_ACCESS_TOKEN, KEY_REFRESH_TOKEN,
};
use crate::infra::http::{ApiRequest, ApiResponse, HttpTransport};
use crate::infra::settings::{BridgeSettings, REFRESH_PATH};
use crate::infra::storage::SharedStorage;
use crate::shared::error::{relogin_required, AppResult};
use crate::shared::security::mask_token;
use crate::token::error_class::AuthErrorClass;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

const STATUS_UNAUTHORIZED: u16 = 401;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unauthenticated,
    Authenticated,
    Refreshing,
}

/// Owns the local user's credential lifecycle. One instance per running
/// shell; the single-flight refresh guard is a field here, never module
/// state, so independent instances (and tests) share nothing hidden.
pub struct TokenCoordinator {
    settings: Arc<BridgeSettings>,
    storage: SharedStorage,
    transport: Arc<dyn HttpTransport>,
    phase: Mutex<SessionPhase>,
    refresh_in_flight: AtomicBool,
}

impl TokenCoordinator {
    pub fn new(
        settings: Arc<BridgeSettings>,
        storage: SharedStorage,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            settings,
            storage,
            transport,
            phase: Mutex::new(SessionPhase::Unauthenticated),
            refresh_in_flight: AtomicBool::new(false),
        }
    }

    /// Restore the session from persisted state on load. Authenticated only
    /// when both token and principal survive and the expiry, if set, is in
    /// the future.
    pub fn initialize(&self, now_ms: i64) {
        let restored = {
            let store = self.lock_storage();
            token_state::load_token_state(&*store)
        };
        let phase = match restored {
            Some(state) if !state.is_expired(now_ms) => SessionPhase::Authenticated,
            _ => SessionPhase::Unauthenticated,
        };
        *self.lock_phase() = phase;
        tracing::debug!(?phase, "token coordinator initialized");
    }

    pub fn phase(&self) -> SessionPhase {
        *self.lock_phase()
    }

    pub fn is_authenticated(&self) -> bool {
        self.phase() == SessionPhase::Authenticated
    }

    /// Whether a refresh round trip is currently in flight. Embedders that
    /// want queue-and-retry instead of the fail-fast default can hold
    /// requests while this is true.
    pub fn is_refresh_in_flight(&self) -> bool {
        self.refresh_in_flight.load(Ordering::SeqCst)
    }

    /// Current persisted credential set, if any. The handshake completer
    /// derives its grant from this.
    pub fn current_token_state(&self) -> Option<TokenState> {
        let store = self.lock_storage();
        token_state::load_token_state(&*store)
    }

    /// Persist a fresh credential set after sign-in (or profile assignment)
    /// and enter the authenticated phase.
    pub fn complete_sign_in(&self, state: TokenState) -> AppResult<()> {
        {
            let mut store = self.lock_storage();
            token_state::save_token_state(&mut *store, &state)?;
        }
        *self.lock_phase() = SessionPhase::Authenticated;
        tracing::debug!(
            subject_id = %state.principal.subject_id,
            access_token = %mask_token(&state.access_token),
            "sign-in completed"
        );
        Ok(())
    }

    pub fn sign_out(&self) {
        self.clear_session("explicit sign-out");
    }

    /// Send one request with the current bearer token, applying the 401
    /// policy: auth endpoints are never intervened on; invalid tokens clear
    /// the session; credential failures propagate; everything else earns a
    /// single-flight refresh and one retry. 403 passes through untouched.
    pub async fn execute(&self, request: ApiRequest) -> AppResult<ApiResponse> {
        let bearer = self.stored(KEY_ACCESS_TOKEN);
        let response = self
            .transport
            .execute(request.clone(), bearer.as_deref())
            .await?;

        if response.status != STATUS_UNAUTHORIZED {
            return Ok(response);
        }
        if self.settings.is_auth_path(&request.path) {
            return Ok(response);
        }

        let class = AuthErrorClass::classify(response.error_code.as_deref());
        if class == AuthErrorClass::InvalidToken {
            self.clear_session("backend reported the access token invalid");
            return Err(relogin_required("access token rejected as invalid"));
        }
        if !class.allows_refresh() {
            return Ok(response);
        }
        self.refresh_and_retry(request).await
    }

    async fn refresh_and_retry(&self, request: ApiRequest) -> AppResult<ApiResponse> {
        let Some(refresh_token) = self.stored(KEY_REFRESH_TOKEN) else {
            self.clear_session("401 with no refresh token available");
            return Err(relogin_required("session expired without a refresh token"));
        };

        if self.refresh_in_flight.swap(true, Ordering::SeqCst) {
            // Fail fast: a 401 arriving while a refresh is already in
            // flight does not queue behind it.
            self.clear_session("401 while a refresh was already in flight");
            return Err(relogin_required("token refresh already in flight"));
        }

        *self.lock_phase() = SessionPhase::Refreshing;
        let refreshed = self.refresh_once(&refresh_token).await;
        self.refresh_in_flight.store(false, Ordering::SeqCst);

        match refreshed {
            Ok(access_token) => {
                *self.lock_phase() = SessionPhase::Authenticated;
                tracing::debug!(
                    access_token = %mask_token(&access_token),
                    "token refreshed, retrying original request"
                );
                self.transport.execute(request, Some(&access_token)).await
            }
            Err(e) => {
                self.clear_session("token refresh failed");
                Err(relogin_required(format!("token refresh failed: {e}")))
            }
        }
    }

    /// One refresh round trip. Replaces the whole credential set on
    /// success and returns the new access token.
    ///
    /// The principal snapshot is captured before the network call; a losing
    /// second 401 may clear storage while this refresh is in flight.
    async fn refresh_once(&self, refresh_token: &str) -> AppResult<String> {
        let principal = {
            let store = self.lock_storage();
            token_state::load_token_state(&*store)
                .map(|state| state.principal)
                .ok_or_else(|| {
                    "SYSTEM_ERROR: no principal snapshot to pair with refreshed tokens".to_string()
                })?
        };

        let request = ApiRequest::post(REFRESH_PATH, json!({ "refresh_token": refresh_token }));
        let response = self.transport.execute(request, None).await?;
        if !response.is_success() {
            return Err(format!(
                "SYSTEM_ERROR: refresh endpoint returned status={}",
                response.status
            )
            .into());
        }

        let access_token = response
            .body
            .get("access_token")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| "SYSTEM_ERROR: refresh response missing access_token".to_string())?
            .to_string();
        let new_refresh_token = response
            .body
            .get("refresh_token")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .or_else(|| Some(refresh_token.to_string()));
        let expires_at_ms = response
            .body
            .get("expires_in")
            .and_then(Value::as_i64)
            .filter(|v| *v > 0)
            .map(|secs| crate::shared::time::now_unix_millis() + secs * 1000);

        let mut store = self.lock_storage();
        token_state::save_token_state(
            &mut *store,
            &TokenState {
                access_token: access_token.clone(),
                refresh_token: new_refresh_token,
                expires_at_ms,
                principal,
            },
        )?;
        Ok(access_token)
    }

    fn clear_session(&self, reason: &str) {
        {
            let mut store = self.lock_storage();
            token_state::clear_token_state(&mut *store);
        }
        *self.lock_phase() = SessionPhase::Unauthenticated;
        tracing::warn!(reason, "cleared local session, sign-in required");
    }

    fn stored(&self, key: &str) -> Option<String> {
        self.lock_storage().get(key)
    }

    fn lock_storage(&self) -> MutexGuard<'_, dyn crate::infra::storage::Storage + Send + 'static> {
        self.storage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_phase(&self) -> MutexGuard<'_, SessionPhase> {
        self.phase
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::token_state::Principal;
    use crate::infra::storage::{shared_storage, MemoryStorage};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;

    fn principal() -> Principal {
        Principal {
            subject_id: "user-1".to_string(),
            username: "admin".to_string(),
            display_name: None,
            roles: Vec::new(),
        }
    }

    fn token_state(expires_at_ms: Option<i64>, refresh: Option<&str>) -> TokenState {
        TokenState {
            access_token: "access-1".to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_at_ms,
            principal: principal(),
        }
    }

    /// Transport returning scripted responses in order, recording bearers.
    struct ScriptedTransport {
        responses: Mutex<Vec<ApiResponse>>,
        calls: Mutex<Vec<(String, Option<String>)>>,
        refresh_calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<ApiResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
                refresh_calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> Vec<(String, Option<String>)> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    impl HttpTransport for ScriptedTransport {
        fn execute<'a>(
            &'a self,
            request: ApiRequest,
            bearer: Option<&'a str>,
        ) -> Pin<Box<dyn Future<Output = AppResult<ApiResponse>> + Send + 'a>> {
            let bearer = bearer.map(str::to_string);
            Box::pin(async move {
                if request.path == REFRESH_PATH {
                    self.refresh_calls.fetch_add(1, Ordering::SeqCst);
                }
                self.calls
                    .lock()
                    .expect("calls lock")
                    .push((request.path.clone(), bearer));
                let mut responses = self.responses.lock().expect("responses lock");
                if responses.is_empty() {
                    panic!("transport script exhausted for {}", request.path);
                }
                Ok(responses.remove(0))
            })
        }
    }

    fn response(status: u16, body: Value) -> ApiResponse {
        let (error_code, error_description) = if (200..300).contains(&status) {
            (None, None)
        } else {
            crate::infra::http::parse_error_fields(&body)
        };
        ApiResponse {
            status,
            error_code,
            error_description,
            body,
        }
    }

    fn coordinator(
        storage: crate::infra::storage::SharedStorage,
        transport: Arc<dyn HttpTransport>,
    ) -> TokenCoordinator {
        TokenCoordinator::new(Arc::new(BridgeSettings::default()), storage, transport)
    }

    #[test]
    fn initialize_restores_authenticated_session() {
        let storage = shared_storage(MemoryStorage::new());
        {
            let mut store = storage.lock().expect("lock");
            token_state::save_token_state(&mut *store, &token_state(None, None)).expect("save");
        }
        let coordinator = coordinator(storage, ScriptedTransport::new(Vec::new()));
        coordinator.initialize(1_000);
        assert!(coordinator.is_authenticated());
    }

    #[test]
    fn initialize_with_stale_expiry_and_no_refresh_token_stays_unauthenticated() {
        let storage = shared_storage(MemoryStorage::new());
        {
            let mut store = storage.lock().expect("lock");
            token_state::save_token_state(&mut *store, &token_state(Some(500), None))
                .expect("save");
        }
        let coordinator = coordinator(storage, ScriptedTransport::new(Vec::new()));
        coordinator.initialize(1_000);
        assert_eq!(coordinator.phase(), SessionPhase::Unauthenticated);
    }

    #[test]
    fn initialize_with_empty_storage_stays_unauthenticated() {
        let coordinator = coordinator(
            shared_storage(MemoryStorage::new()),
            ScriptedTransport::new(Vec::new()),
        );
        coordinator.initialize(1_000);
        assert_eq!(coordinator.phase(), SessionPhase::Unauthenticated);
    }

    #[tokio::test]
    async fn success_and_403_pass_through() {
        let transport = ScriptedTransport::new(vec![
            response(200, json!({"ok": true})),
            response(403, json!({"error": "forbidden"})),
        ]);
        let storage = shared_storage(MemoryStorage::new());
        let coordinator = coordinator(storage, transport.clone());
        coordinator
            .complete_sign_in(token_state(None, Some("refresh-1")))
            .expect("sign-in");

        let ok = coordinator
            .execute(ApiRequest::get("/users"))
            .await
            .expect("success");
        assert_eq!(ok.status, 200);

        let forbidden = coordinator
            .execute(ApiRequest::get("/admin"))
            .await
            .expect("403 passes through");
        assert_eq!(forbidden.status, 403);
        // Session untouched by a permission failure.
        assert!(coordinator.is_authenticated());
        assert!(coordinator.current_token_state().is_some());
    }

    #[tokio::test]
    async fn expired_token_triggers_refresh_and_retry() {
        let transport = ScriptedTransport::new(vec![
            response(401, json!({"error": "token_expired"})),
            response(
                200,
                json!({"access_token": "access-2", "refresh_token": "refresh-2", "expires_in": 3600}),
            ),
            response(200, json!({"data": []})),
        ]);
        let storage = shared_storage(MemoryStorage::new());
        let coordinator = coordinator(storage, transport.clone());
        coordinator
            .complete_sign_in(token_state(None, Some("refresh-1")))
            .expect("sign-in");

        let retried = coordinator
            .execute(ApiRequest::get("/users"))
            .await
            .expect("retried response");
        assert_eq!(retried.status, 200);
        assert!(coordinator.is_authenticated());

        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], ("/users".to_string(), Some("access-1".to_string())));
        assert_eq!(calls[1].0, REFRESH_PATH.to_string());
        assert_eq!(calls[2], ("/users".to_string(), Some("access-2".to_string())));

        let state = coordinator.current_token_state().expect("state");
        assert_eq!(state.access_token, "access-2");
        assert_eq!(state.refresh_token.as_deref(), Some("refresh-2"));
        assert!(state.expires_at_ms.is_some());
        assert_eq!(state.principal.subject_id, "user-1");
    }

    #[tokio::test]
    async fn invalid_token_clears_session_without_refresh() {
        let transport =
            ScriptedTransport::new(vec![response(401, json!({"error": "invalid_token"}))]);
        let storage = shared_storage(MemoryStorage::new());
        let coordinator = coordinator(storage, transport.clone());
        coordinator
            .complete_sign_in(token_state(None, Some("refresh-1")))
            .expect("sign-in");

        let err = coordinator
            .execute(ApiRequest::get("/users"))
            .await
            .expect_err("must sign out");
        assert!(err.is_relogin_required());
        assert_eq!(coordinator.phase(), SessionPhase::Unauthenticated);
        assert!(coordinator.current_token_state().is_none());
        assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn credential_failures_propagate_without_refresh() {
        let transport =
            ScriptedTransport::new(vec![response(401, json!({"error": "bad_credentials"}))]);
        let storage = shared_storage(MemoryStorage::new());
        let coordinator = coordinator(storage, transport.clone());
        coordinator
            .complete_sign_in(token_state(None, Some("refresh-1")))
            .expect("sign-in");

        let passthrough = coordinator
            .execute(ApiRequest::get("/users"))
            .await
            .expect("propagated");
        assert_eq!(passthrough.status, 401);
        assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 0);
        // Credential failure does not clear the stored session.
        assert!(coordinator.current_token_state().is_some());
    }

    #[tokio::test]
    async fn auth_endpoint_401_is_surfaced_as_is() {
        let transport =
            ScriptedTransport::new(vec![response(401, json!({"error": "invalid_credentials"}))]);
        let storage = shared_storage(MemoryStorage::new());
        let coordinator = coordinator(storage, transport.clone());

        let surfaced = coordinator
            .execute(ApiRequest::post(
                crate::infra::settings::SIGN_IN_PATH,
                json!({"username": "admin", "password": "wrong"}),
            ))
            .await
            .expect("surfaced");
        assert_eq!(surfaced.status, 401);
        assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_refresh_token_signs_out() {
        let transport = ScriptedTransport::new(vec![response(401, json!({}))]);
        let storage = shared_storage(MemoryStorage::new());
        let coordinator = coordinator(storage, transport.clone());
        coordinator
            .complete_sign_in(token_state(None, None))
            .expect("sign-in");

        let err = coordinator
            .execute(ApiRequest::get("/users"))
            .await
            .expect_err("must sign out");
        assert!(err.is_relogin_required());
        assert!(coordinator.current_token_state().is_none());
    }

    #[tokio::test]
    async fn failed_refresh_signs_out() {
        let transport = ScriptedTransport::new(vec![
            response(401, json!({"error": "token_expired"})),
            response(401, json!({"error": "invalid_grant"})),
        ]);
        let storage = shared_storage(MemoryStorage::new());
        let coordinator = coordinator(storage, transport.clone());
        coordinator
            .complete_sign_in(token_state(None, Some("refresh-1")))
            .expect("sign-in");

        let err = coordinator
            .execute(ApiRequest::get("/users"))
            .await
            .expect_err("must sign out");
        assert!(err.is_relogin_required());
        assert_eq!(coordinator.phase(), SessionPhase::Unauthenticated);
        assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sign_out_clears_everything() {
        let storage = shared_storage(MemoryStorage::new());
        let coordinator = coordinator(storage.clone(), ScriptedTransport::new(Vec::new()));
        coordinator
            .complete_sign_in(token_state(Some(10_000), Some("refresh-1")))
            .expect("sign-in");
        coordinator.sign_out();
        assert_eq!(coordinator.phase(), SessionPhase::Unauthenticated);
        assert!(storage.lock().expect("lock").keys().is_empty());
    }
}
