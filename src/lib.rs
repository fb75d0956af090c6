//! Delegated-authentication broker and token lifecycle coordinator.
//!
//! An external application opens the initiation route with `redirect_uri`,
//! `client_id`, optional `state`/`response_type`/`code_challenge`; the
//! broker validates it against the configured allow-list, tracks the
//! pending handshake in client-local storage, and after the user signs in
//! answers the caller with an authorization code or a bearer token. The
//! token coordinator keeps the local user's own access/refresh pair valid,
//! coordinating a single in-flight refresh when the backend reports the
//! access token expired.

pub mod broker;
pub mod domain;
pub mod infra;
pub mod shared;
pub mod token;

pub use broker::complete::{CompletionGrant, CompletionRedirect};
pub use broker::initiate::{InitiationOutcome, InitiationParams};
pub use domain::handshake::{HandshakeContext, ResponseMode};
pub use domain::token_state::{Principal, TokenState};
pub use infra::http::{ApiRequest, ApiResponse, HttpTransport, Method, ReqwestTransport};
pub use infra::settings::BridgeSettings;
pub use infra::storage::{shared_storage, MemoryStorage, SharedStorage, SqliteStorage, Storage};
pub use shared::error::{AppError, AppResult};
pub use token::coordinator::{SessionPhase, TokenCoordinator};
