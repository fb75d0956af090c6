//! Usage: Delegated-authentication broker (allow-listing, registry, initiation, completion).

pub mod allowlist;
pub mod callback;
pub mod complete;
pub mod initiate;
pub mod session_registry;
