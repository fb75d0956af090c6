//! Usage: Token lifecycle (session phases, 401 policy, single-flight refresh).

pub mod coordinator;
pub(crate) mod error_class;
