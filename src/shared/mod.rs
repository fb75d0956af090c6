pub mod error;
pub mod logging;
pub(crate) mod security;
pub mod time;
