pub mod auth_codes;
pub mod handshake;
pub mod token_state;
