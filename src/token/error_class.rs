//! Usage: Classification of 401 error codes (invalid vs expired vs rejected credentials).

/// What a 401's error-code field says about the presented token.
///
/// The invalid/expired distinction matters: an invalid or tampered token
/// must never be retried, while an expired one is recoverable via refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthErrorClass {
    /// Tampered, revoked, or otherwise unusable. Hard session clear.
    InvalidToken,
    /// Past its lifetime. Soft recovery via refresh.
    ExpiredToken,
    /// Wrong credentials, forbidden, or no token presented. Propagate;
    /// refreshing would not help.
    AuthRejected,
    /// Anything else. Treated like expiry: worth one refresh attempt.
    Unknown,
}

impl AuthErrorClass {
    pub(crate) fn classify(code: Option<&str>) -> Self {
        let Some(code) = code.map(str::trim).filter(|v| !v.is_empty()) else {
            return Self::Unknown;
        };
        match code.to_ascii_lowercase().as_str() {
            "invalid_token" | "token_invalid" | "token_malformed" | "token_revoked" => {
                Self::InvalidToken
            }
            "token_expired" | "expired_token" | "session_expired" => Self::ExpiredToken,
            "invalid_credentials" | "bad_credentials" | "access_denied" | "missing_token"
            | "forbidden" | "unauthorized_client" => Self::AuthRejected,
            _ => Self::Unknown,
        }
    }

    pub(crate) fn allows_refresh(self) -> bool {
        matches!(self, Self::ExpiredToken | Self::Unknown)
    }
}
