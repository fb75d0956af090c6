#![allow(dead_code)]

use auth_bridge::{BridgeSettings, Principal, TokenState};
use url::Url;

pub fn bridge_settings(patterns: &[&str]) -> BridgeSettings {
    BridgeSettings {
        allowed_redirect_patterns: patterns.iter().map(|p| p.to_string()).collect(),
        ..BridgeSettings::default()
    }
}

pub fn principal() -> Principal {
    Principal {
        subject_id: "user-1".to_string(),
        username: "admin".to_string(),
        display_name: Some("Admin".to_string()),
        roles: vec!["admin".to_string()],
    }
}

pub fn signed_in_state(refresh_token: Option<&str>, expires_at_ms: Option<i64>) -> TokenState {
    TokenState {
        access_token: "access-1".to_string(),
        refresh_token: refresh_token.map(str::to_string),
        expires_at_ms,
        principal: principal(),
    }
}

pub fn query_pairs(url: &str) -> Vec<(String, String)> {
    Url::parse(url)
        .expect("redirect url parses")
        .query_pairs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn query_value(url: &str, key: &str) -> Option<String> {
    query_pairs(url)
        .into_iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v)
}
