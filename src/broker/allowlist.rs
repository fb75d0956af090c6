//! Usage: Redirect host allow-list matching (exact + subdomain wildcard patterns).

/// Match one host against one configured pattern.
///
/// `*.base` matches any subdomain of `base` but not `base` itself; any other
/// pattern is a case-insensitive exact match. Empty patterns never match.
pub fn is_host_allowed(host: &str, pattern: &str) -> bool {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return false;
    }

    if let Some(base) = pattern.strip_prefix("*.") {
        if base.is_empty() {
            return false;
        }
        let suffix = format!(".{}", base.to_ascii_lowercase());
        return host.to_ascii_lowercase().ends_with(&suffix);
    }

    host.eq_ignore_ascii_case(pattern)
}

/// A redirect host is allowed iff at least one pattern matches.
pub fn is_redirect_allowed(host: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| is_host_allowed(host, pattern))
}
