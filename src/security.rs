//! Credential derivation for bound apps and the broker's own API check.

use base64::Engine;
use sha2::{Digest, Sha256};

/// Every principal the broker creates carries this prefix.
pub const USERNAME_PREFIX: &str = "tsuru_";

/// Username for a binding token (normally the app host). Pure: equal tokens give
/// equal usernames, so unbind never needs a lookup.
pub fn derive_username(token: &str) -> String {
    format!("{}{}", USERNAME_PREFIX, token)
}

/// Password for a username: hex SHA-256 over username then salt. The salt itself is
/// never persisted.
pub fn derive_password(username: &str, salt: Option<&str>) -> String {
    let mut h = Sha256::new();
    h.update(username.as_bytes());
    if let Some(s) = salt {
        h.update(s.as_bytes());
    }
    hex::encode(h.finalize())
}

/// Parse an `Authorization: Basic ...` header value into (user, password).
pub fn parse_basic_auth(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Compare without short-circuiting on the first differing byte.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_is_deterministic() {
        assert_eq!(derive_username("app1.example.org"), "tsuru_app1.example.org");
        assert_eq!(derive_username("a"), derive_username("a"));
        assert_ne!(derive_username("a"), derive_username("b"));
    }

    #[test]
    fn password_depends_on_salt() {
        let unsalted = derive_password("tsuru_app", None);
        let salted = derive_password("tsuru_app", Some("pepper"));
        assert_eq!(unsalted.len(), 64);
        assert_ne!(unsalted, salted);
        assert_eq!(salted, derive_password("tsuru_app", Some("pepper")));
        assert!(!salted.contains("pepper"));
    }

    #[test]
    fn basic_auth_parsing() {
        let hdr = format!("Basic {}", base64::engine::general_purpose::STANDARD.encode("tsuru:s3cret"));
        assert_eq!(parse_basic_auth(&hdr), Some(("tsuru".to_string(), "s3cret".to_string())));
        assert_eq!(parse_basic_auth("Bearer abc"), None);
        assert_eq!(parse_basic_auth("Basic !!!"), None);
    }

    #[test]
    fn constant_time_eq_matches_plain_eq() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }
}
