//! Consent link tokens.
//!
//! A token is a bearer credential: whoever holds it can view the document and,
//! once, complete the record. Tokens carry 256 bits from the OS-seeded thread
//! RNG and are encoded as unpadded base64url so they survive in a query string.
//! Uniqueness is enforced by the database index on `consent_token`; callers
//! regenerate on a collision instead of reusing a value.

use base64ct::Encoding;
use rand::RngCore;

const TOKEN_BYTES: usize = 32;

/// Encoded length of a token: 32 bytes as unpadded base64url.
pub const TOKEN_LEN: usize = 43;

pub fn issue_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

/// Cheap shape check for untrusted input before it reaches the database.
pub fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Shortened form for log lines.
pub fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    format!("{prefix}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_issued_tokens_are_well_formed() {
        for _ in 0..100 {
            let token = issue_token();
            assert_eq!(token.len(), TOKEN_LEN);
            assert!(is_well_formed(&token), "rejected {token}");
        }
    }

    #[test]
    fn test_issued_tokens_are_distinct() {
        let tokens: HashSet<String> = (0..1000).map(|_| issue_token()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("short"));
        assert!(!is_well_formed(&"a".repeat(TOKEN_LEN + 1)));
        assert!(!is_well_formed(&format!("{}=", "a".repeat(TOKEN_LEN - 1))));
        assert!(!is_well_formed(&format!("{}/", "a".repeat(TOKEN_LEN - 1))));
        assert!(!is_well_formed(&format!("{}é", "a".repeat(TOKEN_LEN - 2))));
    }

    #[test]
    fn test_redact_keeps_only_prefix() {
        let token = issue_token();
        let redacted = redact(&token);
        assert!(redacted.starts_with(&token[..6]));
        assert!(!redacted.contains(&token[6..]));
    }
}
