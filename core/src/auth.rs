use rand::Rng;
use sha2::{Digest, Sha256};

pub const WEBHOOK_TOKEN_PREFIX: &str = "bsync_wh_";

/// Generate a webhook token. Returns `(full_token, sha256_hash)`.
/// Format: `bsync_wh_` + 32 random bytes hex-encoded.
pub fn generate_webhook_token() -> (String, String) {
    let raw = random_hex(32);
    let full_token = format!("{WEBHOOK_TOKEN_PREFIX}{raw}");
    let hash = hash_token(&full_token);
    (full_token, hash)
}

/// SHA-256 hex digest of a token string.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// First 8 chars after the prefix, for display/identification.
pub fn token_prefix(full_token: &str) -> String {
    full_token
        .strip_prefix(WEBHOOK_TOKEN_PREFIX)
        .map(|rest| rest.chars().take(8).collect())
        .unwrap_or_default()
}

pub fn looks_like_webhook_token(candidate: &str) -> bool {
    candidate
        .strip_prefix(WEBHOOK_TOKEN_PREFIX)
        .is_some_and(|rest| rest.len() == 64 && rest.chars().all(|ch| ch.is_ascii_hexdigit()))
}

/// Generate `n` random bytes and return as hex string.
fn random_hex(n: usize) -> String {
    let bytes: Vec<u8> = (0..n).map(|_| rand::thread_rng().r#gen::<u8>()).collect();
    hex::encode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_token_roundtrip() {
        let (token, hash) = generate_webhook_token();
        assert!(token.starts_with("bsync_wh_"));
        assert_eq!(hash, hash_token(&token));
        assert_eq!(token_prefix(&token).len(), 8);
        assert!(looks_like_webhook_token(&token));
    }

    #[test]
    fn rejects_foreign_token_shapes() {
        assert!(!looks_like_webhook_token("sk_live_abcdef"));
        assert!(!looks_like_webhook_token("bsync_wh_nothex"));
        assert!(!looks_like_webhook_token(""));
    }

    #[test]
    fn hash_is_stable_hex() {
        let hash = hash_token("bsync_wh_example");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token("bsync_wh_example"));
    }
}
