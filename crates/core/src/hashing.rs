//! Hashing helpers shared by session, rate-limit and telemetry code.
//!
//! Raw client identifiers (IP, user agent) and plaintext refresh tokens never
//! leave this module unhashed.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Length in bytes of a freshly minted refresh token.
const REFRESH_TOKEN_BYTES: usize = 32;

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Generate a cryptographically random refresh token.
///
/// Returns `(plaintext, sha256_hex_hash)`. The plaintext goes to the client;
/// only the hash is persisted.
pub fn generate_refresh_token() -> (String, String) {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    let plaintext: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    let hash = hash_refresh_token(&plaintext);
    (plaintext, hash)
}

/// Compute the SHA-256 hex digest of a refresh token.
pub fn hash_refresh_token(token: &str) -> String {
    sha256_hex(token.as_bytes())
}

/// Derive the stable session id for a refresh-token hash.
///
/// Deterministic, so the session for a presented token is a single keyed
/// lookup rather than a scan over token hashes.
pub fn derive_session_id(refresh_token_hash: &str) -> String {
    sha256_hex(format!("session:{refresh_token_hash}").as_bytes())
}

/// Refresh tokens are 32 random bytes rendered as 64 lowercase hex chars.
pub fn is_well_formed_refresh_token(token: &str) -> bool {
    token.len() == REFRESH_TOKEN_BYTES * 2
        && token
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Keyed hash of a client identifier (IP address, user agent).
pub fn hash_identity(value: &str, salt: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(salt.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(value.as_bytes());
    format!("{:x}", mac.finalize().into_bytes())
}
