use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use k256::ecdsa::VerifyingKey;

use crate::keys::{verify, Keypair};
use crate::AuthError;

/// Separator between the timestamp and the server signature inside a token.
/// Distinct from the session separator so tokens nest cleanly in envelopes.
pub const TOKEN_SEPARATOR: &str = "@!!@";

/// Nanoseconds since the Unix epoch.
pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

/// Mint a fresh server token: the current timestamp in decimal nanoseconds,
/// joined to the server's base64url signature of that timestamp.
pub fn mint_token(server: &Keypair) -> String {
    let stamp = now_ns().to_string();
    let signature = server.sign(stamp.as_bytes());
    format!("{stamp}{TOKEN_SEPARATOR}{}", URL_SAFE.encode(signature))
}

/// Validate a token against the server public key and an age ceiling.
pub fn validate_token(
    token: &str,
    max_age: Duration,
    server_public: &VerifyingKey,
) -> Result<(), AuthError> {
    validate_token_at(token, max_age, server_public, now_ns())
}

/// Clock-injected twin of [`validate_token`]. A token is valid iff its
/// signature verifies under the server key and its timestamp falls within
/// `[now - max_age, now]`.
pub fn validate_token_at(
    token: &str,
    max_age: Duration,
    server_public: &VerifyingKey,
    now_ns: i64,
) -> Result<(), AuthError> {
    let (stamp, signature_b64) = token
        .split_once(TOKEN_SEPARATOR)
        .ok_or(AuthError::TokenSignatureInvalid)?;
    let signature = URL_SAFE
        .decode(signature_b64)
        .map_err(|_| AuthError::TokenSignatureInvalid)?;
    if !verify(server_public, stamp.as_bytes(), &signature) {
        return Err(AuthError::TokenSignatureInvalid);
    }

    let minted: i64 = stamp.parse().map_err(|_| AuthError::TokenSignatureInvalid)?;
    let age = now_ns - minted;
    if age < 0 || age as u128 > max_age.as_nanos() {
        return Err(AuthError::TokenExpired);
    }

    Ok(())
}
