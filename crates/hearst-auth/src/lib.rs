pub mod keys;
pub mod session;
pub mod token;

pub use keys::{public_from_armored, public_key_armored, verify, Keypair};
pub use session::{Session, MAX_SESSION_SECS, SESSION_SEPARATOR};
pub use token::{mint_token, now_ns, validate_token, validate_token_at, TOKEN_SEPARATOR};

use thiserror::Error;

/// Authentication failures, each with distinct surface behavior.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("session envelope malformed")]
    SessionMalformed,

    #[error("client signature invalid")]
    ClientSignatureInvalid,

    #[error("server token expired")]
    TokenExpired,

    #[error("server token signature invalid")]
    TokenSignatureInvalid,

    #[error("key encoding invalid")]
    KeyMalformed,
}
