use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use k256::ecdsa::VerifyingKey;

use crate::keys::{verify, Keypair};
use crate::token::{now_ns, validate_token_at};
use crate::AuthError;

/// Separator between envelope fields on the wire. Multi-character so it
/// cannot collide with base64url text or decimal digits.
pub const SESSION_SEPARATOR: &str = "!@@!";

/// Ceiling on the effective session duration.
pub const MAX_SESSION_SECS: u64 = 24 * 60 * 60;

/// A session envelope: a server token, the duration the client is asking
/// for, and the client's signature binding the two together.
///
/// The envelope carries no replay protection beyond the token's time
/// ceiling; that is intentional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub duration_secs: u64,
    pub signature: Vec<u8>,
}

impl Session {
    /// Start an unsigned envelope. Call [`Session::sign`] before encoding.
    pub fn new(token: impl Into<String>, duration_secs: u64) -> Self {
        Self {
            token: token.into(),
            duration_secs,
            signature: Vec::new(),
        }
    }

    /// The exact byte string the client signature covers:
    /// `token !@@! duration_secs`, nothing more.
    pub fn message(&self) -> String {
        format!("{}{SESSION_SEPARATOR}{}", self.token, self.duration_secs)
    }

    /// Sign the envelope with the client's key.
    pub fn sign(&mut self, client: &Keypair) {
        self.signature = client.sign(self.message().as_bytes());
    }

    /// Wire form: `TOKEN !@@! DURATION !@@! BASE64URL(SIGNATURE)`.
    pub fn encode(&self) -> String {
        format!(
            "{}{SESSION_SEPARATOR}{}",
            self.message(),
            URL_SAFE.encode(&self.signature)
        )
    }

    /// Parse the wire form. Wrong arity, an unparseable duration, or an
    /// undecodable signature all fail with `SessionMalformed`.
    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        let comps: Vec<&str> = raw.split(SESSION_SEPARATOR).collect();
        if comps.len() != 3 {
            return Err(AuthError::SessionMalformed);
        }

        let duration_secs: u64 = comps[1].parse().map_err(|_| AuthError::SessionMalformed)?;
        let signature = URL_SAFE
            .decode(comps[2])
            .map_err(|_| AuthError::SessionMalformed)?;

        Ok(Self {
            token: comps[0].to_string(),
            duration_secs,
            signature,
        })
    }

    /// Validate the envelope: the client signature must cover the two-field
    /// message, and the embedded server token must be fresh within
    /// `min(duration, 24h)`. A zero duration is never valid.
    pub fn validate(
        &self,
        client: &VerifyingKey,
        server: &VerifyingKey,
    ) -> Result<(), AuthError> {
        self.validate_at(client, server, now_ns())
    }

    /// Clock-injected twin of [`Session::validate`].
    pub fn validate_at(
        &self,
        client: &VerifyingKey,
        server: &VerifyingKey,
        now_ns: i64,
    ) -> Result<(), AuthError> {
        if !verify(client, self.message().as_bytes(), &self.signature) {
            return Err(AuthError::ClientSignatureInvalid);
        }

        if self.duration_secs == 0 {
            return Err(AuthError::TokenExpired);
        }

        let ceiling = self.duration_secs.min(MAX_SESSION_SECS);
        validate_token_at(&self.token, Duration::from_secs(ceiling), server, now_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::mint_token;

    const HOUR_NS: i64 = 3_600_000_000_000;

    fn signed_session(server: &Keypair, client: &Keypair, duration_secs: u64) -> Session {
        let mut session = Session::new(mint_token(server), duration_secs);
        session.sign(client);
        session
    }

    #[test]
    fn encode_parse_round_trip() {
        let server = Keypair::generate();
        let client = Keypair::generate();
        let session = signed_session(&server, &client, 300);

        let parsed = Session::parse(&session.encode()).unwrap();
        assert_eq!(parsed, session);
    }

    #[test]
    fn parse_rejects_malformed() {
        for raw in [
            "",
            "just-a-token",
            "token!@@!300",
            "token!@@!not-a-number!@@!c2ln",
            "token!@@!300!@@!%%%bad%%%",
            "a!@@!1!@@!c2ln!@@!extra",
        ] {
            assert_eq!(
                Session::parse(raw).unwrap_err(),
                AuthError::SessionMalformed,
                "input: {raw:?}"
            );
        }
    }

    #[test]
    fn mint_and_validate() {
        let server = Keypair::generate();
        let client = Keypair::generate();
        let session = signed_session(&server, &client, 300);

        session
            .validate(&client.public_key(), &server.public_key())
            .unwrap();
    }

    #[test]
    fn expires_after_duration() {
        let server = Keypair::generate();
        let client = Keypair::generate();
        let session = signed_session(&server, &client, 300);

        let err = session
            .validate_at(&client.public_key(), &server.public_key(), now_ns() + HOUR_NS)
            .unwrap_err();
        assert_eq!(err, AuthError::TokenExpired);
    }

    #[test]
    fn duration_clamped_to_a_day() {
        let server = Keypair::generate();
        let client = Keypair::generate();
        // Asks for 48 hours; the ceiling is 24.
        let session = signed_session(&server, &client, 48 * 60 * 60);

        session
            .validate_at(
                &client.public_key(),
                &server.public_key(),
                now_ns() + 23 * HOUR_NS,
            )
            .unwrap();

        let err = session
            .validate_at(
                &client.public_key(),
                &server.public_key(),
                now_ns() + 25 * HOUR_NS,
            )
            .unwrap_err();
        assert_eq!(err, AuthError::TokenExpired);
    }

    #[test]
    fn zero_duration_never_valid() {
        let server = Keypair::generate();
        let client = Keypair::generate();
        let session = signed_session(&server, &client, 0);

        let err = session
            .validate(&client.public_key(), &server.public_key())
            .unwrap_err();
        assert_eq!(err, AuthError::TokenExpired);
    }

    #[test]
    fn unsigned_or_tampered_client_signature_rejected() {
        let server = Keypair::generate();
        let client = Keypair::generate();
        let intruder = Keypair::generate();

        let unsigned = Session::new(mint_token(&server), 300);
        assert_eq!(
            unsigned
                .validate(&client.public_key(), &server.public_key())
                .unwrap_err(),
            AuthError::ClientSignatureInvalid
        );

        // Signed by somebody other than the mailbox holder.
        let mut forged = Session::new(mint_token(&server), 300);
        forged.sign(&intruder);
        assert_eq!(
            forged
                .validate(&client.public_key(), &server.public_key())
                .unwrap_err(),
            AuthError::ClientSignatureInvalid
        );

        // Signature covers the duration: changing it invalidates.
        let mut altered = signed_session(&server, &client, 300);
        altered.duration_secs = 86_400;
        assert_eq!(
            altered
                .validate(&client.public_key(), &server.public_key())
                .unwrap_err(),
            AuthError::ClientSignatureInvalid
        );
    }

    #[test]
    fn token_must_come_from_the_server() {
        let server = Keypair::generate();
        let client = Keypair::generate();
        let impostor = Keypair::generate();

        let mut session = Session::new(mint_token(&impostor), 300);
        session.sign(&client);

        let err = session
            .validate(&client.public_key(), &server.public_key())
            .unwrap_err();
        assert_eq!(err, AuthError::TokenSignatureInvalid);
    }
}
