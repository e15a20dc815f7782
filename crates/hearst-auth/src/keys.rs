use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::AuthError;

/// A secp256k1 signing identity. Mailboxes hold one; the server holds one
/// process-wide for minting session tokens.
#[derive(Clone, Debug)]
pub struct Keypair {
    signing: SigningKey,
    verifying: VerifyingKey,
}

impl Keypair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let signing = SigningKey::random(&mut OsRng);
        let verifying = *signing.verifying_key();
        Self { signing, verifying }
    }

    /// Import a keypair from its armored private half.
    pub fn from_private_armored(armored: &str) -> Result<Self, AuthError> {
        let bytes = STANDARD
            .decode(armored.trim())
            .map_err(|_| AuthError::KeyMalformed)?;
        let signing = SigningKey::from_slice(&bytes).map_err(|_| AuthError::KeyMalformed)?;
        let verifying = *signing.verifying_key();
        Ok(Self { signing, verifying })
    }

    /// The secret scalar as a single line of base64 text.
    pub fn private_armored(&self) -> String {
        STANDARD.encode(self.signing.to_bytes().as_slice())
    }

    /// The SEC1 public key as a single line of base64 text.
    pub fn public_armored(&self) -> String {
        public_key_armored(&self.verifying)
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.verifying
    }

    /// Sign a message, returning the DER-encoded signature bytes.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing.sign(message);
        signature.to_der().as_bytes().to_vec()
    }
}

/// Armor a public key as base64 SEC1 text.
pub fn public_key_armored(key: &VerifyingKey) -> String {
    STANDARD.encode(key.to_sec1_bytes())
}

/// Import a public key from armored text.
pub fn public_from_armored(armored: &str) -> Result<VerifyingKey, AuthError> {
    let bytes = STANDARD
        .decode(armored.trim())
        .map_err(|_| AuthError::KeyMalformed)?;
    VerifyingKey::from_sec1_bytes(&bytes).map_err(|_| AuthError::KeyMalformed)
}

/// Verify a DER signature over a message. Undecodable signatures verify
/// false rather than erroring.
pub fn verify(key: &VerifyingKey, message: &[u8], signature: &[u8]) -> bool {
    match Signature::from_der(signature) {
        Ok(sig) => key.verify(message, &sig).is_ok(),
        Err(_) => false,
    }
}
