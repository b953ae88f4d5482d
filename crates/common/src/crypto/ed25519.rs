use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use super::{CryptoError, SignatureScheme};
use crate::constants::{PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};

/// Default signature backend: Ed25519 via ed25519-dalek v2.
///
/// Stateless; the secret arrives per call as the 32-byte scalar seed that
/// identity derivation produced.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Scheme;

impl SignatureScheme for Ed25519Scheme {
    fn public_key(&self, secret: &[u8; 32]) -> Result<[u8; PUBLIC_KEY_LENGTH], CryptoError> {
        let sk = SigningKey::from_bytes(secret);
        Ok(sk.verifying_key().to_bytes())
    }

    fn sign(
        &self,
        secret: &[u8; 32],
        message: &[u8],
    ) -> Result<[u8; SIGNATURE_LENGTH], CryptoError> {
        let sk = SigningKey::from_bytes(secret);
        Ok(sk.sign(message).to_bytes())
    }

    fn verify(
        &self,
        public_key: &[u8; PUBLIC_KEY_LENGTH],
        message: &[u8],
        signature: &[u8; SIGNATURE_LENGTH],
    ) -> bool {
        let vk = match VerifyingKey::from_bytes(public_key) {
            Ok(vk) => vk,
            Err(_) => return false,
        };
        let sig = Signature::from_bytes(signature);
        vk.verify(message, &sig).is_ok()
    }
}

/// Generate a fresh Ed25519 keypair, returned as (public, secret).
/// Test and tooling convenience; production keys come from seed derivation.
pub fn generate_keypair_bytes() -> ([u8; PUBLIC_KEY_LENGTH], [u8; 32]) {
    let mut rng = rand::rngs::OsRng;
    let sk = SigningKey::generate(&mut rng);
    (sk.verifying_key().to_bytes(), sk.to_bytes())
}
