//! crypto helpers for arus-common: XOF hashing + pluggable signature schemes
//!
//! The hash `xof` is an extendable-output function (Shake128). Every digest
//! in the protocol is an `xof` call with an explicit output length: 2 bytes
//! for seed checksums, 3 for identity checksums, 16 for the ledger stream
//! key, 32 for signing digests and record hashes.
//!
//! Signature verification goes through the object-safe [`SignatureScheme`]
//! trait so the suite is injected at client construction; there is no
//! process-global crypto state.

use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake128;
use thiserror::Error;

use crate::constants::{PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};

#[path = "crypto/ed25519.rs"]
mod ed25519;

pub use ed25519::{generate_keypair_bytes, Ed25519Scheme};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, found {found}")]
    InvalidKeyLength { expected: usize, found: usize },

    #[error("malformed public key")]
    MalformedPublicKey,

    #[error("signing failed: {0}")]
    SigningFailed(String),
}

/// Compute `output_len` bytes of Shake128 over `data`.
pub fn xof(data: &[u8], output_len: usize) -> Vec<u8> {
    let mut hasher = Shake128::default();
    hasher.update(data);
    let mut reader = hasher.finalize_xof();
    let mut out = vec![0u8; output_len];
    reader.read(&mut out);
    out
}

/// Fixed-size variant of [`xof`].
pub fn xof_array<const N: usize>(data: &[u8]) -> [u8; N] {
    let mut hasher = Shake128::default();
    hasher.update(data);
    let mut reader = hasher.finalize_xof();
    let mut out = [0u8; N];
    reader.read(&mut out);
    out
}

/// Pluggable signature scheme. 32-byte public keys, 64-byte signatures,
/// secrets derived upstream from the seed.
pub trait SignatureScheme: Send + Sync {
    fn public_key(&self, secret: &[u8; 32]) -> Result<[u8; PUBLIC_KEY_LENGTH], CryptoError>;

    fn sign(
        &self,
        secret: &[u8; 32],
        message: &[u8],
    ) -> Result<[u8; SIGNATURE_LENGTH], CryptoError>;

    /// Returns false both for a wrong signature and for a public key that
    /// does not decode to a curve point.
    fn verify(
        &self,
        public_key: &[u8; PUBLIC_KEY_LENGTH],
        message: &[u8],
        signature: &[u8; SIGNATURE_LENGTH],
    ) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xof_deterministic() {
        assert_eq!(xof(b"arus", 32), xof(b"arus", 32));
        assert_ne!(xof(b"arus", 32), xof(b"sura", 32));
    }

    #[test]
    fn test_xof_lengths() {
        for n in [2usize, 3, 16, 32, 64] {
            assert_eq!(xof(b"x", n).len(), n);
        }
        // a longer output starts with the shorter one (XOF property)
        let short = xof(b"x", 16);
        let long = xof(b"x", 32);
        assert_eq!(&long[..16], &short[..]);
    }

    #[test]
    fn test_xof_array_matches_vec() {
        let arr: [u8; 32] = xof_array(b"payload");
        assert_eq!(arr.to_vec(), xof(b"payload", 32));
    }

    #[test]
    fn test_ed25519_sign_verify_roundtrip() {
        let scheme = Ed25519Scheme;
        let secret = xof_array::<32>(b"test secret");
        let public = scheme.public_key(&secret).expect("public key");
        let sig = scheme.sign(&secret, b"message").expect("sign");

        assert!(scheme.verify(&public, b"message", &sig));
        assert!(!scheme.verify(&public, b"massage", &sig));

        let mut bad = sig;
        bad[0] ^= 1;
        assert!(!scheme.verify(&public, b"message", &bad));
    }
}
