//! # Identity Module
//!
//! Derivasi identitas dari seed untuk arus client.
//!
//! ## Overview
//!
//! Module ini menyediakan:
//! - Seed validation (55 huruf latin kecil)
//! - Private key derivation dengan odometer sub-index
//! - Shifted-hex encoding (nibble `n` → `'a' + n`)
//! - Identity string (70 karakter, uppercase) + checksum verification
//!
//! ## Security Notes
//!
//! ```text
//! ⚠️ CRITICAL:
//! - seed ADALAH private key — jangan pernah di-log atau di-display
//! - IdentityKeys tidak pernah leak secret via Debug
//! - Derivation deterministik: same (seed, index) → same identity
//! ```

use thiserror::Error;

use crate::constants::{
    CHECKSUM_LENGTH, IDENTITY_LENGTH, PUBLIC_KEY_LENGTH, SEED_LENGTH,
};
use crate::crypto::{xof, xof_array, CryptoError, SignatureScheme};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("seed must be exactly 55 lowercase latin letters")]
    MalformedSeed,

    #[error("identity must be 70 shifted-hex characters")]
    MalformedIdentity,

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

// ════════════════════════════════════════════════════════════════════════════
// SHIFTED HEX
// ════════════════════════════════════════════════════════════════════════════

/// Encode bytes as shifted hex: setiap nibble `n` menjadi huruf `'a' + n`,
/// high nibble dulu. Output lowercase.
pub fn bytes_to_shifted_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push((b'a' + (b >> 4)) as char);
        out.push((b'a' + (b & 0x0f)) as char);
    }
    out
}

/// Decode shifted hex (case-insensitive) kembali ke bytes.
pub fn shifted_hex_to_bytes(s: &str) -> Result<Vec<u8>, IdentityError> {
    if s.len() % 2 != 0 {
        return Err(IdentityError::MalformedIdentity);
    }
    let nibble = |c: char| -> Result<u8, IdentityError> {
        let c = c.to_ascii_lowercase();
        if ('a'..='p').contains(&c) {
            Ok(c as u8 - b'a')
        } else {
            Err(IdentityError::MalformedIdentity)
        }
    };
    let chars: Vec<char> = s.chars().collect();
    let mut out = Vec::with_capacity(chars.len() / 2);
    for pair in chars.chunks(2) {
        out.push((nibble(pair[0])? << 4) | nibble(pair[1])?);
    }
    Ok(out)
}

// ════════════════════════════════════════════════════════════════════════════
// SEED HANDLING
// ════════════════════════════════════════════════════════════════════════════

/// Validate dan convert seed ke byte array: `seed[i] - 'a'`.
pub fn seed_bytes(seed: &str) -> Result<[u8; SEED_LENGTH], IdentityError> {
    let raw = seed.as_bytes();
    if raw.len() != SEED_LENGTH || !raw.iter().all(|b| b.is_ascii_lowercase()) {
        return Err(IdentityError::MalformedSeed);
    }
    let mut out = [0u8; SEED_LENGTH];
    for (dst, &src) in out.iter_mut().zip(raw) {
        *dst = src - b'a';
    }
    Ok(out)
}

/// Derive private key untuk `(seed, index)`.
///
/// The preimage starts as the raw seed bytes; each of the `index`
/// increments adds 1 to byte 0 and carries odometer-style: a byte that
/// strictly exceeds 26 resets to 1 and the carry moves one index up.
pub fn derive_private_key(seed: &str, index: u32) -> Result<[u8; 32], IdentityError> {
    let mut preimage = seed_bytes(seed)?;
    for _ in 0..index {
        let mut i = 0;
        loop {
            preimage[i] += 1;
            if preimage[i] > 26 {
                preimage[i] = 1;
                i += 1;
            } else {
                break;
            }
        }
    }
    Ok(xof_array::<32>(&preimage))
}

/// First 3 shifted-hex characters of `xof(seed_bytes, 2)`, uppercased.
pub fn seed_checksum(seed: &str) -> Result<String, IdentityError> {
    let bytes = seed_bytes(seed)?;
    let digest = xof(&bytes, 2);
    let hex = bytes_to_shifted_hex(&digest);
    Ok(hex[..CHECKSUM_LENGTH].to_ascii_uppercase())
}

// ════════════════════════════════════════════════════════════════════════════
// IDENTITY STRING
// ════════════════════════════════════════════════════════════════════════════

/// Render public key + checksum sebagai identity string 70 karakter.
pub fn identity_string(public_key: &[u8; PUBLIC_KEY_LENGTH]) -> String {
    let checksum = xof(public_key, CHECKSUM_LENGTH);
    let mut bytes = Vec::with_capacity(PUBLIC_KEY_LENGTH + CHECKSUM_LENGTH);
    bytes.extend_from_slice(public_key);
    bytes.extend_from_slice(&checksum);
    bytes_to_shifted_hex(&bytes).to_ascii_uppercase()
}

/// Recompute checksum dari identity string; `Ok(false)` berarti string
/// well-formed tapi checksum salah.
pub fn verify_checksum(identity: &str) -> Result<bool, IdentityError> {
    let bytes = decode_identity(identity)?;
    let expected = xof(&bytes[..PUBLIC_KEY_LENGTH], CHECKSUM_LENGTH);
    Ok(bytes[PUBLIC_KEY_LENGTH..] == expected[..])
}

/// Decode identity string ke public key, menolak checksum yang salah.
pub fn identity_to_public_key(
    identity: &str,
) -> Result<[u8; PUBLIC_KEY_LENGTH], IdentityError> {
    let bytes = decode_identity(identity)?;
    let expected = xof(&bytes[..PUBLIC_KEY_LENGTH], CHECKSUM_LENGTH);
    if bytes[PUBLIC_KEY_LENGTH..] != expected[..] {
        return Err(IdentityError::MalformedIdentity);
    }
    let mut pk = [0u8; PUBLIC_KEY_LENGTH];
    pk.copy_from_slice(&bytes[..PUBLIC_KEY_LENGTH]);
    Ok(pk)
}

fn decode_identity(identity: &str) -> Result<Vec<u8>, IdentityError> {
    if identity.len() != IDENTITY_LENGTH {
        return Err(IdentityError::MalformedIdentity);
    }
    shifted_hex_to_bytes(identity)
}

// ════════════════════════════════════════════════════════════════════════════
// IDENTITY KEYS
// ════════════════════════════════════════════════════════════════════════════

/// Key material milik satu identitas: secret scalar, public key, dan
/// rendered identity string.
#[derive(Clone)]
pub struct IdentityKeys {
    secret: [u8; 32],
    public: [u8; PUBLIC_KEY_LENGTH],
    identity: String,
}

impl IdentityKeys {
    pub fn derive(
        scheme: &dyn SignatureScheme,
        seed: &str,
        index: u32,
    ) -> Result<Self, IdentityError> {
        let secret = derive_private_key(seed, index)?;
        let public = scheme.public_key(&secret)?;
        let identity = identity_string(&public);
        Ok(Self {
            secret,
            public,
            identity,
        })
    }

    pub fn secret(&self) -> &[u8; 32] {
        &self.secret
    }

    pub fn public(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.public
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl std::fmt::Debug for IdentityKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // identity saja — secret TIDAK PERNAH di-render
        f.debug_struct("IdentityKeys")
            .field("identity", &self.identity)
            .finish()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════
