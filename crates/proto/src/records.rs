//! Packed record layouts: transfers, computer-state snapshots, and
//! transfer-status slabs.
//!
//! Each record type parses from and encodes to its exact wire image, and
//! exposes the digest over its signed region. Digest domain separation is
//! done by XOR-ing a tag into byte 0 of the signed region before hashing:
//! tag `1` for transfers, tag `3` for status slabs, no tag for the
//! admin-signed computer state.

use arus_common::constants::{
    DIGEST_LENGTH, NUMBER_OF_COMPUTORS, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH,
};
use arus_common::crypto::{xof_array, SignatureScheme};

use crate::framing::WireError;

/// Full packed transfer: 32 source + 32 destination + 8 timestamp +
/// 8 energy + 64 signature.
pub const TRANSFER_LENGTH: usize = 144;

/// The unsigned prefix covered by the signing digest.
pub const TRANSFER_UNSIGNED_LENGTH: usize = 80;

/// Signed region of a computer-state record: index, epoch, tick,
/// timestamp, then all computor public keys.
pub const COMPUTER_STATE_SIGNED_LENGTH: usize = 16 + NUMBER_OF_COMPUTORS * PUBLIC_KEY_LENGTH;

/// Full computer-state record including the admin signature.
pub const COMPUTER_STATE_LENGTH: usize = COMPUTER_STATE_SIGNED_LENGTH + SIGNATURE_LENGTH;

/// 676 two-bit votes, four per byte.
pub const STATUS_BITFIELD_LENGTH: usize = NUMBER_OF_COMPUTORS / 4;

/// Signed region of a status slab: hash, bitfield, index, epoch, tick.
pub const STATUS_SIGNED_LENGTH: usize = 32 + STATUS_BITFIELD_LENGTH + 2 + 2 + 4;

/// Full status slab including the reporter signature.
pub const STATUS_SLAB_LENGTH: usize = STATUS_SIGNED_LENGTH + SIGNATURE_LENGTH;

const TRANSFER_DIGEST_TAG: u8 = 1;
const STATUS_DIGEST_TAG: u8 = 3;

fn tagged_digest(signed: &[u8], tag: u8) -> [u8; DIGEST_LENGTH] {
    let mut copy = signed.to_vec();
    copy[0] ^= tag;
    xof_array::<DIGEST_LENGTH>(&copy)
}

// ════════════════════════════════════════════════════════════════════════════
// TRANSFER RECORD
// ════════════════════════════════════════════════════════════════════════════

/// One signed energy transfer, 144 bytes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub source: [u8; PUBLIC_KEY_LENGTH],
    pub destination: [u8; PUBLIC_KEY_LENGTH],
    pub timestamp: u64,
    pub energy: u64,
    pub signature: [u8; SIGNATURE_LENGTH],
}

impl TransferRecord {
    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() != TRANSFER_LENGTH {
            return Err(WireError::MalformedRecord("transfer"));
        }
        Ok(Self {
            source: bytes[0..32].try_into().expect("slice length"),
            destination: bytes[32..64].try_into().expect("slice length"),
            timestamp: u64::from_le_bytes(bytes[64..72].try_into().expect("slice length")),
            energy: u64::from_le_bytes(bytes[72..80].try_into().expect("slice length")),
            signature: bytes[80..144].try_into().expect("slice length"),
        })
    }

    pub fn encode(&self) -> [u8; TRANSFER_LENGTH] {
        let mut out = [0u8; TRANSFER_LENGTH];
        out[0..32].copy_from_slice(&self.source);
        out[32..64].copy_from_slice(&self.destination);
        out[64..72].copy_from_slice(&self.timestamp.to_le_bytes());
        out[72..80].copy_from_slice(&self.energy.to_le_bytes());
        out[80..144].copy_from_slice(&self.signature);
        out
    }

    /// Digest of the 80-byte unsigned prefix with the transfer domain tag.
    pub fn signing_digest(unsigned: &[u8]) -> [u8; DIGEST_LENGTH] {
        debug_assert_eq!(unsigned.len(), TRANSFER_UNSIGNED_LENGTH);
        tagged_digest(unsigned, TRANSFER_DIGEST_TAG)
    }

    pub fn digest(&self) -> [u8; DIGEST_LENGTH] {
        let encoded = self.encode();
        Self::signing_digest(&encoded[..TRANSFER_UNSIGNED_LENGTH])
    }

    /// Record hash identifying the transfer everywhere in the protocol.
    pub fn hash(&self) -> [u8; DIGEST_LENGTH] {
        xof_array::<DIGEST_LENGTH>(&self.encode())
    }

    /// Verify the embedded signature against the record's own source key.
    pub fn verify(&self, scheme: &dyn SignatureScheme) -> bool {
        scheme.verify(&self.source, &self.digest(), &self.signature)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// COMPUTER-STATE RECORD
// ════════════════════════════════════════════════════════════════════════════

/// Admin-signed committee snapshot: epoch, tick, and all 676 computor keys.
#[derive(Clone, PartialEq, Eq)]
pub struct ComputerStateRecord {
    pub computor_index: u16,
    pub epoch: u16,
    pub tick: u32,
    pub timestamp: u64,
    pub computor_public_keys: Vec<[u8; PUBLIC_KEY_LENGTH]>,
    pub signature: [u8; SIGNATURE_LENGTH],
}

impl ComputerStateRecord {
    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() != COMPUTER_STATE_LENGTH {
            return Err(WireError::MalformedRecord("computer-state"));
        }
        let mut keys = Vec::with_capacity(NUMBER_OF_COMPUTORS);
        for i in 0..NUMBER_OF_COMPUTORS {
            let at = 16 + i * PUBLIC_KEY_LENGTH;
            keys.push(bytes[at..at + PUBLIC_KEY_LENGTH].try_into().expect("slice length"));
        }
        Ok(Self {
            computor_index: u16::from_le_bytes(bytes[0..2].try_into().expect("slice length")),
            epoch: u16::from_le_bytes(bytes[2..4].try_into().expect("slice length")),
            tick: u32::from_le_bytes(bytes[4..8].try_into().expect("slice length")),
            timestamp: u64::from_le_bytes(bytes[8..16].try_into().expect("slice length")),
            computor_public_keys: keys,
            signature: bytes[COMPUTER_STATE_SIGNED_LENGTH..].try_into().expect("slice length"),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(COMPUTER_STATE_LENGTH);
        out.extend_from_slice(&self.computor_index.to_le_bytes());
        out.extend_from_slice(&self.epoch.to_le_bytes());
        out.extend_from_slice(&self.tick.to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        for key in &self.computor_public_keys {
            out.extend_from_slice(key);
        }
        out.extend_from_slice(&self.signature);
        out
    }

    /// Digest over the signed region of a raw record image. No domain tag:
    /// the admin key signs nothing else.
    pub fn signed_digest(bytes: &[u8]) -> [u8; DIGEST_LENGTH] {
        xof_array::<DIGEST_LENGTH>(&bytes[..COMPUTER_STATE_SIGNED_LENGTH])
    }

    /// Admin signature check over a raw record image. The length must have
    /// been validated by [`ComputerStateRecord::parse`] already.
    pub fn verify_admin(
        bytes: &[u8],
        scheme: &dyn SignatureScheme,
        admin_public_key: &[u8; PUBLIC_KEY_LENGTH],
    ) -> bool {
        if bytes.len() != COMPUTER_STATE_LENGTH {
            return false;
        }
        let digest = Self::signed_digest(bytes);
        let signature: [u8; SIGNATURE_LENGTH] = bytes[COMPUTER_STATE_SIGNED_LENGTH..]
            .try_into()
            .expect("slice length");
        scheme.verify(admin_public_key, &digest, &signature)
    }
}

impl std::fmt::Debug for ComputerStateRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputerStateRecord")
            .field("computor_index", &self.computor_index)
            .field("epoch", &self.epoch)
            .field("tick", &self.tick)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// STATUS SLAB
// ════════════════════════════════════════════════════════════════════════════

/// One reporting computor's signed view of a transfer's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSlab {
    pub transfer_hash: [u8; 32],
    pub bitfield: [u8; STATUS_BITFIELD_LENGTH],
    pub computor_index: u16,
    pub epoch: u16,
    pub tick: u32,
    pub signature: [u8; SIGNATURE_LENGTH],
}

impl StatusSlab {
    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() != STATUS_SLAB_LENGTH {
            return Err(WireError::MalformedRecord("status-slab"));
        }
        let end = 32 + STATUS_BITFIELD_LENGTH;
        Ok(Self {
            transfer_hash: bytes[0..32].try_into().expect("slice length"),
            bitfield: bytes[32..end].try_into().expect("slice length"),
            computor_index: u16::from_le_bytes(bytes[end..end + 2].try_into().expect("slice length")),
            epoch: u16::from_le_bytes(bytes[end + 2..end + 4].try_into().expect("slice length")),
            tick: u32::from_le_bytes(bytes[end + 4..end + 8].try_into().expect("slice length")),
            signature: bytes[STATUS_SIGNED_LENGTH..].try_into().expect("slice length"),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(STATUS_SLAB_LENGTH);
        out.extend_from_slice(&self.transfer_hash);
        out.extend_from_slice(&self.bitfield);
        out.extend_from_slice(&self.computor_index.to_le_bytes());
        out.extend_from_slice(&self.epoch.to_le_bytes());
        out.extend_from_slice(&self.tick.to_le_bytes());
        out.extend_from_slice(&self.signature);
        out
    }

    /// Digest over the signed region with the status domain tag XOR-ed
    /// into byte 0 of the transfer hash.
    pub fn signed_digest(bytes: &[u8]) -> [u8; DIGEST_LENGTH] {
        tagged_digest(&bytes[..STATUS_SIGNED_LENGTH], STATUS_DIGEST_TAG)
    }

    /// Verify a raw slab image against the reporting computor's key.
    pub fn verify(
        bytes: &[u8],
        scheme: &dyn SignatureScheme,
        computor_public_key: &[u8; PUBLIC_KEY_LENGTH],
    ) -> bool {
        if bytes.len() != STATUS_SLAB_LENGTH {
            return false;
        }
        let digest = Self::signed_digest(bytes);
        let signature: [u8; SIGNATURE_LENGTH] = bytes[STATUS_SIGNED_LENGTH..]
            .try_into()
            .expect("slice length");
        scheme.verify(computor_public_key, &digest, &signature)
    }

    /// The signed region plus signature, the unit appended into receipts.
    pub fn receipt_bytes(&self) -> Vec<u8> {
        self.encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arus_common::crypto::{generate_keypair_bytes, Ed25519Scheme};

    fn signed_transfer() -> TransferRecord {
        let scheme = Ed25519Scheme;
        let (public, secret) = generate_keypair_bytes();
        let mut record = TransferRecord {
            source: public,
            destination: [7u8; 32],
            timestamp: 1_700_000_000_000_000,
            energy: 5_000_000,
            signature: [0u8; 64],
        };
        let encoded = record.encode();
        let digest = TransferRecord::signing_digest(&encoded[..TRANSFER_UNSIGNED_LENGTH]);
        record.signature = scheme.sign(&secret, &digest).unwrap();
        record
    }

    #[test]
    fn test_transfer_roundtrip() {
        let record = signed_transfer();
        let bytes = record.encode();
        assert_eq!(bytes.len(), TRANSFER_LENGTH);
        assert_eq!(TransferRecord::parse(&bytes).unwrap(), record);
        assert!(TransferRecord::parse(&bytes[..100]).is_err());
    }

    #[test]
    fn test_transfer_signature_verifies() {
        let record = signed_transfer();
        assert!(record.verify(&Ed25519Scheme));

        let mut tampered = record.clone();
        tampered.energy += 1;
        assert!(!tampered.verify(&Ed25519Scheme));
    }

    #[test]
    fn test_transfer_digest_uses_domain_tag() {
        let record = signed_transfer();
        let encoded = record.encode();
        let untagged = arus_common::crypto::xof(&encoded[..TRANSFER_UNSIGNED_LENGTH], 32);
        assert_ne!(record.digest().to_vec(), untagged);
    }

    #[test]
    fn test_transfer_hash_covers_signature() {
        let record = signed_transfer();
        let mut other = record.clone();
        other.signature[0] ^= 1;
        assert_ne!(record.hash(), other.hash());
    }

    #[test]
    fn test_computer_state_roundtrip_and_admin_check() {
        let scheme = Ed25519Scheme;
        let (admin_public, admin_secret) = generate_keypair_bytes();

        let mut record = ComputerStateRecord {
            computor_index: 676,
            epoch: 4,
            tick: 9000,
            timestamp: 1_700_000_000_000_000,
            computor_public_keys: (0..676).map(|i| [(i % 251) as u8; 32]).collect(),
            signature: [0u8; 64],
        };
        let unsigned = record.encode();
        let digest = ComputerStateRecord::signed_digest(&unsigned);
        record.signature = scheme.sign(&admin_secret, &digest).unwrap();

        let bytes = record.encode();
        assert_eq!(bytes.len(), COMPUTER_STATE_LENGTH);
        assert_eq!(ComputerStateRecord::parse(&bytes).unwrap(), record);
        assert!(ComputerStateRecord::verify_admin(
            &bytes,
            &scheme,
            &admin_public
        ));

        let mut tampered = bytes.clone();
        tampered[4] ^= 1; // tick
        assert!(!ComputerStateRecord::verify_admin(
            &tampered,
            &scheme,
            &admin_public
        ));
    }

    #[test]
    fn test_status_slab_roundtrip_and_verify() {
        let scheme = Ed25519Scheme;
        let (public, secret) = generate_keypair_bytes();

        let mut slab = StatusSlab {
            transfer_hash: [0xAB; 32],
            bitfield: [0b10101010; STATUS_BITFIELD_LENGTH],
            computor_index: 13,
            epoch: 4,
            tick: 8999,
            signature: [0u8; 64],
        };
        let unsigned = slab.encode();
        let digest = StatusSlab::signed_digest(&unsigned);
        slab.signature = scheme.sign(&secret, &digest).unwrap();

        let bytes = slab.encode();
        assert_eq!(bytes.len(), STATUS_SLAB_LENGTH);
        assert_eq!(StatusSlab::parse(&bytes).unwrap(), slab);
        assert!(StatusSlab::verify(&bytes, &scheme, &public));

        // the digest is domain-tagged: signing the untagged region fails
        let untagged_digest =
            arus_common::crypto::xof_array::<32>(&bytes[..STATUS_SIGNED_LENGTH]);
        let bad_sig = scheme.sign(&secret, &untagged_digest).unwrap();
        let mut forged = slab.clone();
        forged.signature = bad_sig;
        assert!(!StatusSlab::verify(&forged.encode(), &scheme, &public));
    }
}
