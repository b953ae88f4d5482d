//! Transfer building and receipt blobs.
//!
//! Building validates caller input, stamps a monotonic timestamp, signs the
//! 80-byte prefix with the domain-tagged digest, and freezes the packed
//! record. Receipt blobs are the export/import unit: the 144-byte transfer
//! record followed by the receipt (computer-state bytes plus signed status
//! slabs end-to-end).

use std::collections::HashSet;

use arus_common::constants::{
    MIN_ENERGY_AMOUNT, NUMBER_OF_COMPUTORS, PUBLIC_KEY_LENGTH, QUORUM_THRESHOLD,
};
use arus_common::crypto::SignatureScheme;
use arus_common::identity::{self, IdentityKeys};
use arus_common::timestamp::MonotonicClock;
use arus_proto::records::{
    ComputerStateRecord, StatusSlab, TransferRecord, COMPUTER_STATE_LENGTH, STATUS_SLAB_LENGTH,
    TRANSFER_LENGTH, TRANSFER_UNSIGNED_LENGTH,
};
use arus_proto::votes;

use crate::error::ClientError;

/// Validate inputs and produce a signed, frozen transfer record.
pub fn build_transfer(
    scheme: &dyn SignatureScheme,
    keys: &IdentityKeys,
    clock: &MonotonicClock,
    destination: &str,
    energy: u64,
    available: u64,
) -> Result<TransferRecord, ClientError> {
    let destination_key = match identity::verify_checksum(destination) {
        Ok(true) => identity::identity_to_public_key(destination)?,
        _ => {
            return Err(ClientError::InvalidChecksum {
                identity: destination.to_string(),
            })
        }
    };

    if energy < MIN_ENERGY_AMOUNT {
        return Err(ClientError::IllegalArgument {
            field: "energy",
            reason: format!("must be at least {}", MIN_ENERGY_AMOUNT),
        });
    }
    if energy > available {
        return Err(ClientError::InsufficientEnergy {
            requested: energy,
            available,
        });
    }

    let mut record = TransferRecord {
        source: *keys.public(),
        destination: destination_key,
        timestamp: clock.next(),
        energy,
        signature: [0u8; 64],
    };
    let encoded = record.encode();
    let digest = TransferRecord::signing_digest(&encoded[..TRANSFER_UNSIGNED_LENGTH]);
    record.signature = scheme.sign(keys.secret(), &digest)?;
    Ok(record)
}

// ════════════════════════════════════════════════════════════════════════════
// RECEIPT BLOBS
// ════════════════════════════════════════════════════════════════════════════

/// Concatenate the export blob: transfer record, then the receipt.
pub fn encode_receipt_blob(record: &TransferRecord, receipt: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(TRANSFER_LENGTH + receipt.len());
    out.extend_from_slice(&record.encode());
    out.extend_from_slice(receipt);
    out
}

/// Split an export blob back into the transfer record and the receipt.
pub fn parse_receipt_blob(blob: &[u8]) -> Result<(TransferRecord, &[u8]), ClientError> {
    if blob.len() < TRANSFER_LENGTH {
        return Err(ClientError::MalformedReceipt("blob shorter than a transfer"));
    }
    let record = TransferRecord::parse(&blob[..TRANSFER_LENGTH])
        .map_err(|_| ClientError::MalformedReceipt("transfer record"))?;
    Ok((record, &blob[TRANSFER_LENGTH..]))
}

/// Split a receipt into the computer-state image and its status slabs.
pub fn parse_receipt(
    receipt: &[u8],
) -> Result<(ComputerStateRecord, &[u8], Vec<StatusSlab>), ClientError> {
    if receipt.len() < COMPUTER_STATE_LENGTH {
        return Err(ClientError::MalformedReceipt("missing computer state"));
    }
    let (state_bytes, mut rest) = receipt.split_at(COMPUTER_STATE_LENGTH);
    if rest.len() % STATUS_SLAB_LENGTH != 0 {
        return Err(ClientError::MalformedReceipt("ragged slab section"));
    }
    let state = ComputerStateRecord::parse(state_bytes)
        .map_err(|_| ClientError::MalformedReceipt("computer state"))?;

    let mut slabs = Vec::with_capacity(rest.len() / STATUS_SLAB_LENGTH);
    while !rest.is_empty() {
        let (raw, tail) = rest.split_at(STATUS_SLAB_LENGTH);
        slabs.push(
            StatusSlab::parse(raw).map_err(|_| ClientError::MalformedReceipt("status slab"))?,
        );
        rest = tail;
    }
    Ok((state, state_bytes, slabs))
}

/// Verify every signature inside a receipt against `expected_hash`.
///
/// Checks, in order: the admin signature and admin origin of the embedded
/// snapshot, then for every slab its reporter signature, hash binding, and
/// epoch/tick consistency with the snapshot. Returns the number of distinct
/// reporters whose own bitfield certifies a processed supermajority; import
/// requires that count to reach the quorum threshold, replay only requires
/// the signatures to hold.
pub fn verify_receipt(
    receipt: &[u8],
    scheme: &dyn SignatureScheme,
    admin_public_key: &[u8; PUBLIC_KEY_LENGTH],
    expected_hash: &[u8; 32],
) -> Result<usize, ClientError> {
    let (state, state_bytes, slabs) = parse_receipt(receipt)?;

    if state.computor_index as usize != NUMBER_OF_COMPUTORS {
        return Err(ClientError::MalformedReceipt("snapshot not admin-issued"));
    }
    if !ComputerStateRecord::verify_admin(state_bytes, scheme, admin_public_key) {
        return Err(ClientError::SignatureVerificationFailed {
            context: "receipt computer state",
        });
    }

    let mut seen_reporters: HashSet<u16> = HashSet::new();
    let mut certifying = 0usize;
    for slab in &slabs {
        let reporter = slab.computor_index as usize;
        if reporter >= NUMBER_OF_COMPUTORS {
            return Err(ClientError::MalformedReceipt("reporter index out of range"));
        }
        if &slab.transfer_hash != expected_hash {
            return Err(ClientError::MalformedReceipt("slab for a different transfer"));
        }
        if slab.epoch != state.epoch || slab.tick > state.tick {
            return Err(ClientError::MalformedReceipt("slab outside snapshot window"));
        }
        if !StatusSlab::verify(
            &slab.encode(),
            scheme,
            &state.computor_public_keys[reporter],
        ) {
            return Err(ClientError::SignatureVerificationFailed {
                context: "receipt status slab",
            });
        }
        if !seen_reporters.insert(slab.computor_index) {
            return Err(ClientError::MalformedReceipt("duplicate reporter"));
        }
        if votes::count_processed(&slab.bitfield) >= QUORUM_THRESHOLD {
            certifying += 1;
        }
    }
    Ok(certifying)
}
