//! Per-slot stream cipher for ledger values.
//!
//! AES-128-CTR with the key derived once from the seed
//! (`xof(seed_bytes, 16)`) and the initial counter set to the slot number.
//! Encrypt and decrypt are the same keystream application.

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128LE;

type SlotCipher = Ctr128LE<Aes128>;

/// Derive the ledger stream key from the raw seed bytes.
pub fn stream_key(seed_bytes: &[u8]) -> [u8; 16] {
    arus_common::crypto::xof_array::<16>(seed_bytes)
}

/// XOR `data` in place with the keystream of slot `slot`.
pub fn apply(key: &[u8; 16], slot: u32, data: &mut [u8]) {
    let iv: [u8; 16] = (slot as u128).to_le_bytes();
    let mut cipher = SlotCipher::new(key.into(), (&iv).into());
    cipher.apply_keystream(data);
}
