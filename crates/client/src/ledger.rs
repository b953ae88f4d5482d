//! # Encrypted Local Ledger
//!
//! Append-structured per-identity store yang di-seal dengan signature.
//!
//! ## Layout
//!
//! ```text
//! "counter"   u32 LE    jumlah slot yang pernah dialokasikan
//! "energy"    u64 LE    saldo lokal
//! "signature" 64 bytes  identity signature atas essence digest
//! slot (u32 BE × N)     AES-128-CTR encrypted: tag || record [|| receipt]
//! ```
//!
//! Tag `0` = transfer belum processed (144 bytes record).
//! Tag `1` = processed (record + receipt).
//!
//! ## Essence
//!
//! ```text
//! essence = counter_le(4) || energy_le(8) || hash₁ || hash₂ || …
//! ```
//!
//! Hashes dalam lexicographic order. `"signature"` menandatangani
//! `xof(essence, 32)` dengan identity key, sehingga store tidak bisa
//! di-tamper tanpa memegang private key.
//!
//! ## Write Discipline
//!
//! Setiap mutasi membentuk state kandidat dulu, menulis satu atomic batch
//! (termasuk signature baru), dan baru meng-commit state in-memory setelah
//! batch sukses. Batch gagal → in-memory state tidak berubah.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use arus_common::constants::{DIGEST_LENGTH, SIGNATURE_LENGTH};
use arus_common::crypto::{xof_array, SignatureScheme};
use arus_common::identity::IdentityKeys;
use arus_proto::records::{TransferRecord, TRANSFER_LENGTH};

use crate::cipher;
use crate::error::ClientError;
use crate::events::EventEmitter;
use crate::store::{BatchOp, BatchStore};
use crate::transfer;

const KEY_COUNTER: &[u8] = b"counter";
const KEY_ENERGY: &[u8] = b"energy";
const KEY_SIGNATURE: &[u8] = b"signature";

const TAG_UNPROCESSED: u8 = 0;
const TAG_PROCESSED: u8 = 1;

fn slot_key(slot: u32) -> [u8; 4] {
    // big-endian so store order equals numeric order
    slot.to_be_bytes()
}

/// One transfer held by the ledger.
#[derive(Debug, Clone)]
pub struct LedgerRecord {
    pub slot: u32,
    pub record: TransferRecord,
    pub receipt: Option<Vec<u8>>,
}

impl LedgerRecord {
    pub fn is_processed(&self) -> bool {
        self.receipt.is_some()
    }
}

/// Identity-sealed transfer store. See module docs for the layout.
pub struct Ledger {
    store: Box<dyn BatchStore>,
    scheme: Arc<dyn SignatureScheme>,
    keys: IdentityKeys,
    admin_public_key: [u8; 32],
    cipher_key: [u8; 16],
    counter: u32,
    energy: u64,
    records: HashMap<[u8; 32], LedgerRecord>,
    valid: bool,
}

impl Ledger {
    pub fn new(
        store: Box<dyn BatchStore>,
        scheme: Arc<dyn SignatureScheme>,
        keys: IdentityKeys,
        admin_public_key: [u8; 32],
        seed_bytes: &[u8],
    ) -> Self {
        Self {
            store,
            scheme,
            keys,
            admin_public_key,
            cipher_key: cipher::stream_key(seed_bytes),
            counter: 0,
            energy: 0,
            records: HashMap::new(),
            valid: true,
        }
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn energy(&self) -> u64 {
        self.energy
    }

    /// False after a failed essence check; every mutation is refused then.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn record(&self, hash: &[u8; 32]) -> Option<&LedgerRecord> {
        self.records.get(hash)
    }

    /// Hashes and records of every transfer still awaiting its receipt.
    pub fn unprocessed(&self) -> Vec<([u8; 32], TransferRecord)> {
        self.records
            .iter()
            .filter(|(_, r)| !r.is_processed())
            .map(|(h, r)| (*h, r.record.clone()))
            .collect()
    }

    // ════════════════════════════════════════════════════════════════════
    // REPLAY
    // ════════════════════════════════════════════════════════════════════

    /// Rebuild in-memory state from the store, verifying every record and
    /// finally the essence seal. On a broken seal no derived state is
    /// exposed: everything stays zeroed and the ledger turns invalid.
    pub fn replay(&mut self, emitter: &EventEmitter) -> Result<(), ClientError> {
        let entries = self.store.scan().map_err(ClientError::PersistenceFailed)?;

        let mut counter = 0u32;
        let mut energy = 0u64;
        let mut stored_signature: Option<[u8; SIGNATURE_LENGTH]> = None;
        let mut records: HashMap<[u8; 32], LedgerRecord> = HashMap::new();

        for (key, value) in entries {
            match key.as_slice() {
                KEY_COUNTER => {
                    if let Ok(raw) = <[u8; 4]>::try_from(value.as_slice()) {
                        counter = u32::from_le_bytes(raw);
                    }
                }
                KEY_ENERGY => {
                    if let Ok(raw) = <[u8; 8]>::try_from(value.as_slice()) {
                        energy = u64::from_le_bytes(raw);
                    }
                }
                KEY_SIGNATURE => {
                    stored_signature = <[u8; SIGNATURE_LENGTH]>::try_from(value.as_slice()).ok();
                }
                numeric if numeric.len() == 4 => {
                    let slot = u32::from_be_bytes(numeric.try_into().expect("slice length"));
                    let mut plain = value.clone();
                    cipher::apply(&self.cipher_key, slot, &mut plain);
                    match self.replay_slot(slot, &plain) {
                        Ok(record) => {
                            records.insert(record.record.hash(), record);
                        }
                        Err(e) => {
                            warn!("skipping ledger slot {}: {}", slot, e);
                            emitter.error(format!("ledger slot {} rejected: {}", slot, e));
                        }
                    }
                }
                other => {
                    debug!("ignoring unknown ledger key ({} bytes)", other.len());
                }
            }
        }

        // seal check only after the whole stream is consumed
        let sealed = match stored_signature {
            Some(signature) => {
                let digest = essence_digest(counter, energy, &records);
                self.scheme.verify(self.keys.public(), &digest, &signature)
            }
            None => counter == 0 && records.is_empty(),
        };

        if !sealed {
            warn!("ledger essence signature did not verify; state stays zeroed");
            emitter.error("ledger essence signature verification failed");
            self.counter = 0;
            self.energy = 0;
            self.records.clear();
            self.valid = false;
            return Ok(());
        }

        self.counter = counter;
        self.energy = energy;
        self.records = records;
        self.valid = true;
        debug!(
            "ledger replayed: counter={} energy={} records={}",
            self.counter,
            self.energy,
            self.records.len()
        );
        Ok(())
    }

    fn replay_slot(&self, slot: u32, plain: &[u8]) -> Result<LedgerRecord, ClientError> {
        let (&tag, rest) = plain
            .split_first()
            .ok_or(ClientError::MalformedReceipt("empty slot value"))?;
        match tag {
            TAG_UNPROCESSED => {
                let record = TransferRecord::parse(rest)
                    .map_err(|_| ClientError::MalformedReceipt("unprocessed slot length"))?;
                // a provisional record must be our own; verify against the
                // identity key, not whatever source bytes are on disk
                let verified = self
                    .scheme
                    .verify(self.keys.public(), &record.digest(), &record.signature);
                if !verified {
                    return Err(ClientError::SignatureVerificationFailed {
                        context: "persisted transfer",
                    });
                }
                Ok(LedgerRecord {
                    slot,
                    record,
                    receipt: None,
                })
            }
            TAG_PROCESSED => {
                if rest.len() < TRANSFER_LENGTH {
                    return Err(ClientError::MalformedReceipt("processed slot length"));
                }
                let record = TransferRecord::parse(&rest[..TRANSFER_LENGTH])
                    .map_err(|_| ClientError::MalformedReceipt("processed slot length"))?;
                if !record.verify(self.scheme.as_ref()) {
                    return Err(ClientError::SignatureVerificationFailed {
                        context: "processed transfer",
                    });
                }
                let receipt = &rest[TRANSFER_LENGTH..];
                transfer::verify_receipt(
                    receipt,
                    self.scheme.as_ref(),
                    &self.admin_public_key,
                    &record.hash(),
                )?;
                Ok(LedgerRecord {
                    slot,
                    record,
                    receipt: Some(receipt.to_vec()),
                })
            }
            _ => Err(ClientError::MalformedReceipt("unknown slot tag")),
        }
    }

    // ════════════════════════════════════════════════════════════════════
    // MUTATIONS
    // ════════════════════════════════════════════════════════════════════

    /// Persist a freshly built transfer under a new slot with tag 0.
    /// The caller broadcasts only after this returns Ok.
    pub fn append_transfer(&mut self, record: &TransferRecord) -> Result<[u8; 32], ClientError> {
        self.ensure_valid()?;
        let hash = record.hash();
        let slot = self.counter + 1;

        let mut next = self.records.clone();
        next.insert(
            hash,
            LedgerRecord {
                slot,
                record: record.clone(),
                receipt: None,
            },
        );

        let mut value = Vec::with_capacity(1 + TRANSFER_LENGTH);
        value.push(TAG_UNPROCESSED);
        value.extend_from_slice(&record.encode());
        cipher::apply(&self.cipher_key, slot, &mut value);

        self.commit(slot, value, None, slot, self.energy, next)?;
        Ok(hash)
    }

    /// Rewrite an unprocessed record as processed, attach its receipt, and
    /// adjust energy: the amount leaves the balance unless this identity is
    /// the destination. Returns the new balance.
    pub fn finalize_transfer(
        &mut self,
        hash: &[u8; 32],
        receipt: &[u8],
    ) -> Result<u64, ClientError> {
        self.ensure_valid()?;
        let existing = self
            .records
            .get(hash)
            .ok_or(ClientError::MalformedReceipt("unknown transfer hash"))?
            .clone();
        if existing.is_processed() {
            return Ok(self.energy);
        }

        let record = existing.record.clone();
        let new_energy = if &record.destination == self.keys.public() {
            self.energy
        } else {
            self.energy.saturating_sub(record.energy)
        };

        let new_slot = self.counter + 1;
        let mut next = self.records.clone();
        next.insert(
            *hash,
            LedgerRecord {
                slot: new_slot,
                record: record.clone(),
                receipt: Some(receipt.to_vec()),
            },
        );

        let mut value = Vec::with_capacity(1 + TRANSFER_LENGTH + receipt.len());
        value.push(TAG_PROCESSED);
        value.extend_from_slice(&record.encode());
        value.extend_from_slice(receipt);
        cipher::apply(&self.cipher_key, new_slot, &mut value);

        self.commit(
            new_slot,
            value,
            Some(existing.slot),
            new_slot,
            new_energy,
            next,
        )?;
        Ok(self.energy)
    }

    /// Integrate an externally verified processed transfer that is not in
    /// the ledger yet (receipt import). Energy moves toward this identity
    /// when it is the destination, away when it is the source.
    pub fn import_processed(
        &mut self,
        record: &TransferRecord,
        receipt: &[u8],
    ) -> Result<u64, ClientError> {
        self.ensure_valid()?;
        let hash = record.hash();
        if let Some(existing) = self.records.get(&hash) {
            if existing.is_processed() {
                return Ok(self.energy);
            }
            return self.finalize_transfer(&hash, receipt);
        }

        let new_energy = if &record.destination == self.keys.public() {
            self.energy.saturating_add(record.energy)
        } else {
            self.energy.saturating_sub(record.energy)
        };

        let slot = self.counter + 1;
        let mut next = self.records.clone();
        next.insert(
            hash,
            LedgerRecord {
                slot,
                record: record.clone(),
                receipt: Some(receipt.to_vec()),
            },
        );

        let mut value = Vec::with_capacity(1 + TRANSFER_LENGTH + receipt.len());
        value.push(TAG_PROCESSED);
        value.extend_from_slice(&record.encode());
        value.extend_from_slice(receipt);
        cipher::apply(&self.cipher_key, slot, &mut value);

        self.commit(slot, value, None, slot, new_energy, next)?;
        Ok(self.energy)
    }

    /// Manual balance adjustment for externally known deposits.
    pub fn set_energy(&mut self, energy: u64) -> Result<(), ClientError> {
        self.ensure_valid()?;
        let digest = essence_digest(self.counter, energy, &self.records);
        let signature = self.scheme.sign(self.keys.secret(), &digest)?;

        self.store.write_batch(&[
            BatchOp::put(KEY_ENERGY.to_vec(), energy.to_le_bytes().to_vec()),
            BatchOp::put(KEY_SIGNATURE.to_vec(), signature.to_vec()),
        ])?;
        self.energy = energy;
        Ok(())
    }

    fn ensure_valid(&self) -> Result<(), ClientError> {
        if self.valid {
            Ok(())
        } else {
            Err(ClientError::SignatureVerificationFailed {
                context: "ledger essence",
            })
        }
    }

    /// Shared tail of every slot mutation: sign the candidate essence,
    /// write one atomic batch, and only then commit in-memory state.
    fn commit(
        &mut self,
        put_slot: u32,
        put_value: Vec<u8>,
        delete_slot: Option<u32>,
        new_counter: u32,
        new_energy: u64,
        new_records: HashMap<[u8; 32], LedgerRecord>,
    ) -> Result<(), ClientError> {
        let digest = essence_digest(new_counter, new_energy, &new_records);
        let signature = self.scheme.sign(self.keys.secret(), &digest)?;

        let mut ops = vec![
            BatchOp::put(KEY_COUNTER.to_vec(), new_counter.to_le_bytes().to_vec()),
            BatchOp::put(KEY_ENERGY.to_vec(), new_energy.to_le_bytes().to_vec()),
            BatchOp::put(KEY_SIGNATURE.to_vec(), signature.to_vec()),
            BatchOp::put(slot_key(put_slot).to_vec(), put_value),
        ];
        if let Some(old) = delete_slot {
            ops.push(BatchOp::delete(slot_key(old).to_vec()));
        }

        self.store.write_batch(&ops)?;

        self.counter = new_counter;
        self.energy = new_energy;
        self.records = new_records;
        Ok(())
    }
}

/// `xof` digest over `counter || energy || sorted hashes`.
fn essence_digest(
    counter: u32,
    energy: u64,
    records: &HashMap<[u8; 32], LedgerRecord>,
) -> [u8; DIGEST_LENGTH] {
    let mut hashes: Vec<&[u8; 32]> = records.keys().collect();
    hashes.sort_unstable();

    let mut essence = Vec::with_capacity(12 + hashes.len() * 32);
    essence.extend_from_slice(&counter.to_le_bytes());
    essence.extend_from_slice(&energy.to_le_bytes());
    for hash in hashes {
        essence.extend_from_slice(hash.as_slice());
    }
    xof_array::<DIGEST_LENGTH>(&essence)
}
