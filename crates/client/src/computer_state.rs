//! Computer-state rounds: admin-signed snapshot verification plus the
//! per-round agreement bookkeeping behind the `Info` status ladder.

use std::sync::Arc;

use arus_common::constants::{NUMBER_OF_COMPUTORS, NUMBER_OF_CONNECTIONS, PUBLIC_KEY_LENGTH};
use arus_common::crypto::SignatureScheme;
use arus_proto::records::ComputerStateRecord;

use crate::agreement::AgreementTable;

/// Parse and verify one kind-0 sub-1 response body. Only admin-issued
/// records (`computor_index == 676`) with a valid admin signature pass.
pub fn verify_snapshot(
    body: &[u8],
    scheme: &dyn SignatureScheme,
    admin_public_key: &[u8; PUBLIC_KEY_LENGTH],
) -> Option<ComputerStateRecord> {
    let record = ComputerStateRecord::parse(body).ok()?;
    if record.computor_index as usize != NUMBER_OF_COMPUTORS {
        return None;
    }
    if !ComputerStateRecord::verify_admin(body, scheme, admin_public_key) {
        return None;
    }
    Some(record)
}

/// One request round: verified responses in arrival order plus the
/// agreement table over their signature slices.
pub struct StateRound {
    pub timestamp: u64,
    table: AgreementTable,
    records: Vec<(ComputerStateRecord, Vec<u8>)>,
    pub status: usize,
}

impl StateRound {
    pub fn new(timestamp: u64) -> Self {
        Self {
            timestamp,
            table: AgreementTable::new(),
            records: Vec::with_capacity(NUMBER_OF_CONNECTIONS),
            status: 0,
        }
    }

    /// Feed one verified response. Returns the new status when the tally
    /// rose; the round status is monotonic by construction.
    pub fn accept(
        &mut self,
        slot: usize,
        record: ComputerStateRecord,
        raw: Vec<u8>,
    ) -> Option<usize> {
        let before = self.table.len();
        let status = self.table.push(slot, record.signature.to_vec());
        if self.table.len() > before {
            self.records.push((record, raw));
        }
        if status > self.status {
            self.status = status;
            Some(status)
        } else {
            None
        }
    }

    /// The record the current tally agrees on.
    pub fn anchor_record(&self) -> Option<&(ComputerStateRecord, Vec<u8>)> {
        self.records.get(self.table.anchor())
    }

    /// All three slots have responded.
    pub fn complete(&self) -> bool {
        self.table.len() == NUMBER_OF_CONNECTIONS
    }

    pub fn is_disagreement(&self) -> bool {
        self.table.is_disagreement()
    }

    pub fn responses(&self) -> usize {
        self.table.len()
    }

    pub fn reset_offset(&mut self) {
        self.table.reset_offset();
    }
}

/// The snapshot the engine currently trusts, kept raw for receipts.
#[derive(Clone)]
pub struct AdoptedState {
    pub epoch: u16,
    pub tick: u32,
    pub computor_public_keys: Arc<Vec<[u8; PUBLIC_KEY_LENGTH]>>,
    pub raw: Arc<Vec<u8>>,
}

impl AdoptedState {
    pub fn from_record(record: &ComputerStateRecord, raw: &[u8]) -> Self {
        Self {
            epoch: record.epoch,
            tick: record.tick,
            computor_public_keys: Arc::new(record.computor_public_keys.clone()),
            raw: Arc::new(raw.to_vec()),
        }
    }
}
