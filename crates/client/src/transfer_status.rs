//! # Transfer-Status Aggregation
//!
//! Satu [`StatusPoll`] per transfer hash yang sedang dikonfirmasi.
//!
//! ## Flow
//!
//! ```text
//! 676 request (1 per reported computor, jarak 100 ms, timestamp sama)
//!        │
//!        ▼
//! slab per reporting computor ──> signature check ──> agreement table
//!        │                                              (3 slot per reporter)
//!        ▼
//! bitfield decode ──> report[0..3] atas pasangan reporter × reported, i ≠ j
//!        │
//!        ▼
//! floor(report[x] / 675) ≥ 451  ──>  concluded (+ receipt untuk processed)
//! ```
//!
//! Request set lengkap di-retain supaya socket yang baru reconnect bisa
//! mengulang slice yang sudah terkirim.

use std::collections::HashMap;

use arus_common::constants::{NUMBER_OF_COMPUTORS, QUORUM_THRESHOLD};
use arus_proto::framing::{encode_sub_request, SubKind};
use arus_proto::records::StatusSlab;
use arus_proto::votes::{self, VoteStatus};

use crate::agreement::AgreementTable;

/// Aggregate vote counters exposed by a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusCounts {
    pub unseen: usize,
    pub seen: usize,
    pub processed: usize,
}

impl StatusCounts {
    /// The decided status once one counter crosses the threshold.
    pub fn decided(&self) -> Option<VoteStatus> {
        if self.processed >= QUORUM_THRESHOLD {
            Some(VoteStatus::Processed)
        } else if self.seen >= QUORUM_THRESHOLD {
            Some(VoteStatus::Seen)
        } else if self.unseen >= QUORUM_THRESHOLD {
            Some(VoteStatus::Unseen)
        } else {
            None
        }
    }
}

struct ReporterState {
    table: AgreementTable,
    decoded: bool,
    raw: Option<Vec<u8>>,
    processed_votes: usize,
}

impl ReporterState {
    fn new() -> Self {
        Self {
            table: AgreementTable::new(),
            decoded: false,
            raw: None,
            processed_votes: 0,
        }
    }
}

/// Confirmation state for one transfer hash.
pub struct StatusPoll {
    pub hash: [u8; 32],
    pub request_timestamp: u64,
    pub concluded: bool,
    requests: Vec<Vec<u8>>,
    next_request: usize,
    reporters: HashMap<u16, ReporterState>,
    report: [u64; 4],
}

impl StatusPoll {
    /// Prebuild the full 676-request set, all carrying `timestamp`.
    pub fn new(hash: [u8; 32], timestamp: u64) -> Self {
        let requests = (0..NUMBER_OF_COMPUTORS as u16)
            .map(|index| {
                let mut body = Vec::with_capacity(34);
                body.extend_from_slice(&hash);
                body.extend_from_slice(&index.to_le_bytes());
                encode_sub_request(SubKind::TransferStatus, timestamp, &body)
            })
            .collect();
        Self {
            hash,
            request_timestamp: timestamp,
            concluded: false,
            requests,
            next_request: 0,
            reporters: HashMap::new(),
            report: [0; 4],
        }
    }

    /// The next request slice to fan out, advancing the pacing cursor.
    pub fn next_request(&mut self) -> Option<Vec<u8>> {
        if self.concluded || self.next_request >= self.requests.len() {
            return None;
        }
        let request = self.requests[self.next_request].clone();
        self.next_request += 1;
        Some(request)
    }

    /// Slices already fanned out, replayed onto a freshly opened socket.
    pub fn sent_requests(&self) -> &[Vec<u8>] {
        &self.requests[..self.next_request]
    }

    /// Feed one verified slab from peer `slot`. Returns true when the
    /// reporter was newly decoded into the aggregate.
    pub fn accept_slab(&mut self, slot: usize, slab: &StatusSlab, raw: Vec<u8>) -> bool {
        let reporter = slab.computor_index;
        let state = self
            .reporters
            .entry(reporter)
            .or_insert_with(ReporterState::new);

        let status = state.table.push(slot, slab.signature.to_vec());
        if status < 1 || state.decoded {
            return false;
        }

        state.decoded = true;
        state.processed_votes = votes::count_processed(&slab.bitfield);
        state.raw = Some(raw);

        let reporter = reporter as usize;
        for reported in 0..NUMBER_OF_COMPUTORS {
            if reported == reporter {
                continue;
            }
            let vote = votes::vote_at(&slab.bitfield, reported);
            self.report[vote as usize] += 1;
        }
        true
    }

    /// Aggregate counts: `floor(report[x] / 675)` per status.
    pub fn counts(&self) -> StatusCounts {
        let divisor = (NUMBER_OF_COMPUTORS - 1) as u64;
        StatusCounts {
            unseen: (self.report[VoteStatus::Unseen as usize] / divisor) as usize,
            seen: (self.report[VoteStatus::Seen as usize] / divisor) as usize,
            processed: (self.report[VoteStatus::Processed as usize] / divisor) as usize,
        }
    }

    /// Snapshot bytes followed by every slab whose reporter certifies a
    /// processed supermajority, in reporter order.
    pub fn assemble_receipt(&self, state_raw: &[u8]) -> Vec<u8> {
        let mut reporters: Vec<(&u16, &ReporterState)> = self
            .reporters
            .iter()
            .filter(|(_, s)| s.decoded && s.processed_votes >= QUORUM_THRESHOLD)
            .collect();
        reporters.sort_by_key(|(index, _)| **index);

        let mut receipt = state_raw.to_vec();
        for (_, state) in reporters {
            if let Some(raw) = &state.raw {
                receipt.extend_from_slice(raw);
            }
        }
        receipt
    }
}
