//! # Client Events
//!
//! Event emission untuk embedder: satu sum type + broadcast channel.
//!
//! ## Prinsip Kunci
//!
//! - Event HANYA untuk observability — tidak pernah authoritative
//! - Listener yang lambat kehilangan event lama (bounded channel), bukan
//!   mem-block client
//! - Emission tanpa subscriber adalah no-op

use tokio::sync::broadcast;
use tracing::debug;

use arus_proto::records::TransferRecord;

/// Committee snapshot summary carried by [`ClientEvent::Info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoSnapshot {
    /// Number of byte-identical signed responses this round (0 = desync).
    pub status: usize,
    pub epoch: u16,
    pub tick: u32,
}

/// Aggregate vote counts for one polled transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStatusNotice {
    pub hash: [u8; 32],
    pub unseen: usize,
    pub seen: usize,
    pub processed: usize,
    pub epoch: u16,
    pub tick: u32,
}

/// One dispatched environment payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentUpdate {
    pub digest: [u8; 32],
    pub payload: Vec<u8>,
}

/// Everything the client reports to its embedder.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A peer socket finished connecting.
    Open { slot: usize, peer: String },
    /// A peer socket closed (error paths included).
    Close { slot: usize, peer: String },
    /// Non-fatal fault worth surfacing (bad persisted record, desync, ...).
    Error { message: String },
    /// Computer-state round progress.
    Info {
        computer_state: InfoSnapshot,
        peers: Vec<String>,
    },
    /// A transfer was built, persisted, and handed to the sockets.
    Transfer {
        hash: [u8; 32],
        record: TransferRecord,
    },
    /// A transfer reached the processed quorum; receipt attached.
    Receipt {
        hash: [u8; 32],
        receipt: Vec<u8>,
        receipt_base64: String,
    },
    /// The locally known balance changed.
    Energy(u64),
    /// Vote tally movement for a polled transfer.
    TransferStatus(TransferStatusNotice),
    /// Environment subscription payload.
    Environment(EnvironmentUpdate),
}

/// Broadcast-backed emitter with typed helpers.
///
/// Cloned freely; all clones feed the same subscriber set.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ClientEvent) {
        // send fails only when nobody is subscribed
        if self.tx.send(event).is_err() {
            debug!("event dropped: no subscribers");
        }
    }

    pub fn open(&self, slot: usize, peer: &str) {
        self.emit(ClientEvent::Open {
            slot,
            peer: peer.to_string(),
        });
    }

    pub fn close(&self, slot: usize, peer: &str) {
        self.emit(ClientEvent::Close {
            slot,
            peer: peer.to_string(),
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(ClientEvent::Error {
            message: message.into(),
        });
    }

    pub fn info(&self, computer_state: InfoSnapshot, peers: Vec<String>) {
        self.emit(ClientEvent::Info {
            computer_state,
            peers,
        });
    }

    pub fn energy(&self, energy: u64) {
        self.emit(ClientEvent::Energy(energy));
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(1024)
    }
}
