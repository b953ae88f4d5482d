//! # Arus Client Crate
//!
//! Client library untuk ledger yang dioperasikan komite 676 computor.
//! Identitas lokal bisa mengamati state ledger, mengirim transfer energy
//! yang ditandatangani, dan memperoleh receipt yang bisa diverifikasi
//! secara kriptografis setelah supermajority komite setuju.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ Client                                                     │
//! │   ├── transfer pipeline (build → persist → broadcast)      │
//! │   ├── confirm loop (poll → 451 quorum → receipt → rewrite) │
//! │   └── encrypted ledger (lmdb, essence-sealed)              │
//! │                                                            │
//! │ QuorumEngine (actor)                                       │
//! │   ├── 3 × peer socket task (connect/reconnect/swap)        │
//! │   ├── computer-state rounds (admin-signed snapshots)       │
//! │   ├── transfer-status polls (signed slabs, vote bitfields) │
//! │   └── peer rotation (kind-1 gossip queue)                  │
//! │                                                            │
//! │ events: broadcast channel of ClientEvent                   │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut client = Client::new(config)?;
//! let mut events = client.subscribe();
//! client.launch().await?;
//! client.transfer(&destination_identity, 2_000_000).await?;
//! while let Ok(event) = events.recv().await {
//!     if let ClientEvent::Receipt { receipt_base64, .. } = event {
//!         println!("{receipt_base64}");
//!     }
//! }
//! ```

pub mod agreement;
pub mod cipher;
pub mod client;
pub mod computer_state;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod quorum;
pub mod socket;
pub mod store;
pub mod transfer;
pub mod transfer_status;
pub mod transport;

pub use client::Client;
pub use config::ClientConfig;
pub use error::{ClientError, StoreError};
pub use events::{ClientEvent, EnvironmentUpdate, EventEmitter, InfoSnapshot, TransferStatusNotice};
pub use ledger::{Ledger, LedgerRecord};
pub use quorum::{EngineCommand, EngineNotice, EngineSettings};
pub use store::{BatchOp, BatchStore, LmdbStore};
pub use transport::{PeerConnector, PeerStream, TcpConnector};

// identity helpers embedders reach for without pulling arus-common directly
pub use arus_common::identity::{seed_checksum, verify_checksum};
