//! # Client
//!
//! Permukaan publik library: satu [`Client`] per identitas. Client memiliki
//! quorum engine lewat komposisi (bukan mixin) dan meneruskan surface kecil
//! yang eksplisit: transfer, receipt import, peer control, environment
//! subscriptions, dan event stream.
//!
//! ## Ordering Guarantees
//!
//! - Broadcast transfer TIDAK PERNAH mendahului batch persistence-nya
//! - Untuk satu transfer: `Receipt` menyusul `Energy`, dan keduanya
//!   menyusul rewrite atomic bertag processed
//! - `Info` non-decreasing dalam satu round

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use arus_common::constants::QUORUM_THRESHOLD;
use arus_common::crypto::{Ed25519Scheme, SignatureScheme};
use arus_common::identity::{self, IdentityKeys};
use arus_common::timestamp::MonotonicClock;
use arus_proto::framing::{encode_frame, RequestKind};
use arus_proto::records::TransferRecord;
use arus_proto::votes::VoteStatus;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::{ClientEvent, EnvironmentUpdate, EventEmitter};
use crate::ledger::Ledger;
use crate::quorum::{spawn_engine, EngineCommand, EngineHandle, EngineNotice, EngineSettings};
use crate::store::LmdbStore;
use crate::transfer;
use crate::transport::{PeerConnector, TcpConnector};

/// An unprocessed record this much older than "now" is re-broadcast once
/// at launch.
const STALE_REBROADCAST_MICROS: u64 = 60 * 1_000_000;

/// A hash is not re-polled more often than this (676 requests × 100 ms × 2).
const MIN_REPOLL_INTERVAL: Duration = Duration::from_millis(676 * 100 * 2);

struct Launched {
    ledger: Arc<Mutex<Ledger>>,
    engine: EngineHandle,
    confirm_task: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

/// Ledger client bound to one `(seed, index)` identity.
pub struct Client {
    config: ClientConfig,
    scheme: Arc<dyn SignatureScheme>,
    connector: Arc<dyn PeerConnector>,
    keys: IdentityKeys,
    clock: Arc<MonotonicClock>,
    emitter: EventEmitter,
    launched: Option<Launched>,
}

impl Client {
    /// Construct with the default crypto suite and TCP transport.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Self::with_parts(
            config,
            Arc::new(Ed25519Scheme),
            Arc::new(TcpConnector::default()),
        )
    }

    /// Construct with an injected signature scheme and transport. There is
    /// no global crypto state; everything flows from these two handles.
    pub fn with_parts(
        config: ClientConfig,
        scheme: Arc<dyn SignatureScheme>,
        connector: Arc<dyn PeerConnector>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let keys = IdentityKeys::derive(scheme.as_ref(), &config.seed, config.index)?;
        info!("client identity {}", keys.identity());
        Ok(Self {
            config,
            scheme,
            connector,
            keys,
            clock: Arc::new(MonotonicClock::new()),
            emitter: EventEmitter::default(),
            launched: None,
        })
    }

    /// The 70-character identity string of this client.
    pub fn identity(&self) -> &str {
        self.keys.identity()
    }

    /// Subscribe to the event stream. Works before `launch`.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.emitter.subscribe()
    }

    /// Locally known balance.
    pub async fn energy(&self) -> Result<u64, ClientError> {
        let launched = self.launched.as_ref().ok_or(ClientError::NotLaunched)?;
        Ok(launched.ledger.lock().await.energy())
    }

    // ════════════════════════════════════════════════════════════════════
    // LAUNCH / TERMINATE
    // ════════════════════════════════════════════════════════════════════

    /// Open the ledger, replay it, start the engine, and begin confirming.
    pub async fn launch(&mut self) -> Result<(), ClientError> {
        if self.launched.is_some() {
            return Ok(());
        }

        let store = LmdbStore::open(&self.config.database_path)?;
        let seed_bytes = identity::seed_bytes(&self.config.seed)?;
        let mut ledger = Ledger::new(
            Box::new(store),
            Arc::clone(&self.scheme),
            self.keys.clone(),
            self.config.admin_public_key,
            &seed_bytes,
        );
        ledger.replay(&self.emitter)?;
        self.emitter.energy(ledger.energy());

        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let engine = spawn_engine(
            EngineSettings {
                peers: self.config.peers.clone(),
                connection_timeout: self.config.connection_timeout(),
                reconnect_timeout: self.config.reconnect_timeout(),
                sync_interval: self.config.computer_state_sync_interval(),
                sync_delay: self.config.computer_state_sync_delay(),
                admin_public_key: self.config.admin_public_key,
            },
            Arc::clone(&self.connector),
            Arc::clone(&self.scheme),
            Arc::clone(&self.clock),
            self.emitter.clone(),
            notice_tx,
        );

        // stale unprocessed transfers go back on the wire once per launch
        let now = self.clock.next();
        for (hash, record) in ledger.unprocessed() {
            if record.timestamp + STALE_REBROADCAST_MICROS <= now {
                debug!("re-broadcasting stale transfer {}", hex::encode(hash));
                let frame = encode_frame(RequestKind::BroadcastTransfer, &record.encode());
                let _ = engine.commands.send(EngineCommand::Broadcast(frame));
            }
        }

        let ledger = Arc::new(Mutex::new(ledger));
        let shutdown = Arc::new(Notify::new());
        let confirm_task = spawn_confirm_loop(
            Arc::clone(&ledger),
            notice_rx,
            engine.commands.clone(),
            self.emitter.clone(),
            Arc::clone(&shutdown),
        );

        self.launched = Some(Launched {
            ledger,
            engine,
            confirm_task,
            shutdown,
        });
        Ok(())
    }

    /// Stop the client. With `close_connection` the sockets are torn down
    /// immediately; without it they unwind as the engine drains.
    pub async fn terminate(&mut self, close_connection: bool) {
        let Some(launched) = self.launched.take() else {
            return;
        };
        launched.shutdown.notify_waiters();
        if close_connection {
            launched.engine.shutdown.notify_waiters();
        }
        launched.confirm_task.abort();
        let _ = launched.confirm_task.await;
        drop(launched.engine);
        info!("client terminated");
    }

    // ════════════════════════════════════════════════════════════════════
    // PUBLIC OPERATIONS
    // ════════════════════════════════════════════════════════════════════

    /// Build, persist, and broadcast one transfer. The record is durable
    /// before the first byte leaves a socket.
    pub async fn transfer(
        &self,
        destination: &str,
        energy: u64,
    ) -> Result<TransferRecord, ClientError> {
        let launched = self.launched.as_ref().ok_or(ClientError::NotLaunched)?;

        let record = {
            let mut ledger = launched.ledger.lock().await;
            let record = transfer::build_transfer(
                self.scheme.as_ref(),
                &self.keys,
                &self.clock,
                destination,
                energy,
                ledger.energy(),
            )?;
            ledger.append_transfer(&record)?;
            record
        };

        let hash = record.hash();
        self.emitter.emit(ClientEvent::Transfer {
            hash,
            record: record.clone(),
        });

        let frame = encode_frame(RequestKind::BroadcastTransfer, &record.encode());
        let _ = launched
            .engine
            .commands
            .send(EngineCommand::Broadcast(frame));
        Ok(record)
    }

    /// Manually adjust the locally known balance, for deposits the client
    /// learned about out of band. Sealed into the essence like any mutation.
    pub async fn set_energy(&self, energy: u64) -> Result<(), ClientError> {
        let launched = self.launched.as_ref().ok_or(ClientError::NotLaunched)?;
        launched.ledger.lock().await.set_energy(energy)?;
        self.emitter.energy(energy);
        Ok(())
    }

    /// Verify an exported receipt blob and integrate it into local state.
    pub async fn import_receipt(&self, blob_base64: &str) -> Result<(), ClientError> {
        let launched = self.launched.as_ref().ok_or(ClientError::NotLaunched)?;

        let blob = general_purpose::STANDARD
            .decode(blob_base64)
            .map_err(|_| ClientError::MalformedReceipt("base64"))?;
        let (record, receipt) = transfer::parse_receipt_blob(&blob)?;

        if !record.verify(self.scheme.as_ref()) {
            return Err(ClientError::SignatureVerificationFailed {
                context: "imported transfer",
            });
        }
        if &record.destination != self.keys.public() && &record.source != self.keys.public() {
            return Err(ClientError::IllegalArgument {
                field: "receipt",
                reason: "transfer does not involve this identity".to_string(),
            });
        }

        let certifying = transfer::verify_receipt(
            receipt,
            self.scheme.as_ref(),
            &self.config.admin_public_key,
            &record.hash(),
        )?;
        if certifying < QUORUM_THRESHOLD {
            return Err(ClientError::MalformedReceipt(
                "too few reporters certify a processed supermajority",
            ));
        }

        let energy = {
            let mut ledger = launched.ledger.lock().await;
            ledger.import_processed(&record, receipt)?
        };
        self.emitter.energy(energy);
        Ok(())
    }

    /// Swap the peer behind slot `slot`; only an actual change restarts it.
    pub fn set_peer(&self, slot: usize, address: impl Into<String>) -> Result<(), ClientError> {
        let launched = self.launched.as_ref().ok_or(ClientError::NotLaunched)?;
        let _ = launched.engine.commands.send(EngineCommand::SetPeer {
            slot,
            address: address.into(),
        });
        Ok(())
    }

    /// Subscribe to updates for one environment digest.
    pub async fn add_environment_listener(
        &self,
        digest: [u8; 32],
    ) -> Result<broadcast::Receiver<EnvironmentUpdate>, ClientError> {
        let launched = self.launched.as_ref().ok_or(ClientError::NotLaunched)?;
        let (reply, response) = oneshot::channel();
        launched
            .engine
            .commands
            .send(EngineCommand::Subscribe { digest, reply })
            .map_err(|_| ClientError::NotLaunched)?;
        response.await.map_err(|_| ClientError::NotLaunched)
    }

    /// Drop an environment subscription.
    pub fn remove_environment_listener(&self, digest: [u8; 32]) -> Result<(), ClientError> {
        let launched = self.launched.as_ref().ok_or(ClientError::NotLaunched)?;
        let _ = launched
            .engine
            .commands
            .send(EngineCommand::Unsubscribe { digest });
        Ok(())
    }
}

/// The confirm loop: polls unprocessed transfers when the committee is in
/// agreement and retires them when a poll concludes processed.
fn spawn_confirm_loop(
    ledger: Arc<Mutex<Ledger>>,
    mut notices: mpsc::UnboundedReceiver<EngineNotice>,
    commands: mpsc::UnboundedSender<EngineCommand>,
    emitter: EventEmitter,
    shutdown: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_polled: HashMap<[u8; 32], Instant> = HashMap::new();
        loop {
            let notice = tokio::select! {
                _ = shutdown.notified() => break,
                notice = notices.recv() => match notice {
                    Some(notice) => notice,
                    None => break,
                },
            };

            match notice {
                EngineNotice::StateAdopted { .. } => {
                    let unprocessed = ledger.lock().await.unprocessed();
                    for (hash, _) in unprocessed {
                        let due = last_polled
                            .get(&hash)
                            .map(|at| at.elapsed() >= MIN_REPOLL_INTERVAL)
                            .unwrap_or(true);
                        if due {
                            last_polled.insert(hash, Instant::now());
                            let _ = commands.send(EngineCommand::PollStatus { hash });
                        }
                    }
                }
                EngineNotice::TransferConcluded {
                    hash,
                    status,
                    receipt,
                    ..
                } => {
                    if status != VoteStatus::Processed {
                        debug!(
                            "transfer {} concluded {:?}; awaiting re-poll",
                            hex::encode(hash),
                            status
                        );
                        continue;
                    }
                    let Some(receipt) = receipt else {
                        continue;
                    };

                    let mut ledger = ledger.lock().await;
                    let Some(record) = ledger
                        .record(&hash)
                        .filter(|r| !r.is_processed())
                        .map(|r| r.record.clone())
                    else {
                        continue;
                    };

                    match ledger.finalize_transfer(&hash, &receipt) {
                        Ok(energy) => {
                            drop(ledger);
                            emitter.energy(energy);
                            let blob = transfer::encode_receipt_blob(&record, &receipt);
                            emitter.emit(ClientEvent::Receipt {
                                hash,
                                receipt,
                                receipt_base64: general_purpose::STANDARD.encode(blob),
                            });
                        }
                        Err(e) => {
                            warn!("processed rewrite failed for {}: {}", hex::encode(hash), e);
                            emitter.error(format!("receipt persistence failed: {}", e));
                        }
                    }
                }
            }
        }
        debug!("confirm loop stopped");
    })
}
