//! # Quorum Engine
//!
//! Actor task yang memiliki tiga peer socket dan semua state putaran:
//! computer-state rounds, transfer-status polls, peer rotation, dan
//! environment subscriptions. Satu mutator per field — seluruh state hanya
//! disentuh dari loop actor ini.
//!
//! ## Request/Reply Matching
//!
//! Setiap request membawa timestamp unik dari [`MonotonicClock`]; response
//! di-match lewat timestamp yang di-echo. Agreement ditentukan murni oleh
//! byte-equality atas slice signature (lihat [`crate::agreement`]).
//!
//! ## Peer Rotation
//!
//! Kind-1 exchange dikirim pada setiap socket yang baru terbuka; alamat
//! IPv4 dari response masuk antrian `public_peers`. Socket yang close
//! di-swap ke antrian berikutnya; antrian kosong memicu refill request.

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use arus_common::constants::{NUMBER_OF_COMPUTORS, NUMBER_OF_CONNECTIONS, PUBLIC_KEY_LENGTH};
use arus_common::crypto::{xof_array, SignatureScheme};
use arus_common::timestamp::MonotonicClock;
use arus_proto::framing::{
    encode_frame, encode_sub_request, parse_frame, parse_sub_frame, RequestKind, SubFrame, SubKind,
};
use arus_proto::records::StatusSlab;
use arus_proto::votes::VoteStatus;

use crate::computer_state::{verify_snapshot, AdoptedState, StateRound};
use crate::events::{ClientEvent, EnvironmentUpdate, EventEmitter, InfoSnapshot};
use crate::socket::{spawn_socket, SocketEvent, SocketSettings};
use crate::transfer_status::StatusPoll;
use crate::transport::PeerConnector;

/// Spacing between consecutive transfer-status requests.
const STATUS_REQUEST_SPACING: Duration = Duration::from_millis(100);

/// Bound on the rotating gossip queue.
const PUBLIC_PEER_QUEUE_LIMIT: usize = 64;

/// Per-environment dedup window.
const ENVIRONMENT_LRU_LIMIT: usize = 64;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub peers: Vec<String>,
    pub connection_timeout: Duration,
    pub reconnect_timeout: Duration,
    pub sync_interval: Duration,
    pub sync_delay: Duration,
    pub admin_public_key: [u8; PUBLIC_KEY_LENGTH],
}

/// Commands accepted by the engine actor.
pub enum EngineCommand {
    /// Fan a pre-framed request out to every slot.
    Broadcast(Vec<u8>),
    /// Start (or restart) status polling for a transfer hash.
    PollStatus { hash: [u8; 32] },
    /// Swap the peer behind one slot; a no-op when unchanged.
    SetPeer { slot: usize, address: String },
    /// Register an environment listener.
    Subscribe {
        digest: [u8; 32],
        reply: oneshot::Sender<broadcast::Receiver<EnvironmentUpdate>>,
    },
    /// Drop an environment subscription.
    Unsubscribe { digest: [u8; 32] },
}

/// What the engine reports back to the client pipeline.
#[derive(Debug, Clone)]
pub enum EngineNotice {
    /// A snapshot reached agreement (status ≥ 2) and was adopted.
    StateAdopted { epoch: u16, tick: u32, status: usize },
    /// A status poll crossed the 451 threshold.
    TransferConcluded {
        hash: [u8; 32],
        status: VoteStatus,
        receipt: Option<Vec<u8>>,
        epoch: u16,
        tick: u32,
    },
}

pub struct EngineHandle {
    pub commands: mpsc::UnboundedSender<EngineCommand>,
    pub shutdown: Arc<Notify>,
    pub task: JoinHandle<()>,
}

struct Slot {
    addr_tx: watch::Sender<String>,
    out_tx: mpsc::UnboundedSender<Vec<u8>>,
    open: bool,
    peer: String,
}

struct EnvChannel {
    tx: broadcast::Sender<EnvironmentUpdate>,
    recent: VecDeque<[u8; 32]>,
}

struct Engine {
    settings: EngineSettings,
    scheme: Arc<dyn SignatureScheme>,
    clock: Arc<MonotonicClock>,
    emitter: EventEmitter,
    notices: mpsc::UnboundedSender<EngineNotice>,
    slots: Vec<Slot>,
    public_peers: VecDeque<String>,
    round: Option<StateRound>,
    adopted: Option<AdoptedState>,
    last_agreement: Instant,
    polls: HashMap<[u8; 32], StatusPoll>,
    environments: HashMap<[u8; 32], EnvChannel>,
}

/// Spawn the engine actor plus its three socket tasks.
pub fn spawn_engine(
    settings: EngineSettings,
    connector: Arc<dyn PeerConnector>,
    scheme: Arc<dyn SignatureScheme>,
    clock: Arc<MonotonicClock>,
    emitter: EventEmitter,
    notices: mpsc::UnboundedSender<EngineNotice>,
) -> EngineHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (sock_tx, sock_rx) = mpsc::unbounded_channel();
    let shutdown = Arc::new(Notify::new());

    let mut slots = Vec::with_capacity(NUMBER_OF_CONNECTIONS);
    for (index, peer) in settings.peers.iter().enumerate() {
        let (addr_tx, addr_rx) = watch::channel(peer.clone());
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        spawn_socket(
            SocketSettings {
                slot: index,
                connection_timeout: settings.connection_timeout,
                reconnect_timeout: settings.reconnect_timeout,
            },
            Arc::clone(&connector),
            addr_rx,
            out_rx,
            sock_tx.clone(),
            Arc::clone(&shutdown),
        );
        slots.push(Slot {
            addr_tx,
            out_tx,
            open: false,
            peer: peer.clone(),
        });
    }

    let engine = Engine {
        settings,
        scheme,
        clock,
        emitter,
        notices,
        slots,
        public_peers: VecDeque::new(),
        round: None,
        adopted: None,
        last_agreement: Instant::now(),
        polls: HashMap::new(),
        environments: HashMap::new(),
    };

    let task = tokio::spawn(engine.run(cmd_rx, sock_rx, Arc::clone(&shutdown)));

    EngineHandle {
        commands: cmd_tx,
        shutdown,
        task,
    }
}

impl Engine {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<EngineCommand>,
        mut sock_rx: mpsc::UnboundedReceiver<SocketEvent>,
        shutdown: Arc<Notify>,
    ) {
        let mut sync_timer = interval(self.settings.sync_interval);
        sync_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pace_timer = interval(STATUS_REQUEST_SPACING);
        pace_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "quorum engine started with peers {:?}",
            self.settings.peers
        );

        loop {
            tokio::select! {
                _ = shutdown.notified() => break,

                command = cmd_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },

                event = sock_rx.recv() => match event {
                    Some(event) => self.handle_socket_event(event),
                    None => break,
                },

                _ = sync_timer.tick() => self.start_state_round(),

                _ = pace_timer.tick() => self.pace_status_polls(),
            }
        }

        debug!("quorum engine stopped");
    }

    // ════════════════════════════════════════════════════════════════════
    // COMMANDS
    // ════════════════════════════════════════════════════════════════════

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Broadcast(bytes) => {
                // transfers may queue on a closed slot; the queue flushes
                // once the socket reconnects
                for slot in &self.slots {
                    let _ = slot.out_tx.send(bytes.clone());
                }
            }
            EngineCommand::PollStatus { hash } => {
                let stale = self
                    .polls
                    .get(&hash)
                    .map(|poll| poll.concluded)
                    .unwrap_or(true);
                if stale {
                    let timestamp = self.clock.next();
                    debug!("status poll started for {}", hex::encode(hash));
                    self.polls.insert(hash, StatusPoll::new(hash, timestamp));
                }
            }
            EngineCommand::SetPeer { slot, address } => {
                let Some(entry) = self.slots.get_mut(slot) else {
                    warn!("set_peer: slot {} out of range", slot);
                    return;
                };
                let changed = *entry.addr_tx.borrow() != address;
                if changed {
                    info!("slot {} retargeted to {}", slot, address);
                    let _ = entry.addr_tx.send(address);
                }
            }
            EngineCommand::Subscribe { digest, reply } => {
                let channel = self.environments.entry(digest).or_insert_with(|| {
                    let (tx, _) = broadcast::channel(ENVIRONMENT_LRU_LIMIT);
                    EnvChannel {
                        tx,
                        recent: VecDeque::new(),
                    }
                });
                let receiver = channel.tx.subscribe();
                let _ = reply.send(receiver);

                let request =
                    encode_sub_request(SubKind::Environment, self.clock.next(), &digest);
                for slot in self.slots.iter().filter(|s| s.open) {
                    let _ = slot.out_tx.send(request.clone());
                }
            }
            EngineCommand::Unsubscribe { digest } => {
                self.environments.remove(&digest);
            }
        }
    }

    // ════════════════════════════════════════════════════════════════════
    // SOCKET EVENTS
    // ════════════════════════════════════════════════════════════════════

    fn handle_socket_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Opened { slot, peer } => {
                if let Some(entry) = self.slots.get_mut(slot) {
                    entry.open = true;
                    entry.peer = peer.clone();
                }
                self.emitter.open(slot, &peer);
                self.on_socket_opened(slot);
            }
            SocketEvent::Closed { slot, peer } => {
                if let Some(entry) = self.slots.get_mut(slot) {
                    entry.open = false;
                }
                self.emitter.close(slot, &peer);
                self.rotate_peer(slot);
            }
            SocketEvent::Frame { slot, bytes } => self.handle_frame(slot, &bytes),
        }
    }

    /// A fresh socket replays outstanding work: peer exchange first, then
    /// environment subscriptions, then every already-sent status slice.
    fn on_socket_opened(&mut self, slot: usize) {
        let Some(entry) = self.slots.get(slot) else {
            return;
        };

        let exchange = encode_frame(RequestKind::ExchangePeers, &[]);
        let _ = entry.out_tx.send(exchange);

        for digest in self.environments.keys() {
            let request = encode_sub_request(SubKind::Environment, self.clock.next(), digest);
            let _ = entry.out_tx.send(request);
        }

        for poll in self.polls.values().filter(|p| !p.concluded) {
            for request in poll.sent_requests() {
                let _ = entry.out_tx.send(request.clone());
            }
        }
    }

    /// Swap a closed slot to the next gossiped peer; ask for a refill when
    /// the queue has run dry.
    fn rotate_peer(&mut self, slot: usize) {
        match self.public_peers.pop_front() {
            Some(next) => {
                if let Some(entry) = self.slots.get_mut(slot) {
                    if *entry.addr_tx.borrow() != next {
                        info!("slot {} rotating to gossiped peer {}", slot, next);
                        let _ = entry.addr_tx.send(next);
                    }
                }
            }
            None => {
                let exchange = encode_frame(RequestKind::ExchangePeers, &[]);
                if let Some(open) = self.slots.iter().find(|s| s.open) {
                    let _ = open.out_tx.send(exchange);
                }
            }
        }
    }

    fn handle_frame(&mut self, slot: usize, bytes: &[u8]) {
        // already validated by the socket task; a failure here is a logic bug
        let Ok((frame, _)) = parse_frame(bytes) else {
            return;
        };
        match frame.kind {
            RequestKind::ExchangePeers => self.handle_peer_exchange(frame.payload),
            RequestKind::SubTyped => match parse_sub_frame(frame.payload) {
                Ok(sub) => self.handle_sub_frame(slot, sub),
                Err(e) => debug!("slot {} sub-frame rejected: {}", slot, e),
            },
            // peers do not route transfers back at us; ignore
            RequestKind::BroadcastTransfer => {}
        }
    }

    fn handle_sub_frame(&mut self, slot: usize, sub: SubFrame<'_>) {
        match sub.sub {
            SubKind::ComputerState => self.handle_state_response(slot, &sub),
            SubKind::TransferStatus => self.handle_status_response(slot, &sub),
            SubKind::Environment => self.handle_environment_response(&sub),
        }
    }

    /// Up to four packed IPv4 addresses per exchange reply.
    fn handle_peer_exchange(&mut self, payload: &[u8]) {
        for raw in payload.chunks_exact(4).take(4) {
            let address = Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]).to_string();
            let already_connected = self.slots.iter().any(|s| s.peer == address);
            let already_queued = self.public_peers.contains(&address);
            if !already_connected && !already_queued {
                if self.public_peers.len() >= PUBLIC_PEER_QUEUE_LIMIT {
                    self.public_peers.pop_front();
                }
                debug!("gossiped peer queued: {}", address);
                self.public_peers.push_back(address);
            }
        }
    }

    // ════════════════════════════════════════════════════════════════════
    // COMPUTER-STATE ROUNDS
    // ════════════════════════════════════════════════════════════════════

    /// Issue the periodic committee-state request and check for desync.
    fn start_state_round(&mut self) {
        let desync_after = self.settings.sync_interval + self.settings.sync_delay;
        if self.last_agreement.elapsed() > desync_after {
            let (epoch, tick) = self
                .adopted
                .as_ref()
                .map(|s| (s.epoch, s.tick))
                .unwrap_or((0, 0));
            self.emitter.info(
                InfoSnapshot {
                    status: 0,
                    epoch,
                    tick,
                },
                self.peer_addresses(),
            );
            if let Some(round) = &mut self.round {
                round.reset_offset();
            }
        }

        let timestamp = self.clock.next();
        self.round = Some(StateRound::new(timestamp));
        let request = encode_sub_request(SubKind::ComputerState, timestamp, &[]);
        for slot in self.slots.iter().filter(|s| s.open) {
            let _ = slot.out_tx.send(request.clone());
        }
    }

    fn handle_state_response(&mut self, slot: usize, sub: &SubFrame<'_>) {
        let Some(round) = &mut self.round else {
            return;
        };
        if round.timestamp != sub.timestamp {
            return;
        }

        let Some(record) =
            verify_snapshot(sub.body, self.scheme.as_ref(), &self.settings.admin_public_key)
        else {
            warn!("slot {} sent an unverifiable snapshot", slot);
            return;
        };

        let rose = round.accept(slot, record, sub.body.to_vec());
        if let Some(status) = rose {
            let Some((anchor, raw)) = round.anchor_record().map(|(r, b)| (r.clone(), b.clone()))
            else {
                return;
            };
            self.emitter.info(
                InfoSnapshot {
                    status,
                    epoch: anchor.epoch,
                    tick: anchor.tick,
                },
                self.peer_addresses(),
            );

            if status >= 2 {
                self.last_agreement = Instant::now();
                self.adopted = Some(AdoptedState::from_record(&anchor, &raw));
                let _ = self.notices.send(EngineNotice::StateAdopted {
                    epoch: anchor.epoch,
                    tick: anchor.tick,
                    status,
                });
            }
        }

        // expire the round once every slot has answered
        let complete = self.round.as_ref().map(|r| r.complete()).unwrap_or(false);
        if complete {
            if let Some(round) = self.round.take() {
                if round.is_disagreement() {
                    warn!(
                        "state round {} ended without a matching pair",
                        round.timestamp
                    );
                    self.emitter.error(format!(
                        "no agreement among {} computer-state responses",
                        round.responses()
                    ));
                }
            }
        }
    }

    // ════════════════════════════════════════════════════════════════════
    // TRANSFER-STATUS POLLS
    // ════════════════════════════════════════════════════════════════════

    /// Advance every active poll by one request per pacing tick.
    fn pace_status_polls(&mut self) {
        let open_slots: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.open)
            .map(|(i, _)| i)
            .collect();
        if open_slots.is_empty() {
            return;
        }
        for poll in self.polls.values_mut() {
            if let Some(request) = poll.next_request() {
                for &slot in &open_slots {
                    let _ = self.slots[slot].out_tx.send(request.clone());
                }
            }
        }
    }

    fn handle_status_response(&mut self, slot: usize, sub: &SubFrame<'_>) {
        let Some(state) = self.adopted.clone() else {
            return;
        };

        let Some(poll) = self
            .polls
            .values_mut()
            .find(|p| p.request_timestamp == sub.timestamp && !p.concluded)
        else {
            return;
        };

        let Ok(slab) = StatusSlab::parse(sub.body) else {
            debug!("slot {} sent a malformed status slab", slot);
            return;
        };

        if slab.transfer_hash != poll.hash {
            return;
        }
        // a status from the future is inconsistent with the adopted snapshot
        if slab.epoch != state.epoch || slab.tick > state.tick {
            debug!(
                "slot {} slab outside window: epoch {} tick {}",
                slot, slab.epoch, slab.tick
            );
            return;
        }
        let reporter = slab.computor_index as usize;
        if reporter >= NUMBER_OF_COMPUTORS {
            return;
        }
        if !StatusSlab::verify(
            sub.body,
            self.scheme.as_ref(),
            &state.computor_public_keys[reporter],
        ) {
            warn!("slot {} slab failed reporter {} signature", slot, reporter);
            return;
        }

        if !poll.accept_slab(slot, &slab, sub.body.to_vec()) {
            return;
        }

        let counts = poll.counts();
        let notice = ClientEvent::TransferStatus(crate::events::TransferStatusNotice {
            hash: poll.hash,
            unseen: counts.unseen,
            seen: counts.seen,
            processed: counts.processed,
            epoch: state.epoch,
            tick: state.tick,
        });
        self.emitter.emit(notice);

        if let Some(decided) = counts.decided() {
            poll.concluded = true;
            let receipt = match decided {
                VoteStatus::Processed => Some(poll.assemble_receipt(&state.raw)),
                _ => None,
            };
            info!(
                "transfer {} concluded {:?} with {} processed",
                hex::encode(poll.hash),
                decided,
                counts.processed
            );
            let _ = self.notices.send(EngineNotice::TransferConcluded {
                hash: poll.hash,
                status: decided,
                receipt,
                epoch: state.epoch,
                tick: state.tick,
            });
        }
    }

    // ════════════════════════════════════════════════════════════════════
    // ENVIRONMENTS
    // ════════════════════════════════════════════════════════════════════

    fn handle_environment_response(&mut self, sub: &SubFrame<'_>) {
        if sub.body.len() < 32 {
            return;
        }
        let digest: [u8; 32] = sub.body[..32].try_into().expect("slice length");
        let payload = sub.body[32..].to_vec();

        let Some(channel) = self.environments.get_mut(&digest) else {
            return;
        };

        // dedup repeated deliveries from the three sockets, capped by LRU
        let fingerprint = xof_array::<32>(&payload);
        if channel.recent.contains(&fingerprint) {
            return;
        }
        if channel.recent.len() >= ENVIRONMENT_LRU_LIMIT {
            channel.recent.pop_front();
        }
        channel.recent.push_back(fingerprint);

        let update = EnvironmentUpdate { digest, payload };
        self.emitter.emit(ClientEvent::Environment(update.clone()));
        let _ = channel.tx.send(update);
    }

    fn peer_addresses(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|s| s.addr_tx.borrow().clone())
            .collect()
    }
}
