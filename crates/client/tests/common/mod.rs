//! Shared scaffolding for the integration tests: a deterministic mock
//! committee and an in-memory peer network behind the transport seam.

use std::collections::HashMap;
use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use arus_client::transport::{PeerConnector, PeerStream};
use arus_client::{ClientConfig, ClientEvent};
use arus_common::constants::NUMBER_OF_COMPUTORS;
use arus_common::crypto::{generate_keypair_bytes, xof_array, Ed25519Scheme, SignatureScheme};
use arus_proto::framing::{
    encode_frame, encode_sub_request, parse_frame, RequestKind, SubKind, HEADER_LENGTH,
    MAX_FRAME_LENGTH, SUB_HEADER_LENGTH,
};
use arus_proto::records::{ComputerStateRecord, StatusSlab, STATUS_BITFIELD_LENGTH};
use arus_proto::votes::{set_vote, VoteStatus};

pub const EPOCH: u16 = 7;

/// Deterministic committee: 676 computor keypairs plus the admin pair.
pub struct MockCommittee {
    pub admin_public: [u8; 32],
    admin_secret: [u8; 32],
    computor_secrets: Vec<[u8; 32]>,
    pub computor_publics: Vec<[u8; 32]>,
    pub tick: AtomicU32,
}

impl MockCommittee {
    pub fn new(initial_tick: u32) -> Self {
        let scheme = Ed25519Scheme;
        let (admin_public, admin_secret) = generate_keypair_bytes();
        let computor_secrets: Vec<[u8; 32]> = (0..NUMBER_OF_COMPUTORS)
            .map(|i| xof_array::<32>(format!("computor {}", i).as_bytes()))
            .collect();
        let computor_publics = computor_secrets
            .iter()
            .map(|secret| scheme.public_key(secret).expect("derive computor key"))
            .collect();
        Self {
            admin_public,
            admin_secret,
            computor_secrets,
            computor_publics,
            tick: AtomicU32::new(initial_tick),
        }
    }

    pub fn current_tick(&self) -> u32 {
        self.tick.load(Ordering::SeqCst)
    }

    pub fn advance_tick(&self) {
        self.tick.fetch_add(1, Ordering::SeqCst);
    }

    /// Admin-signed snapshot at `tick`.
    pub fn snapshot(&self, tick: u32) -> Vec<u8> {
        let scheme = Ed25519Scheme;
        let mut record = ComputerStateRecord {
            computor_index: NUMBER_OF_COMPUTORS as u16,
            epoch: EPOCH,
            tick,
            timestamp: u64::from(tick) * 1_000_000,
            computor_public_keys: self.computor_publics.clone(),
            signature: [0u8; 64],
        };
        let digest = ComputerStateRecord::signed_digest(&record.encode());
        record.signature = scheme
            .sign(&self.admin_secret, &digest)
            .expect("sign snapshot");
        record.encode()
    }

    /// A slab from `reporter` voting every computor processed for `hash`.
    pub fn processed_slab(&self, reporter: u16, hash: [u8; 32], tick: u32) -> Vec<u8> {
        let scheme = Ed25519Scheme;
        let mut bitfield = [0u8; STATUS_BITFIELD_LENGTH];
        for j in 0..NUMBER_OF_COMPUTORS {
            set_vote(&mut bitfield, j, VoteStatus::Processed);
        }
        let mut slab = StatusSlab {
            transfer_hash: hash,
            bitfield,
            computor_index: reporter,
            epoch: EPOCH,
            tick,
            signature: [0u8; 64],
        };
        let digest = StatusSlab::signed_digest(&slab.encode());
        slab.signature = scheme
            .sign(&self.computor_secrets[reporter as usize], &digest)
            .expect("sign slab");
        slab.encode()
    }
}

/// How one mock peer answers.
#[derive(Clone)]
pub struct PeerBehavior {
    /// Snapshot tick = committee tick minus this lag.
    pub tick_lag: u32,
    /// Reporter slabs dumped on the first status request of a timestamp.
    pub status_responders: u16,
    /// Addresses returned on a kind-1 exchange.
    pub gossip: Vec<Ipv4Addr>,
    /// Hang up after serving this many frames.
    pub hangup_after_frames: Option<u32>,
    /// Payloads pushed back for every environment subscription request.
    pub environment_payloads: Vec<Vec<u8>>,
}

impl Default for PeerBehavior {
    fn default() -> Self {
        Self {
            tick_lag: 0,
            status_responders: 0,
            gossip: Vec::new(),
            hangup_after_frames: None,
            environment_payloads: Vec::new(),
        }
    }
}

/// In-memory network: every connect spawns a serving task over a duplex
/// pipe, with behavior looked up by the dialed address.
pub struct MockNet {
    committee: Arc<MockCommittee>,
    behaviors: Mutex<HashMap<String, PeerBehavior>>,
    pub connects: Mutex<Vec<String>>,
    pub broadcasts: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockNet {
    pub fn new(committee: Arc<MockCommittee>) -> Self {
        Self {
            committee,
            behaviors: Mutex::new(HashMap::new()),
            connects: Mutex::new(Vec::new()),
            broadcasts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_behavior(&self, address: &str, behavior: PeerBehavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(address.to_string(), behavior);
    }

    pub fn connect_log(&self) -> Vec<String> {
        self.connects.lock().unwrap().clone()
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.lock().unwrap().len()
    }
}

#[async_trait]
impl PeerConnector for MockNet {
    async fn connect(&self, address: &str) -> io::Result<Box<dyn PeerStream>> {
        self.connects.lock().unwrap().push(address.to_string());
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or_default();
        let (client_half, server_half) = tokio::io::duplex(MAX_FRAME_LENGTH * 2);
        tokio::spawn(serve_peer(
            server_half,
            Arc::clone(&self.committee),
            behavior,
            Arc::clone(&self.broadcasts),
        ));
        Ok(Box::new(client_half))
    }
}

async fn serve_peer(
    stream: DuplexStream,
    committee: Arc<MockCommittee>,
    behavior: PeerBehavior,
    broadcasts: Arc<Mutex<Vec<Vec<u8>>>>,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut inbound: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; 16 * 1024];
    let mut answered_status_timestamps: Vec<u64> = Vec::new();
    let mut served_frames = 0u32;

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        inbound.extend_from_slice(&chunk[..n]);

        while inbound.len() >= HEADER_LENGTH {
            let size =
                u32::from_le_bytes([inbound[0], inbound[1], inbound[2], inbound[3]]) as usize;
            if inbound.len() < size {
                break;
            }
            if let Some(limit) = behavior.hangup_after_frames {
                if served_frames >= limit {
                    return;
                }
            }
            served_frames += 1;
            let frame_bytes: Vec<u8> = inbound.drain(..size).collect();
            let Ok((frame, _)) = parse_frame(&frame_bytes) else {
                return;
            };

            match frame.kind {
                RequestKind::SubTyped => {
                    if frame.payload.len() < SUB_HEADER_LENGTH {
                        continue;
                    }
                    let sub = frame.payload[0];
                    let timestamp = u64::from_le_bytes(
                        frame.payload[8..16].try_into().expect("sub header"),
                    );
                    let body = &frame.payload[SUB_HEADER_LENGTH..];

                    if sub == SubKind::ComputerState as u8 {
                        let tick = committee
                            .current_tick()
                            .saturating_sub(behavior.tick_lag);
                        let snapshot = committee.snapshot(tick);
                        let response = encode_sub_request(
                            SubKind::ComputerState,
                            timestamp,
                            &snapshot,
                        );
                        if writer.write_all(&response).await.is_err() {
                            return;
                        }
                    } else if sub == SubKind::TransferStatus as u8 {
                        if body.len() < 34 || behavior.status_responders == 0 {
                            continue;
                        }
                        if answered_status_timestamps.contains(&timestamp) {
                            continue;
                        }
                        answered_status_timestamps.push(timestamp);

                        let hash: [u8; 32] = body[..32].try_into().expect("hash");
                        let tick = committee
                            .current_tick()
                            .saturating_sub(behavior.tick_lag);
                        for reporter in 0..behavior.status_responders {
                            let slab = committee.processed_slab(reporter, hash, tick);
                            let response =
                                encode_sub_request(SubKind::TransferStatus, timestamp, &slab);
                            if writer.write_all(&response).await.is_err() {
                                return;
                            }
                        }
                    } else if sub == SubKind::Environment as u8 {
                        if body.len() < 32 {
                            continue;
                        }
                        for payload in &behavior.environment_payloads {
                            let mut response_body = body[..32].to_vec();
                            response_body.extend_from_slice(payload);
                            let response = encode_sub_request(
                                SubKind::Environment,
                                timestamp,
                                &response_body,
                            );
                            if writer.write_all(&response).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                RequestKind::ExchangePeers => {
                    if !behavior.gossip.is_empty() {
                        let mut payload = Vec::with_capacity(behavior.gossip.len() * 4);
                        for address in &behavior.gossip {
                            payload.extend_from_slice(&address.octets());
                        }
                        let response = encode_frame(RequestKind::ExchangePeers, &payload);
                        if writer.write_all(&response).await.is_err() {
                            return;
                        }
                    }
                }
                RequestKind::BroadcastTransfer => {
                    broadcasts.lock().unwrap().push(frame.payload.to_vec());
                }
            }
        }
    }
}

/// Test config with tight timings over three named mock peers.
pub fn test_config(seed: &str, database_path: std::path::PathBuf, admin: [u8; 32]) -> ClientConfig {
    ClientConfig {
        seed: seed.to_string(),
        index: 0,
        peers: vec![
            "peer-0".to_string(),
            "peer-1".to_string(),
            "peer-2".to_string(),
        ],
        admin_public_key: admin,
        connection_timeout_ms: 1_000,
        reconnect_timeout_ms: 20,
        computer_state_sync_interval_ms: 50,
        computer_state_sync_delay_ms: 2_000,
        database_path,
    }
}

/// Receive the next event, skipping lag gaps from bursty emission.
pub async fn next_event(
    rx: &mut tokio::sync::broadcast::Receiver<ClientEvent>,
) -> Option<ClientEvent> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
        }
    }
}
