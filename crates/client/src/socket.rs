//! Per-slot peer socket task.
//!
//! Each of the three slots runs one task owning its connection through the
//! lifecycle: connect (with deadline) → open (read/write loop) → closed →
//! reconnect delay → connect again. The target address arrives over a watch
//! channel; a change while connected closes the socket so the next round
//! dials the new peer. Outbound frames arrive over an mpsc queue, inbound
//! frames are validated, split on the size prefix, and forwarded upstream
//! one complete frame at a time.
//!
//! A wire-level parse error closes the socket; recovery is reconnection,
//! never in-stream resynchronization.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use arus_proto::framing::{parse_frame, HEADER_LENGTH, MAX_FRAME_LENGTH};

use crate::transport::PeerConnector;

const READ_CHUNK: usize = 16 * 1024;

/// What a socket task reports to the engine.
#[derive(Debug)]
pub enum SocketEvent {
    Opened { slot: usize, peer: String },
    Closed { slot: usize, peer: String },
    /// One complete validated frame, header included.
    Frame { slot: usize, bytes: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct SocketSettings {
    pub slot: usize,
    pub connection_timeout: Duration,
    pub reconnect_timeout: Duration,
}

/// Spawn the lifecycle task for one slot.
pub fn spawn_socket(
    settings: SocketSettings,
    connector: Arc<dyn PeerConnector>,
    mut addr_rx: watch::Receiver<String>,
    mut out_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    event_tx: mpsc::UnboundedSender<SocketEvent>,
    shutdown: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let slot = settings.slot;
        loop {
            let peer = addr_rx.borrow_and_update().clone();

            let connected = tokio::select! {
                _ = shutdown.notified() => return,
                result = timeout(settings.connection_timeout, connector.connect(&peer)) => result,
            };

            let stream = match connected {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    debug!("slot {} connect to {} failed: {}", slot, peer, e);
                    if !wait_retry(&settings, &mut addr_rx, &shutdown).await {
                        return;
                    }
                    continue;
                }
                Err(_) => {
                    debug!("slot {} connect to {} timed out", slot, peer);
                    if !wait_retry(&settings, &mut addr_rx, &shutdown).await {
                        return;
                    }
                    continue;
                }
            };

            if event_tx
                .send(SocketEvent::Opened {
                    slot,
                    peer: peer.clone(),
                })
                .is_err()
            {
                return;
            }

            let (mut read_half, mut write_half) = tokio::io::split(stream);
            let mut inbound: Vec<u8> = Vec::with_capacity(READ_CHUNK);
            let mut chunk = vec![0u8; READ_CHUNK];

            'open: loop {
                tokio::select! {
                    _ = shutdown.notified() => return,

                    changed = addr_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        if *addr_rx.borrow() != peer {
                            debug!("slot {} peer swapped away from {}", slot, peer);
                            break 'open;
                        }
                    }

                    outbound = out_rx.recv() => {
                        match outbound {
                            Some(bytes) => {
                                if let Err(e) = write_half.write_all(&bytes).await {
                                    debug!("slot {} write failed: {}", slot, e);
                                    break 'open;
                                }
                            }
                            None => return,
                        }
                    }

                    read = read_half.read(&mut chunk) => {
                        match read {
                            Ok(0) => break 'open,
                            Ok(n) => {
                                inbound.extend_from_slice(&chunk[..n]);
                                if !drain_frames(slot, &mut inbound, &event_tx) {
                                    break 'open;
                                }
                            }
                            Err(e) => {
                                debug!("slot {} read failed: {}", slot, e);
                                break 'open;
                            }
                        }
                    }
                }
            }

            if event_tx
                .send(SocketEvent::Closed {
                    slot,
                    peer: peer.clone(),
                })
                .is_err()
            {
                return;
            }

            if !wait_retry(&settings, &mut addr_rx, &shutdown).await {
                return;
            }
        }
    })
}

/// Sleep through the reconnect delay. Returns false when the task must end.
/// An address change cuts the delay short so the new peer is dialed at once.
async fn wait_retry(
    settings: &SocketSettings,
    addr_rx: &mut watch::Receiver<String>,
    shutdown: &Notify,
) -> bool {
    tokio::select! {
        _ = shutdown.notified() => false,
        changed = addr_rx.changed() => changed.is_ok(),
        _ = sleep(settings.reconnect_timeout) => true,
    }
}

/// Pull every complete frame out of the buffer. Returns false on a wire
/// error, which closes the socket.
fn drain_frames(
    slot: usize,
    inbound: &mut Vec<u8>,
    event_tx: &mpsc::UnboundedSender<SocketEvent>,
) -> bool {
    loop {
        if inbound.len() < HEADER_LENGTH {
            return true;
        }
        let size = u32::from_le_bytes([inbound[0], inbound[1], inbound[2], inbound[3]]) as usize;
        if size < HEADER_LENGTH || size > MAX_FRAME_LENGTH {
            warn!("slot {} sent unframeable size {}", slot, size);
            return false;
        }
        if inbound.len() < size {
            return true;
        }
        if let Err(e) = parse_frame(&inbound[..size]) {
            warn!("slot {} sent a bad frame: {}", slot, e);
            return false;
        }
        let bytes: Vec<u8> = inbound.drain(..size).collect();
        if event_tx.send(SocketEvent::Frame { slot, bytes }).is_err() {
            return false;
        }
    }
}
