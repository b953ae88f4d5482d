//! Computer-state round behavior against mock peers: the Info status
//! ladder, the two-against-one cap, and peer rotation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::timeout;

use arus_client::{Client, ClientEvent};
use arus_common::crypto::Ed25519Scheme;

use common::{next_event, test_config, MockCommittee, MockNet, PeerBehavior, EPOCH};

const SEED: &str = "vmscmtbcqjbqyqcckegsfdsrcgjpeejobolmimgorsqwgupzhkevreu";

/// Build, subscribe, then launch, so no early event is missed.
async fn launched_client(
    net: Arc<MockNet>,
    admin: [u8; 32],
) -> (Client, broadcast::Receiver<ClientEvent>, TempDir) {
    let dir = TempDir::new().unwrap();
    let config = test_config(SEED, dir.path().join("ledger"), admin);
    let mut client = Client::with_parts(config, Arc::new(Ed25519Scheme), net).unwrap();
    let events = client.subscribe();
    client.launch().await.unwrap();
    (client, events, dir)
}

/// Watch Info events for `tick` until one round's ladder reaches `top`.
/// A status-1 event starts a fresh ladder, so partial early rounds (some
/// sockets still connecting) cannot pollute the result.
async fn wait_for_ladder(
    events: &mut broadcast::Receiver<ClientEvent>,
    tick: u32,
    top: usize,
) -> Vec<usize> {
    let mut ladder: Vec<usize> = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(5), next_event(events))
            .await
            .expect("info events in time")
            .expect("event stream open");
        let ClientEvent::Info { computer_state, .. } = event else {
            continue;
        };
        if computer_state.tick != tick {
            continue;
        }
        assert_eq!(computer_state.epoch, EPOCH);
        if computer_state.status == 1 {
            ladder = vec![1];
        } else {
            ladder.push(computer_state.status);
        }
        if ladder.len() == top {
            return ladder;
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_full_agreement_climbs_one_two_three() {
    let committee = Arc::new(MockCommittee::new(100));
    let net = Arc::new(MockNet::new(Arc::clone(&committee)));
    for peer in ["peer-0", "peer-1", "peer-2"] {
        net.set_behavior(peer, PeerBehavior::default());
    }

    let (mut client, mut events, _dir) =
        launched_client(Arc::clone(&net), committee.admin_public).await;

    let ladder = wait_for_ladder(&mut events, 100, 3).await;
    assert_eq!(ladder, vec![1, 2, 3]);

    // a new tick produces a fresh 1, 2, 3 ladder
    committee.advance_tick();
    let ladder = wait_for_ladder(&mut events, 101, 3).await;
    assert_eq!(ladder, vec![1, 2, 3]);

    client.terminate(true).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_one_lagging_peer_caps_status_at_two() {
    let committee = Arc::new(MockCommittee::new(200));
    let net = Arc::new(MockNet::new(Arc::clone(&committee)));
    net.set_behavior("peer-0", PeerBehavior::default());
    net.set_behavior("peer-1", PeerBehavior::default());
    net.set_behavior(
        "peer-2",
        PeerBehavior {
            tick_lag: 1,
            ..PeerBehavior::default()
        },
    );

    let (mut client, mut events, _dir) =
        launched_client(Arc::clone(&net), committee.admin_public).await;

    // watch a dozen Info events: agreement reaches 2, never 3, and the
    // agreed snapshot is always the in-date one
    let mut saw_two = false;
    let mut observed = 0;
    while observed < 12 {
        let event = timeout(Duration::from_secs(5), next_event(&mut events))
            .await
            .expect("info events in time")
            .expect("event stream open");
        if let ClientEvent::Info { computer_state, .. } = event {
            assert!(computer_state.status <= 2, "status 3 must be impossible");
            if computer_state.status == 2 {
                assert_eq!(computer_state.tick, 200);
                saw_two = true;
            }
            observed += 1;
        }
    }
    assert!(saw_two);

    client.terminate(true).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_closed_peer_rotates_to_gossiped_address() {
    let committee = Arc::new(MockCommittee::new(300));
    let net = Arc::new(MockNet::new(Arc::clone(&committee)));
    // peer-0 gossips a public peer, then hangs up shortly after
    net.set_behavior(
        "peer-0",
        PeerBehavior {
            gossip: vec!["9.9.9.9".parse().unwrap()],
            hangup_after_frames: Some(3),
            ..PeerBehavior::default()
        },
    );
    net.set_behavior("peer-1", PeerBehavior::default());
    net.set_behavior("peer-2", PeerBehavior::default());

    let (mut client, _events, _dir) =
        launched_client(Arc::clone(&net), committee.admin_public).await;

    // the dropped slot must come back on the gossiped address
    let rotated = timeout(Duration::from_secs(5), async {
        loop {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if net.connect_log().iter().any(|a| a == "9.9.9.9") {
                return true;
            }
        }
    })
    .await
    .unwrap_or(false);
    assert!(rotated, "closed slot must rotate to the gossiped peer");

    client.terminate(true).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_environment_subscription_passthrough() {
    let committee = Arc::new(MockCommittee::new(350));
    let net = Arc::new(MockNet::new(Arc::clone(&committee)));
    net.set_behavior(
        "peer-0",
        PeerBehavior {
            environment_payloads: vec![b"tick data".to_vec()],
            ..PeerBehavior::default()
        },
    );
    net.set_behavior("peer-1", PeerBehavior::default());
    net.set_behavior("peer-2", PeerBehavior::default());

    let (mut client, _events, _dir) =
        launched_client(Arc::clone(&net), committee.admin_public).await;

    let digest = [5u8; 32];
    let mut updates = client.add_environment_listener(digest).await.unwrap();

    let update = timeout(Duration::from_secs(5), updates.recv())
        .await
        .expect("environment update in time")
        .expect("environment channel open");
    assert_eq!(update.digest, digest);
    assert_eq!(update.payload, b"tick data".to_vec());

    client.remove_environment_listener(digest).unwrap();
    client.terminate(true).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_set_peer_redials_only_on_change() {
    let committee = Arc::new(MockCommittee::new(400));
    let net = Arc::new(MockNet::new(Arc::clone(&committee)));
    for peer in ["peer-0", "peer-1", "peer-2"] {
        net.set_behavior(peer, PeerBehavior::default());
    }

    let (mut client, mut events, _dir) =
        launched_client(Arc::clone(&net), committee.admin_public).await;

    // wait for all slots to open
    let mut opens = 0;
    while opens < 3 {
        let event = timeout(Duration::from_secs(5), next_event(&mut events))
            .await
            .expect("open events in time")
            .expect("event stream open");
        if matches!(event, ClientEvent::Open { .. }) {
            opens += 1;
        }
    }

    let dials_before = net.connect_log().len();

    // same address: no restart
    client.set_peer(1, "peer-1").unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(net.connect_log().len(), dials_before);

    // new address: slot restarts onto it
    client.set_peer(1, "peer-0").unwrap();
    let redialed = timeout(Duration::from_secs(5), async {
        loop {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let log = net.connect_log();
            if log.len() > dials_before && log.last().map(String::as_str) == Some("peer-0") {
                return true;
            }
        }
    })
    .await
    .unwrap_or(false);
    assert!(redialed, "changed address must restart the slot");

    client.terminate(true).await;
}
