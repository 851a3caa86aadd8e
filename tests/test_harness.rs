//! Test harness for multi-peer cluster integration tests.
//!
//! Spawns real peer nodes on a shared in-process broker, plus scripted
//! participants that publish raw wire frames at chosen moments.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use rollcall::codec;
use rollcall::config::NodeConfig;
use rollcall::election::{PeerId, Role, RoleChange};
use rollcall::node::{spawn_peer, PeerHandle};
use rollcall::transport::{Channel, Frame, InProcessBroker, Transport};

/// A running peer under test.
pub struct TestPeer {
    pub handle: PeerHandle,
    pub role_changes: broadcast::Receiver<RoleChange>,
    token: CancellationToken,
}

impl TestPeer {
    /// Drain every role-change notification received so far.
    pub fn drain_role_changes(&mut self) -> Vec<RoleChange> {
        let mut changes = Vec::new();
        while let Ok(change) = self.role_changes.try_recv() {
            changes.push(change);
        }
        changes
    }
}

/// Cluster of peers sharing one in-process broker.
pub struct TestCluster {
    pub broker: Arc<InProcessBroker>,
    pub peers: HashMap<PeerId, TestPeer>,
}

impl TestCluster {
    /// Start a cluster with the given peer ids, using the protocol's default
    /// windows (tests run under paused time, so real windows cost nothing).
    pub async fn new(ids: &[PeerId]) -> Self {
        let broker = Arc::new(InProcessBroker::new());
        let mut cluster = Self {
            broker,
            peers: HashMap::new(),
        };
        for &id in ids {
            cluster.add_peer(id);
        }
        cluster
    }

    /// Start an additional peer mid-test.
    pub fn add_peer(&mut self, id: PeerId) {
        let token = CancellationToken::new();
        let transport: Arc<dyn Transport> = self.broker.clone();
        let (handle, role_changes) = spawn_peer(NodeConfig::new(id), transport, token.clone());
        self.peers.insert(
            id,
            TestPeer {
                handle,
                role_changes,
                token,
            },
        );
    }

    /// Stop a peer (simulates a crash; remaining peers only notice through
    /// the missing roll-call answers).
    pub fn stop(&mut self, id: PeerId) -> bool {
        match self.peers.remove(&id) {
            Some(peer) => {
                peer.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn handle(&self, id: PeerId) -> &PeerHandle {
        &self.peers.get(&id).expect("unknown peer").handle
    }

    pub fn peer_mut(&mut self, id: PeerId) -> &mut TestPeer {
        self.peers.get_mut(&id).expect("unknown peer")
    }

    pub fn role_of(&self, id: PeerId) -> Role {
        self.handle(id).current_role()
    }

    pub fn scheduler_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, peer)| peer.handle.current_role() == Role::Scheduler)
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Publish a raw wire frame, playing the part of an external peer.
    pub async fn publish_raw(&self, channel: Channel, raw: &str) {
        self.broker
            .publish(channel, raw)
            .await
            .expect("broker publish failed");
    }

    /// Publish a properly encoded frame from a scripted sender.
    pub async fn publish_from(&self, sender: PeerId, channel: Channel, payload: &str) {
        self.publish_raw(channel, &codec::encode(sender, payload))
            .await;
    }

    /// Observe every frame crossing the broker.
    pub async fn subscribe_raw(&self) -> mpsc::Receiver<Frame> {
        self.broker.subscribe().await.expect("broker subscribe failed")
    }

    /// Spawn a scripted participant that answers every foreign `marco` with
    /// a `polo`, keeping itself in everyone's membership without running a
    /// full peer.
    pub async fn spawn_beacon_responder(&self, id: PeerId) {
        let mut frames = self.subscribe_raw().await;
        let broker = self.broker.clone();
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                if frame.channel != Channel::Marco {
                    continue;
                }
                let Ok(envelope) = codec::decode(&frame.raw) else {
                    continue;
                };
                if envelope.sender == id {
                    continue;
                }
                let _ = broker
                    .publish(Channel::Polo, &codec::encode(id, "no message"))
                    .await;
            }
        });
    }
}

/// Wait for a condition to become true with timeout.
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true.
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(50)).await;
    assert!(result, "{}", message);
}

/// Collect frames on a channel for a bounded window of (simulated) time.
pub async fn collect_frames(
    frames: &mut mpsc::Receiver<Frame>,
    channel: Channel,
    window: Duration,
) -> Vec<Frame> {
    let mut collected = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    loop {
        tokio::select! {
            frame = frames.recv() => {
                match frame {
                    Some(frame) if frame.channel == channel => collected.push(frame),
                    Some(_) => {}
                    None => break,
                }
            }
            _ = tokio::time::sleep_until(deadline) => break,
        }
    }
    collected
}
