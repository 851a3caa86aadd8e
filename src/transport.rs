//! Transport boundary for the pub/sub broker.
//!
//! The core never manages broker connections itself; it talks to whatever
//! implements [`Transport`]. [`InProcessBroker`] is the bundled
//! implementation, a process-local fan-out bus used by the CLI's local
//! cluster mode and the integration tests.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::error::Result;

/// The four protocol channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Marco,
    Polo,
    Share,
    Notes,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Marco => "marco",
            Channel::Polo => "polo",
            Channel::Share => "share",
            Channel::Notes => "notes",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "marco" => Some(Channel::Marco),
            "polo" => Some(Channel::Polo),
            "share" => Some(Channel::Share),
            "notes" => Some(Channel::Notes),
            _ => None,
        }
    }

    pub const ALL: [Channel; 4] = [Channel::Marco, Channel::Polo, Channel::Share, Channel::Notes];
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw inbound message: the channel it arrived on and the undecoded
/// `"<senderId>:<payload>"` text.
#[derive(Debug, Clone)]
pub struct Frame {
    pub channel: Channel,
    pub raw: String,
}

/// Publish/subscribe broker contract.
///
/// Delivery is broadcast: every subscriber receives every message, including
/// the publisher's own (peers filter self-messages at dispatch). Publish
/// failures and a closed subscription stream are fatal to the peer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Broadcast a message on a channel.
    async fn publish(&self, channel: Channel, message: &str) -> Result<()>;

    /// Subscribe to all four protocol channels.
    async fn subscribe(&self) -> Result<mpsc::Receiver<Frame>>;
}

const BUS_CAPACITY: usize = 1024;

/// Process-local broker backed by a broadcast channel.
#[derive(Debug)]
pub struct InProcessBroker {
    bus: broadcast::Sender<Frame>,
}

impl InProcessBroker {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self { bus }
    }
}

impl Default for InProcessBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InProcessBroker {
    async fn publish(&self, channel: Channel, message: &str) -> Result<()> {
        let frame = Frame {
            channel,
            raw: message.to_string(),
        };
        // No subscribers is not an error; the message is simply lost.
        let _ = self.bus.send(frame);
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<Frame>> {
        let mut bus_rx = self.bus.subscribe();
        let (tx, rx) = mpsc::channel(BUS_CAPACITY);

        // Bridge the broadcast bus onto a per-subscriber stream, so a slow
        // subscriber sees a closed stream rather than corrupting others.
        tokio::spawn(async move {
            loop {
                match bus_rx.recv().await {
                    Ok(frame) => {
                        if tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }
}
