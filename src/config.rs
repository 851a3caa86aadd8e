use std::time::Duration;

use crate::election::PeerId;

/// Connection parameters for an external pub/sub broker.
///
/// Owned entirely by whatever collaborator sets up the transport; the core
/// only carries these through.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// Credential passed to the broker on connect, if it requires one.
    pub auth: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            auth: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Identity and election sort key.
    pub peer_id: PeerId,
    /// Base roll-call interval. The scheduler announces at this rate,
    /// everyone else at half that rate.
    pub roll_call_frequency: Duration,
    /// How long an election window stays open collecting membership.
    pub election_window: Duration,
    /// How long an aggregation round waits for note replies.
    pub aggregation_window: Duration,
    pub broker: BrokerConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            peer_id: clock_peer_id(),
            roll_call_frequency: Duration::from_millis(10_000),
            election_window: Duration::from_millis(3_000),
            aggregation_window: Duration::from_millis(200),
            broker: BrokerConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            ..Default::default()
        }
    }

    pub fn with_roll_call_frequency(mut self, frequency: Duration) -> Self {
        self.roll_call_frequency = frequency;
        self
    }

    pub fn with_election_window(mut self, window: Duration) -> Self {
        self.election_window = window;
        self
    }

    pub fn with_aggregation_window(mut self, window: Duration) -> Self {
        self.aggregation_window = window;
        self
    }

    pub fn with_broker(mut self, broker: BrokerConfig) -> Self {
        self.broker = broker;
        self
    }
}

/// Derive a peer id from the current clock reading (milliseconds since the
/// Unix epoch). Peers started in the same instant can collide; the election
/// tie-break has no secondary key, so such peers race undefined.
pub fn clock_peer_id() -> PeerId {
    chrono::Utc::now().timestamp_millis() as PeerId
}
