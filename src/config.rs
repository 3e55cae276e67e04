//! Core configuration

use std::time::Duration;

/// Default time a negotiation may sit in flight before it is failed
pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between timeout sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Default capacity of each share's event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 32;

/// Default capacity of the announcement broadcast channel
pub const DEFAULT_ANNOUNCE_CAPACITY: usize = 64;

/// An ICE server endpoint handed to the media engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServer {
    /// A STUN server, no credentials
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Public STUN servers used when no ICE configuration is supplied
pub fn default_stun_servers() -> Vec<IceServer> {
    vec![
        IceServer::stun("stun:stun.l.google.com:19302"),
        IceServer::stun("stun:stun1.l.google.com:19302"),
        IceServer::stun("stun:stun2.l.google.com:19302"),
    ]
}

/// Configuration for a share core
///
/// Identity is mandatory: `participant_id` is this peer's name on the
/// signaling channel and `session_id` scopes which envelopes it reads.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// This participant's id on the signaling channel
    pub participant_id: String,

    /// Session every envelope must carry to be processed
    pub session_id: String,

    /// ICE servers handed to each new peer connection
    pub ice_servers: Vec<IceServer>,

    /// How long a negotiation may stay in flight
    pub negotiation_timeout: Duration,

    /// How often stalled negotiations are swept
    pub sweep_interval: Duration,

    /// Capacity of each share's event channel
    pub event_capacity: usize,

    /// Capacity of the announcement broadcast channel
    pub announce_capacity: usize,
}

impl CoreConfig {
    /// Create a config with the given identity and default tuning
    pub fn new(participant_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            session_id: session_id.into(),
            ice_servers: default_stun_servers(),
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            announce_capacity: DEFAULT_ANNOUNCE_CAPACITY,
        }
    }

    /// Replace the ICE server list
    pub fn ice_servers(mut self, servers: Vec<IceServer>) -> Self {
        self.ice_servers = servers;
        self
    }

    /// Set the negotiation timeout
    pub fn negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    /// Set the sweep interval
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the per-share event channel capacity
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Set the announcement channel capacity
    pub fn announce_capacity(mut self, capacity: usize) -> Self {
        self.announce_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_config_defaults() {
        let config = CoreConfig::new("alice", "room-7");

        assert_eq!(config.participant_id, "alice");
        assert_eq!(config.session_id, "room-7");
        assert_eq!(config.ice_servers.len(), 3);
        assert_eq!(config.negotiation_timeout, DEFAULT_NEGOTIATION_TIMEOUT);
        assert_eq!(config.sweep_interval, DEFAULT_SWEEP_INTERVAL);
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn test_builder_ice_servers() {
        let config =
            CoreConfig::new("alice", "room-7").ice_servers(vec![IceServer::stun("stun:local:3478")]);

        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.ice_servers[0].urls, vec!["stun:local:3478"]);
    }

    #[test]
    fn test_builder_negotiation_timeout() {
        let config = CoreConfig::new("alice", "room-7").negotiation_timeout(Duration::from_secs(5));

        assert_eq!(config.negotiation_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_builder_capacities_floor_at_one() {
        let config = CoreConfig::new("alice", "room-7")
            .event_capacity(0)
            .announce_capacity(0);

        assert_eq!(config.event_capacity, 1);
        assert_eq!(config.announce_capacity, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let config = CoreConfig::new("alice", "room-7")
            .negotiation_timeout(Duration::from_secs(10))
            .sweep_interval(Duration::from_secs(2))
            .event_capacity(8);

        assert_eq!(config.negotiation_timeout, Duration::from_secs(10));
        assert_eq!(config.sweep_interval, Duration::from_secs(2));
        assert_eq!(config.event_capacity, 8);
    }
}
