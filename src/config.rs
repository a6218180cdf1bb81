//! Runtime configuration for the relay and peer processes

use std::net::SocketAddr;
use std::time::Duration;

use crate::model::media::MediaConstraints;

/// Port the relay listens on unless told otherwise.
pub const DEFAULT_RELAY_PORT: u16 = 4000;

pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:4000";

pub const DEFAULT_STUN_SERVER: &str = "stun.l.google.com:19302";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// WebSocket listen address.
    pub listen: SocketAddr,
    /// Optional HTTP status listen address.
    pub status_listen: Option<SocketAddr>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_RELAY_PORT)),
            status_listen: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub constraints: MediaConstraints,
    /// A negotiation that has not reached `Connected` within this window
    /// fails. `None` waits forever.
    pub negotiation_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Offer a loopback host candidate when no other address exists.
    pub include_loopback: bool,
    /// STUN servers (`host:port`) asked for a server-reflexive candidate.
    pub ice_servers: Vec<String>,
    /// How long to wait on each STUN server.
    pub stun_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            include_loopback: false,
            ice_servers: vec![],
            stun_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub relay_url: String,
    /// Initiate a call as soon as the relay connection is up.
    pub call: bool,
    pub session: SessionConfig,
    pub engine: EngineConfig,
}

impl Default for PeerConfig {
    fn default() -> Self {
        PeerConfig {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            call: false,
            session: SessionConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}
