use shared::{
    DISCOVERY_PORT, HANDSHAKE_TIMEOUT, HEARTBEAT_INTERVAL, PEER_MISS_THRESHOLD, RECEIVE_TIMEOUT,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Settings for joining a session.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Display name announced to the host.
    pub name: String,
    /// Local address of the session socket. Port 0 picks a free one.
    pub bind_addr: SocketAddr,
    /// Where the discovery listener binds.
    pub discovery_addr: SocketAddr,
    pub receive_timeout: Duration,
    /// Tick period for state pushes and pings.
    pub heartbeat_interval: Duration,
    /// Ticks without host traffic before the link counts as lost.
    pub miss_threshold: u32,
    pub handshake_timeout: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            name: "Player".to_string(),
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            discovery_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DISCOVERY_PORT),
            receive_timeout: RECEIVE_TIMEOUT,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            miss_threshold: PEER_MISS_THRESHOLD,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }
}

impl PeerConfig {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}
