use shared::{
    ADVERTISE_INTERVAL, DEFAULT_SESSION_PORT, DISCOVERY_PORT, HOST_CHECK_INTERVAL,
    HOST_MISS_THRESHOLD, MEETING_COUNTDOWN, RECEIVE_TIMEOUT, VERDICT_DISPLAY,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Settings for a hosting session.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Display name, also used in advertisements.
    pub name: String,
    /// Address the session socket binds to.
    pub bind_addr: SocketAddr,
    /// Where advertisements go. `None` disables discovery broadcast.
    pub advertise_to: Option<SocketAddr>,
    pub advertise_interval: Duration,
    pub receive_timeout: Duration,
    /// How often every heartbeat counter is advanced.
    pub check_interval: Duration,
    /// Consecutive silent checks before an identity is dropped.
    pub miss_threshold: u32,
    pub meeting_countdown: Duration,
    /// How long a resolved meeting is kept before it is discarded.
    pub verdict_display: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            name: "Host".to_string(),
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_SESSION_PORT),
            advertise_to: Some(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::BROADCAST),
                DISCOVERY_PORT,
            )),
            advertise_interval: ADVERTISE_INTERVAL,
            receive_timeout: RECEIVE_TIMEOUT,
            check_interval: HOST_CHECK_INTERVAL,
            miss_threshold: HOST_MISS_THRESHOLD,
            meeting_countdown: MEETING_COUNTDOWN,
            verdict_display: VERDICT_DISPLAY,
        }
    }
}

impl HostConfig {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}
