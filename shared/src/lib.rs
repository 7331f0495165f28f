//! Types shared by the host and peer roles: participant identity and state,
//! the tagged text codec, and the datagram endpoint both roles sit on.

pub mod error;
pub mod protocol;
pub mod transport;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub use error::{ProtocolError, TransportError};
pub use protocol::Message;
pub use transport::Endpoint;

pub const DEFAULT_SESSION_PORT: u16 = 51000;
pub const DISCOVERY_PORT: u16 = 51001;
pub const ADVERTISE_INTERVAL: Duration = Duration::from_secs(1);
pub const RECEIVE_TIMEOUT: Duration = Duration::from_millis(100);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(50);
pub const PEER_MISS_THRESHOLD: u32 = 10;
pub const HOST_CHECK_INTERVAL: Duration = Duration::from_secs(1);
pub const HOST_MISS_THRESHOLD: u32 = 5;
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);
pub const MEETING_COUNTDOWN: Duration = Duration::from_secs(60);
pub const VERDICT_DISPLAY: Duration = Duration::from_secs(5);
/// Largest payload a UDP datagram can carry. Receive buffers are this big so
/// nothing is truncated; larger frames are refused on send.
pub const MAX_FRAME_SIZE: usize = 65_507;
/// Display names longer than this many characters are refused on the wire
/// and clipped locally.
pub const MAX_NAME_LEN: usize = 32;

/// Network identity of a session participant.
///
/// The `(address, port)` pair is the only key used to refer to a participant,
/// the host included. On the wire and in JSON maps it is written as
/// `"ip:port"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Identity(SocketAddr);

impl Identity {
    pub fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.0
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }
}

impl From<SocketAddr> for Identity {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Identity {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<SocketAddr>()
            .map(Identity)
            .map_err(|_| ProtocolError::InvalidIdentity(s.to_string()))
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.to_string()
    }
}

impl TryFrom<String> for Identity {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Role or life status of a participant. Decided by the host only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Crewmate,
    Imposter,
    Dead,
    /// Any status string this build does not know about.
    #[serde(other)]
    Unknown,
}

impl Status {
    pub fn is_alive(&self) -> bool {
        !matches!(self, Status::Dead)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Crewmate => "crewmate",
            Status::Imposter => "imposter",
            Status::Dead => "dead",
            Status::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    #[default]
    Right,
    Up,
    Down,
}

/// Synchronized state of one participant.
///
/// Position is owned by the participant itself; status is owned by the host.
/// Positions are not clamped here.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub moving: bool,
    pub direction: Direction,
    pub status: Status,
    #[serde(default)]
    pub character: u8,
}

impl ParticipantRecord {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Applies the participant-owned fields of an update. Status is left alone.
    pub fn apply_update(&mut self, update: &StateUpdate) {
        self.x = update.x;
        self.y = update.y;
        self.moving = update.moving;
        self.direction = update.direction;
        if let Some(character) = update.character {
            self.character = character;
        }
    }
}

/// Per-tick local state a participant pushes for itself.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StateUpdate {
    pub x: f32,
    pub y: f32,
    pub direction: Direction,
    pub moving: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<u8>,
}

impl StateUpdate {
    pub fn at(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            ..Self::default()
        }
    }

    /// JSON has no encoding for NaN or infinity, so only finite positions can
    /// be relayed back out in a snapshot.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Trims a display name and cuts it to [`MAX_NAME_LEN`] characters.
pub fn clip_name(name: &str) -> String {
    name.trim().chars().take(MAX_NAME_LEN).collect()
}

/// "Still running" flag shared by a role's loops.
///
/// Receive loops check it once per receive timeout; periodic loops can also
/// await [`RunFlag::stopped`] to exit without waiting for their next tick.
#[derive(Debug, Clone)]
pub struct RunFlag {
    running: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl RunFlag {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Resolves once [`RunFlag::stop`] has been called.
    pub async fn stopped(&self) {
        loop {
            let notified = self.notify.notified();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Milliseconds since the unix epoch, saturating at zero on clock skew.
pub fn timestamp_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis()
        .min(u64::MAX as u128) as u64
}
