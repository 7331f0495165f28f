//! # Session Host Library
//!
//! The authoritative side of a local-network session. One host process owns
//! the canonical presence state of every participant, answers each peer's
//! state push with a full snapshot, drops peers that go silent, and runs the
//! meetings that can eject a participant.
//!
//! ## Core Responsibilities
//!
//! ### Presence
//! The [`registry::PresenceRegistry`] holds one record per participant
//! identity (`address:port`), including the host itself. Peers own their
//! position; the host owns every status.
//!
//! ### Liveness
//! The [`heartbeat::HeartbeatMonitor`] counts check intervals without traffic
//! per identity. Any datagram resets the count, so state pushes double as
//! heartbeats. Reaching the threshold removes the participant exactly once.
//!
//! ### Meetings
//! The [`meeting::MeetingCoordinator`] collects one ballot per live participant,
//! tallies on expiry (or once everyone has voted) and broadcasts the verdict.
//! Ties favour no ejection.
//!
//! ### Discovery
//! The [`discovery::Advertiser`] broadcasts `"<name>:<port>"` once per interval
//! while the host is running.
//!
//! ## Architecture Design
//!
//! ### Cooperating Tasks
//! [`network::Host::start`] spawns a receive loop and independent periodic
//! tasks (heartbeat check, meeting clock, advertisement). They never message
//! each other; they share the registry, the counters and the meeting slot,
//! all internally synchronized. Every loop observes a shared run flag and
//! exits promptly on [`network::Host::shutdown`].
//!
//! ### Request/Response Reconciliation
//! Snapshots are not pushed on a timer. Each `data` update from a peer is
//! applied and answered, to that peer only, with the whole registry.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use host::{Host, HostConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (mut host, mut events) = Host::bind(HostConfig::named("Alice")).await?;
//!     host.start().await?;
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!
//!     host.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod discovery;
pub mod heartbeat;
pub mod meeting;
pub mod network;
pub mod registry;

pub use config::HostConfig;
pub use meeting::BallotError;
pub use network::{Host, HostEvent};
