//! # Session Peer Library
//!
//! The participant side of a local-network session. A peer finds hosts on the
//! discovery channel, joins one with a name/handshake exchange, then keeps a
//! shadow copy of everyone else in sync with the host's snapshots.
//!
//! ## Architecture Overview
//!
//! ### Discovery
//! [`discovery::DiscoveryListener`] collects `"<name>:<port>"` advertisements.
//! [`discovery::CandidateList::refresh`] publishes them de-duplicated by
//! `(address, port)`, and picking one by index yields the host to join.
//!
//! ### Session
//! [`network::Peer::connect`] sends `name`, then `sys.handshake`, and waits a
//! bounded time for `sys.ack`. A timeout is a clean failure the caller can
//! retry against another candidate.
//!
//! ### Reconciliation
//! One periodic tick carries both the heartbeat and the local state: `data`
//! once there is local input, `sys.ping` before that. The host answers each
//! `data` with a full snapshot. The peer keeps its own position and takes only
//! its status from the snapshot ([`view::WorldView::apply_snapshot`]).
//!
//! ### Liveness
//! [`liveness::LivenessTracker`] counts ticks without host traffic. Losing
//! and regaining the link are each reported once; on regaining it the peer
//! re-announces its name in case the host dropped it meanwhile.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use peer::{Peer, PeerConfig};
//! use shared::StateUpdate;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let host = "192.168.1.20:51000".parse()?;
//!     let (mut peer, mut events) = Peer::connect(PeerConfig::named("Bob"), host).await?;
//!     peer.start();
//!     peer.set_local_state(StateUpdate::at(10.0, 20.0)).await;
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!
//!     peer.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod discovery;
pub mod liveness;
pub mod network;
pub mod view;

pub use config::PeerConfig;
pub use discovery::{Candidate, CandidateList, DiscoveryListener};
pub use network::{Peer, PeerEvent, SessionError};
