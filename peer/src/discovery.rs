//! Passive host discovery.
//!
//! A long-lived listener collects advertisements into a backing list. The UI
//! calls [`CandidateList::refresh`] periodically, which publishes the
//! de-duplicated candidates and clears the backing list so memory stays
//! bounded. Picking a published candidate by index hands off to the session
//! handshake.

use log::{debug, info, warn};
use shared::protocol::Advertisement;
use shared::{Endpoint, Identity, RunFlag, TransportError};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};

/// A host seen on the discovery channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub address: IpAddr,
    /// Advertised session port, not the port the advertisement came from.
    pub port: u16,
    pub name: String,
}

impl Candidate {
    pub fn identity(&self) -> Identity {
        Identity::new(SocketAddr::new(self.address, self.port))
    }
}

#[derive(Debug, Default)]
struct Candidates {
    pending: Vec<Candidate>,
    published: Vec<Candidate>,
}

#[derive(Debug, Clone, Default)]
pub struct CandidateList {
    inner: Arc<Mutex<Candidates>>,
}

impl CandidateList {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Candidates> {
        // The data is a plain list; a panic elsewhere cannot leave it torn.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, candidate: Candidate) {
        self.lock().pending.push(candidate);
    }

    /// Publishes everything heard since the last refresh, one entry per
    /// `(address, port)` in first-seen order, and clears the backing list.
    pub fn refresh(&self) -> Vec<Candidate> {
        let mut candidates = self.lock();
        let pending = std::mem::take(&mut candidates.pending);

        let mut seen = HashSet::new();
        let published: Vec<Candidate> = pending
            .into_iter()
            .filter(|candidate| seen.insert((candidate.address, candidate.port)))
            .collect();

        candidates.published = published.clone();
        published
    }

    pub fn published(&self) -> Vec<Candidate> {
        self.lock().published.clone()
    }

    /// Picks a candidate from the last refresh.
    pub fn select(&self, index: usize) -> Option<Candidate> {
        self.lock().published.get(index).cloned()
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }
}

pub struct DiscoveryListener {
    endpoint: Endpoint,
    candidates: CandidateList,
}

impl DiscoveryListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let endpoint = Endpoint::bind(&addr.to_string()).await?;
        Ok(Self {
            endpoint,
            candidates: CandidateList::new(),
        })
    }

    pub fn candidates(&self) -> CandidateList {
        self.candidates.clone()
    }

    pub fn local_identity(&self) -> Result<Identity, TransportError> {
        self.endpoint.local_identity()
    }

    /// Collects advertisements until `running` is cleared.
    pub async fn run(self, running: RunFlag) -> Result<(), TransportError> {
        info!(
            "Listening for hosts on {}",
            self.endpoint.local_identity()?
        );

        while running.is_running() {
            let Some((bytes, sender)) = self.endpoint.receive().await? else {
                continue;
            };

            match Advertisement::decode(&bytes) {
                Ok(ad) => {
                    debug!("Heard {} from {}", ad.encode(), sender);
                    self.candidates.record(Candidate {
                        address: sender.addr().ip(),
                        port: ad.port,
                        name: ad.name,
                    });
                }
                Err(e) => warn!("Ignoring discovery frame from {}: {}", sender, e),
            }
        }

        debug!("Discovery listener stopped");
        Ok(())
    }
}
