//! Peer-side view of the link to the host.
//!
//! Every heartbeat tick bumps a miss counter; any frame from the host that
//! decodes resets it. Crossing the threshold flips the link to "lost" and the
//! first host traffic afterwards flips it back. Each transition is reported
//! once.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Too many ticks without hearing from the host.
    Lost,
    /// The host answered again after the link was lost.
    Restored,
}

#[derive(Debug)]
pub struct LivenessTracker {
    misses: AtomicU32,
    threshold: u32,
    lost: AtomicBool,
}

impl LivenessTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            misses: AtomicU32::new(0),
            threshold: threshold.max(1),
            lost: AtomicBool::new(false),
        }
    }

    /// Counts one heartbeat tick.
    pub fn on_tick(&self) -> Option<LinkEvent> {
        let misses = self.misses.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        if misses >= self.threshold
            && self
                .lost
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            return Some(LinkEvent::Lost);
        }
        None
    }

    /// Counts a decoded frame from the host.
    pub fn on_host_traffic(&self) -> Option<LinkEvent> {
        self.misses.store(0, Ordering::Release);
        self.lost
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LinkEvent::Restored)
    }

    pub fn misses(&self) -> u32 {
        self.misses.load(Ordering::Acquire)
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }
}
