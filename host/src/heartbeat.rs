//! Host-side liveness tracking.
//!
//! Each known identity has a counter of consecutive check intervals with no
//! inbound traffic. Any datagram from the identity resets it to zero, so state
//! updates double as heartbeats.

use dashmap::DashMap;
use shared::Identity;

#[derive(Debug)]
pub struct HeartbeatMonitor {
    misses: DashMap<Identity, u32>,
    threshold: u32,
}

impl HeartbeatMonitor {
    pub fn new(threshold: u32) -> Self {
        Self {
            misses: DashMap::new(),
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Records a liveness signal, starting to track the identity if needed.
    /// Returns true if the identity was not tracked before.
    pub fn touch(&self, identity: Identity) -> bool {
        self.misses.insert(identity, 0).is_none()
    }

    /// Advances every counter by one interval and removes the identities that
    /// reached the threshold. Each expired identity is returned exactly once.
    pub fn tick(&self) -> Vec<Identity> {
        let mut expired = Vec::new();
        for mut entry in self.misses.iter_mut() {
            *entry.value_mut() += 1;
            if *entry.value() >= self.threshold {
                expired.push(*entry.key());
            }
        }

        // A touch may have landed between the scan and the removal.
        expired.retain(|identity| {
            self.misses
                .remove_if(identity, |_, misses| *misses >= self.threshold)
                .is_some()
        });
        expired
    }

    /// Stops tracking an identity. Returns true if it was tracked.
    pub fn forget(&self, identity: &Identity) -> bool {
        self.misses.remove(identity).is_some()
    }

    pub fn misses(&self, identity: &Identity) -> Option<u32> {
        self.misses.get(identity).map(|misses| *misses)
    }

    pub fn len(&self) -> usize {
        self.misses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.misses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> Identity {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn test_touch_starts_at_zero() {
        let monitor = HeartbeatMonitor::new(5);
        assert!(monitor.touch(addr(4000)));
        assert!(!monitor.touch(addr(4000)));
        assert_eq!(monitor.misses(&addr(4000)), Some(0));
        assert_eq!(monitor.misses(&addr(4001)), None);
    }

    #[test]
    fn test_tick_increments_by_exactly_one() {
        let monitor = HeartbeatMonitor::new(5);
        monitor.touch(addr(4000));

        for expected in 1..5 {
            assert!(monitor.tick().is_empty());
            assert_eq!(monitor.misses(&addr(4000)), Some(expected));
        }
    }

    #[test]
    fn test_any_traffic_resets_to_zero() {
        let monitor = HeartbeatMonitor::new(5);
        monitor.touch(addr(4000));
        monitor.tick();
        monitor.tick();
        monitor.tick();
        assert_eq!(monitor.misses(&addr(4000)), Some(3));

        monitor.touch(addr(4000));
        assert_eq!(monitor.misses(&addr(4000)), Some(0));
    }

    #[test]
    fn test_expiry_happens_once_at_threshold() {
        let monitor = HeartbeatMonitor::new(3);
        monitor.touch(addr(4000));
        monitor.touch(addr(4001));

        assert!(monitor.tick().is_empty());
        monitor.touch(addr(4001));
        assert!(monitor.tick().is_empty());

        assert_eq!(monitor.tick(), vec![addr(4000)]);
        assert_eq!(monitor.misses(&addr(4000)), None);
        assert_eq!(monitor.len(), 1);

        assert_eq!(monitor.tick(), vec![addr(4001)]);
        assert!(monitor.is_empty());
        assert!(monitor.tick().is_empty());
    }

    #[test]
    fn test_forget() {
        let monitor = HeartbeatMonitor::new(2);
        monitor.touch(addr(4000));
        assert!(monitor.forget(&addr(4000)));
        assert!(!monitor.forget(&addr(4000)));
        monitor.tick();
        assert!(monitor.tick().is_empty());
    }

    #[test]
    fn test_zero_threshold_is_raised_to_one() {
        let monitor = HeartbeatMonitor::new(0);
        assert_eq!(monitor.threshold(), 1);
        monitor.touch(addr(4000));
        assert_eq!(monitor.tick(), vec![addr(4000)]);
    }
}
