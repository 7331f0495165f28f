//! Meeting and vote coordination. The host is the only tally authority.
//!
//! A meeting moves `Open -> Closed -> Resolved` and is discarded once its
//! verdict has been on display for a fixed window. Ballots are first-vote-wins.
//! Any tie at the top of the tally resolves to no ejection.

use crate::registry::PresenceRegistry;
use log::{info, warn};
use rand::Rng;
use shared::protocol::{Ballot, BallotTarget, Verdict, VerdictNotice};
use shared::{Identity, Status};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeetingPhase {
    Open,
    Closed,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BallotError {
    #[error("no meeting is in progress")]
    NoMeeting,
    #[error("ballot is for meeting {got}, current meeting is {current}")]
    WrongMeeting { current: u64, got: u64 },
    #[error("meeting {0} is no longer accepting ballots")]
    Closed(u64),
    #[error("{0} has already voted")]
    DuplicateVote(Identity),
    #[error("{0} is not a live participant")]
    Ineligible(Identity),
    #[error("{0} is not a participant")]
    UnknownTarget(Identity),
}

/// Ballot counts for one meeting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    pub counts: BTreeMap<Identity, u32>,
    pub skip: u32,
}

impl Tally {
    pub fn from_targets<'a>(targets: impl IntoIterator<Item = &'a BallotTarget>) -> Self {
        let mut tally = Tally::default();
        for target in targets {
            match target {
                BallotTarget::Skip => tally.skip += 1,
                BallotTarget::Participant(identity) => {
                    *tally.counts.entry(*identity).or_insert(0) += 1
                }
            }
        }
        tally
    }

    /// Ejects the single strict leader, if skip does not reach its count.
    pub fn verdict(&self) -> Verdict {
        let top = self.counts.values().copied().max().unwrap_or(0);
        if top == 0 || self.skip >= top {
            return Verdict::NoEjection;
        }

        let mut leaders = self.counts.iter().filter(|(_, count)| **count == top);
        match (leaders.next(), leaders.next()) {
            (Some((identity, _)), None) => Verdict::Ejected(*identity),
            _ => Verdict::NoEjection,
        }
    }

    pub fn to_wire(&self) -> BTreeMap<BallotTarget, u32> {
        let mut wire: BTreeMap<BallotTarget, u32> = self
            .counts
            .iter()
            .map(|(identity, count)| (BallotTarget::Participant(*identity), *count))
            .collect();
        wire.insert(BallotTarget::Skip, self.skip);
        wire
    }
}

#[derive(Debug, Clone)]
pub struct MeetingState {
    id: u64,
    reporter: Identity,
    victim: Option<Identity>,
    phase: MeetingPhase,
    ballots: HashMap<Identity, BallotTarget>,
    opened_at: Instant,
    countdown: Duration,
    verdict: Option<VerdictNotice>,
    resolved_at: Option<Instant>,
}

impl MeetingState {
    pub fn new(
        id: u64,
        reporter: Identity,
        victim: Option<Identity>,
        countdown: Duration,
        now: Instant,
    ) -> Self {
        Self {
            id,
            reporter,
            victim,
            phase: MeetingPhase::Open,
            ballots: HashMap::new(),
            opened_at: now,
            countdown,
            verdict: None,
            resolved_at: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn reporter(&self) -> Identity {
        self.reporter
    }

    pub fn victim(&self) -> Option<Identity> {
        self.victim
    }

    pub fn phase(&self) -> MeetingPhase {
        self.phase
    }

    pub fn verdict(&self) -> Option<&VerdictNotice> {
        self.verdict.as_ref()
    }

    pub fn ballot_count(&self) -> usize {
        self.ballots.len()
    }

    pub fn has_voted(&self, voter: &Identity) -> bool {
        self.ballots.contains_key(voter)
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.countdown
            .saturating_sub(now.saturating_duration_since(self.opened_at))
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.phase == MeetingPhase::Open && self.remaining(now).is_zero()
    }

    /// Records a ballot. A second ballot from the same voter is rejected and
    /// leaves the first one in place.
    pub fn cast(&mut self, voter: Identity, target: BallotTarget) -> Result<(), BallotError> {
        if self.phase != MeetingPhase::Open {
            return Err(BallotError::Closed(self.id));
        }
        if self.ballots.contains_key(&voter) {
            return Err(BallotError::DuplicateVote(voter));
        }
        self.ballots.insert(voter, target);
        Ok(())
    }

    pub fn tally(&self) -> Tally {
        Tally::from_targets(self.ballots.values())
    }

    /// Stops accepting ballots and computes the verdict. Idempotent.
    pub fn resolve(&mut self, now: Instant) -> VerdictNotice {
        if let Some(notice) = &self.verdict {
            return notice.clone();
        }

        self.phase = MeetingPhase::Closed;
        let tally = self.tally();
        let notice = VerdictNotice {
            meeting_id: self.id,
            verdict: tally.verdict(),
            tally: tally.to_wire(),
        };

        self.phase = MeetingPhase::Resolved;
        self.verdict = Some(notice.clone());
        self.resolved_at = Some(now);
        notice
    }

    /// True once the verdict has been shown for at least `window`.
    pub fn display_finished(&self, now: Instant, window: Duration) -> bool {
        self.resolved_at
            .map(|at| now.saturating_duration_since(at) >= window)
            .unwrap_or(false)
    }
}

/// What a clock tick did to the current meeting.
#[derive(Debug, Clone, PartialEq)]
pub enum MeetingTick {
    Idle,
    Resolved(VerdictNotice),
    Discarded(u64),
}

/// Owns the single current meeting slot.
#[derive(Debug)]
pub struct MeetingCoordinator {
    current: Mutex<Option<MeetingState>>,
    countdown: Duration,
    display_window: Duration,
}

impl MeetingCoordinator {
    pub fn new(countdown: Duration, display_window: Duration) -> Self {
        Self {
            current: Mutex::new(None),
            countdown,
            display_window,
        }
    }

    /// Opens a meeting with a fresh id, unless one is still collecting ballots.
    pub async fn open(&self, reporter: Identity, victim: Option<Identity>) -> Option<u64> {
        let mut current = self.current.lock().await;

        if let Some(meeting) = current.as_ref() {
            if meeting.phase() != MeetingPhase::Resolved {
                info!(
                    "Ignoring report from {}: meeting {} already in progress",
                    reporter,
                    meeting.id()
                );
                return None;
            }
        }

        let previous = current.as_ref().map(|meeting| meeting.id());
        let mut rng = rand::thread_rng();
        let mut id: u64 = rng.gen();
        while Some(id) == previous {
            id = rng.gen();
        }

        match victim {
            Some(victim) => info!("Meeting {} opened: {} reported {}", id, reporter, victim),
            None => info!("Meeting {} opened: emergency called by {}", id, reporter),
        }

        *current = Some(MeetingState::new(
            id,
            reporter,
            victim,
            self.countdown,
            Instant::now(),
        ));
        Some(id)
    }

    /// Validates and records a ballot.
    ///
    /// Returns the verdict if this ballot was the last live participant's,
    /// in which case the meeting resolves immediately and any ejection has
    /// already been applied to the registry.
    pub async fn cast(
        &self,
        ballot: Ballot,
        registry: &PresenceRegistry,
    ) -> Result<Option<VerdictNotice>, BallotError> {
        let mut current = self.current.lock().await;
        let meeting = current.as_mut().ok_or(BallotError::NoMeeting)?;

        if meeting.id() != ballot.meeting_id {
            return Err(BallotError::WrongMeeting {
                current: meeting.id(),
                got: ballot.meeting_id,
            });
        }
        if !registry.is_alive(&ballot.voter) {
            return Err(BallotError::Ineligible(ballot.voter));
        }
        if let BallotTarget::Participant(target) = ballot.target {
            if !registry.contains(&target) {
                return Err(BallotError::UnknownTarget(target));
            }
        }

        meeting.cast(ballot.voter, ballot.target)?;
        info!(
            "Meeting {}: {} voted {}",
            meeting.id(),
            ballot.voter,
            ballot.target
        );

        let everyone_voted = registry
            .alive_identities()
            .iter()
            .all(|identity| meeting.has_voted(identity));

        if everyone_voted {
            let notice = meeting.resolve(Instant::now());
            apply_verdict(&notice, registry);
            return Ok(Some(notice));
        }

        Ok(None)
    }

    /// Advances the meeting clock: resolves an expired meeting, then discards
    /// a resolved one once its display window is over.
    pub async fn poll(&self, registry: &PresenceRegistry) -> MeetingTick {
        let now = Instant::now();
        let mut current = self.current.lock().await;

        let Some(meeting) = current.as_mut() else {
            return MeetingTick::Idle;
        };

        if meeting.is_expired(now) {
            let notice = meeting.resolve(now);
            apply_verdict(&notice, registry);
            return MeetingTick::Resolved(notice);
        }

        if meeting.display_finished(now, self.display_window) {
            let id = meeting.id();
            *current = None;
            return MeetingTick::Discarded(id);
        }

        MeetingTick::Idle
    }

    pub async fn current_id(&self) -> Option<u64> {
        self.current.lock().await.as_ref().map(|meeting| meeting.id())
    }

    pub async fn phase(&self) -> Option<MeetingPhase> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|meeting| meeting.phase())
    }

    pub async fn current(&self) -> Option<MeetingState> {
        self.current.lock().await.clone()
    }
}

fn apply_verdict(notice: &VerdictNotice, registry: &PresenceRegistry) {
    match notice.verdict {
        Verdict::Ejected(identity) => {
            info!("Meeting {}: {} ejected", notice.meeting_id, identity);
            if !registry.update_status(identity, Status::Dead) {
                warn!("Ejected participant {} already left", identity);
            }
        }
        Verdict::NoEjection => info!("Meeting {}: no one was ejected", notice.meeting_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> Identity {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    fn votes(a: u32, b: u32, skip: u32) -> Tally {
        let mut targets = Vec::new();
        targets.extend(std::iter::repeat(BallotTarget::Participant(addr(1))).take(a as usize));
        targets.extend(std::iter::repeat(BallotTarget::Participant(addr(2))).take(b as usize));
        targets.extend(std::iter::repeat(BallotTarget::Skip).take(skip as usize));
        Tally::from_targets(targets.iter())
    }

    fn registry_with(ports: &[u16]) -> PresenceRegistry {
        let registry = PresenceRegistry::new();
        for port in ports {
            registry.announce(addr(*port), &format!("p{}", port));
        }
        registry
    }

    #[test]
    fn test_skip_tying_the_leader_means_no_ejection() {
        assert_eq!(votes(3, 2, 3).verdict(), Verdict::NoEjection);
    }

    #[test]
    fn test_clear_leader_is_ejected() {
        assert_eq!(votes(4, 2, 1).verdict(), Verdict::Ejected(addr(1)));
    }

    #[test]
    fn test_skip_majority_means_no_ejection() {
        assert_eq!(votes(1, 1, 5).verdict(), Verdict::NoEjection);
    }

    #[test]
    fn test_tie_between_targets_means_no_ejection() {
        assert_eq!(votes(2, 2, 0).verdict(), Verdict::NoEjection);
        assert_eq!(votes(3, 3, 1).verdict(), Verdict::NoEjection);
    }

    #[test]
    fn test_empty_tally_means_no_ejection() {
        assert_eq!(Tally::default().verdict(), Verdict::NoEjection);
        assert_eq!(votes(0, 0, 2).verdict(), Verdict::NoEjection);
    }

    #[test]
    fn test_wire_tally_includes_skip() {
        let wire = votes(4, 2, 1).to_wire();
        assert_eq!(wire[&BallotTarget::Participant(addr(1))], 4);
        assert_eq!(wire[&BallotTarget::Participant(addr(2))], 2);
        assert_eq!(wire[&BallotTarget::Skip], 1);
    }

    #[test]
    fn test_first_vote_wins() {
        let mut meeting = MeetingState::new(1, addr(10), None, Duration::from_secs(60), Instant::now());
        meeting
            .cast(addr(10), BallotTarget::Participant(addr(1)))
            .unwrap();

        assert_eq!(
            meeting.cast(addr(10), BallotTarget::Skip),
            Err(BallotError::DuplicateVote(addr(10)))
        );

        let tally = meeting.tally();
        assert_eq!(tally.counts.get(&addr(1)), Some(&1));
        assert_eq!(tally.skip, 0);
        assert_eq!(meeting.ballot_count(), 1);
    }

    #[test]
    fn test_phases_and_countdown() {
        let start = Instant::now();
        let mut meeting = MeetingState::new(7, addr(10), Some(addr(11)), Duration::from_secs(60), start);

        assert_eq!(meeting.phase(), MeetingPhase::Open);
        assert_eq!(meeting.victim(), Some(addr(11)));
        assert!(!meeting.is_expired(start + Duration::from_secs(59)));
        assert!(meeting.is_expired(start + Duration::from_secs(60)));
        assert_eq!(meeting.remaining(start + Duration::from_secs(90)), Duration::ZERO);

        let notice = meeting.resolve(start + Duration::from_secs(60));
        assert_eq!(notice.meeting_id, 7);
        assert_eq!(meeting.phase(), MeetingPhase::Resolved);
        assert!(!meeting.is_expired(start + Duration::from_secs(61)));

        assert_eq!(
            meeting.cast(addr(12), BallotTarget::Skip),
            Err(BallotError::Closed(7))
        );

        // Resolving again returns the same verdict.
        assert_eq!(meeting.resolve(start + Duration::from_secs(70)), notice);

        assert!(!meeting.display_finished(start + Duration::from_secs(62), Duration::from_secs(5)));
        assert!(meeting.display_finished(start + Duration::from_secs(65), Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_coordinator_rejects_ballots_without_meeting() {
        let coordinator = MeetingCoordinator::new(Duration::from_secs(60), Duration::from_secs(5));
        let registry = registry_with(&[1]);
        let ballot = Ballot {
            meeting_id: 1,
            voter: addr(1),
            target: BallotTarget::Skip,
        };
        assert_eq!(
            coordinator.cast(ballot, &registry).await,
            Err(BallotError::NoMeeting)
        );
    }

    #[tokio::test]
    async fn test_coordinator_only_one_open_meeting() {
        let coordinator = MeetingCoordinator::new(Duration::from_secs(60), Duration::from_secs(5));
        let first = coordinator.open(addr(1), None).await;
        assert!(first.is_some());
        assert_eq!(coordinator.open(addr(2), Some(addr(3))).await, None);
        assert_eq!(coordinator.current_id().await, first);
        assert_eq!(coordinator.phase().await, Some(MeetingPhase::Open));
    }

    #[tokio::test]
    async fn test_coordinator_validates_ballots() {
        let coordinator = MeetingCoordinator::new(Duration::from_secs(60), Duration::from_secs(5));
        let registry = registry_with(&[1, 2, 3]);
        registry.update_status(addr(3), Status::Dead);
        let id = coordinator.open(addr(1), None).await.unwrap();

        let wrong = Ballot {
            meeting_id: id.wrapping_add(1),
            voter: addr(1),
            target: BallotTarget::Skip,
        };
        assert!(matches!(
            coordinator.cast(wrong, &registry).await,
            Err(BallotError::WrongMeeting { .. })
        ));

        let dead = Ballot {
            meeting_id: id,
            voter: addr(3),
            target: BallotTarget::Skip,
        };
        assert_eq!(
            coordinator.cast(dead, &registry).await,
            Err(BallotError::Ineligible(addr(3)))
        );

        let stranger = Ballot {
            meeting_id: id,
            voter: addr(1),
            target: BallotTarget::Participant(addr(99)),
        };
        assert_eq!(
            coordinator.cast(stranger, &registry).await,
            Err(BallotError::UnknownTarget(addr(99)))
        );

        let good = Ballot {
            meeting_id: id,
            voter: addr(1),
            target: BallotTarget::Participant(addr(2)),
        };
        assert_eq!(coordinator.cast(good, &registry).await, Ok(None));

        let again = Ballot {
            target: BallotTarget::Skip,
            ..good
        };
        assert_eq!(
            coordinator.cast(again, &registry).await,
            Err(BallotError::DuplicateVote(addr(1)))
        );

        let meeting = coordinator.current().await.unwrap();
        assert_eq!(meeting.ballot_count(), 1);
    }

    #[tokio::test]
    async fn test_last_live_ballot_resolves_and_ejects() {
        let coordinator = MeetingCoordinator::new(Duration::from_secs(60), Duration::from_secs(5));
        let registry = registry_with(&[1, 2, 3]);
        let id = coordinator.open(addr(1), Some(addr(3))).await.unwrap();

        for voter in [1, 3] {
            let ballot = Ballot {
                meeting_id: id,
                voter: addr(voter),
                target: BallotTarget::Participant(addr(2)),
            };
            assert_eq!(coordinator.cast(ballot, &registry).await, Ok(None));
        }

        let last = Ballot {
            meeting_id: id,
            voter: addr(2),
            target: BallotTarget::Skip,
        };
        let notice = coordinator.cast(last, &registry).await.unwrap().unwrap();

        assert_eq!(notice.verdict, Verdict::Ejected(addr(2)));
        assert_eq!(registry.get(&addr(2)).unwrap().status, Status::Dead);
        assert_eq!(coordinator.phase().await, Some(MeetingPhase::Resolved));
    }

    #[tokio::test]
    async fn test_poll_resolves_on_expiry_then_discards() {
        let coordinator = MeetingCoordinator::new(Duration::from_millis(20), Duration::from_millis(20));
        let registry = registry_with(&[1, 2, 3]);
        let id = coordinator.open(addr(1), None).await.unwrap();

        assert_eq!(coordinator.poll(&registry).await, MeetingTick::Idle);

        let ballot = Ballot {
            meeting_id: id,
            voter: addr(1),
            target: BallotTarget::Participant(addr(3)),
        };
        coordinator.cast(ballot, &registry).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        match coordinator.poll(&registry).await {
            MeetingTick::Resolved(notice) => {
                assert_eq!(notice.meeting_id, id);
                assert_eq!(notice.verdict, Verdict::Ejected(addr(3)));
            }
            other => panic!("expected verdict, got {:?}", other),
        }
        assert!(!registry.is_alive(&addr(3)));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(coordinator.poll(&registry).await, MeetingTick::Discarded(id));
        assert_eq!(coordinator.current_id().await, None);
        assert_eq!(coordinator.poll(&registry).await, MeetingTick::Idle);
    }

    #[tokio::test]
    async fn test_new_meeting_after_resolution_gets_fresh_id() {
        let coordinator = MeetingCoordinator::new(Duration::ZERO, Duration::from_secs(5));
        let registry = registry_with(&[1]);
        let first = coordinator.open(addr(1), None).await.unwrap();
        assert!(matches!(
            coordinator.poll(&registry).await,
            MeetingTick::Resolved(_)
        ));

        let second = coordinator.open(addr(1), None).await.unwrap();
        assert_ne!(first, second);
    }
}
