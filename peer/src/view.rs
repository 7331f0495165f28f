//! The peer's shadow copy of the session.
//!
//! Position is ours: it comes from local input and is never taken from a
//! snapshot. Status belongs to the host and only ever arrives through
//! snapshots, kill notices and verdicts. Everyone else is mirrored wholesale
//! from the latest snapshot.

use log::{debug, info};
use shared::protocol::{BodyReport, KillNotice, Snapshot, Verdict, VerdictNotice};
use shared::{Identity, ParticipantRecord, StateUpdate, Status};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct WorldView {
    identity: Option<Identity>,
    host: Option<Identity>,
    local: ParticipantRecord,
    /// Set once local input has produced something worth pushing.
    pending_state: bool,
    others: BTreeMap<Identity, ParticipantRecord>,
    meeting_id: Option<u64>,
    last_verdict: Option<VerdictNotice>,
    bodies: Vec<KillNotice>,
}

impl WorldView {
    pub fn new(name: &str) -> Self {
        Self {
            identity: None,
            host: None,
            local: ParticipantRecord::named(name),
            pending_state: false,
            others: BTreeMap::new(),
            meeting_id: None,
            last_verdict: None,
            bodies: Vec::new(),
        }
    }

    /// Records which snapshot entry is ours, as the host sees it.
    pub fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(identity);
        self.others.remove(&identity);
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity
    }

    pub fn host(&self) -> Option<Identity> {
        self.host
    }

    pub fn local(&self) -> &ParticipantRecord {
        &self.local
    }

    pub fn status(&self) -> Status {
        self.local.status
    }

    pub fn set_local_state(&mut self, update: StateUpdate) {
        self.local.apply_update(&update);
        self.pending_state = true;
    }

    /// The update to push this tick, or `None` if there is no local state yet.
    pub fn outgoing_update(&self) -> Option<StateUpdate> {
        self.pending_state.then(|| StateUpdate {
            x: self.local.x,
            y: self.local.y,
            direction: self.local.direction,
            moving: self.local.moving,
            character: Some(self.local.character),
        })
    }

    /// Mirrors a host snapshot. Returns our new status if the host changed it.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot) -> Option<Status> {
        self.host = Some(snapshot.host);

        let mut others = snapshot.participants;
        let own = self.identity.and_then(|identity| others.remove(&identity));
        self.others = others;

        let own = own?;
        if own.status == self.local.status {
            return None;
        }
        info!("Host set our status to {}", own.status);
        self.local.status = own.status;
        Some(own.status)
    }

    pub fn apply_kill(&mut self, notice: KillNotice) {
        self.mark_dead(notice.victim);
        self.bodies.push(notice);
    }

    /// Tracks the meeting the host announced. Bodies are cleared when a
    /// meeting opens.
    pub fn apply_report(&mut self, report: &BodyReport) -> Option<u64> {
        let meeting_id = report.meeting_id?;
        self.meeting_id = Some(meeting_id);
        self.bodies.clear();
        Some(meeting_id)
    }

    /// Applies the host's verdict as given; the tally is not recomputed here.
    pub fn apply_verdict(&mut self, notice: VerdictNotice) {
        if self.meeting_id != Some(notice.meeting_id) {
            debug!(
                "Verdict for meeting {} while tracking {:?}",
                notice.meeting_id, self.meeting_id
            );
        }
        self.meeting_id = None;

        if let Verdict::Ejected(identity) = notice.verdict {
            self.mark_dead(identity);
        }
        self.last_verdict = Some(notice);
    }

    fn mark_dead(&mut self, identity: Identity) {
        if Some(identity) == self.identity {
            self.local.status = Status::Dead;
        } else if let Some(record) = self.others.get_mut(&identity) {
            record.status = Status::Dead;
        }
    }

    pub fn others(&self) -> &BTreeMap<Identity, ParticipantRecord> {
        &self.others
    }

    pub fn get(&self, identity: &Identity) -> Option<&ParticipantRecord> {
        if Some(*identity) == self.identity {
            Some(&self.local)
        } else {
            self.others.get(identity)
        }
    }

    pub fn meeting_id(&self) -> Option<u64> {
        self.meeting_id
    }

    pub fn last_verdict(&self) -> Option<&VerdictNotice> {
        self.last_verdict.as_ref()
    }

    pub fn bodies(&self) -> &[KillNotice] {
        &self.bodies
    }
}
