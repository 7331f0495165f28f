//! Authoritative presence registry kept by the host.
//!
//! One [`ParticipantRecord`] per [`Identity`]. The map is internally
//! synchronized so the receive loop, the heartbeat checker, the meeting clock
//! and the embedding application can all touch it without extra locking.
//!
//! Field ownership is split across entry points: a participant's own position,
//! facing, movement and character come in through [`PresenceRegistry::update_self_position`]
//! (or the general [`PresenceRegistry::upsert`]), while status is written only
//! through [`PresenceRegistry::update_status`].

use dashmap::DashMap;
use log::info;
use shared::protocol::Snapshot;
use shared::{Identity, ParticipantRecord, StateUpdate, Status};
use std::collections::BTreeMap;

/// Participant-owned fields to merge into a record. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub name: Option<String>,
    pub position: Option<StateUpdate>,
    pub character: Option<u8>,
}

/// Whether an upsert created a new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Created,
    Updated,
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    records: DashMap<Identity, ParticipantRecord>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or updates the record for `identity`. Never duplicates an identity.
    pub fn upsert(&self, identity: Identity, patch: RecordPatch) -> Upserted {
        let mut created = false;
        let mut record = self.records.entry(identity).or_insert_with(|| {
            created = true;
            ParticipantRecord::default()
        });

        if let Some(name) = patch.name {
            record.name = name;
        }
        if let Some(position) = patch.position {
            record.apply_update(&position);
        }
        if let Some(character) = patch.character {
            record.character = character;
        }

        if created {
            Upserted::Created
        } else {
            Upserted::Updated
        }
    }

    /// Registers or renames a participant. Position stays at its current value,
    /// or zero for a new record.
    pub fn announce(&self, identity: Identity, name: &str) -> Upserted {
        self.upsert(
            identity,
            RecordPatch {
                name: Some(name.to_string()),
                ..RecordPatch::default()
            },
        )
    }

    /// Applies a participant's own state push. The status field is untouched.
    pub fn update_self_position(&self, identity: Identity, update: StateUpdate) -> Upserted {
        self.upsert(
            identity,
            RecordPatch {
                position: Some(update),
                ..RecordPatch::default()
            },
        )
    }

    /// Sets a host-decided status. Returns false if the identity is unknown.
    pub fn update_status(&self, identity: Identity, status: Status) -> bool {
        match self.records.get_mut(&identity) {
            Some(mut record) => {
                if record.status != status {
                    info!("{} ({}) is now {}", record.name, identity, status);
                }
                record.status = status;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, identity: &Identity) -> Option<ParticipantRecord> {
        self.records.get(identity).map(|record| record.clone())
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.records.contains_key(identity)
    }

    pub fn remove(&self, identity: &Identity) -> Option<ParticipantRecord> {
        self.records.remove(identity).map(|(_, record)| record)
    }

    pub fn is_alive(&self, identity: &Identity) -> bool {
        self.records
            .get(identity)
            .map(|record| record.status.is_alive())
            .unwrap_or(false)
    }

    /// Point-in-time copy of every record, ordered by identity.
    ///
    /// Each entry is read under its own shard lock; the copy is not atomic
    /// across entries.
    pub fn snapshot_all(&self) -> BTreeMap<Identity, ParticipantRecord> {
        self.records
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Builds the snapshot reply sent to peers.
    pub fn snapshot(&self, host: Identity) -> Snapshot {
        Snapshot {
            host,
            participants: self.snapshot_all(),
        }
    }

    pub fn identities(&self) -> Vec<Identity> {
        self.records.iter().map(|entry| *entry.key()).collect()
    }

    pub fn alive_identities(&self) -> Vec<Identity> {
        self.records
            .iter()
            .filter(|entry| entry.value().status.is_alive())
            .map(|entry| *entry.key())
            .collect()
    }

    /// Human-readable roster on a single line, one `;`-separated entry per participant.
    pub fn roster(&self) -> String {
        self.snapshot_all()
            .iter()
            .map(|(identity, record)| format!("{} {} [{}]", identity, record.name, record.status))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
