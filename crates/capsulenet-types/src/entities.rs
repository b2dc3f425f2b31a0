//! The entity model: capsules, slots, starters, and relationships.
//!
//! Pure data with invariant-preserving mutators. Nothing here publishes
//! events or touches storage; the protocol modules in `capsulenet-core`
//! drive these mutators and the store crate persists the results.
//!
//! Two invariants are enforced at this level:
//!
//! - **Atomic slot occupation** -- [`Capsule::occupy_slot`] checks the
//!   locked and occupied conditions and installs the starter in one call,
//!   so no caller can observe a half-occupied slot.
//! - **Ownership through events only** -- a [`Starter`] moves between
//!   capsules exclusively via [`Capsule::occupy_slot`] /
//!   [`Capsule::release_slot`]; there is no setter for a slot's starter.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::enums::{CapsuleType, ConnectionStatus, RelationshipFlag, SlotType, StarterStatus};
use crate::ids::{CapsuleId, ConnectionId, EventId, InvitationId, StarterId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by entity mutators.
#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    /// The slot already holds a starter.
    #[error("slot {slot_type} is already occupied")]
    SlotOccupied {
        /// The slot that rejected the occupation.
        slot_type: SlotType,
    },

    /// The slot is locked against new occupation.
    #[error("slot {slot_type} is locked")]
    SlotLocked {
        /// The locked slot.
        slot_type: SlotType,
    },
}

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

/// A named container holding at most one starter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Which of the five kinds this slot is.
    pub slot_type: SlotType,
    /// The starter currently occupying the slot, if any.
    pub starter_id: Option<StarterId>,
    /// Locked slots reject new occupation regardless of emptiness.
    pub locked: bool,
}

impl Slot {
    /// Create an empty, unlocked slot of the given kind.
    pub const fn new(slot_type: SlotType) -> Self {
        Self {
            slot_type,
            starter_id: None,
            locked: false,
        }
    }

    /// A slot is empty iff it holds no starter.
    pub const fn is_empty(&self) -> bool {
        self.starter_id.is_none()
    }
}

// ---------------------------------------------------------------------------
// Starter
// ---------------------------------------------------------------------------

/// A binary switch owned by exactly one capsule at a time.
///
/// Carries an append-only history of the events that affected it and a
/// free-form trait map. Ownership transfers only through protocol events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Starter {
    /// Unique identifier.
    pub id: StarterId,
    /// The capsule that currently owns the starter.
    pub capsule_id: CapsuleId,
    /// The slot kind the starter sits in.
    pub slot_type: SlotType,
    /// Binary status, flipped only by event mechanics.
    pub status: StarterStatus,
    /// When the starter was minted.
    pub created_at: DateTime<Utc>,
    /// Event IDs that affected this starter, in order.
    pub history: Vec<EventId>,
    /// Free-form trait map.
    pub traits: BTreeMap<String, Value>,
    /// The connection currently carrying the starter, if any.
    pub connection_id: Option<ConnectionId>,
}

impl Starter {
    /// Mint a fresh starter for a capsule, off and with no history.
    pub fn new(capsule_id: CapsuleId, slot_type: SlotType) -> Self {
        Self {
            id: StarterId::new(),
            capsule_id,
            slot_type,
            status: StarterStatus::Off,
            created_at: Utc::now(),
            history: Vec::new(),
            traits: BTreeMap::new(),
            connection_id: None,
        }
    }

    /// Mint a starter whose identity is derived from the event that
    /// caused it.
    ///
    /// Used wherever a starter must come out identical on every replay of
    /// the same ledger: the ID is a v5 derivation of `event_id` and the
    /// creation time is the event's own timestamp, so no call to the wall
    /// clock happens on this path.
    pub fn from_event(
        event_id: EventId,
        timestamp: DateTime<Utc>,
        capsule_id: CapsuleId,
        slot_type: SlotType,
    ) -> Self {
        Self {
            id: StarterId::derived_from(event_id),
            capsule_id,
            slot_type,
            status: StarterStatus::Off,
            created_at: timestamp,
            history: vec![event_id],
            traits: BTreeMap::new(),
            connection_id: None,
        }
    }

    /// Flip the binary status. Only called by event mechanics.
    pub const fn toggle(&mut self) {
        self.status = self.status.toggled();
    }

    /// Append an event to the starter's history.
    pub fn record_event(&mut self, event_id: EventId) {
        self.history.push(event_id);
    }
}

// ---------------------------------------------------------------------------
// Relationship state
// ---------------------------------------------------------------------------

/// Four independent booleans per ordered pair of capsules.
///
/// Absence of an entry is equivalent to all-false; lookups on a capsule
/// use get-or-create semantics, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelationshipState {
    /// An invitation from the other capsule is outstanding.
    pub invited: bool,
    /// The other capsule is trusted.
    pub trusted: bool,
    /// A link with the other capsule has been completed.
    pub linked: bool,
    /// Events from the other capsule are ignored.
    pub ignored: bool,
}

impl RelationshipState {
    /// Flip the named flag. Toggling twice restores the original value.
    pub const fn toggle(&mut self, flag: RelationshipFlag) {
        match flag {
            RelationshipFlag::Invited => self.invited = !self.invited,
            RelationshipFlag::Trusted => self.trusted = !self.trusted,
            RelationshipFlag::Linked => self.linked = !self.linked,
            RelationshipFlag::Ignored => self.ignored = !self.ignored,
        }
    }

    /// Read the named flag.
    pub const fn get(&self, flag: RelationshipFlag) -> bool {
        match flag {
            RelationshipFlag::Invited => self.invited,
            RelationshipFlag::Trusted => self.trusted,
            RelationshipFlag::Linked => self.linked,
            RelationshipFlag::Ignored => self.ignored,
        }
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A link between two capsules carried by one starter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Unique identifier.
    pub id: ConnectionId,
    /// One endpoint (the proposer).
    pub capsule_a: CapsuleId,
    /// The other endpoint.
    pub capsule_b: CapsuleId,
    /// The slot kind the connection runs over.
    pub starter_type: SlotType,
    /// Lifecycle status.
    pub status: ConnectionStatus,
    /// When the connection was proposed.
    pub created_at: DateTime<Utc>,
    /// When the status last changed.
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Pending invitation
// ---------------------------------------------------------------------------

/// The shared record of an invitation awaiting a decision.
///
/// Lives outside any single capsule's ledger so that the recipient can
/// discover and answer invitations without reading the sender's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInvitation {
    /// Identifier shared with the invitation event.
    pub invitation_id: InvitationId,
    /// The inviting capsule.
    pub sender: CapsuleId,
    /// The invited capsule.
    pub recipient: CapsuleId,
    /// The slot kind offered.
    pub slot_type: SlotType,
    /// The sender's starter backing the offer.
    pub starter_id: StarterId,
    /// When the invitation was sent.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Capsule
// ---------------------------------------------------------------------------

/// A named participant in the network.
///
/// Created once, lives for the process lifetime. The slot map always
/// contains all five kinds; genesis capsules additionally get a fresh
/// starter in every slot at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capsule {
    id: CapsuleId,
    capsule_type: CapsuleType,
    slots: BTreeMap<SlotType, Slot>,
    starters: BTreeMap<StarterId, Starter>,
    relationships: BTreeMap<CapsuleId, RelationshipState>,
    connections: BTreeSet<ConnectionId>,
}

impl Capsule {
    /// Create a capsule of the given type.
    ///
    /// Every slot starts present; for [`CapsuleType::Genesis`] each slot
    /// is immediately occupied by a freshly minted starter in the
    /// [`StarterStatus::Off`] status.
    pub fn new(id: CapsuleId, capsule_type: CapsuleType) -> Self {
        let mut slots: BTreeMap<SlotType, Slot> = SlotType::ALL
            .into_iter()
            .map(|slot_type| (slot_type, Slot::new(slot_type)))
            .collect();
        let mut starters = BTreeMap::new();

        if capsule_type == CapsuleType::Genesis {
            for slot_type in SlotType::ALL {
                let starter = Starter::new(id.clone(), slot_type);
                if let Some(slot) = slots.get_mut(&slot_type) {
                    slot.starter_id = Some(starter.id);
                }
                starters.insert(starter.id, starter);
            }
        }

        Self {
            id,
            capsule_type,
            slots,
            starters,
            relationships: BTreeMap::new(),
            connections: BTreeSet::new(),
        }
    }

    /// The capsule's identifier.
    pub const fn id(&self) -> &CapsuleId {
        &self.id
    }

    /// The capsule's provisioning class.
    pub const fn capsule_type(&self) -> CapsuleType {
        self.capsule_type
    }

    /// Look up a slot by kind.
    pub fn slot(&self, slot_type: SlotType) -> Option<&Slot> {
        self.slots.get(&slot_type)
    }

    /// All slots in declaration order.
    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        SlotType::ALL
            .iter()
            .filter_map(|slot_type| self.slots.get(slot_type))
    }

    /// Whether the named slot currently holds no starter.
    pub fn is_slot_empty(&self, slot_type: SlotType) -> bool {
        self.slots.get(&slot_type).is_none_or(Slot::is_empty)
    }

    /// The first empty, unlocked slot in declaration order.
    pub fn first_empty_slot(&self) -> Option<SlotType> {
        SlotType::ALL.into_iter().find(|slot_type| {
            self.slots
                .get(slot_type)
                .is_some_and(|slot| slot.is_empty() && !slot.locked)
        })
    }

    /// How many slots currently hold a starter.
    pub fn occupied_slot_count(&self) -> usize {
        self.slots().filter(|slot| !slot.is_empty()).count()
    }

    /// Install a starter into a slot.
    ///
    /// The locked and occupied checks and the installation happen in one
    /// call, so occupation is atomic from the caller's perspective.
    ///
    /// # Errors
    ///
    /// [`EntityError::SlotLocked`] when the slot rejects occupation,
    /// [`EntityError::SlotOccupied`] when it already holds a starter.
    pub fn occupy_slot(&mut self, slot_type: SlotType, starter: Starter) -> Result<(), EntityError> {
        let Some(slot) = self.slots.get_mut(&slot_type) else {
            // The slot map always contains all kinds; treat a miss as locked.
            return Err(EntityError::SlotLocked { slot_type });
        };
        if slot.locked {
            return Err(EntityError::SlotLocked { slot_type });
        }
        if !slot.is_empty() {
            return Err(EntityError::SlotOccupied { slot_type });
        }
        slot.starter_id = Some(starter.id);
        self.starters.insert(starter.id, starter);
        Ok(())
    }

    /// Empty a slot, handing back the starter it held.
    pub fn release_slot(&mut self, slot_type: SlotType) -> Option<Starter> {
        let starter_id = self.slots.get_mut(&slot_type)?.starter_id.take()?;
        self.starters.remove(&starter_id)
    }

    /// Lock a slot against new occupation.
    pub fn lock_slot(&mut self, slot_type: SlotType) {
        if let Some(slot) = self.slots.get_mut(&slot_type) {
            slot.locked = true;
        }
    }

    /// Unlock a previously locked slot.
    pub fn unlock_slot(&mut self, slot_type: SlotType) {
        if let Some(slot) = self.slots.get_mut(&slot_type) {
            slot.locked = false;
        }
    }

    /// Look up a starter owned by this capsule.
    pub fn starter(&self, starter_id: StarterId) -> Option<&Starter> {
        self.starters.get(&starter_id)
    }

    /// Mutable access to a starter owned by this capsule.
    pub fn starter_mut(&mut self, starter_id: StarterId) -> Option<&mut Starter> {
        self.starters.get_mut(&starter_id)
    }

    /// Read the relationship toward another capsule.
    ///
    /// Absent entries read as all-false; this never creates an entry.
    pub fn relationship(&self, other: &CapsuleId) -> RelationshipState {
        self.relationships.get(other).copied().unwrap_or_default()
    }

    /// Mutable relationship toward another capsule, created zeroed on
    /// first access.
    pub fn relationship_mut(&mut self, other: &CapsuleId) -> &mut RelationshipState {
        self.relationships.entry(other.clone()).or_default()
    }

    /// All known relationships in capsule-ID order.
    pub const fn relationships(&self) -> &BTreeMap<CapsuleId, RelationshipState> {
        &self.relationships
    }

    /// Record a connection on this capsule.
    pub fn add_connection(&mut self, connection_id: ConnectionId) {
        self.connections.insert(connection_id);
    }

    /// Forget a connection. No-op when absent.
    pub fn remove_connection(&mut self, connection_id: ConnectionId) {
        self.connections.remove(&connection_id);
    }

    /// The set of connection IDs recorded on this capsule.
    pub const fn connections(&self) -> &BTreeSet<ConnectionId> {
        &self.connections
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn proto() -> Capsule {
        Capsule::new(CapsuleId::from("proto-1"), CapsuleType::Proto)
    }

    #[test]
    fn genesis_starts_fully_occupied() {
        let capsule = Capsule::new(CapsuleId::from("genesis-1"), CapsuleType::Genesis);
        assert_eq!(capsule.occupied_slot_count(), SlotType::ALL.len());
        for slot in capsule.slots() {
            let starter_id = slot.starter_id.unwrap();
            let starter = capsule.starter(starter_id).unwrap();
            assert_eq!(starter.status, StarterStatus::Off);
            assert_eq!(starter.slot_type, slot.slot_type);
        }
    }

    #[test]
    fn proto_starts_empty() {
        let capsule = proto();
        assert_eq!(capsule.occupied_slot_count(), 0);
        assert_eq!(capsule.first_empty_slot(), Some(SlotType::Juice));
    }

    #[test]
    fn occupy_slot_is_atomic_check_and_set() {
        let mut capsule = proto();
        let starter = Starter::new(capsule.id().clone(), SlotType::Seed);
        let starter_id = starter.id;
        capsule.occupy_slot(SlotType::Seed, starter).unwrap();

        assert!(!capsule.is_slot_empty(SlotType::Seed));
        assert_eq!(capsule.starter(starter_id).unwrap().id, starter_id);

        // Second occupation of the same slot is rejected.
        let another = Starter::new(capsule.id().clone(), SlotType::Seed);
        let result = capsule.occupy_slot(SlotType::Seed, another);
        assert!(matches!(result, Err(EntityError::SlotOccupied { .. })));
    }

    #[test]
    fn locked_slot_rejects_occupation() {
        let mut capsule = proto();
        capsule.lock_slot(SlotType::Juice);
        let starter = Starter::new(capsule.id().clone(), SlotType::Juice);
        let result = capsule.occupy_slot(SlotType::Juice, starter);
        assert!(matches!(result, Err(EntityError::SlotLocked { .. })));

        // Locked slots are also skipped by first-empty search.
        assert_eq!(capsule.first_empty_slot(), Some(SlotType::Spark));
    }

    #[test]
    fn release_slot_hands_back_the_starter() {
        let mut capsule = proto();
        let starter = Starter::new(capsule.id().clone(), SlotType::Kick);
        let starter_id = starter.id;
        capsule.occupy_slot(SlotType::Kick, starter).unwrap();

        let released = capsule.release_slot(SlotType::Kick).unwrap();
        assert_eq!(released.id, starter_id);
        assert!(capsule.is_slot_empty(SlotType::Kick));
        assert!(capsule.starter(starter_id).is_none());
    }

    #[test]
    fn relationship_lookup_creates_zeroed_entry() {
        let mut capsule = proto();
        let other = CapsuleId::from("genesis-1");

        // Read-only lookup reports all-false without creating anything.
        assert_eq!(capsule.relationship(&other), RelationshipState::default());
        assert!(capsule.relationships().is_empty());

        capsule.relationship_mut(&other).invited = true;
        assert!(capsule.relationship(&other).invited);
        assert_eq!(capsule.relationships().len(), 1);
    }

    #[test]
    fn relationship_flags_toggle_in_pairs() {
        let mut rel = RelationshipState::default();
        rel.toggle(RelationshipFlag::Trusted);
        assert!(rel.trusted);
        rel.toggle(RelationshipFlag::Trusted);
        assert!(!rel.trusted);
        // Other flags untouched throughout.
        assert!(!rel.invited && !rel.linked && !rel.ignored);
    }

    #[test]
    fn starter_from_event_is_reproducible() {
        let event_id = EventId::new();
        let ts = Utc::now();
        let a = Starter::from_event(event_id, ts, CapsuleId::from("proto-1"), SlotType::Juice);
        let b = Starter::from_event(event_id, ts, CapsuleId::from("proto-1"), SlotType::Juice);
        assert_eq!(a, b);
        assert_eq!(a.history, vec![event_id]);
    }

    #[test]
    fn capsule_roundtrip_serde() {
        let mut capsule = Capsule::new(CapsuleId::from("genesis-1"), CapsuleType::Genesis);
        capsule.relationship_mut(&CapsuleId::from("proto-1")).trusted = true;
        capsule.add_connection(ConnectionId::new());

        let json = serde_json::to_string(&capsule).unwrap();
        let restored: Capsule = serde_json::from_str(&json).unwrap();
        assert_eq!(capsule, restored);
    }
}
