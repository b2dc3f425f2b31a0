//! The immutable replayed state of one capsule.
//!
//! A [`State`] is derived by folding a capsule's ledger from genesis.
//! [`State::apply_event`] never mutates in place: it returns a new value
//! with the replay sequence counter advanced by exactly one, whether or
//! not the event changed any visible field.
//!
//! # Determinism
//!
//! Replaying the same ordered event sequence from the empty initial
//! state must always produce a field-for-field identical result,
//! independent of wall-clock time or process restarts. Two rules keep
//! that true:
//!
//! - The fold reads only data carried by the event (IDs, timestamps,
//!   payload fields) -- never a clock, never ambient state.
//! - The one ID minted during a fold -- the starter created when an
//!   invitation is accepted -- is derived from the accepting event's ID
//!   ([`StarterId::derived_from`]), so it comes out the same on every
//!   replay.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use capsulenet_types::{
    CapsuleId, CapsuleType, Connection, ConnectionId, ConnectionStatus, Event, EventId,
    EventPayload, RelationshipState, SlotType, StarterId, StarterStatus, UserAction,
};

// ---------------------------------------------------------------------------
// StarterSnapshot
// ---------------------------------------------------------------------------

/// The replayed view of one starter sitting in a slot.
///
/// Deliberately carries no wall-clock field: everything in a snapshot is
/// reproducible from the ledger alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarterSnapshot {
    /// The starter's identifier.
    pub starter_id: StarterId,
    /// The capsule that owns it.
    pub capsule_id: CapsuleId,
    /// The slot kind it occupies.
    pub slot_type: SlotType,
    /// Binary status.
    pub status: StarterStatus,
    /// Event IDs that affected this starter, in replay order.
    pub history: Vec<EventId>,
    /// The connection currently carrying the starter, if any.
    pub connection_id: Option<ConnectionId>,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Immutable snapshot of one capsule, derived by replaying its ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    capsule_id: CapsuleId,
    capsule_type: CapsuleType,
    slots: BTreeMap<SlotType, Option<StarterSnapshot>>,
    relationships: BTreeMap<CapsuleId, RelationshipState>,
    connections: Vec<Connection>,
    sequence: u64,
}

impl State {
    /// The empty initial state: every slot vacant, no relationships, no
    /// connections, sequence zero.
    pub fn initial(capsule_id: CapsuleId, capsule_type: CapsuleType) -> Self {
        Self {
            capsule_id,
            capsule_type,
            slots: SlotType::ALL
                .into_iter()
                .map(|slot_type| (slot_type, None))
                .collect(),
            relationships: BTreeMap::new(),
            connections: Vec::new(),
            sequence: 0,
        }
    }

    /// Rebuild a state by folding every event in order from genesis.
    pub fn replay<'a, I>(capsule_id: CapsuleId, capsule_type: CapsuleType, events: I) -> Self
    where
        I: IntoIterator<Item = &'a Event>,
    {
        events
            .into_iter()
            .fold(Self::initial(capsule_id, capsule_type), |state, event| {
                state.apply_event(event)
            })
    }

    /// The capsule this state describes.
    pub const fn capsule_id(&self) -> &CapsuleId {
        &self.capsule_id
    }

    /// The capsule's provisioning class.
    pub const fn capsule_type(&self) -> CapsuleType {
        self.capsule_type
    }

    /// The replay sequence counter: how many events have been folded.
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The snapshot occupying a slot, if any.
    pub fn slot(&self, slot_type: SlotType) -> Option<&StarterSnapshot> {
        self.slots.get(&slot_type).and_then(Option::as_ref)
    }

    /// Whether a slot holds no starter.
    pub fn is_slot_empty(&self, slot_type: SlotType) -> bool {
        self.slot(slot_type).is_none()
    }

    /// How many slots hold a starter.
    pub fn occupied_slot_count(&self) -> usize {
        self.slots.values().filter(|s| s.is_some()).count()
    }

    /// Snapshots of every starter whose status is on.
    pub fn active_starters(&self) -> Vec<&StarterSnapshot> {
        self.slots
            .values()
            .filter_map(Option::as_ref)
            .filter(|snapshot| snapshot.status == StarterStatus::On)
            .collect()
    }

    /// The relationship toward another capsule; absent entries read as
    /// all-false.
    pub fn relationship(&self, other: &CapsuleId) -> RelationshipState {
        self.relationships.get(other).copied().unwrap_or_default()
    }

    /// All known relationships in capsule-ID order.
    pub const fn relationships(&self) -> &BTreeMap<CapsuleId, RelationshipState> {
        &self.relationships
    }

    /// Connections in the order they were first seen, optionally filtered
    /// by status.
    pub fn connections(&self, status: Option<ConnectionStatus>) -> Vec<&Connection> {
        self.connections
            .iter()
            .filter(|conn| status.is_none_or(|wanted| conn.status == wanted))
            .collect()
    }

    /// Fold one event into a new state.
    ///
    /// Always advances the sequence counter by exactly one; the
    /// variant-specific rules below decide whether anything visible
    /// changes. Variants with no rule here (intent and acknowledgment
    /// records) fold as sequence-only.
    #[must_use]
    pub fn apply_event(&self, event: &Event) -> Self {
        let mut next = self.clone();
        next.sequence = next.sequence.saturating_add(1);

        match &event.payload {
            EventPayload::Invitation {
                sender, recipient, ..
            } => {
                if *recipient == next.capsule_id {
                    next.relationship_entry(sender).invited = true;
                }
            }

            EventPayload::LinkIntent {
                sender,
                recipient,
                slot_type,
                ..
            } => {
                if *recipient == next.capsule_id {
                    next.relationship_entry(sender).invited = true;
                }
                if *recipient == next.capsule_id || *sender == next.capsule_id {
                    next.connections.push(Connection {
                        id: ConnectionId::derived_from(event.id),
                        capsule_a: sender.clone(),
                        capsule_b: recipient.clone(),
                        starter_type: *slot_type,
                        status: ConnectionStatus::Pending,
                        created_at: event.timestamp,
                        updated_at: event.timestamp,
                    });
                }
            }

            EventPayload::UserAction(action) => next.apply_user_action(event, action),

            EventPayload::StarterGenerated {
                from_invitation,
                inviter,
                burned,
                ..
            } => {
                if *from_invitation && !*burned {
                    if let Some(inviter) = inviter {
                        next.relationship_entry(inviter).trusted = true;
                    }
                }
            }

            EventPayload::Generate {
                capsule_id,
                slot_type,
                starter_id,
                ..
            } => {
                if *capsule_id == next.capsule_id && next.is_slot_empty(*slot_type) {
                    let id = (*starter_id).unwrap_or_else(|| StarterId::derived_from(event.id));
                    next.occupy(*slot_type, id, event.id);
                }
            }

            EventPayload::Burn {
                starter_id,
                capsule_id,
                ..
            } => {
                if *capsule_id == next.capsule_id {
                    if let Some(snapshot) = next.clear_slot_holding(*starter_id) {
                        if let Some(connection_id) = snapshot.connection_id {
                            next.set_connection_status(
                                connection_id,
                                ConnectionStatus::Burned,
                                event,
                            );
                        }
                    }
                }
            }

            EventPayload::Return {
                starter_id,
                from_capsule,
                ..
            } => {
                if *from_capsule == next.capsule_id {
                    let _ = next.clear_slot_holding(*starter_id);
                }
            }

            EventPayload::ConfirmAccept {
                connection_id,
                starter_id,
                ..
            } => {
                next.set_connection_status(*connection_id, ConnectionStatus::Active, event);
                for snapshot in next.slots.values_mut().filter_map(Option::as_mut) {
                    if snapshot.starter_id == *starter_id {
                        snapshot.connection_id = Some(*connection_id);
                        snapshot.history.push(event.id);
                    }
                }
            }

            EventPayload::ConfirmReject {
                connection_id,
                burned,
                ..
            } => {
                let status = if *burned {
                    ConnectionStatus::Burned
                } else {
                    ConnectionStatus::Rejected
                };
                next.set_connection_status(*connection_id, status, event);
            }

            // Sender-side acknowledgments and bare intents: sequence-only.
            EventPayload::InvitationAccepted { .. }
            | EventPayload::InvitationRejected { .. }
            | EventPayload::AcceptIntent { .. }
            | EventPayload::RejectIntent { .. } => {}
        }

        next
    }

    // -- fold helpers -------------------------------------------------------

    fn apply_user_action(&mut self, event: &Event, action: &UserAction) {
        match action {
            UserAction::ToggleState { target, flag } => {
                self.relationship_entry(target).toggle(*flag);
            }

            UserAction::AcceptInvite { sender, .. } => {
                if !self.relationship_entry(sender).invited {
                    return;
                }
                self.relationship_entry(sender).invited = false;

                let Some(slot_type) = self.first_empty_slot() else {
                    // No room: the acceptance is absorbed without
                    // occupation. The caller-facing outcome is surfaced
                    // by the invitation module, not here.
                    return;
                };
                self.occupy(slot_type, StarterId::derived_from(event.id), event.id);
            }

            UserAction::RejectInvite { sender, .. } => {
                if self.relationship_entry(sender).invited {
                    self.relationship_entry(sender).invited = false;
                }
            }
        }
    }

    fn relationship_entry(&mut self, other: &CapsuleId) -> &mut RelationshipState {
        self.relationships.entry(other.clone()).or_default()
    }

    /// First vacant slot in declaration order.
    fn first_empty_slot(&self) -> Option<SlotType> {
        SlotType::ALL
            .into_iter()
            .find(|slot_type| self.is_slot_empty(*slot_type))
    }

    fn occupy(&mut self, slot_type: SlotType, starter_id: StarterId, event_id: EventId) {
        self.slots.insert(
            slot_type,
            Some(StarterSnapshot {
                starter_id,
                capsule_id: self.capsule_id.clone(),
                slot_type,
                status: StarterStatus::Off,
                history: vec![event_id],
                connection_id: None,
            }),
        );
    }

    fn clear_slot_holding(&mut self, starter_id: StarterId) -> Option<StarterSnapshot> {
        for slot in self.slots.values_mut() {
            if slot.as_ref().is_some_and(|s| s.starter_id == starter_id) {
                return slot.take();
            }
        }
        None
    }

    fn set_connection_status(
        &mut self,
        connection_id: ConnectionId,
        status: ConnectionStatus,
        event: &Event,
    ) {
        for connection in &mut self.connections {
            if connection.id == connection_id {
                connection.status = status;
                connection.updated_at = event.timestamp;
            }
        }
    }
}
