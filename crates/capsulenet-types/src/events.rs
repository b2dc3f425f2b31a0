//! The closed event model.
//!
//! Every state transition in the network is described by exactly one
//! [`EventPayload`] variant. The set is closed on purpose: dispatch in the
//! event bus and the replay fold both match exhaustively, so adding a
//! variant is a compile-time ripple through every place that must handle
//! it, never a silently dropped message.
//!
//! Events are immutable once constructed. Each one carries its own ID,
//! its creation timestamp, and a free-form metadata map for
//! variant-agnostic annotations; replay never consults a clock, only the
//! data recorded here.
//!
//! On the wire the payload is internally tagged with `event_type`, so a
//! record with an unrecognized tag fails deserialization outright instead
//! of being dropped or coerced.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::enums::{RelationshipFlag, SlotType};
use crate::ids::{CapsuleId, ConnectionId, EventId, InvitationId, StarterId};

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// An immutable record of one thing that happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier of this event.
    pub id: EventId,
    /// When the event was constructed.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    #[serde(flatten)]
    pub payload: EventPayload,
    /// Free-form annotations that travel with the event.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Event {
    /// Construct a new event with a fresh ID and the current timestamp.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            payload,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry, builder-style.
    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_owned(), value);
        self
    }

    /// Return the dispatch tag for this event.
    pub const fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}

// ---------------------------------------------------------------------------
// Payload variants
// ---------------------------------------------------------------------------

/// The closed set of event variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A capsule offers one of its starters to another capsule.
    Invitation {
        /// Identifier shared with the pending-invitation record.
        invitation_id: InvitationId,
        /// The inviting capsule.
        sender: CapsuleId,
        /// The invited capsule.
        recipient: CapsuleId,
        /// The starter backing the offer.
        starter_id: StarterId,
        /// The slot kind the offer concerns.
        slot_type: SlotType,
    },

    /// Sender-side acknowledgment that an invitation was accepted.
    InvitationAccepted {
        /// The invitation that was accepted.
        invitation_id: InvitationId,
        /// The capsule that accepted.
        acceptor: CapsuleId,
        /// The starter the acceptor generated, when one was.
        new_starter_id: Option<StarterId>,
    },

    /// Sender-side acknowledgment that an invitation was rejected.
    InvitationRejected {
        /// The invitation that was rejected.
        invitation_id: InvitationId,
        /// The capsule that rejected.
        rejector: CapsuleId,
        /// Optional free-text reason.
        reason: Option<String>,
        /// Whether the offered starter was burned in the process.
        burned: bool,
    },

    /// A declared intent to link two capsules over a starter.
    LinkIntent {
        /// The proposing capsule.
        sender: CapsuleId,
        /// The capsule being proposed to.
        recipient: CapsuleId,
        /// The starter backing the proposal.
        starter_id: StarterId,
        /// The slot kind the proposal concerns.
        slot_type: SlotType,
    },

    /// Intent to accept a previously declared link.
    AcceptIntent {
        /// The capsule accepting.
        sender: CapsuleId,
        /// The original proposer.
        recipient: CapsuleId,
        /// The starter the intent concerns.
        starter_id: StarterId,
        /// The slot kind the intent concerns.
        slot_type: SlotType,
    },

    /// Intent to reject a previously declared link.
    RejectIntent {
        /// The capsule rejecting.
        sender: CapsuleId,
        /// The original proposer.
        recipient: CapsuleId,
        /// The starter the intent concerns.
        starter_id: StarterId,
        /// The slot kind the intent concerns.
        slot_type: SlotType,
        /// Optional free-text reason.
        reason: Option<String>,
    },

    /// Confirmation that a link was established.
    ConfirmAccept {
        /// The connection being confirmed.
        connection_id: ConnectionId,
        /// The starter carried by the connection.
        starter_id: StarterId,
        /// The starter generated on the accepting side, when one was.
        new_starter_id: Option<StarterId>,
    },

    /// Confirmation that a link was declined.
    ConfirmReject {
        /// The connection being declined.
        connection_id: ConnectionId,
        /// The starter the connection carried.
        starter_id: StarterId,
        /// Whether the starter was burned rather than returned.
        burned: bool,
    },

    /// A starter is destroyed; its slot becomes empty again.
    Burn {
        /// The starter being burned.
        starter_id: StarterId,
        /// The capsule that owned it.
        capsule_id: CapsuleId,
        /// Free-text reason for the burn.
        reason: String,
    },

    /// A starter goes back to the capsule it came from.
    Return {
        /// The starter being returned.
        starter_id: StarterId,
        /// The capsule giving the starter up.
        from_capsule: CapsuleId,
        /// The capsule receiving it back.
        to_capsule: CapsuleId,
        /// The connection the starter traveled on.
        connection_id: ConnectionId,
    },

    /// A fresh starter is minted into a slot.
    Generate {
        /// The capsule the starter is minted for.
        capsule_id: CapsuleId,
        /// The slot kind it occupies.
        slot_type: SlotType,
        /// Explicit starter ID, when the caller already minted one.
        /// Absent means the ID is derived from this event's ID.
        starter_id: Option<StarterId>,
        /// Lineage pointer when the starter is modeled on another.
        based_on: Option<StarterId>,
    },

    /// A deliberate action taken by the capsule's operator.
    UserAction(UserAction),

    /// A starter came into (or went out of) existence as a protocol
    /// side effect. The `burned` flavor records a starter that was
    /// destroyed instead of minted.
    StarterGenerated {
        /// The starter concerned.
        starter_id: StarterId,
        /// The capsule the event happened on.
        capsule_id: CapsuleId,
        /// The slot the starter landed in, when it landed.
        slot_type: Option<SlotType>,
        /// True when the starter exists because an invitation was accepted.
        from_invitation: bool,
        /// The inviting capsule, when `from_invitation` applies or the
        /// burn traces back to an invitation.
        inviter: Option<CapsuleId>,
        /// The inviter's starter that seeded this one, when known.
        original_starter: Option<StarterId>,
        /// True for the burn flavor.
        burned: bool,
    },
}

impl EventPayload {
    /// Return the dispatch tag for this payload.
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::Invitation { .. } => EventType::Invitation,
            Self::InvitationAccepted { .. } => EventType::InvitationAccepted,
            Self::InvitationRejected { .. } => EventType::InvitationRejected,
            Self::LinkIntent { .. } => EventType::LinkIntent,
            Self::AcceptIntent { .. } => EventType::AcceptIntent,
            Self::RejectIntent { .. } => EventType::RejectIntent,
            Self::ConfirmAccept { .. } => EventType::ConfirmAccept,
            Self::ConfirmReject { .. } => EventType::ConfirmReject,
            Self::Burn { .. } => EventType::Burn,
            Self::Return { .. } => EventType::Return,
            Self::Generate { .. } => EventType::Generate,
            Self::UserAction(_) => EventType::UserAction,
            Self::StarterGenerated { .. } => EventType::StarterGenerated,
        }
    }
}

// ---------------------------------------------------------------------------
// User actions
// ---------------------------------------------------------------------------

/// The deliberate operations a capsule operator can take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UserAction {
    /// Flip one named relationship flag toward another capsule.
    ToggleState {
        /// The capsule the relationship points at.
        target: CapsuleId,
        /// Which flag to flip.
        flag: RelationshipFlag,
    },
    /// Accept an outstanding invitation.
    AcceptInvite {
        /// The capsule that sent the invitation.
        sender: CapsuleId,
        /// The sender's starter the invitation offered.
        starter_id: StarterId,
    },
    /// Reject an outstanding invitation.
    RejectInvite {
        /// The capsule that sent the invitation.
        sender: CapsuleId,
        /// The sender's starter the invitation offered.
        starter_id: StarterId,
        /// Optional free-text reason.
        reason: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Dispatch tag
// ---------------------------------------------------------------------------

/// Fieldless mirror of [`EventPayload`], used as the subscription key in
/// the event bus and as the tag written into ledger entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// See [`EventPayload::Invitation`].
    Invitation,
    /// See [`EventPayload::InvitationAccepted`].
    InvitationAccepted,
    /// See [`EventPayload::InvitationRejected`].
    InvitationRejected,
    /// See [`EventPayload::LinkIntent`].
    LinkIntent,
    /// See [`EventPayload::AcceptIntent`].
    AcceptIntent,
    /// See [`EventPayload::RejectIntent`].
    RejectIntent,
    /// See [`EventPayload::ConfirmAccept`].
    ConfirmAccept,
    /// See [`EventPayload::ConfirmReject`].
    ConfirmReject,
    /// See [`EventPayload::Burn`].
    Burn,
    /// See [`EventPayload::Return`].
    Return,
    /// See [`EventPayload::Generate`].
    Generate,
    /// See [`EventPayload::UserAction`].
    UserAction,
    /// See [`EventPayload::StarterGenerated`].
    StarterGenerated,
}

impl EventType {
    /// The snake_case tag, identical to the serialized `event_type` field.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Invitation => "invitation",
            Self::InvitationAccepted => "invitation_accepted",
            Self::InvitationRejected => "invitation_rejected",
            Self::LinkIntent => "link_intent",
            Self::AcceptIntent => "accept_intent",
            Self::RejectIntent => "reject_intent",
            Self::ConfirmAccept => "confirm_accept",
            Self::ConfirmReject => "confirm_reject",
            Self::Burn => "burn",
            Self::Return => "return",
            Self::Generate => "generate",
            Self::UserAction => "user_action",
            Self::StarterGenerated => "starter_generated",
        }
    }
}

impl core::fmt::Display for EventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.tag())
    }
}
