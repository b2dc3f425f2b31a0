//! The invitation protocol state machine.
//!
//! Per ordered pair (inviter, invitee) the machine is tiny:
//!
//! ```text
//! NONE --invite--> INVITED --accept--> NONE (slot occupied, auto-trust)
//!                      \----reject--> NONE (optional burn record)
//! ```
//!
//! Re-inviting while already invited is a no-op. Acceptance clears the
//! flag, occupies the first empty unlocked slot, and emits the
//! starter-generation event that downstream triggers auto-trust -- the
//! three effects land as one unit inside a single handler invocation.
//!
//! Acceptance with no vacant slot is the *lost invitation* outcome: the
//! flag still clears, nothing is generated, and a warning is logged. The
//! caller-facing disposition is derived from the chain outcome (no
//! starter event means lost).

use std::sync::Arc;

use capsulenet_types::{Capsule, CapsuleId, Event, EventPayload, EventType, Starter, StarterId, UserAction};

use crate::bus::{EventBus, EventHandler, HandlerId, ModuleError};

/// Handler encoding invitation, acceptance, and rejection.
pub struct InvitationModule;

impl InvitationModule {
    /// The event variants this module reacts to.
    pub const EVENT_TYPES: [EventType; 3] = [
        EventType::Invitation,
        EventType::LinkIntent,
        EventType::UserAction,
    ];

    /// Subscribe one shared instance to all of its event variants.
    pub fn subscribe_on(bus: &mut EventBus, priority: i32) -> Vec<HandlerId> {
        let handler: Arc<dyn EventHandler> = Arc::new(Self);
        Self::EVENT_TYPES
            .iter()
            .map(|event_type| bus.subscribe(*event_type, Arc::clone(&handler), priority))
            .collect()
    }

    fn handle_invite(
        event: &Event,
        capsule: &mut Capsule,
        sender: &CapsuleId,
        recipient: &CapsuleId,
        starter_id: StarterId,
    ) -> Vec<Event> {
        if sender == capsule.id() {
            // Sender side: the offered starter remembers the event.
            if let Some(starter) = capsule.starter_mut(starter_id) {
                starter.record_event(event.id);
            }
            return Vec::new();
        }
        if recipient != capsule.id() {
            return Vec::new();
        }
        capsule.relationship_mut(sender).invited = true;
        Vec::new()
    }

    fn handle_accept(
        event: &Event,
        capsule: &mut Capsule,
        sender: &CapsuleId,
        offered_starter: StarterId,
    ) -> Result<Vec<Event>, ModuleError> {
        if !capsule.relationship(sender).invited {
            return Ok(Vec::new());
        }
        capsule.relationship_mut(sender).invited = false;

        let Some(slot_type) = capsule.first_empty_slot() else {
            tracing::warn!(
                capsule = %capsule.id(),
                inviter = %sender,
                "accepted invitation lost: no empty unlocked slot"
            );
            return Ok(Vec::new());
        };

        let starter = Starter::from_event(
            event.id,
            event.timestamp,
            capsule.id().clone(),
            slot_type,
        );
        let starter_id = starter.id;
        capsule.occupy_slot(slot_type, starter)?;

        Ok(vec![Event::new(EventPayload::StarterGenerated {
            starter_id,
            capsule_id: capsule.id().clone(),
            slot_type: Some(slot_type),
            from_invitation: true,
            inviter: Some(sender.clone()),
            original_starter: Some(offered_starter),
            burned: false,
        })])
    }

    fn handle_reject(
        capsule: &mut Capsule,
        sender: &CapsuleId,
        offered_starter: StarterId,
    ) -> Vec<Event> {
        if !capsule.relationship(sender).invited {
            return Vec::new();
        }
        capsule.relationship_mut(sender).invited = false;

        // Only record the burn when the starter had somewhere to land.
        if capsule.first_empty_slot().is_none() {
            return Vec::new();
        }

        vec![Event::new(EventPayload::StarterGenerated {
            starter_id: offered_starter,
            capsule_id: capsule.id().clone(),
            slot_type: None,
            from_invitation: false,
            inviter: Some(sender.clone()),
            original_starter: Some(offered_starter),
            burned: true,
        })]
    }
}

impl EventHandler for InvitationModule {
    fn name(&self) -> &'static str {
        "invitation"
    }

    fn on_event(&self, event: &Event, capsule: &mut Capsule) -> Result<Vec<Event>, ModuleError> {
        match &event.payload {
            EventPayload::Invitation {
                sender,
                recipient,
                starter_id,
                ..
            }
            | EventPayload::LinkIntent {
                sender,
                recipient,
                starter_id,
                ..
            } => Ok(Self::handle_invite(
                event, capsule, sender, recipient, *starter_id,
            )),

            EventPayload::UserAction(UserAction::AcceptInvite { sender, starter_id }) => {
                Self::handle_accept(event, capsule, sender, *starter_id)
            }

            EventPayload::UserAction(UserAction::RejectInvite {
                sender, starter_id, ..
            }) => Ok(Self::handle_reject(capsule, sender, *starter_id)),

            _ => Ok(Vec::new()),
        }
    }
}
