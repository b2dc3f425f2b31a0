//! The trust protocol.
//!
//! Pure toggle semantics keyed by ordered pair, plus one rule: a starter
//! generated from an accepted invitation sets the trusted flag toward
//! the inviter (auto-trust). A manual toggle after auto-trust flips it
//! off again; the composition is intentional.

use std::sync::Arc;

use capsulenet_types::{Capsule, Event, EventPayload, EventType, UserAction};

use crate::bus::{EventBus, EventHandler, HandlerId, ModuleError};

/// Handler encoding manual flag toggles and auto-trust.
pub struct TrustModule;

impl TrustModule {
    /// The event variants this module reacts to.
    pub const EVENT_TYPES: [EventType; 2] = [EventType::UserAction, EventType::StarterGenerated];

    /// Subscribe one shared instance to all of its event variants.
    pub fn subscribe_on(bus: &mut EventBus, priority: i32) -> Vec<HandlerId> {
        let handler: Arc<dyn EventHandler> = Arc::new(Self);
        Self::EVENT_TYPES
            .iter()
            .map(|event_type| bus.subscribe(*event_type, Arc::clone(&handler), priority))
            .collect()
    }
}

impl EventHandler for TrustModule {
    fn name(&self) -> &'static str {
        "trust"
    }

    fn on_event(&self, event: &Event, capsule: &mut Capsule) -> Result<Vec<Event>, ModuleError> {
        match &event.payload {
            EventPayload::UserAction(UserAction::ToggleState { target, flag }) => {
                capsule.relationship_mut(target).toggle(*flag);
                tracing::debug!(
                    capsule = %capsule.id(),
                    target = %target,
                    flag = ?flag,
                    "relationship flag toggled"
                );
            }

            EventPayload::StarterGenerated {
                from_invitation: true,
                inviter: Some(inviter),
                burned: false,
                ..
            } => {
                capsule.relationship_mut(inviter).trusted = true;
            }

            _ => {}
        }
        Ok(Vec::new())
    }
}
