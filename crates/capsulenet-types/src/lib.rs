//! Shared type definitions for the CapsuleNet capsule network.
//!
//! This crate holds the vocabulary every other crate speaks:
//!
//! - [`ids`] -- strongly-typed identifier wrappers.
//! - [`enums`] -- capsule, slot, starter, and relationship enumerations.
//! - [`entities`] -- the entity model: [`Capsule`], [`Slot`], [`Starter`],
//!   [`RelationshipState`], [`Connection`], and the shared
//!   [`PendingInvitation`] record.
//! - [`events`] -- the closed event model: [`Event`], [`EventPayload`],
//!   [`UserAction`], and the [`EventType`] dispatch tag.
//!
//! Everything here is pure data plus invariant-preserving mutators. The
//! replay, dispatch, and persistence machinery live in the downstream
//! crates (`capsulenet-core`, `capsulenet-ledger`, `capsulenet-store`).

pub mod entities;
pub mod enums;
pub mod events;
pub mod ids;

pub use entities::{
    Capsule, Connection, EntityError, PendingInvitation, RelationshipState, Slot, Starter,
};
pub use enums::{CapsuleType, ConnectionStatus, RelationshipFlag, SlotType, StarterStatus};
pub use events::{Event, EventPayload, EventType, UserAction};
pub use ids::{CapsuleId, ConnectionId, EventId, InvitationId, StarterId};
