//! Immutable state replay, event dispatch, and the invitation/trust
//! protocols.
//!
//! # Architecture
//!
//! - [`state`] -- The immutable [`State`] snapshot and its deterministic
//!   `apply_event` fold. Replaying a ledger from genesis always rebuilds
//!   the same state, field for field.
//! - [`bus`] -- The [`EventBus`]: variant-keyed publish/subscribe plus the
//!   bounded work queue that drains cascading event chains.
//! - [`invitation`] -- The invitation protocol module (invite, accept,
//!   reject, slot occupation).
//! - [`trust`] -- The trust protocol module (manual toggles and
//!   auto-trust on acceptance).
//!
//! # Control flow
//!
//! A caller constructs an [`Event`] and hands it to
//! [`EventBus::process_event_chain`]. The bus appends each event to the
//! capsule's ledger, folds it into the current [`State`], publishes it to
//! the subscribed protocol modules, and enqueues whatever follow-up
//! events they produce -- until the queue runs dry. The append and the
//! fold happen inside one call under the caller's lock, so no reader ever
//! observes a ledger ahead of its state or vice versa.
//!
//! [`Event`]: capsulenet_types::Event

pub mod bus;
pub mod invitation;
pub mod state;
pub mod trust;

pub use bus::{
    BusError, ChainOutcome, EventBus, EventHandler, HandlerFault, HandlerId, ModuleError,
    PublishReport,
};
pub use invitation::InvitationModule;
pub use state::{StarterSnapshot, State};
pub use trust::TrustModule;
