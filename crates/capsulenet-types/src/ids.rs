//! Type-safe identifier wrappers.
//!
//! Every entity in the network has a strongly-typed ID to prevent
//! accidental mixing of identifiers at compile time. Freshly minted IDs
//! use UUID v7 (time-ordered); IDs that must be reproducible across
//! ledger replays are derived with UUID v5 from the event that caused
//! them, so replaying the same ledger always regenerates the same IDs.
//!
//! Capsule IDs are the one exception: they are free-form strings chosen
//! by the operator at creation time (`"genesis-1"`, `"proto-1"`), so
//! [`CapsuleId`] wraps a `String` rather than a [`Uuid`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace under which replay-deterministic IDs are derived (v5).
const DERIVED_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6b1f_4c2a_9e8d_4f0b_a3c7_51d2_e9a0_8c44);

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Derive a reproducible identifier from the event that caused it.
            ///
            /// The same event ID always derives the same identifier, which is
            /// what keeps ledger replay bit-identical across process restarts.
            pub fn derived_from(event_id: EventId) -> Self {
                Self(Uuid::new_v5(&DERIVED_ID_NAMESPACE, event_id.0.as_bytes()))
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for an event.
    EventId
}

define_id! {
    /// Unique identifier for a starter (the binary token held in a slot).
    StarterId
}

define_id! {
    /// Unique identifier for an invitation.
    InvitationId
}

define_id! {
    /// Unique identifier for a connection between two capsules.
    ConnectionId
}

/// Operator-chosen identifier for a capsule.
///
/// Unlike the UUID-backed IDs above, capsule IDs are human-readable names
/// picked at creation time and used in file names and status output.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct CapsuleId(String);

impl CapsuleId {
    /// Wrap an owned string as a capsule ID.
    pub const fn new(id: String) -> Self {
        Self(id)
    }

    /// Return the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for CapsuleId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CapsuleId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for CapsuleId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
