//! Enumeration types for the capsule network.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Capsule type
// ---------------------------------------------------------------------------

/// The provisioning class of a capsule, immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapsuleType {
    /// Provisioned at creation with every slot pre-occupied by a fresh
    /// starter in the [`StarterStatus::Off`] status.
    Genesis,
    /// Starts with every slot empty; acquires starters through the
    /// invitation protocol.
    Proto,
    /// A capsule that has completed at least one link; starts empty like
    /// [`CapsuleType::Proto`].
    Linked,
}

// ---------------------------------------------------------------------------
// Starter status
// ---------------------------------------------------------------------------

/// Binary status of a starter. Flipped only by event mechanics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StarterStatus {
    /// The switch is off (the state every starter is created in).
    Off,
    /// The switch is on.
    On,
}

impl StarterStatus {
    /// Return the opposite status.
    pub const fn toggled(self) -> Self {
        match self {
            Self::Off => Self::On,
            Self::On => Self::Off,
        }
    }
}

// ---------------------------------------------------------------------------
// Slot type
// ---------------------------------------------------------------------------

/// The five named slot kinds every capsule carries.
///
/// Declaration order is load-bearing: "first empty slot" during invitation
/// acceptance always means the first kind in this order, which is why
/// [`SlotType::ALL`] exists instead of ad-hoc iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotType {
    /// ⚡ Juice -- raw energy exchanged on first contact.
    Juice,
    /// 💥 Spark -- the impulse slot.
    Spark,
    /// 🌱 Seed -- long-term growth.
    Seed,
    /// 📡 Pulse -- periodic signal exchange.
    Pulse,
    /// 🔥 Kick -- activation push.
    Kick,
}

impl SlotType {
    /// All slot kinds in declaration order.
    pub const ALL: [Self; 5] = [Self::Juice, Self::Spark, Self::Seed, Self::Pulse, Self::Kick];

    /// Human-facing label, emoji included.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Juice => "⚡ Juice",
            Self::Spark => "💥 Spark",
            Self::Seed => "🌱 Seed",
            Self::Pulse => "📡 Pulse",
            Self::Kick => "🔥 Kick",
        }
    }
}

impl core::fmt::Display for SlotType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ---------------------------------------------------------------------------
// Connection status
// ---------------------------------------------------------------------------

/// Lifecycle status of a connection between two capsules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Proposed but not yet confirmed by the counterparty.
    Pending,
    /// Confirmed on both sides.
    Active,
    /// Declined by the counterparty.
    Rejected,
    /// Torn down because its starter was burned.
    Burned,
}

// ---------------------------------------------------------------------------
// Relationship flag
// ---------------------------------------------------------------------------

/// Names the four independent booleans of a relationship.
///
/// Used by the `toggle_state` user action to say which flag to flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipFlag {
    /// An invitation from the other capsule is outstanding.
    Invited,
    /// The other capsule is trusted.
    Trusted,
    /// A link with the other capsule has been completed.
    Linked,
    /// Events from the other capsule are ignored.
    Ignored,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn slot_order_is_declaration_order() {
        let mut sorted = SlotType::ALL;
        sorted.sort();
        assert_eq!(sorted, SlotType::ALL);
    }

    #[test]
    fn starter_status_toggles_in_pairs() {
        assert_eq!(StarterStatus::Off.toggled(), StarterStatus::On);
        assert_eq!(StarterStatus::Off.toggled().toggled(), StarterStatus::Off);
    }

    #[test]
    fn capsule_type_roundtrip_serde() {
        let json = serde_json::to_string(&CapsuleType::Genesis).unwrap();
        assert_eq!(json, "\"genesis\"");
        let restored: CapsuleType = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, CapsuleType::Genesis);
    }

    #[test]
    fn relationship_flag_names_are_snake_case() {
        let json = serde_json::to_string(&RelationshipFlag::Trusted).unwrap();
        assert_eq!(json, "\"trusted\"");
    }
}
