//! Append-only, sequenced event ledger for one capsule.
//!
//! The ledger is the sole source of truth for everything that happened to
//! a capsule. State is always derivable from it; nothing else is
//! authoritative.
//!
//! # Invariants
//!
//! - **Append-only**: entries are never modified or deleted.
//! - **Dense sequencing**: `entries[i].sequence_number == i + 1` for every
//!   `i`, for the lifetime of the ledger. Sequence numbers start at 1 and
//!   are never reused or skipped.
//! - **Ordering authority**: the sequence counter, not the wall-clock
//!   timestamp, is what orders entries. Timestamps are informational;
//!   two rapid appends may share one, but their sequence numbers cannot
//!   collide.
//!
//! # Usage
//!
//! ```
//! use std::collections::BTreeSet;
//!
//! use capsulenet_ledger::Ledger;
//! use capsulenet_types::{CapsuleId, Event, EventPayload, SlotType, StarterId};
//!
//! let mut ledger = Ledger::new(CapsuleId::from("genesis-1"));
//! let event = Event::new(EventPayload::Generate {
//!     capsule_id: CapsuleId::from("genesis-1"),
//!     slot_type: SlotType::Juice,
//!     starter_id: Some(StarterId::new()),
//!     based_on: None,
//! });
//!
//! let tags = BTreeSet::from(["generate".to_owned()]);
//! let entry = ledger.append(event, tags);
//! assert!(entry.is_ok());
//! assert_eq!(ledger.len(), 1);
//! ```

pub mod ledger;

pub use ledger::{Ledger, LedgerEntry};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur on the ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The sequence counter cannot grow any further.
    #[error("ledger sequence counter overflow at {current}")]
    SequenceOverflow {
        /// The counter value that could not be advanced.
        current: u64,
    },

    /// A restored ledger violates the dense-sequencing invariant.
    #[error("ledger sequence gap at position {position}: expected {expected}, found {found}")]
    SequenceGap {
        /// Zero-based position of the offending entry.
        position: usize,
        /// The sequence number the invariant requires there.
        expected: u64,
        /// The sequence number actually found.
        found: u64,
    },

    /// A restored ledger's counter disagrees with its entries.
    #[error("ledger counter mismatch: counter is {counter} but last entry is {last}")]
    CounterMismatch {
        /// The restored counter value.
        counter: u64,
        /// The last entry's sequence number (0 when empty).
        last: u64,
    },
}
