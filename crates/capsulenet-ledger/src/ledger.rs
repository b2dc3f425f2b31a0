//! The [`Ledger`] struct and its entries.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use capsulenet_types::{CapsuleId, Event, EventId};

use crate::LedgerError;

// ---------------------------------------------------------------------------
// LedgerEntry
// ---------------------------------------------------------------------------

/// One event wrapped with its position in a capsule's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// The recorded event.
    pub event: Event,
    /// The capsule whose ledger this entry belongs to.
    pub capsule_id: CapsuleId,
    /// Strictly increasing, 1-based, dense.
    pub sequence_number: u64,
    /// When the entry was appended. Informational; ordering comes from
    /// `sequence_number`.
    pub timestamp: DateTime<Utc>,
    /// Free-text tags used for filtered retrieval.
    pub tags: BTreeSet<String>,
}

impl LedgerEntry {
    /// The recorded event's ID.
    pub const fn event_id(&self) -> EventId {
        self.event.id
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Durable, ordered record of everything that happened to one capsule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    capsule_id: CapsuleId,
    entries: Vec<LedgerEntry>,
    sequence_counter: u64,
}

impl Ledger {
    /// Create a new empty ledger for a capsule.
    pub const fn new(capsule_id: CapsuleId) -> Self {
        Self {
            capsule_id,
            entries: Vec::new(),
            sequence_counter: 0,
        }
    }

    /// The capsule this ledger records.
    pub const fn capsule_id(&self) -> &CapsuleId {
        &self.capsule_id
    }

    /// Number of entries.
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger has no entries.
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The current sequence counter (equals the last entry's number).
    pub const fn sequence_counter(&self) -> u64 {
        self.sequence_counter
    }

    /// Append an event, assigning it the next sequence number.
    ///
    /// The counter advances by exactly one per append. Returns the entry
    /// just written.
    ///
    /// # Errors
    ///
    /// [`LedgerError::SequenceOverflow`] when the counter cannot advance.
    pub fn append(
        &mut self,
        event: Event,
        tags: BTreeSet<String>,
    ) -> Result<&LedgerEntry, LedgerError> {
        let next = self
            .sequence_counter
            .checked_add(1)
            .ok_or(LedgerError::SequenceOverflow {
                current: self.sequence_counter,
            })?;

        let entry = LedgerEntry {
            event,
            capsule_id: self.capsule_id.clone(),
            sequence_number: next,
            timestamp: Utc::now(),
            tags,
        };

        tracing::debug!(
            capsule = %self.capsule_id,
            sequence = next,
            event_type = %entry.event.event_type(),
            "ledger append"
        );

        self.entries.push(entry);
        self.sequence_counter = next;

        self.entries.last().ok_or(LedgerError::CounterMismatch {
            counter: self.sequence_counter,
            last: 0,
        })
    }

    /// All entries in append order, as a defensive copy.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries.clone()
    }

    /// Borrow the entries in append order.
    pub fn iter(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter()
    }

    /// Entries whose tag set intersects the filter, original order
    /// preserved. An empty filter matches nothing.
    pub fn entries_tagged(&self, tags: &BTreeSet<String>) -> Vec<LedgerEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.tags.intersection(tags).next().is_some())
            .cloned()
            .collect()
    }

    /// The most recently appended entry, if any.
    pub fn last_entry(&self) -> Option<&LedgerEntry> {
        self.entries.last()
    }

    /// Check the dense-sequencing invariant over the whole ledger.
    ///
    /// Run after restoring a ledger from storage; an in-process ledger
    /// cannot violate it because [`Ledger::append`] is the only writer.
    ///
    /// # Errors
    ///
    /// [`LedgerError::SequenceGap`] on the first entry out of sequence,
    /// [`LedgerError::CounterMismatch`] when the counter disagrees with
    /// the last entry.
    pub fn verify_sequence(&self) -> Result<(), LedgerError> {
        let mut expected: u64 = 0;
        for (position, entry) in self.entries.iter().enumerate() {
            expected = expected
                .checked_add(1)
                .ok_or(LedgerError::SequenceOverflow { current: expected })?;
            if entry.sequence_number != expected {
                return Err(LedgerError::SequenceGap {
                    position,
                    expected,
                    found: entry.sequence_number,
                });
            }
        }
        if self.sequence_counter != expected {
            return Err(LedgerError::CounterMismatch {
                counter: self.sequence_counter,
                last: expected,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use capsulenet_types::{EventPayload, SlotType, StarterId};

    fn ledger() -> Ledger {
        Ledger::new(CapsuleId::from("genesis-1"))
    }

    fn generate_event() -> Event {
        Event::new(EventPayload::Generate {
            capsule_id: CapsuleId::from("genesis-1"),
            slot_type: SlotType::Juice,
            starter_id: Some(StarterId::new()),
            based_on: None,
        })
    }

    fn tags(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| (*name).to_owned()).collect()
    }

    #[test]
    fn new_ledger_is_empty() {
        let ledger = ledger();
        assert!(ledger.is_empty());
        assert_eq!(ledger.sequence_counter(), 0);
        assert!(ledger.last_entry().is_none());
    }

    #[test]
    fn append_assigns_dense_sequence_numbers() {
        let mut ledger = ledger();
        for expected in 1..=5_u64 {
            let entry = ledger.append(generate_event(), tags(&["generate"])).unwrap();
            assert_eq!(entry.sequence_number, expected);
        }
        assert_eq!(ledger.len(), 5);
        assert_eq!(ledger.sequence_counter(), 5);
        ledger.verify_sequence().unwrap();
    }

    #[test]
    fn entries_returns_a_defensive_copy() {
        let mut ledger = ledger();
        let _ = ledger.append(generate_event(), tags(&["generate"])).unwrap();

        let mut copy = ledger.entries();
        copy.clear();
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn tag_filter_intersects_and_preserves_order() {
        let mut ledger = ledger();
        let _ = ledger.append(generate_event(), tags(&["generate", "genesis"]));
        let _ = ledger.append(generate_event(), tags(&["generate"]));
        let _ = ledger.append(generate_event(), tags(&["genesis"]));

        let filtered = ledger.entries_tagged(&tags(&["genesis"]));
        assert_eq!(filtered.len(), 2);
        assert_eq!(
            filtered.iter().map(|e| e.sequence_number).collect::<Vec<_>>(),
            vec![1, 3]
        );

        // Unknown tag matches nothing.
        assert!(ledger.entries_tagged(&tags(&["wormhole"])).is_empty());
    }

    #[test]
    fn last_entry_tracks_the_newest_append() {
        let mut ledger = ledger();
        let _ = ledger.append(generate_event(), tags(&["generate"]));
        let _ = ledger.append(generate_event(), tags(&["generate"]));
        assert_eq!(ledger.last_entry().unwrap().sequence_number, 2);
    }

    #[test]
    fn ledger_roundtrip_serde() {
        let mut ledger = ledger();
        let _ = ledger.append(generate_event(), tags(&["generate", "genesis"]));
        let _ = ledger.append(generate_event(), tags(&["generate"]));

        let json = serde_json::to_string(&ledger).unwrap();
        let restored: Ledger = serde_json::from_str(&json).unwrap();

        assert_eq!(ledger, restored);
        restored.verify_sequence().unwrap();
        assert_eq!(restored.sequence_counter(), 2);
    }

    #[test]
    fn verify_sequence_detects_gaps() {
        let mut ledger = ledger();
        let _ = ledger.append(generate_event(), tags(&["generate"]));
        let _ = ledger.append(generate_event(), tags(&["generate"]));

        // Corrupt a restored copy through serde, the only door in.
        let mut value = serde_json::to_value(&ledger).unwrap();
        if let Some(entry) = value
            .get_mut("entries")
            .and_then(|e| e.get_mut(1))
            .and_then(|e| e.get_mut("sequence_number"))
        {
            *entry = serde_json::Value::from(7);
        }
        let corrupted: Ledger = serde_json::from_value(value).unwrap();
        assert!(matches!(
            corrupted.verify_sequence(),
            Err(LedgerError::SequenceGap { position: 1, .. })
        ));
    }

    #[test]
    fn verify_sequence_detects_counter_mismatch() {
        let mut ledger = ledger();
        let _ = ledger.append(generate_event(), tags(&["generate"]));

        let mut value = serde_json::to_value(&ledger).unwrap();
        if let Some(counter) = value.get_mut("sequence_counter") {
            *counter = serde_json::Value::from(9);
        }
        let corrupted: Ledger = serde_json::from_value(value).unwrap();
        assert!(matches!(
            corrupted.verify_sequence(),
            Err(LedgerError::CounterMismatch { counter: 9, last: 1 })
        ));
    }
}
