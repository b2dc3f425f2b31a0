//! Integration tests for the node façade.
//!
//! Each test runs against its own temporary data directory, so tests
//! are independent and can run in parallel.

// Integration tests use unwrap/panic extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::items_after_statements,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    clippy::panic
)]

use std::path::PathBuf;

use capsulenet_node::{AcceptDisposition, Node, NodeError, StatusReport};
use capsulenet_store::{FileStore, StoreConfig};
use capsulenet_types::{
    CapsuleId, CapsuleType, EventPayload, EventType, RelationshipFlag, SlotType,
};

/// A node rooted in a unique temp directory, removed on drop.
struct TempNode {
    node: Node,
    dir: PathBuf,
}

impl TempNode {
    fn new() -> Self {
        let dir = std::env::temp_dir().join(format!("capsulenet-node-{}", uuid::Uuid::now_v7()));
        let node = Node::open(StoreConfig {
            data_dir: dir.clone(),
            pretty_json: false,
        })
        .unwrap();
        Self { node, dir }
    }

    /// An independent store handle over the same directory, for
    /// inspecting records the node wrote.
    fn store(&self) -> FileStore {
        FileStore::open(StoreConfig {
            data_dir: self.dir.clone(),
            pretty_json: false,
        })
        .unwrap()
    }
}

impl Drop for TempNode {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn genesis() -> CapsuleId {
    CapsuleId::from("genesis-1")
}

fn proto() -> CapsuleId {
    CapsuleId::from("proto-1")
}

/// Create the standard two-capsule network used by most scenarios.
fn two_capsules() -> TempNode {
    let mut temp = TempNode::new();
    temp.node.create_capsule(genesis(), CapsuleType::Genesis).unwrap();
    temp.node.create_capsule(proto(), CapsuleType::Proto).unwrap();
    temp
}

fn occupied(report: &StatusReport) -> usize {
    report.slots.iter().filter(|slot| slot.starter_id.is_some()).count()
}

#[test]
fn genesis_starts_full_and_proto_starts_empty() {
    let temp = two_capsules();

    let genesis_report = temp.node.status(&genesis()).unwrap();
    assert_eq!(genesis_report.capsule_type, CapsuleType::Genesis);
    assert_eq!(occupied(&genesis_report), 5);
    // Provisioning went through the ledger: one generate event per slot.
    assert_eq!(genesis_report.ledger_entries, 5);
    assert_eq!(genesis_report.state_sequence, 5);

    let proto_report = temp.node.status(&proto()).unwrap();
    assert_eq!(occupied(&proto_report), 0);
    assert_eq!(proto_report.ledger_entries, 0);
}

#[test]
fn genesis_state_matches_its_entity_after_provisioning() {
    let temp = two_capsules();
    let replayed = temp.node.replay(&genesis()).unwrap();

    let report = temp.node.status(&genesis()).unwrap();
    for slot in &report.slots {
        let snapshot = replayed.slot(slot.slot_type).unwrap();
        assert_eq!(Some(snapshot.starter_id), slot.starter_id);
    }
}

#[test]
fn accept_establishes_trust_and_occupies_one_slot() {
    let temp = two_capsules();

    let invitation = temp.node.invite(&genesis(), &proto(), SlotType::Juice).unwrap();
    assert_eq!(temp.node.pending_invitations().unwrap().len(), 1);

    // The invitation is visible on the recipient before the decision.
    let invited = temp.node.status(&proto()).unwrap();
    assert!(invited.relationships.get(&genesis()).unwrap().invited);
    assert_eq!(invited.pending_incoming, 1);

    let disposition = temp.node.accept_invitation(&proto(), invitation).unwrap();
    let AcceptDisposition::Linked { slot_type, starter_id } = disposition else {
        panic!("expected a linked disposition");
    };
    assert_eq!(slot_type, SlotType::Juice);

    // Relationship: invited cleared, trusted set, nothing else touched.
    let report = temp.node.status(&proto()).unwrap();
    let relationship = report.relationships.get(&genesis()).unwrap();
    assert!(!relationship.invited);
    assert!(relationship.trusted);
    assert!(!relationship.linked);
    assert!(!relationship.ignored);

    // Exactly one slot occupied, by the generated starter.
    assert_eq!(occupied(&report), 1);
    let juice = report.slots.iter().find(|s| s.slot_type == SlotType::Juice).unwrap();
    assert_eq!(juice.starter_id, Some(starter_id));

    // The pending record is spent.
    assert!(temp.node.pending_invitations().unwrap().is_empty());

    // The recipient's ledger ends with the folded starter event.
    assert_eq!(report.last_event, Some(EventType::StarterGenerated));
    let ledger = temp.store().load_ledger(&proto()).unwrap();
    let generated = ledger.last_entry().unwrap();
    match &generated.event.payload {
        EventPayload::StarterGenerated {
            from_invitation,
            inviter,
            burned,
            ..
        } => {
            assert!(*from_invitation);
            assert!(!*burned);
            assert_eq!(inviter.as_ref(), Some(&genesis()));
        }
        other => panic!("unexpected payload: {other:?}"),
    }

    // The sender's ledger carries the acknowledgment.
    let sender_report = temp.node.status(&genesis()).unwrap();
    assert_eq!(sender_report.last_event, Some(EventType::InvitationAccepted));
}

#[test]
fn reject_clears_the_flag_without_occupation() {
    let temp = two_capsules();

    let invitation = temp.node.invite(&genesis(), &proto(), SlotType::Juice).unwrap();
    temp.node
        .reject_invitation(&proto(), invitation, Some("not now".to_owned()))
        .unwrap();

    let report = temp.node.status(&proto()).unwrap();
    let relationship = report.relationships.get(&genesis()).unwrap();
    assert!(!relationship.invited);
    assert!(!relationship.trusted);
    assert_eq!(occupied(&report), 0);

    // A burn-flavored record was folded on the recipient.
    let ledger = temp.store().load_ledger(&proto()).unwrap();
    let burn = ledger.last_entry().unwrap();
    match &burn.event.payload {
        EventPayload::StarterGenerated { burned, .. } => assert!(*burned),
        other => panic!("unexpected payload: {other:?}"),
    }

    // The sender's acknowledgment records the burn.
    let sender_ledger = temp.store().load_ledger(&genesis()).unwrap();
    match &sender_ledger.last_entry().unwrap().event.payload {
        EventPayload::InvitationRejected { burned, rejector, .. } => {
            assert!(*burned);
            assert_eq!(rejector, &proto());
        }
        other => panic!("unexpected payload: {other:?}"),
    }

    assert!(temp.node.pending_invitations().unwrap().is_empty());
}

#[test]
fn acceptance_with_no_vacant_slot_is_the_lost_outcome() {
    let temp = two_capsules();

    // Five invitations accepted: the proto capsule fills up.
    for _ in 0..5 {
        let invitation = temp.node.invite(&genesis(), &proto(), SlotType::Juice).unwrap();
        let disposition = temp.node.accept_invitation(&proto(), invitation).unwrap();
        assert!(matches!(disposition, AcceptDisposition::Linked { .. }));
    }
    assert_eq!(occupied(&temp.node.status(&proto()).unwrap()), 5);

    // The sixth acceptance has nowhere to land.
    let invitation = temp.node.invite(&genesis(), &proto(), SlotType::Juice).unwrap();
    let disposition = temp.node.accept_invitation(&proto(), invitation).unwrap();
    assert_eq!(disposition, AcceptDisposition::InvitationLost);

    let report = temp.node.status(&proto()).unwrap();
    // The flag still cleared; occupancy did not change.
    assert!(!report.relationships.get(&genesis()).unwrap().invited);
    assert_eq!(occupied(&report), 5);

    // No starter event was produced for the lost acceptance: the last
    // ledger entry is the accept action itself.
    assert_eq!(report.last_event, Some(EventType::UserAction));
}

#[test]
fn manual_toggle_composes_with_auto_trust() {
    let temp = two_capsules();
    let invitation = temp.node.invite(&genesis(), &proto(), SlotType::Seed).unwrap();
    let _ = temp.node.accept_invitation(&proto(), invitation).unwrap();
    assert!(temp.node.status(&proto()).unwrap().relationships.get(&genesis()).unwrap().trusted);

    // One toggle undoes auto-trust, a second restores it.
    temp.node.toggle_flag(&proto(), &genesis(), RelationshipFlag::Trusted).unwrap();
    assert!(!temp.node.status(&proto()).unwrap().relationships.get(&genesis()).unwrap().trusted);

    temp.node.toggle_flag(&proto(), &genesis(), RelationshipFlag::Trusted).unwrap();
    assert!(temp.node.status(&proto()).unwrap().relationships.get(&genesis()).unwrap().trusted);
}

#[test]
fn replay_rebuilds_the_identical_state() {
    let temp = two_capsules();
    let invitation = temp.node.invite(&genesis(), &proto(), SlotType::Juice).unwrap();
    let _ = temp.node.accept_invitation(&proto(), invitation).unwrap();
    temp.node.toggle_flag(&proto(), &genesis(), RelationshipFlag::Linked).unwrap();

    let persisted = temp.store().load_state(&proto()).unwrap();
    let first = temp.node.replay(&proto()).unwrap();
    let second = temp.node.replay(&proto()).unwrap();

    assert_eq!(first, second);
    assert_eq!(first, persisted);
}

#[test]
fn a_restarted_node_loads_the_same_picture() {
    let temp = two_capsules();
    let invitation = temp.node.invite(&genesis(), &proto(), SlotType::Juice).unwrap();
    let _ = temp.node.accept_invitation(&proto(), invitation).unwrap();
    let before = temp.node.status(&proto()).unwrap();

    // A second node over the same directory sees the same picture.
    let mut node = Node::open(StoreConfig {
        data_dir: temp.dir.clone(),
        pretty_json: false,
    })
    .unwrap();
    node.load_capsule(&proto()).unwrap();
    node.load_capsule(&genesis()).unwrap();

    let after = node.status(&proto()).unwrap();
    assert_eq!(after.state_sequence, before.state_sequence);
    assert_eq!(after.ledger_entries, before.ledger_entries);
    assert_eq!(after.relationships, before.relationships);
    assert_eq!(after.slots, before.slots);
}

#[test]
fn addressing_and_type_errors_are_explicit() {
    let temp = two_capsules();

    // Only genesis capsules send invitations.
    let result = temp.node.invite(&proto(), &genesis(), SlotType::Juice);
    assert!(matches!(result, Err(NodeError::WrongCapsuleType { .. })));

    // Self-invitation is rejected before any ledger write.
    let result = temp.node.invite(&genesis(), &genesis(), SlotType::Juice);
    assert!(matches!(result, Err(NodeError::SelfInvitation(_))));

    // Unknown recipients are a not-found, not a silent drop.
    let result = temp.node.invite(&genesis(), &CapsuleId::from("ghost"), SlotType::Juice);
    assert!(matches!(result, Err(NodeError::CapsuleNotFound(_))));

    // Only the addressed capsule may answer an invitation.
    let invitation = temp.node.invite(&genesis(), &proto(), SlotType::Juice).unwrap();
    let result = temp.node.accept_invitation(&genesis(), invitation);
    assert!(matches!(result, Err(NodeError::MisaddressedInvitation { .. })));

    // Unknown invitation IDs are a not-found.
    let result = temp
        .node
        .accept_invitation(&proto(), capsulenet_types::InvitationId::new());
    assert!(matches!(result, Err(NodeError::InvitationNotFound(_))));
}

#[test]
fn duplicate_capsule_ids_are_rejected() {
    let mut temp = TempNode::new();
    temp.node.create_capsule(genesis(), CapsuleType::Genesis).unwrap();
    let result = temp.node.create_capsule(genesis(), CapsuleType::Proto);
    assert!(matches!(result, Err(NodeError::DuplicateCapsule(_))));
}

#[test]
fn list_capsules_reports_everything_persisted() {
    let temp = two_capsules();
    assert_eq!(temp.node.list_capsules().unwrap(), vec![genesis(), proto()]);
}
