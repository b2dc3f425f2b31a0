//! The [`Node`] and its operations.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde::Serialize;

use capsulenet_core::{BusError, EventBus, InvitationModule, State, TrustModule};
use capsulenet_ledger::Ledger;
use capsulenet_store::{FileStore, StoreConfig, StoreError};
use capsulenet_types::{
    Capsule, CapsuleId, CapsuleType, Event, EventPayload, EventType, InvitationId,
    PendingInvitation, RelationshipFlag, RelationshipState, SlotType, StarterId, UserAction,
};

/// Priority for the invitation module: it must clear flags and occupy
/// slots before the trust module sees the same user action.
const INVITATION_PRIORITY: i32 = 10;

/// Priority for the trust module.
const TRUST_PRIORITY: i32 = 0;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by node operations.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// The referenced capsule is not loaded in this node.
    #[error("capsule {0} not found")]
    CapsuleNotFound(CapsuleId),

    /// The referenced invitation does not exist.
    #[error("invitation {0} not found")]
    InvitationNotFound(InvitationId),

    /// A capsule with this ID already exists.
    #[error("capsule {0} already exists")]
    DuplicateCapsule(CapsuleId),

    /// Only genesis capsules may send invitations.
    #[error("capsule {capsule_id} is {actual:?}, only genesis capsules send invitations")]
    WrongCapsuleType {
        /// The offending capsule.
        capsule_id: CapsuleId,
        /// Its actual type.
        actual: CapsuleType,
    },

    /// The named slot holds no starter to offer.
    #[error("slot {slot_type} of capsule {capsule_id} is empty")]
    EmptySlot {
        /// The capsule whose slot was inspected.
        capsule_id: CapsuleId,
        /// The empty slot.
        slot_type: SlotType,
    },

    /// The invitation is addressed to a different capsule.
    #[error("invitation {invitation_id} is addressed to {recipient}, not {actor}")]
    MisaddressedInvitation {
        /// The invitation concerned.
        invitation_id: InvitationId,
        /// Who it is addressed to.
        recipient: CapsuleId,
        /// Who tried to answer it.
        actor: CapsuleId,
    },

    /// A capsule cannot invite itself.
    #[error("capsule {0} cannot invite itself")]
    SelfInvitation(CapsuleId),

    /// The capsule's cell lock was poisoned by a panicking thread.
    #[error("capsule {0} cell lock poisoned")]
    Poisoned(CapsuleId),

    /// Event-chain processing failed.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// The persistence layer failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// The explicit, named outcome of accepting an invitation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptDisposition {
    /// The acceptance occupied a slot and established auto-trust.
    Linked {
        /// The slot that was occupied.
        slot_type: SlotType,
        /// The freshly generated starter.
        starter_id: StarterId,
    },
    /// No empty unlocked slot existed: the invited flag cleared but
    /// nothing was generated. The invitation is spent with no effect.
    InvitationLost,
}

/// One slot's line in a status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotStatus {
    /// Which slot.
    pub slot_type: SlotType,
    /// The occupying starter, if any.
    pub starter_id: Option<StarterId>,
    /// Whether the slot is locked.
    pub locked: bool,
}

/// Structured snapshot of one capsule for external consumers.
///
/// Formatting is the consumer's concern; this is data only.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// The capsule reported on.
    pub capsule_id: CapsuleId,
    /// Its provisioning class.
    pub capsule_type: CapsuleType,
    /// The replay sequence counter.
    pub state_sequence: u64,
    /// Number of ledger entries.
    pub ledger_entries: usize,
    /// Variant of the most recent ledger entry, if any.
    pub last_event: Option<EventType>,
    /// Every slot in declaration order.
    pub slots: Vec<SlotStatus>,
    /// Relationships toward other capsules.
    pub relationships: BTreeMap<CapsuleId, RelationshipState>,
    /// Connections recorded on the entity.
    pub connection_count: usize,
    /// Pending invitations addressed to this capsule.
    pub pending_incoming: usize,
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// One capsule's entity, ledger, and state, guarded as a unit.
struct CapsuleCell {
    capsule: Capsule,
    ledger: Ledger,
    state: State,
}

/// The authoritative process managing one or more capsules' logs.
pub struct Node {
    store: FileStore,
    bus: EventBus,
    cells: BTreeMap<CapsuleId, Mutex<CapsuleCell>>,
}

impl Node {
    /// Build a node over an opened store, with the protocol modules
    /// subscribed.
    pub fn new(store: FileStore) -> Self {
        let mut bus = EventBus::new();
        let _ = InvitationModule::subscribe_on(&mut bus, INVITATION_PRIORITY);
        let _ = TrustModule::subscribe_on(&mut bus, TRUST_PRIORITY);
        Self {
            store,
            bus,
            cells: BTreeMap::new(),
        }
    }

    /// Open the store described by `config` and build a node over it.
    ///
    /// # Errors
    ///
    /// [`NodeError::Store`] when the data directory cannot be created.
    pub fn open(config: StoreConfig) -> Result<Self, NodeError> {
        Ok(Self::new(FileStore::open(config)?))
    }

    // -- lifecycle ----------------------------------------------------------

    /// Create a capsule, its ledger, and its initial state, and persist
    /// all three.
    ///
    /// Genesis capsules are provisioned through the ledger: one generate
    /// event per slot is chained, so the 5/5 occupancy is replayable
    /// rather than ad hoc.
    ///
    /// # Errors
    ///
    /// [`NodeError::DuplicateCapsule`] when the ID is already taken,
    /// in memory or on disk.
    pub fn create_capsule(
        &mut self,
        capsule_id: CapsuleId,
        capsule_type: CapsuleType,
    ) -> Result<(), NodeError> {
        if self.cells.contains_key(&capsule_id) || self.store.load_capsule(&capsule_id).is_ok() {
            return Err(NodeError::DuplicateCapsule(capsule_id));
        }

        let mut capsule = Capsule::new(capsule_id.clone(), capsule_type);
        let mut ledger = Ledger::new(capsule_id.clone());
        let mut state = State::initial(capsule_id.clone(), capsule_type);

        if capsule_type == CapsuleType::Genesis {
            for slot_type in SlotType::ALL {
                let starter_id = capsule.slot(slot_type).and_then(|slot| slot.starter_id);
                let event = Event::new(EventPayload::Generate {
                    capsule_id: capsule_id.clone(),
                    slot_type,
                    starter_id,
                    based_on: None,
                });
                let outcome =
                    self.bus
                        .process_event_chain(event, &mut capsule, &mut ledger, &state)?;
                state = outcome.state;
            }
        }

        let cell = CapsuleCell {
            capsule,
            ledger,
            state,
        };
        self.persist(&cell)?;
        self.cells.insert(capsule_id.clone(), Mutex::new(cell));

        tracing::debug!(capsule = %capsule_id, kind = ?capsule_type, "capsule created");
        Ok(())
    }

    /// Load a capsule from the store into this node. Idempotent.
    ///
    /// The ledger's sequencing invariant is verified on load. When no
    /// state record exists, the state is rebuilt by replaying the ledger
    /// from genesis.
    ///
    /// # Errors
    ///
    /// [`NodeError::Store`] when the capsule record is missing or any
    /// record fails to parse.
    pub fn load_capsule(&mut self, capsule_id: &CapsuleId) -> Result<(), NodeError> {
        if self.cells.contains_key(capsule_id) {
            return Ok(());
        }

        let capsule = self.store.load_capsule(capsule_id)?;
        let ledger = match self.store.load_ledger(capsule_id) {
            Ok(ledger) => ledger,
            Err(StoreError::RecordNotFound { .. }) => Ledger::new(capsule_id.clone()),
            Err(err) => return Err(err.into()),
        };

        let state = if self.store.has_state(capsule_id) {
            self.store.load_state(capsule_id)?
        } else {
            State::replay(
                capsule_id.clone(),
                capsule.capsule_type(),
                ledger.iter().map(|entry| &entry.event),
            )
        };

        self.cells.insert(
            capsule_id.clone(),
            Mutex::new(CapsuleCell {
                capsule,
                ledger,
                state,
            }),
        );
        Ok(())
    }

    /// IDs of every capsule persisted in the store, sorted.
    pub fn list_capsules(&self) -> Result<Vec<CapsuleId>, NodeError> {
        Ok(self.store.list_capsules()?)
    }

    /// All pending invitations, across every capsule.
    pub fn pending_invitations(&self) -> Result<Vec<PendingInvitation>, NodeError> {
        Ok(self.store.load_pending()?)
    }

    // -- status -------------------------------------------------------------

    /// Structured snapshot of one loaded capsule.
    pub fn status(&self, capsule_id: &CapsuleId) -> Result<StatusReport, NodeError> {
        let pending_incoming = self
            .store
            .load_pending()?
            .iter()
            .filter(|invitation| invitation.recipient == *capsule_id)
            .count();

        let cell = self.lock_cell(capsule_id)?;
        Ok(StatusReport {
            capsule_id: capsule_id.clone(),
            capsule_type: cell.capsule.capsule_type(),
            state_sequence: cell.state.sequence(),
            ledger_entries: cell.ledger.len(),
            last_event: cell.ledger.last_entry().map(|entry| entry.event.event_type()),
            slots: cell
                .capsule
                .slots()
                .map(|slot| SlotStatus {
                    slot_type: slot.slot_type,
                    starter_id: slot.starter_id,
                    locked: slot.locked,
                })
                .collect(),
            relationships: cell.capsule.relationships().clone(),
            connection_count: cell.capsule.connections().len(),
            pending_incoming,
        })
    }

    // -- invitation protocol ------------------------------------------------

    /// Send an invitation from a genesis capsule to another capsule.
    ///
    /// The invitation event lands on both ledgers -- the sender's as a
    /// matter of record, the recipient's to set the invited flag -- and
    /// a shared pending record is written for later acceptance.
    ///
    /// # Errors
    ///
    /// [`NodeError::WrongCapsuleType`] for a non-genesis sender,
    /// [`NodeError::EmptySlot`] when the offered slot has no starter,
    /// [`NodeError::SelfInvitation`] / [`NodeError::CapsuleNotFound`]
    /// for bad addressing.
    pub fn invite(
        &self,
        sender_id: &CapsuleId,
        recipient_id: &CapsuleId,
        slot_type: SlotType,
    ) -> Result<InvitationId, NodeError> {
        if sender_id == recipient_id {
            return Err(NodeError::SelfInvitation(sender_id.clone()));
        }
        if !self.cells.contains_key(recipient_id) {
            return Err(NodeError::CapsuleNotFound(recipient_id.clone()));
        }

        let invitation_id = InvitationId::new();
        let event;
        let starter_id;

        {
            let mut cell = self.lock_cell(sender_id)?;
            if cell.capsule.capsule_type() != CapsuleType::Genesis {
                return Err(NodeError::WrongCapsuleType {
                    capsule_id: sender_id.clone(),
                    actual: cell.capsule.capsule_type(),
                });
            }
            starter_id = cell
                .capsule
                .slot(slot_type)
                .and_then(|slot| slot.starter_id)
                .ok_or_else(|| NodeError::EmptySlot {
                    capsule_id: sender_id.clone(),
                    slot_type,
                })?;

            event = Event::new(EventPayload::Invitation {
                invitation_id,
                sender: sender_id.clone(),
                recipient: recipient_id.clone(),
                starter_id,
                slot_type,
            });
            self.chain_on(&mut cell, event.clone())?;
            self.persist(&cell)?;
        }

        {
            let mut cell = self.lock_cell(recipient_id)?;
            self.chain_on(&mut cell, event)?;
            self.persist(&cell)?;
        }

        self.store.push_pending(PendingInvitation {
            invitation_id,
            sender: sender_id.clone(),
            recipient: recipient_id.clone(),
            slot_type,
            starter_id,
            created_at: Utc::now(),
        })?;

        tracing::debug!(
            invitation = %invitation_id,
            sender = %sender_id,
            recipient = %recipient_id,
            "invitation sent"
        );
        Ok(invitation_id)
    }

    /// Accept a pending invitation as the acting capsule.
    ///
    /// On success the three acceptance effects -- invited flag cleared,
    /// slot occupied, trust established -- are applied in one chain under
    /// the recipient's lock, the pending record is removed, and the
    /// sender's ledger (when the sender is loaded here) receives an
    /// acknowledgment event.
    ///
    /// # Errors
    ///
    /// [`NodeError::InvitationNotFound`] for unknown IDs,
    /// [`NodeError::MisaddressedInvitation`] when `actor` is not the
    /// recipient.
    pub fn accept_invitation(
        &self,
        actor: &CapsuleId,
        invitation_id: InvitationId,
    ) -> Result<AcceptDisposition, NodeError> {
        let invitation = self.find_pending(invitation_id)?;
        if invitation.recipient != *actor {
            return Err(NodeError::MisaddressedInvitation {
                invitation_id,
                recipient: invitation.recipient,
                actor: actor.clone(),
            });
        }

        let disposition;
        let new_starter_id;
        {
            let mut cell = self.lock_cell(actor)?;
            let event = Event::new(EventPayload::UserAction(UserAction::AcceptInvite {
                sender: invitation.sender.clone(),
                starter_id: invitation.starter_id,
            }));
            let outcome = self.chain_on(&mut cell, event)?;

            disposition = outcome.invitation_starter().map_or(
                AcceptDisposition::InvitationLost,
                |generated| match &generated.payload {
                    EventPayload::StarterGenerated {
                        starter_id,
                        slot_type: Some(slot_type),
                        ..
                    } => AcceptDisposition::Linked {
                        slot_type: *slot_type,
                        starter_id: *starter_id,
                    },
                    _ => AcceptDisposition::InvitationLost,
                },
            );
            new_starter_id = match &disposition {
                AcceptDisposition::Linked { starter_id, .. } => Some(*starter_id),
                AcceptDisposition::InvitationLost => None,
            };
            self.persist(&cell)?;
        }

        let _ = self.store.remove_pending(invitation_id)?;
        self.acknowledge_sender(
            &invitation.sender,
            Event::new(EventPayload::InvitationAccepted {
                invitation_id,
                acceptor: actor.clone(),
                new_starter_id,
            }),
        )?;

        if disposition == AcceptDisposition::InvitationLost {
            tracing::warn!(
                invitation = %invitation_id,
                capsule = %actor,
                "invitation accepted but lost: no slot available"
            );
        }
        Ok(disposition)
    }

    /// Reject a pending invitation as the acting capsule.
    ///
    /// # Errors
    ///
    /// Same addressing errors as [`Node::accept_invitation`].
    pub fn reject_invitation(
        &self,
        actor: &CapsuleId,
        invitation_id: InvitationId,
        reason: Option<String>,
    ) -> Result<(), NodeError> {
        let invitation = self.find_pending(invitation_id)?;
        if invitation.recipient != *actor {
            return Err(NodeError::MisaddressedInvitation {
                invitation_id,
                recipient: invitation.recipient,
                actor: actor.clone(),
            });
        }

        let burned;
        {
            let mut cell = self.lock_cell(actor)?;
            let event = Event::new(EventPayload::UserAction(UserAction::RejectInvite {
                sender: invitation.sender.clone(),
                starter_id: invitation.starter_id,
                reason: reason.clone(),
            }));
            let outcome = self.chain_on(&mut cell, event)?;
            burned = outcome.burn_record().is_some();
            self.persist(&cell)?;
        }

        let _ = self.store.remove_pending(invitation_id)?;
        self.acknowledge_sender(
            &invitation.sender,
            Event::new(EventPayload::InvitationRejected {
                invitation_id,
                rejector: actor.clone(),
                reason,
                burned,
            }),
        )?;
        Ok(())
    }

    // -- trust protocol -----------------------------------------------------

    /// Flip one relationship flag from `capsule_id` toward `target`.
    pub fn toggle_flag(
        &self,
        capsule_id: &CapsuleId,
        target: &CapsuleId,
        flag: RelationshipFlag,
    ) -> Result<(), NodeError> {
        let mut cell = self.lock_cell(capsule_id)?;
        let event = Event::new(EventPayload::UserAction(UserAction::ToggleState {
            target: target.clone(),
            flag,
        }));
        let _ = self.chain_on(&mut cell, event)?;
        self.persist(&cell)?;
        Ok(())
    }

    // -- replay -------------------------------------------------------------

    /// Rebuild a capsule's state by replaying its ledger from genesis,
    /// commit the result as the current state, and return it.
    pub fn replay(&self, capsule_id: &CapsuleId) -> Result<State, NodeError> {
        let mut cell = self.lock_cell(capsule_id)?;
        let rebuilt = State::replay(
            capsule_id.clone(),
            cell.capsule.capsule_type(),
            cell.ledger.iter().map(|entry| &entry.event),
        );
        cell.state = rebuilt.clone();
        self.persist(&cell)?;
        Ok(rebuilt)
    }

    // -- plumbing -----------------------------------------------------------

    fn lock_cell(&self, capsule_id: &CapsuleId) -> Result<MutexGuard<'_, CapsuleCell>, NodeError> {
        self.cells
            .get(capsule_id)
            .ok_or_else(|| NodeError::CapsuleNotFound(capsule_id.clone()))?
            .lock()
            .map_err(|_poisoned| NodeError::Poisoned(capsule_id.clone()))
    }

    /// Run one chain inside a held cell lock and commit the new state.
    fn chain_on(
        &self,
        cell: &mut CapsuleCell,
        event: Event,
    ) -> Result<capsulenet_core::ChainOutcome, NodeError> {
        let outcome = self.bus.process_event_chain(
            event,
            &mut cell.capsule,
            &mut cell.ledger,
            &cell.state,
        )?;
        cell.state = outcome.state.clone();
        Ok(outcome)
    }

    /// Record an acknowledgment on the sender's ledger, when the sender
    /// is loaded in this node. An unloaded sender is fine: the pending
    /// record is already gone, and its ledger is not ours to write.
    fn acknowledge_sender(&self, sender: &CapsuleId, event: Event) -> Result<(), NodeError> {
        if !self.cells.contains_key(sender) {
            return Ok(());
        }
        let mut cell = self.lock_cell(sender)?;
        let _ = self.chain_on(&mut cell, event)?;
        self.persist(&cell)?;
        Ok(())
    }

    fn find_pending(&self, invitation_id: InvitationId) -> Result<PendingInvitation, NodeError> {
        self.store
            .load_pending()?
            .into_iter()
            .find(|invitation| invitation.invitation_id == invitation_id)
            .ok_or(NodeError::InvitationNotFound(invitation_id))
    }

    fn persist(&self, cell: &CapsuleCell) -> Result<(), NodeError> {
        self.store.save_capsule(&cell.capsule)?;
        self.store.save_ledger(&cell.ledger)?;
        self.store.save_state(&cell.state)?;
        Ok(())
    }
}
