//! Variant-keyed publish/subscribe and bounded event-chain processing.
//!
//! The bus decouples event producers from the protocol modules that
//! react to them. Handlers subscribe per [`EventType`]; publishing an
//! event invokes the subscribed handlers in descending priority order
//! (ties broken by registration order) and collects whatever follow-up
//! events they return.
//!
//! A failing handler is contained, not propagated: its fault is logged,
//! reported in the publish result, and the remaining handlers still run.
//!
//! [`EventBus::process_event_chain`] is the only place cascading
//! multi-event effects are fully resolved. It drains an explicit FIFO
//! queue instead of recursing, which keeps cascade depth observable and
//! lets two guards -- a hard length cap and a visited-event-ID set --
//! turn a pathological handler chain into an error instead of a hang.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use capsulenet_ledger::{Ledger, LedgerError};
use capsulenet_types::{Capsule, EntityError, Event, EventId, EventType};

use crate::state::State;

/// Hard cap on the number of events one chain may process.
pub const MAX_CHAIN_EVENTS: usize = 64;

/// Tag stamped on ledger entries for events produced inside a chain
/// (as opposed to the event that seeded it).
pub const DERIVED_TAG: &str = "derived";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors a protocol module may raise while handling an event.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// An entity mutator refused the operation.
    #[error(transparent)]
    Entity(#[from] EntityError),

    /// A protocol invariant did not hold.
    #[error("protocol invariant violated: {message}")]
    Invariant {
        /// What went wrong.
        message: String,
    },
}

/// A handler failure contained at the bus boundary.
#[derive(Debug, thiserror::Error)]
#[error("handler {handler} failed on event {event_id}: {source}")]
pub struct HandlerFault {
    /// Name of the failing handler.
    pub handler: &'static str,
    /// The event being handled when it failed.
    pub event_id: EventId,
    /// The underlying module error.
    #[source]
    pub source: ModuleError,
}

/// Errors that abort event-chain processing.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The chain produced more events than [`MAX_CHAIN_EVENTS`].
    #[error("event chain exceeded {limit} events")]
    ChainOverflow {
        /// The configured cap.
        limit: usize,
    },

    /// The same event ID was enqueued twice in one chain.
    #[error("event chain cycle detected at event {event_id}")]
    ChainCycle {
        /// The event seen twice.
        event_id: EventId,
    },

    /// Appending a chained event to the ledger failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

// ---------------------------------------------------------------------------
// Handler trait and registration
// ---------------------------------------------------------------------------

/// A protocol module reacting to published events.
///
/// Handlers inspect the event, may mutate the target capsule's entity
/// state, and may return zero or more follow-up events. They must not
/// reach into other capsules' state; cross-capsule effects flow through
/// explicitly published events.
pub trait EventHandler: Send + Sync {
    /// Stable name used in logs and fault reports.
    fn name(&self) -> &'static str;

    /// React to one event.
    fn on_event(&self, event: &Event, capsule: &mut Capsule) -> Result<Vec<Event>, ModuleError>;
}

/// Token returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerId(u64);

struct Registration {
    id: HandlerId,
    priority: i32,
    handler: Arc<dyn EventHandler>,
}

// ---------------------------------------------------------------------------
// Publish results
// ---------------------------------------------------------------------------

/// What one publish produced.
#[derive(Default)]
pub struct PublishReport {
    /// Follow-up events returned by the handlers, in handler order.
    pub follow_ups: Vec<Event>,
    /// Contained handler failures.
    pub faults: Vec<HandlerFault>,
}

/// The result of draining one event chain.
pub struct ChainOutcome {
    /// The state after every event in the chain was folded.
    pub state: State,
    /// Every event processed, root first, in dequeue order.
    pub processed: Vec<Event>,
    /// Contained handler failures accumulated across the chain.
    pub faults: Vec<HandlerFault>,
}

impl ChainOutcome {
    /// The starter-generation event produced by a successful
    /// invitation acceptance, when the chain contains one.
    pub fn invitation_starter(&self) -> Option<&Event> {
        self.processed.iter().find(|event| {
            matches!(
                &event.payload,
                capsulenet_types::EventPayload::StarterGenerated {
                    from_invitation: true,
                    burned: false,
                    ..
                }
            )
        })
    }

    /// The burn-flavored starter event recorded by a rejection, when the
    /// chain contains one.
    pub fn burn_record(&self) -> Option<&Event> {
        self.processed.iter().find(|event| {
            matches!(
                &event.payload,
                capsulenet_types::EventPayload::StarterGenerated { burned: true, .. }
            )
        })
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Publish/subscribe dispatcher routing events to protocol modules.
#[derive(Default)]
pub struct EventBus {
    handlers: BTreeMap<EventType, Vec<Registration>>,
    next_handler_id: u64,
}

impl EventBus {
    /// Create an empty bus with no subscriptions.
    pub const fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
            next_handler_id: 0,
        }
    }

    /// Register a handler for one event variant.
    ///
    /// Handlers for the same variant run in descending priority order;
    /// equal priorities run in registration order (the sort is stable).
    pub fn subscribe(
        &mut self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
        priority: i32,
    ) -> HandlerId {
        self.next_handler_id = self.next_handler_id.saturating_add(1);
        let id = HandlerId(self.next_handler_id);

        let registrations = self.handlers.entry(event_type).or_default();
        registrations.push(Registration {
            id,
            priority,
            handler,
        });
        registrations.sort_by(|a, b| b.priority.cmp(&a.priority));

        id
    }

    /// Remove a previously registered handler. No-op when absent.
    pub fn unsubscribe(&mut self, event_type: EventType, handler_id: HandlerId) {
        if let Some(registrations) = self.handlers.get_mut(&event_type) {
            registrations.retain(|registration| registration.id != handler_id);
        }
    }

    /// Invoke every handler subscribed to the event's variant and collect
    /// their follow-up events.
    ///
    /// Handler failures are contained: each is logged, recorded in the
    /// report, and does not prevent the remaining handlers from running.
    /// Follow-ups are *not* re-published here; callers wanting the full
    /// cascade use [`EventBus::process_event_chain`].
    pub fn publish(&self, event: &Event, capsule: &mut Capsule) -> PublishReport {
        let mut report = PublishReport::default();

        let Some(registrations) = self.handlers.get(&event.event_type()) else {
            return report;
        };

        for registration in registrations {
            match registration.handler.on_event(event, capsule) {
                Ok(follow_ups) => report.follow_ups.extend(follow_ups),
                Err(source) => {
                    let fault = HandlerFault {
                        handler: registration.handler.name(),
                        event_id: event.id,
                        source,
                    };
                    tracing::warn!(fault = %fault, "handler fault contained");
                    report.faults.push(fault);
                }
            }
        }

        report
    }

    /// Drain a FIFO queue seeded with `initial` until no follow-up events
    /// remain.
    ///
    /// For each dequeued event: append it to the ledger, fold it into the
    /// current state, publish it, and enqueue whatever the handlers
    /// produced. The append and the fold form the atomicity unit -- this
    /// method runs to completion synchronously, so a caller holding the
    /// capsule's lock guarantees no reader observes one without the
    /// other.
    ///
    /// # Errors
    ///
    /// [`BusError::ChainOverflow`] past [`MAX_CHAIN_EVENTS`] events,
    /// [`BusError::ChainCycle`] when an event ID repeats within the
    /// chain, [`BusError::Ledger`] when an append fails.
    pub fn process_event_chain(
        &self,
        initial: Event,
        capsule: &mut Capsule,
        ledger: &mut Ledger,
        state: &State,
    ) -> Result<ChainOutcome, BusError> {
        let mut queue = VecDeque::from([initial]);
        let mut seen: BTreeSet<EventId> = BTreeSet::new();
        let mut current = state.clone();
        let mut processed = Vec::new();
        let mut faults = Vec::new();

        while let Some(event) = queue.pop_front() {
            if processed.len() >= MAX_CHAIN_EVENTS {
                return Err(BusError::ChainOverflow {
                    limit: MAX_CHAIN_EVENTS,
                });
            }
            if !seen.insert(event.id) {
                return Err(BusError::ChainCycle { event_id: event.id });
            }

            let mut tags = BTreeSet::from([event.event_type().tag().to_owned()]);
            if !processed.is_empty() {
                tags.insert(DERIVED_TAG.to_owned());
            }
            let _ = ledger.append(event.clone(), tags)?;
            current = current.apply_event(&event);

            let report = self.publish(&event, capsule);
            faults.extend(report.faults);
            queue.extend(report.follow_ups);
            processed.push(event);
        }

        tracing::debug!(
            capsule = %capsule.id(),
            events = processed.len(),
            faults = faults.len(),
            "event chain drained"
        );

        Ok(ChainOutcome {
            state: current,
            processed,
            faults,
        })
    }
}
