//! The single authoritative process façade for a capsule network.
//!
//! A [`Node`] owns one or more capsules, each as an independent cell
//! holding the capsule entity, its append-only ledger, and its replayed
//! state behind one mutex. External collaborators (a CLI, a test
//! harness) consume the node's operations -- create, load, status,
//! invite, accept, reject, toggle, list, replay -- and never touch the
//! cells directly.
//!
//! # Concurrency contract
//!
//! - **Atomicity unit**: appending an event and folding it into state
//!   happen together inside the cell's critical section; no reader can
//!   observe one without the other.
//! - **Cross-capsule isolation**: cells never synchronize with each
//!   other. Operations spanning two capsules (an invitation and its
//!   acknowledgment) take the two locks strictly one after the other,
//!   each for its own event chain.
//! - **No mid-chain interleaving**: a chain runs to completion under its
//!   cell's lock before the lock is released.

pub mod node;

pub use node::{AcceptDisposition, Node, NodeError, SlotStatus, StatusReport};
