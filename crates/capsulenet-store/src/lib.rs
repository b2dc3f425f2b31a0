//! JSON file persistence for the capsule network.
//!
//! One logical record per file, all under a configured data directory:
//!
//! | Record | File |
//! |--------|------|
//! | Capsule | `{id}_capsule.json` |
//! | Ledger | `{id}_ledger.json` |
//! | State | `{id}_state.json` |
//! | Pending invitations (shared) | `pending_invitations.json` |
//!
//! Every record round-trips losslessly. A record that fails to parse --
//! including one carrying an unrecognized event-type tag -- aborts the
//! load of that record only; sibling files are untouched because each
//! record lives in its own file.

pub mod config;
pub mod store;

pub use config::{ConfigError, StoreConfig};
pub use store::FileStore;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur in the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing a record file failed.
    #[error("store I/O failure: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// A record failed to parse into the expected structure.
    #[error("record failed to parse: {source}")]
    Serialization {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },

    /// The requested record does not exist on disk.
    #[error("no {record} record for capsule {capsule_id}")]
    RecordNotFound {
        /// Which record kind was requested.
        record: &'static str,
        /// The capsule it was requested for.
        capsule_id: String,
    },

    /// A restored ledger violates its sequencing invariant.
    #[error("restored ledger is invalid: {source}")]
    InvalidLedger {
        /// The underlying ledger error.
        #[from]
        source: capsulenet_ledger::LedgerError,
    },
}
