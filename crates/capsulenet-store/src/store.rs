//! The [`FileStore`]: one JSON file per logical record.

use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use serde::de::DeserializeOwned;

use capsulenet_core::State;
use capsulenet_ledger::Ledger;
use capsulenet_types::{Capsule, CapsuleId, InvitationId, PendingInvitation};

use crate::{StoreConfig, StoreError};

/// File name of the shared pending-invitation record.
const PENDING_FILE: &str = "pending_invitations.json";

/// Suffix identifying capsule record files.
const CAPSULE_SUFFIX: &str = "_capsule.json";

/// JSON file persistence rooted at one data directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    config: StoreConfig,
}

impl FileStore {
    /// Open a store, creating the data directory when absent.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] when the directory cannot be created.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.data_dir)?;
        Ok(Self { config })
    }

    /// The directory every record lives under.
    pub fn data_dir(&self) -> &std::path::Path {
        &self.config.data_dir
    }

    // -- capsule records ----------------------------------------------------

    /// Persist a capsule record.
    pub fn save_capsule(&self, capsule: &Capsule) -> Result<(), StoreError> {
        self.write(self.capsule_path(capsule.id()), capsule)
    }

    /// Load a capsule record.
    ///
    /// # Errors
    ///
    /// [`StoreError::RecordNotFound`] when the file does not exist,
    /// [`StoreError::Serialization`] when it fails to parse.
    pub fn load_capsule(&self, capsule_id: &CapsuleId) -> Result<Capsule, StoreError> {
        self.read(self.capsule_path(capsule_id), "capsule", capsule_id)
    }

    // -- ledger records -----------------------------------------------------

    /// Persist a ledger record.
    pub fn save_ledger(&self, ledger: &Ledger) -> Result<(), StoreError> {
        self.write(self.ledger_path(ledger.capsule_id()), ledger)
    }

    /// Load a ledger record and verify its sequencing invariant.
    ///
    /// # Errors
    ///
    /// [`StoreError::RecordNotFound`], [`StoreError::Serialization`], or
    /// [`StoreError::InvalidLedger`] when the restored ledger has a
    /// sequence gap or counter mismatch.
    pub fn load_ledger(&self, capsule_id: &CapsuleId) -> Result<Ledger, StoreError> {
        let ledger: Ledger = self.read(self.ledger_path(capsule_id), "ledger", capsule_id)?;
        ledger.verify_sequence()?;
        Ok(ledger)
    }

    // -- state records ------------------------------------------------------

    /// Persist a state record.
    pub fn save_state(&self, state: &State) -> Result<(), StoreError> {
        self.write(self.state_path(state.capsule_id()), state)
    }

    /// Load a state record.
    pub fn load_state(&self, capsule_id: &CapsuleId) -> Result<State, StoreError> {
        self.read(self.state_path(capsule_id), "state", capsule_id)
    }

    /// Whether a state record exists for the capsule.
    pub fn has_state(&self, capsule_id: &CapsuleId) -> bool {
        self.state_path(capsule_id).exists()
    }

    // -- pending invitations ------------------------------------------------

    /// All pending invitations. An absent file reads as empty.
    pub fn load_pending(&self) -> Result<Vec<PendingInvitation>, StoreError> {
        let path = self.config.data_dir.join(PENDING_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Append one pending invitation to the shared record.
    pub fn push_pending(&self, invitation: PendingInvitation) -> Result<(), StoreError> {
        let mut pending = self.load_pending()?;
        pending.push(invitation);
        self.write(self.config.data_dir.join(PENDING_FILE), &pending)
    }

    /// Remove a pending invitation by ID, returning it when present.
    pub fn remove_pending(
        &self,
        invitation_id: InvitationId,
    ) -> Result<Option<PendingInvitation>, StoreError> {
        let mut pending = self.load_pending()?;
        let position = pending
            .iter()
            .position(|inv| inv.invitation_id == invitation_id);
        let Some(position) = position else {
            return Ok(None);
        };
        let removed = pending.remove(position);
        self.write(self.config.data_dir.join(PENDING_FILE), &pending)?;
        Ok(Some(removed))
    }

    // -- listing ------------------------------------------------------------

    /// IDs of every capsule with a record in the data directory, sorted.
    pub fn list_capsules(&self) -> Result<Vec<CapsuleId>, StoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.config.data_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(id) = name.strip_suffix(CAPSULE_SUFFIX) {
                ids.push(CapsuleId::from(id));
            }
        }
        ids.sort();
        Ok(ids)
    }

    // -- plumbing -----------------------------------------------------------

    fn capsule_path(&self, capsule_id: &CapsuleId) -> PathBuf {
        self.config
            .data_dir
            .join(format!("{capsule_id}{CAPSULE_SUFFIX}"))
    }

    fn ledger_path(&self, capsule_id: &CapsuleId) -> PathBuf {
        self.config.data_dir.join(format!("{capsule_id}_ledger.json"))
    }

    fn state_path(&self, capsule_id: &CapsuleId) -> PathBuf {
        self.config.data_dir.join(format!("{capsule_id}_state.json"))
    }

    fn write<T: Serialize>(&self, path: PathBuf, value: &T) -> Result<(), StoreError> {
        let bytes = if self.config.pretty_json {
            serde_json::to_vec_pretty(value)?
        } else {
            serde_json::to_vec(value)?
        };
        fs::write(&path, bytes)?;
        tracing::debug!(path = %path.display(), "record written");
        Ok(())
    }

    fn read<T: DeserializeOwned>(
        &self,
        path: PathBuf,
        record: &'static str,
        capsule_id: &CapsuleId,
    ) -> Result<T, StoreError> {
        if !path.exists() {
            return Err(StoreError::RecordNotFound {
                record,
                capsule_id: capsule_id.to_string(),
            });
        }
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use chrono::Utc;

    use capsulenet_types::{
        CapsuleType, Event, EventPayload, SlotType, StarterId,
    };

    /// Store rooted in a unique temp directory, removed on drop.
    struct TempStore {
        store: FileStore,
        dir: PathBuf,
    }

    impl TempStore {
        fn new() -> Self {
            let dir = std::env::temp_dir().join(format!("capsulenet-{}", uuid::Uuid::now_v7()));
            let store = FileStore::open(StoreConfig {
                data_dir: dir.clone(),
                pretty_json: false,
            })
            .unwrap();
            Self { store, dir }
        }
    }

    impl Drop for TempStore {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    fn generate_event(capsule: &str) -> Event {
        Event::new(EventPayload::Generate {
            capsule_id: CapsuleId::from(capsule),
            slot_type: SlotType::Juice,
            starter_id: Some(StarterId::new()),
            based_on: None,
        })
    }

    #[test]
    fn capsule_record_roundtrips() {
        let temp = TempStore::new();
        let capsule = Capsule::new(CapsuleId::from("genesis-1"), CapsuleType::Genesis);

        temp.store.save_capsule(&capsule).unwrap();
        let restored = temp.store.load_capsule(&CapsuleId::from("genesis-1")).unwrap();
        assert_eq!(capsule, restored);
    }

    #[test]
    fn missing_capsule_is_record_not_found() {
        let temp = TempStore::new();
        let result = temp.store.load_capsule(&CapsuleId::from("nobody"));
        assert!(matches!(
            result,
            Err(StoreError::RecordNotFound { record: "capsule", .. })
        ));
    }

    #[test]
    fn ledger_record_roundtrips_with_sequence_intact() {
        let temp = TempStore::new();
        let mut ledger = Ledger::new(CapsuleId::from("genesis-1"));
        let _ = ledger
            .append(generate_event("genesis-1"), BTreeSet::from(["generate".to_owned()]))
            .unwrap();
        let _ = ledger
            .append(generate_event("genesis-1"), BTreeSet::from(["generate".to_owned()]))
            .unwrap();

        temp.store.save_ledger(&ledger).unwrap();
        let restored = temp.store.load_ledger(&CapsuleId::from("genesis-1")).unwrap();
        assert_eq!(ledger, restored);
        assert_eq!(restored.sequence_counter(), 2);
    }

    #[test]
    fn corrupt_ledger_record_fails_without_touching_siblings() {
        let temp = TempStore::new();
        let capsule = Capsule::new(CapsuleId::from("proto-1"), CapsuleType::Proto);
        temp.store.save_capsule(&capsule).unwrap();

        // A ledger whose event carries an unknown tag must fail to load.
        fs::write(
            temp.dir.join("proto-1_ledger.json"),
            br#"{"capsule_id":"proto-1","entries":[{"event":{"id":"0198a000-0000-7000-8000-000000000000","timestamp":"2026-01-01T00:00:00Z","event_type":"wormhole","metadata":{}},"capsule_id":"proto-1","sequence_number":1,"timestamp":"2026-01-01T00:00:00Z","tags":[]}],"sequence_counter":1}"#,
        )
        .unwrap();

        let result = temp.store.load_ledger(&CapsuleId::from("proto-1"));
        assert!(matches!(result, Err(StoreError::Serialization { .. })));

        // The capsule record next to it still loads.
        assert!(temp.store.load_capsule(&CapsuleId::from("proto-1")).is_ok());
    }

    #[test]
    fn state_record_roundtrips() {
        let temp = TempStore::new();
        let state = State::initial(CapsuleId::from("proto-1"), CapsuleType::Proto)
            .apply_event(&generate_event("proto-1"));

        temp.store.save_state(&state).unwrap();
        assert!(temp.store.has_state(&CapsuleId::from("proto-1")));
        let restored = temp.store.load_state(&CapsuleId::from("proto-1")).unwrap();
        assert_eq!(state, restored);
    }

    #[test]
    fn pending_invitations_push_and_remove() {
        let temp = TempStore::new();
        assert!(temp.store.load_pending().unwrap().is_empty());

        let invitation = PendingInvitation {
            invitation_id: InvitationId::new(),
            sender: CapsuleId::from("genesis-1"),
            recipient: CapsuleId::from("proto-1"),
            slot_type: SlotType::Juice,
            starter_id: StarterId::new(),
            created_at: Utc::now(),
        };
        temp.store.push_pending(invitation.clone()).unwrap();
        assert_eq!(temp.store.load_pending().unwrap(), vec![invitation.clone()]);

        let removed = temp.store.remove_pending(invitation.invitation_id).unwrap();
        assert_eq!(removed, Some(invitation));
        assert!(temp.store.load_pending().unwrap().is_empty());

        // Removing again is a clean None, not an error.
        assert!(temp.store.remove_pending(InvitationId::new()).unwrap().is_none());
    }

    #[test]
    fn list_capsules_scans_record_files() {
        let temp = TempStore::new();
        for id in ["proto-2", "genesis-1", "proto-1"] {
            let capsule = Capsule::new(CapsuleId::from(id), CapsuleType::Proto);
            temp.store.save_capsule(&capsule).unwrap();
        }

        let ids = temp.store.list_capsules().unwrap();
        assert_eq!(
            ids,
            vec![
                CapsuleId::from("genesis-1"),
                CapsuleId::from("proto-1"),
                CapsuleId::from("proto-2"),
            ]
        );
    }
}
