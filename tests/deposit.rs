use std::sync::Mutex;

use assert_matches::assert_matches;
use reef_atlas_manager::deposit::{
    DepositMetadata, DepositRecord, DepositService, DraftDeposit, ensure_no_stale_draft,
    remove_restricted_files,
};
use reef_atlas_manager::domain::{DepositState, RemoteFile, RemoteVersion, SessionName};
use reef_atlas_manager::error::AtlasError;

const WORKING_ID: u64 = 100;
const REASSIGNED_ID: u64 = 101;

/// Records every call so the state-machine preconditions can be asserted.
struct RecordingService {
    state: DepositState,
    calls: Mutex<Vec<String>>,
    files: Vec<RemoteFile>,
}

impl RecordingService {
    fn with_state(state: DepositState) -> Self {
        Self {
            state,
            calls: Mutex::new(Vec::new()),
            files: Vec::new(),
        }
    }

    fn with_files(files: Vec<RemoteFile>) -> Self {
        Self {
            state: DepositState::Published,
            calls: Mutex::new(Vec::new()),
            files,
        }
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl DepositService for RecordingService {
    fn new_deposit(&self) -> Result<DraftDeposit, AtlasError> {
        self.record("new_deposit");
        Ok(DraftDeposit {
            deposit_id: WORKING_ID,
            bucket_url: "https://bucket/fresh".to_string(),
        })
    }

    fn new_version(&self, deposit_id: u64) -> Result<DraftDeposit, AtlasError> {
        self.record(format!("new_version:{deposit_id}"));
        Ok(DraftDeposit {
            deposit_id: deposit_id + 1,
            bucket_url: "https://bucket/new-version".to_string(),
        })
    }

    fn edit(&self, deposit_id: u64) -> Result<(), AtlasError> {
        self.record(format!("edit:{deposit_id}"));
        Ok(())
    }

    fn discard(&self, deposit_id: u64) -> Result<(), AtlasError> {
        self.record(format!("discard:{deposit_id}"));
        Ok(())
    }

    fn publish(&self, deposit_id: u64) -> Result<u64, AtlasError> {
        self.record(format!("publish:{deposit_id}"));
        Ok(deposit_id)
    }

    fn get_record(&self, deposit_id: u64) -> Result<DepositRecord, AtlasError> {
        self.record(format!("get_record:{deposit_id}"));
        Ok(DepositRecord {
            id: deposit_id,
            concept_id: 7,
            state: self.state,
            title: None,
            version_label: None,
        })
    }

    fn list_files(&self, _deposit_id: u64) -> Result<Vec<RemoteFile>, AtlasError> {
        self.record("list_files");
        Ok(self.files.clone())
    }

    fn delete_file(&self, _deposit_id: u64, file_id: &str) -> Result<(), AtlasError> {
        self.record(format!("delete_file:{file_id}"));
        Ok(())
    }

    fn set_metadata(
        &self,
        deposit_id: u64,
        _metadata: &DepositMetadata,
    ) -> Result<(), AtlasError> {
        self.record(format!("set_metadata:{deposit_id}"));
        Ok(())
    }

    fn find_by_session(&self, _session: &SessionName) -> Result<Option<u64>, AtlasError> {
        self.record("find_by_session");
        Ok(Some(REASSIGNED_ID))
    }

    fn list_concept_versions(&self, _concept_id: u64) -> Result<Vec<RemoteVersion>, AtlasError> {
        self.record("list_concept_versions");
        Ok(Vec::new())
    }
}

fn session() -> SessionName {
    "20231021_REU-TROUDEAU_ASV-1_01".parse().unwrap()
}

#[test]
fn stale_draft_is_discarded_before_new_version() {
    let service = RecordingService::with_state(DepositState::Draft);
    let working_id = ensure_no_stale_draft(&service, &session(), WORKING_ID).unwrap();
    // The discard reassigned the working identifier.
    assert_eq!(working_id, REASSIGNED_ID);

    let draft = service.new_version(working_id).unwrap();
    assert_eq!(draft.deposit_id, REASSIGNED_ID + 1);
    assert!(!draft.bucket_url.is_empty());

    assert_eq!(
        service.calls(),
        vec![
            format!("get_record:{WORKING_ID}"),
            format!("discard:{WORKING_ID}"),
            "find_by_session".to_string(),
            format!("new_version:{REASSIGNED_ID}"),
        ]
    );
}

#[test]
fn in_progress_draft_is_discarded() {
    let service = RecordingService::with_state(DepositState::InProgress);
    ensure_no_stale_draft(&service, &session(), WORKING_ID).unwrap();
    assert!(service.calls().contains(&format!("discard:{WORKING_ID}")));
}

#[test]
fn published_state_needs_no_discard() {
    let service = RecordingService::with_state(DepositState::Published);
    let working_id = ensure_no_stale_draft(&service, &session(), WORKING_ID).unwrap();
    assert_eq!(working_id, WORKING_ID);
    assert_eq!(service.calls(), vec![format!("get_record:{WORKING_ID}")]);
}

#[test]
fn editable_draft_needs_no_discard() {
    let service = RecordingService::with_state(DepositState::EditableDraft);
    let working_id = ensure_no_stale_draft(&service, &session(), WORKING_ID).unwrap();
    assert_eq!(working_id, WORKING_ID);
    assert!(!service.calls().iter().any(|call| call.starts_with("discard")));
}

fn remote_file(id: &str, key: &str) -> RemoteFile {
    RemoteFile {
        id: id.to_string(),
        key: key.to_string(),
        size: 1,
        checksum: None,
        download_url: None,
    }
}

#[test]
fn restricted_files_match_on_stripped_keys() {
    let service = RecordingService::with_files(vec![
        remote_file("f1", "DCIM.zip"),
        remote_file("f2", "DCIM_2.zip"),
        remote_file("f3", "GPS.zip"),
        remote_file("f4", "PROCESSED_DATA_IA.zip"),
    ]);

    remove_restricted_files(&service, WORKING_ID, &["DCIM".to_string()]).unwrap();

    let calls = service.calls();
    assert!(calls.contains(&"delete_file:f1".to_string()));
    assert!(calls.contains(&"delete_file:f2".to_string()));
    assert!(!calls.contains(&"delete_file:f3".to_string()));
    assert!(!calls.contains(&"delete_file:f4".to_string()));
}

#[test]
fn no_patterns_means_no_listing() {
    let service = RecordingService::with_files(vec![remote_file("f1", "DCIM.zip")]);
    remove_restricted_files(&service, WORKING_ID, &[]).unwrap();
    assert!(service.calls().is_empty());
}

#[test]
fn unknown_state_pairs_are_rejected() {
    let err = DepositState::from_parts("inprogress", false).unwrap_err();
    assert_matches!(err, AtlasError::UnknownDepositState { .. });
}
