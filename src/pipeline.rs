use std::fs;
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;

use crate::config::AtlasConfig;
use crate::deposit::{
    DepositMetadata, DepositService, DraftDeposit, ensure_no_stale_draft, remove_restricted_files,
    version_ids_by_kind,
};
use crate::domain::{MAX_DEPOSIT_BYTES, RemoteVersion, SessionName, StagedArtifact};
use crate::error::AtlasError;
use crate::fs_util;
use crate::import::{ImportRequest, ImportSummary, Importer};
use crate::reconcile::{self, SIZE_TOLERANCE_BYTES};
use crate::staging;
use crate::store::AtlasStore;
use crate::transfer::{CancelToken, ProgressEvent, ProgressSink, RetryPolicy, download_file, upload_file};

/// One session of a batch run: its name and the prepared staging directory
/// holding the zipped artifacts and the session data contract file.
#[derive(Debug, Clone)]
pub struct SessionSource {
    pub session: SessionName,
    pub staging_dir: Utf8PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionFailure {
    pub session: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub imported: usize,
    pub failures: Vec<SessionFailure>,
    pub finished_at: String,
}

/// Drives the whole reconcile-and-import flow, strictly sequentially: one
/// session at a time, one blocking remote call at a time. Every error short
/// of a fatal configuration/auth error is contained at the session boundary.
pub struct Pipeline<'c, D: DepositService> {
    service: D,
    store: &'c AtlasStore,
    transfer_client: Client,
    access_token: String,
    policy: RetryPolicy,
    session_delay: Duration,
    tolerance: u64,
}

impl<'c, D: DepositService> Pipeline<'c, D> {
    pub fn new(service: D, store: &'c AtlasStore, config: &AtlasConfig) -> Result<Self, AtlasError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("reef-am/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| AtlasError::Filesystem(err.to_string()))?,
        );
        let transfer_client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|err| AtlasError::TransferHttp(err.to_string()))?;

        Ok(Self {
            service,
            store,
            transfer_client,
            access_token: config.access_token.clone(),
            policy: RetryPolicy::default(),
            session_delay: config.session_delay,
            tolerance: SIZE_TOLERANCE_BYTES,
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_tolerance(mut self, tolerance: u64) -> Self {
        self.tolerance = tolerance;
        self
    }

    fn token_param(&self) -> [(&str, &str); 1] {
        [("access_token", self.access_token.as_str())]
    }

    /// Reconciles and imports a batch of sessions. Per-session errors are
    /// recorded and the run continues; fatal errors abort immediately.
    pub fn update_sessions(
        &self,
        sources: &[SessionSource],
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, AtlasError> {
        let mut summary = RunSummary::default();
        for (index, source) in sources.iter().enumerate() {
            if index > 0 {
                // Courtesy delay between sessions.
                thread::sleep(self.session_delay);
            }
            summary.processed += 1;
            sink.event(ProgressEvent {
                message: format!("phase=Session; {} ({}/{})", source.session, index + 1, sources.len()),
                elapsed: None,
            });
            match self.update_session(&source.session, &source.staging_dir, sink) {
                Ok(import) => {
                    summary.imported += 1;
                    tracing::info!(
                        session = %source.session,
                        frames = import.frames_inserted,
                        predictions = import.predictions_inserted,
                        "session imported"
                    );
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::error!(session = %source.session, error = %err, "session failed");
                    summary.failures.push(SessionFailure {
                        session: source.session.to_string(),
                        error: err.to_string(),
                    });
                }
            }
        }
        summary.finished_at = chrono::Utc::now().to_rfc3339();
        Ok(summary)
    }

    /// Reconcile-and-import for a single session.
    pub fn update_session(
        &self,
        session: &SessionName,
        staging_dir: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<ImportSummary, AtlasError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; looking up {session}"),
            elapsed: None,
        });
        let deposit_id = self
            .service
            .find_by_session(session)?
            .ok_or_else(|| AtlasError::SessionNotFound(session.to_string()))?;
        let record = self.service.get_record(deposit_id)?;
        let versions = self.service.list_concept_versions(record.concept_id)?;
        let (raw_ids, processed_ids) = version_ids_by_kind(&versions);
        tracing::debug!(
            concept = record.concept_id,
            raw = raw_ids.len(),
            processed = processed_ids.len(),
            "remote lineages resolved"
        );

        let artifacts = staging::collect_artifacts(staging_dir)?;
        let data = staging::load_session_data(staging_dir)?;

        sink.event(ProgressEvent {
            message: format!("phase=Reconcile; {} staged artifacts", artifacts.len()),
            elapsed: None,
        });
        let reconciliation = reconcile::reconcile(session, &artifacts, &versions, self.tolerance)?;

        sink.event(ProgressEvent {
            message: "phase=Import; writing atlas rows".to_string(),
            elapsed: None,
        });
        let importer = Importer::new(self.store);
        importer.import_session(&ImportRequest {
            session,
            concept_id: record.concept_id,
            versions: &versions,
            reconciliation: &reconciliation,
            data: &data,
        })
    }

    /// Publishes the staged artifacts as a brand-new deposit or as a new
    /// version of the session's existing one. Any stale unpublished draft is
    /// discarded first; restricted files are removed from the draft because
    /// published file sets are append-only.
    pub fn publish_session(
        &self,
        session: &SessionName,
        staging_dir: &Utf8Path,
        metadata: &DepositMetadata,
        restricted: &[String],
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> Result<u64, AtlasError> {
        let artifacts = staging::collect_artifacts(staging_dir)?;
        let total_bytes: u64 = artifacts.iter().map(|artifact| artifact.size).sum();
        if total_bytes > MAX_DEPOSIT_BYTES {
            return Err(AtlasError::DepositTooLarge { total_bytes });
        }
        for artifact in &artifacts {
            fs_util::validate_zip(artifact.path.as_std_path())?;
        }

        let draft = match self.service.find_by_session(session)? {
            Some(deposit_id) => {
                sink.event(ProgressEvent {
                    message: format!("phase=Draft; new version of deposit {deposit_id}"),
                    elapsed: None,
                });
                let working_id = ensure_no_stale_draft(&self.service, session, deposit_id)?;
                let draft = self.service.new_version(working_id)?;
                remove_restricted_files(&self.service, draft.deposit_id, restricted)?;
                draft
            }
            None => {
                sink.event(ProgressEvent {
                    message: "phase=Draft; creating deposit".to_string(),
                    elapsed: None,
                });
                self.service.new_deposit()?
            }
        };

        self.upload_artifacts(&draft, &artifacts, cancel, sink)?;
        self.service.set_metadata(draft.deposit_id, metadata)?;

        sink.event(ProgressEvent {
            message: format!("phase=Publish; deposit {}", draft.deposit_id),
            elapsed: None,
        });
        self.service.publish(draft.deposit_id)
    }

    /// Reopens a published deposit's metadata without creating a version.
    pub fn edit_session_metadata(
        &self,
        session: &SessionName,
        metadata: &DepositMetadata,
    ) -> Result<u64, AtlasError> {
        let deposit_id = self
            .service
            .find_by_session(session)?
            .ok_or_else(|| AtlasError::SessionNotFound(session.to_string()))?;
        let working_id = ensure_no_stale_draft(&self.service, session, deposit_id)?;
        self.service.edit(working_id)?;
        self.service.set_metadata(working_id, metadata)?;
        self.service.publish(working_id)
    }

    fn upload_artifacts(
        &self,
        draft: &DraftDeposit,
        artifacts: &[StagedArtifact],
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> Result<(), AtlasError> {
        for artifact in artifacts {
            sink.event(ProgressEvent {
                message: format!("phase=Upload; {}", artifact.key),
                elapsed: None,
            });
            upload_file(
                &self.transfer_client,
                &draft.bucket_url,
                artifact,
                &self.token_param(),
                &self.policy,
                cancel,
                sink,
            )?;
        }
        Ok(())
    }

    /// Downloads every file of the session's raw versions and of its latest
    /// processed version into `output_dir/<session>/`, verifying checksums
    /// and unpacking archives into the session layout.
    pub fn download_session(
        &self,
        session: &SessionName,
        output_dir: &Utf8Path,
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> Result<(), AtlasError> {
        let deposit_id = self
            .service
            .find_by_session(session)?
            .ok_or_else(|| AtlasError::SessionNotFound(session.to_string()))?;
        let record = self.service.get_record(deposit_id)?;
        let versions = self.service.list_concept_versions(record.concept_id)?;

        let mut selected: Vec<&RemoteVersion> =
            versions.iter().filter(|version| version.label.is_raw()).collect();
        // All raw parts matter; of the processed lineage only the latest.
        if let Some(latest_processed) = versions
            .iter()
            .filter(|version| version.label.is_processed())
            .max_by_key(|version| version.id)
        {
            selected.push(latest_processed);
        }

        let session_dir = output_dir.join(session.as_str());
        let zip_dir = session_dir.join("ZIP");
        fs::create_dir_all(zip_dir.as_std_path())
            .map_err(|err| AtlasError::Filesystem(err.to_string()))?;

        for version in selected {
            sink.event(ProgressEvent {
                message: format!("phase=Download; version {} ({})", version.id, version.label),
                elapsed: None,
            });
            for file in &version.files {
                let Some(url) = file.download_url.as_deref() else {
                    tracing::warn!(key = %file.key, "remote file has no download link, skipping");
                    continue;
                };
                let archive_path = zip_dir.join(&file.key);
                download_file(
                    &self.transfer_client,
                    url,
                    &self.token_param(),
                    archive_path.as_std_path(),
                    file.checksum.as_deref(),
                    &self.policy,
                    cancel,
                    sink,
                )?;

                if file.key.ends_with(".zip") {
                    let destination =
                        fs_util::archive_destination(session_dir.as_std_path(), &file.key);
                    fs::create_dir_all(&destination)
                        .map_err(|err| AtlasError::Filesystem(err.to_string()))?;
                    fs_util::extract_zip(archive_path.as_std_path(), &destination)?;
                    fs::remove_file(archive_path.as_std_path())
                        .map_err(|err| AtlasError::Filesystem(err.to_string()))?;
                } else {
                    fs::rename(
                        archive_path.as_std_path(),
                        session_dir.join(&file.key).as_std_path(),
                    )
                    .map_err(|err| AtlasError::Filesystem(err.to_string()))?;
                }
            }
        }

        // Only downloaded archives lived here.
        if fs::read_dir(zip_dir.as_std_path())
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false)
        {
            fs::remove_dir(zip_dir.as_std_path())
                .map_err(|err| AtlasError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }
}
