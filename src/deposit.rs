use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};

use crate::domain::{DepositState, RemoteFile, RemoteVersion, SessionName, VersionLabel};
use crate::error::AtlasError;

/// The remote service times out on large pages, keep this low.
pub const VERSIONS_PAGE_SIZE: usize = 100;

/// An editable draft handed back by `new_deposit` / `new_version`, with the
/// bucket endpoint that accepts raw file uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftDeposit {
    pub deposit_id: u64,
    pub bucket_url: String,
}

#[derive(Debug, Clone)]
pub struct DepositRecord {
    pub id: u64,
    pub concept_id: u64,
    pub state: DepositState,
    pub title: Option<String>,
    pub version_label: Option<VersionLabel>,
}

/// Metadata pushed onto a draft before publication. The session urn is the
/// alternate identifier discovery queries on.
#[derive(Debug, Clone, Serialize)]
pub struct DepositMetadata {
    pub title: String,
    pub upload_type: String,
    pub description: String,
    pub version: String,
    pub session_urn: String,
}

/// Per-deposit state machine of the remote repository, plus lookup/listing.
///
/// Every mutating call must observe the discard protocol: a stale
/// unpublished draft is discarded before `new_version` / `edit`
/// (see [`ensure_no_stale_draft`]).
pub trait DepositService: Send + Sync {
    fn new_deposit(&self) -> Result<DraftDeposit, AtlasError>;
    fn new_version(&self, deposit_id: u64) -> Result<DraftDeposit, AtlasError>;
    fn edit(&self, deposit_id: u64) -> Result<(), AtlasError>;
    fn discard(&self, deposit_id: u64) -> Result<(), AtlasError>;
    fn publish(&self, deposit_id: u64) -> Result<u64, AtlasError>;
    fn get_record(&self, deposit_id: u64) -> Result<DepositRecord, AtlasError>;
    fn list_files(&self, deposit_id: u64) -> Result<Vec<RemoteFile>, AtlasError>;
    fn delete_file(&self, deposit_id: u64, file_id: &str) -> Result<(), AtlasError>;
    fn set_metadata(&self, deposit_id: u64, metadata: &DepositMetadata) -> Result<(), AtlasError>;
    fn find_by_session(&self, session: &SessionName) -> Result<Option<u64>, AtlasError>;
    fn list_concept_versions(&self, concept_id: u64) -> Result<Vec<RemoteVersion>, AtlasError>;
}

/// Reads the current state and discards any stale unpublished draft before a
/// mutating operation. A discard can reassign the working identifier, so the
/// id is re-resolved through the session urn afterwards.
pub fn ensure_no_stale_draft(
    service: &dyn DepositService,
    session: &SessionName,
    deposit_id: u64,
) -> Result<u64, AtlasError> {
    let record = service.get_record(deposit_id)?;
    if !record.state.needs_discard() {
        return Ok(deposit_id);
    }
    tracing::info!(deposit_id, session = %session, "discarding stale draft");
    service.discard(deposit_id)?;
    service
        .find_by_session(session)?
        .ok_or_else(|| AtlasError::SessionNotFound(session.to_string()))
}

/// Deletes draft files whose key matches one of the name patterns. Keys are
/// compared with the `.zip` suffix and `PROCESSED_DATA_` prefix stripped, so
/// a pattern like `DCIM` also hits `DCIM_2.zip`. Published file sets are
/// append-only, so this must run on the draft, before `publish`.
pub fn remove_restricted_files(
    service: &dyn DepositService,
    deposit_id: u64,
    patterns: &[String],
) -> Result<(), AtlasError> {
    if patterns.is_empty() {
        return Ok(());
    }
    for file in service.list_files(deposit_id)? {
        let name = file.key.replace(".zip", "").replace("PROCESSED_DATA_", "");
        if patterns.iter().any(|pattern| name.contains(pattern.as_str())) {
            tracing::info!(deposit_id, key = %file.key, "removing restricted file from draft");
            service.delete_file(deposit_id, &file.id)?;
        }
    }
    Ok(())
}

/// Splits a concept's versions into the raw and processed lineages.
/// Other labels (deprecated snapshots etc.) are skipped.
pub fn version_ids_by_kind(versions: &[RemoteVersion]) -> (Vec<u64>, Vec<u64>) {
    let mut raw_ids = Vec::new();
    let mut processed_ids = Vec::new();
    for version in versions {
        if version.label.is_raw() {
            raw_ids.push(version.id);
        } else if version.label.is_processed() {
            processed_ids.push(version.id);
        } else {
            tracing::debug!(id = version.id, label = %version.label, "skipping non-data version");
        }
    }
    (raw_ids, processed_ids)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Num(u64),
    Str(String),
}

impl IdRepr {
    fn to_u64(&self) -> Option<u64> {
        match self {
            IdRepr::Num(value) => Some(*value),
            IdRepr::Str(value) => value.parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LinksPayload {
    #[serde(default)]
    bucket: Option<String>,
    #[serde(default)]
    download: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataPayload {
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FilePayload {
    id: String,
    #[serde(alias = "filename")]
    key: String,
    #[serde(alias = "filesize")]
    size: u64,
    #[serde(default)]
    checksum: Option<String>,
    #[serde(default)]
    links: Option<LinksPayload>,
}

impl From<FilePayload> for RemoteFile {
    fn from(file: FilePayload) -> Self {
        let download_url = file.links.and_then(|links| links.download);
        RemoteFile {
            id: file.id,
            key: file.key,
            size: file.size,
            checksum: file.checksum,
            download_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DepositionPayload {
    id: u64,
    #[serde(default)]
    conceptrecid: Option<IdRepr>,
    state: String,
    submitted: bool,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    links: Option<LinksPayload>,
    #[serde(default)]
    metadata: Option<MetadataPayload>,
    #[serde(default)]
    files: Option<Vec<FilePayload>>,
}

#[derive(Clone)]
pub struct HttpDepositService {
    client: Client,
    depositions_url: String,
    access_token: String,
}

impl HttpDepositService {
    pub fn new(api_base: &str, access_token: &str) -> Result<Self, AtlasError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("reef-am/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| AtlasError::Filesystem(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| AtlasError::DepositHttp(err.to_string()))?;
        Ok(Self {
            client,
            depositions_url: format!(
                "{}/deposit/depositions",
                api_base.trim_end_matches('/')
            ),
            access_token: access_token.to_string(),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn token_param(&self) -> [(&str, &str); 1] {
        [("access_token", self.access_token.as_str())]
    }

    fn deposit_url(&self, deposit_id: u64) -> String {
        format!("{}/{}", self.depositions_url, deposit_id)
    }

    fn action_url(&self, deposit_id: u64, action: &str) -> String {
        format!("{}/{}/actions/{}", self.depositions_url, deposit_id, action)
    }

    /// Any non-success response is fatal for the current operation, and the
    /// remote error payload is surfaced.
    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, AtlasError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "deposit request failed".to_string());
        Err(AtlasError::DepositStatus { status, message })
    }

    fn post_action(&self, deposit_id: u64, action: &str) -> Result<DepositionPayload, AtlasError> {
        let response = self
            .client
            .post(self.action_url(deposit_id, action))
            .query(&self.token_param())
            .json(&serde_json::json!({}))
            .send()
            .map_err(|err| AtlasError::DepositHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| AtlasError::DepositHttp(err.to_string()))
    }

    fn fetch_deposition(&self, deposit_id: u64) -> Result<DepositionPayload, AtlasError> {
        let response = self
            .client
            .get(self.deposit_url(deposit_id))
            .query(&self.token_param())
            .send()
            .map_err(|err| AtlasError::DepositHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| AtlasError::DepositHttp(err.to_string()))
    }

    fn search(&self, extra: &[(&str, &str)]) -> Result<Vec<DepositionPayload>, AtlasError> {
        let mut page = 1usize;
        let mut depositions = Vec::new();
        loop {
            let page_param = page.to_string();
            let size_param = VERSIONS_PAGE_SIZE.to_string();
            let mut params: Vec<(&str, &str)> = vec![
                ("access_token", self.access_token.as_str()),
                ("size", size_param.as_str()),
                ("page", page_param.as_str()),
            ];
            params.extend_from_slice(extra);

            let response = self
                .client
                .get(&self.depositions_url)
                .query(&params)
                .send()
                .map_err(|err| AtlasError::DepositHttp(err.to_string()))?;
            let response = Self::handle_status(response)?;
            let batch: Vec<DepositionPayload> = response
                .json()
                .map_err(|err| AtlasError::DepositHttp(err.to_string()))?;

            let fetched = batch.len();
            depositions.extend(batch);
            if fetched < VERSIONS_PAGE_SIZE {
                return Ok(depositions);
            }
            page += 1;
        }
    }

    fn to_record(payload: DepositionPayload) -> Result<DepositRecord, AtlasError> {
        let state = DepositState::from_parts(&payload.state, payload.submitted)?;
        let concept_id = payload
            .conceptrecid
            .as_ref()
            .and_then(IdRepr::to_u64)
            .ok_or_else(|| {
                AtlasError::DepositHttp(format!("deposit {} has no concept id", payload.id))
            })?;
        Ok(DepositRecord {
            id: payload.id,
            concept_id,
            state,
            title: payload.title,
            version_label: payload
                .metadata
                .and_then(|metadata| metadata.version)
                .map(|label| VersionLabel::parse(&label)),
        })
    }

    fn to_draft(payload: DepositionPayload) -> Result<DraftDeposit, AtlasError> {
        let bucket_url = payload
            .links
            .and_then(|links| links.bucket)
            .ok_or_else(|| {
                AtlasError::DepositHttp(format!("deposit {} draft has no bucket link", payload.id))
            })?;
        Ok(DraftDeposit {
            deposit_id: payload.id,
            bucket_url,
        })
    }
}

impl DepositService for HttpDepositService {
    fn new_deposit(&self) -> Result<DraftDeposit, AtlasError> {
        let response = self
            .client
            .post(&self.depositions_url)
            .query(&self.token_param())
            .json(&serde_json::json!({}))
            .send()
            .map_err(|err| AtlasError::DepositHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let payload: DepositionPayload = response
            .json()
            .map_err(|err| AtlasError::DepositHttp(err.to_string()))?;
        Self::to_draft(payload)
    }

    fn new_version(&self, deposit_id: u64) -> Result<DraftDeposit, AtlasError> {
        let payload = self.post_action(deposit_id, "newversion")?;
        Self::to_draft(payload)
    }

    fn edit(&self, deposit_id: u64) -> Result<(), AtlasError> {
        self.post_action(deposit_id, "edit").map(|_| ())
    }

    fn discard(&self, deposit_id: u64) -> Result<(), AtlasError> {
        self.post_action(deposit_id, "discard").map(|_| ())
    }

    fn publish(&self, deposit_id: u64) -> Result<u64, AtlasError> {
        let payload = self.post_action(deposit_id, "publish")?;
        Ok(payload.id)
    }

    fn get_record(&self, deposit_id: u64) -> Result<DepositRecord, AtlasError> {
        let payload = self.fetch_deposition(deposit_id)?;
        Self::to_record(payload)
    }

    fn list_files(&self, deposit_id: u64) -> Result<Vec<RemoteFile>, AtlasError> {
        let response = self
            .client
            .get(format!("{}/files", self.deposit_url(deposit_id)))
            .query(&self.token_param())
            .send()
            .map_err(|err| AtlasError::DepositHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let files: Vec<FilePayload> = response
            .json()
            .map_err(|err| AtlasError::DepositHttp(err.to_string()))?;
        Ok(files.into_iter().map(RemoteFile::from).collect())
    }

    fn delete_file(&self, deposit_id: u64, file_id: &str) -> Result<(), AtlasError> {
        let response = self
            .client
            .delete(format!("{}/files/{}", self.deposit_url(deposit_id), file_id))
            .query(&self.token_param())
            .send()
            .map_err(|err| AtlasError::DepositHttp(err.to_string()))?;
        Self::handle_status(response).map(|_| ())
    }

    fn set_metadata(&self, deposit_id: u64, metadata: &DepositMetadata) -> Result<(), AtlasError> {
        let body = serde_json::json!({
            "metadata": {
                "title": metadata.title,
                "upload_type": metadata.upload_type,
                "description": metadata.description,
                "version": metadata.version,
                "related_identifiers": [{
                    "relation": "isAlternateIdentifier",
                    "scheme": "urn",
                    "identifier": metadata.session_urn,
                }],
            }
        });
        let response = self
            .client
            .put(self.deposit_url(deposit_id))
            .query(&self.token_param())
            .json(&body)
            .send()
            .map_err(|err| AtlasError::DepositHttp(err.to_string()))?;
        Self::handle_status(response).map(|_| ())
    }

    fn find_by_session(&self, session: &SessionName) -> Result<Option<u64>, AtlasError> {
        let query = format!(
            "metadata.identifiers.identifier:\"{urn}\" metadata.related_identifiers.identifier:\"{urn}\"",
            urn = session.urn()
        );
        let matches = self.search(&[("q", query.as_str())])?;
        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches[0].id)),
            _ => Err(AtlasError::AmbiguousSession(session.to_string())),
        }
    }

    fn list_concept_versions(&self, concept_id: u64) -> Result<Vec<RemoteVersion>, AtlasError> {
        let query = format!("conceptrecid:{concept_id}");
        let depositions =
            self.search(&[("q", query.as_str()), ("all_versions", "true")])?;

        let mut versions = Vec::with_capacity(depositions.len());
        for payload in depositions {
            let label = payload
                .metadata
                .as_ref()
                .and_then(|metadata| metadata.version.as_deref())
                .map(VersionLabel::parse)
                .unwrap_or_else(|| VersionLabel::Other(String::new()));
            let files = match payload.files {
                Some(files) => files.into_iter().map(RemoteFile::from).collect(),
                None => self.list_files(payload.id)?,
            };
            versions.push(RemoteVersion {
                id: payload.id,
                label,
                files,
            });
        }
        versions.sort_by_key(|version| version.id);
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(id: u64, label: &str) -> RemoteVersion {
        RemoteVersion {
            id,
            label: VersionLabel::parse(label),
            files: Vec::new(),
        }
    }

    #[test]
    fn split_versions_by_kind() {
        let versions = vec![
            version(10, "RAW_DATA"),
            version(11, "PROCESSED_DATA"),
            version(12, "RAW_DATA_2"),
            version(13, "DEPRECATED"),
        ];
        let (raw, processed) = version_ids_by_kind(&versions);
        assert_eq!(raw, vec![10, 12]);
        assert_eq!(processed, vec![11]);
    }
}
