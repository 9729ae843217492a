use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use camino::Utf8PathBuf;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AtlasError;

/// Structured name of one acquisition session:
/// `YYYYMMDD_<COUNTRYCODE-place>_<platform-device>_<nn>` (trailing counter
/// optional), e.g. `20231021_REU-TROUDEAU_ASV-1_01`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionName(String);

impl TryFrom<String> for SessionName {
    type Error = AtlasError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SessionName> for String {
    fn from(name: SessionName) -> Self {
        name.0
    }
}

fn session_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{8})_([A-Za-z0-9-]+)_([A-Za-z0-9-]+?)(?:_(\d+))?$").unwrap()
    })
}

impl SessionName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// ISO date derived from the leading `YYYYMMDD` segment.
    pub fn session_date(&self) -> String {
        let digits = &self.0[..8];
        format!("{}-{}-{}", &digits[..4], &digits[4..6], &digits[6..8])
    }

    /// Platform segment, e.g. `ASV-1` -> `ASV`.
    pub fn platform(&self) -> String {
        let segment = self.0.split('_').nth(2).unwrap_or_default();
        segment.split('-').next().unwrap_or_default().to_uppercase()
    }

    /// Alternate identifier embedded in deposit metadata for discovery.
    pub fn urn(&self) -> String {
        format!("urn:{}", self.0)
    }
}

impl fmt::Display for SessionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionName {
    type Err = AtlasError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let captures = session_name_re()
            .captures(trimmed)
            .ok_or_else(|| AtlasError::InvalidSessionName(value.to_string()))?;
        let date = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        let month: u32 = date[4..6].parse().unwrap_or(0);
        let day: u32 = date[6..8].parse().unwrap_or(0);
        if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            return Err(AtlasError::InvalidSessionName(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Logical lineage of a published version, read from its declared label.
/// Labels arrive with spaces or underscores and an optional numeric suffix
/// when a lineage was split across size-limited parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionLabel {
    RawData { part: Option<u32> },
    ProcessedData { part: Option<u32> },
    Other(String),
}

impl VersionLabel {
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().replace(' ', "_").to_uppercase();
        if let Some(rest) = normalized.strip_prefix("RAW_DATA") {
            if let Some(part) = parse_part(rest) {
                return VersionLabel::RawData { part };
            }
        }
        if let Some(rest) = normalized.strip_prefix("PROCESSED_DATA") {
            if let Some(part) = parse_part(rest) {
                return VersionLabel::ProcessedData { part };
            }
        }
        VersionLabel::Other(normalized)
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, VersionLabel::RawData { .. })
    }

    pub fn is_processed(&self) -> bool {
        matches!(self, VersionLabel::ProcessedData { .. })
    }

    /// Only the two data lineages are materialized in the atlas.
    pub fn is_imported(&self) -> bool {
        self.is_raw() || self.is_processed()
    }
}

fn parse_part(rest: &str) -> Option<Option<u32>> {
    if rest.is_empty() {
        return Some(None);
    }
    rest.strip_prefix('_')
        .and_then(|digits| digits.parse::<u32>().ok())
        .map(Some)
}

impl fmt::Display for VersionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionLabel::RawData { part: None } => write!(f, "RAW_DATA"),
            VersionLabel::RawData { part: Some(n) } => write!(f, "RAW_DATA_{n}"),
            VersionLabel::ProcessedData { part: None } => write!(f, "PROCESSED_DATA"),
            VersionLabel::ProcessedData { part: Some(n) } => write!(f, "PROCESSED_DATA_{n}"),
            VersionLabel::Other(label) => write!(f, "{label}"),
        }
    }
}

/// Per-deposit lifecycle state, derived once from the remote
/// (state, submitted) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositState {
    /// Fresh draft never submitted.
    Draft,
    /// Editable draft created from an already published version.
    EditableDraft,
    /// Actively being edited.
    InProgress,
    /// Terminal, immutable.
    Published,
}

impl DepositState {
    pub fn from_parts(state: &str, submitted: bool) -> Result<Self, AtlasError> {
        match (state, submitted) {
            ("unsubmitted", false) => Ok(DepositState::Draft),
            ("unsubmitted", true) => Ok(DepositState::EditableDraft),
            ("inprogress", true) => Ok(DepositState::InProgress),
            ("done", _) | ("published", _) => Ok(DepositState::Published),
            _ => Err(AtlasError::UnknownDepositState {
                state: state.to_string(),
                submitted,
            }),
        }
    }

    /// A stale unpublished draft must be discarded before `newversion` or
    /// `edit`, else those operations target stale state.
    pub fn needs_discard(self) -> bool {
        match self {
            DepositState::Draft | DepositState::InProgress => true,
            DepositState::EditableDraft | DepositState::Published => false,
        }
    }
}

/// A named blob attached to a remote version. Never persisted locally.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RemoteFile {
    pub id: String,
    pub key: String,
    pub size: u64,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
}

/// A locally produced file awaiting reconciliation and upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifact {
    pub key: String,
    pub path: Utf8PathBuf,
    pub size: u64,
}

/// One remote version of a concept, with its declared label and file set.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteVersion {
    pub id: u64,
    pub label: VersionLabel,
    pub files: Vec<RemoteFile>,
}

/// Zenodo-style deposits reject payloads above this total size.
pub const MAX_DEPOSIT_BYTES: u64 = 50_000_000_000;

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_session_name_valid() {
        let name: SessionName = "20231021_REU-TROUDEAU_ASV-1_01".parse().unwrap();
        assert_eq!(name.session_date(), "2023-10-21");
        assert_eq!(name.platform(), "ASV");
        assert_eq!(name.urn(), "urn:20231021_REU-TROUDEAU_ASV-1_01");
    }

    #[test]
    fn parse_session_name_invalid() {
        let err = "not-a-session".parse::<SessionName>().unwrap_err();
        assert_matches!(err, AtlasError::InvalidSessionName(_));

        let err = "20231399_REU-TROUDEAU_ASV-1_01".parse::<SessionName>().unwrap_err();
        assert_matches!(err, AtlasError::InvalidSessionName(_));
    }

    #[test]
    fn parse_version_labels() {
        assert_eq!(
            VersionLabel::parse("RAW DATA"),
            VersionLabel::RawData { part: None }
        );
        assert_eq!(
            VersionLabel::parse("RAW_DATA_2"),
            VersionLabel::RawData { part: Some(2) }
        );
        assert_eq!(
            VersionLabel::parse("processed data"),
            VersionLabel::ProcessedData { part: None }
        );
        assert_matches!(VersionLabel::parse("DEPRECATED"), VersionLabel::Other(_));
        // A stray suffix is not a continuation.
        assert_matches!(VersionLabel::parse("RAW_DATA_OLD"), VersionLabel::Other(_));
    }

    #[test]
    fn deposit_state_mapping() {
        assert_eq!(
            DepositState::from_parts("unsubmitted", false).unwrap(),
            DepositState::Draft
        );
        assert_eq!(
            DepositState::from_parts("unsubmitted", true).unwrap(),
            DepositState::EditableDraft
        );
        assert_eq!(
            DepositState::from_parts("inprogress", true).unwrap(),
            DepositState::InProgress
        );
        assert_eq!(
            DepositState::from_parts("done", true).unwrap(),
            DepositState::Published
        );
        assert_matches!(
            DepositState::from_parts("inprogress", false),
            Err(AtlasError::UnknownDepositState { .. })
        );
    }

    #[test]
    fn discard_precondition_is_total() {
        assert!(DepositState::Draft.needs_discard());
        assert!(DepositState::InProgress.needs_discard());
        assert!(!DepositState::EditableDraft.needs_discard());
        assert!(!DepositState::Published.needs_discard());
    }
}
