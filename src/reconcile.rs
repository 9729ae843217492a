use std::collections::BTreeMap;

use crate::domain::{RemoteVersion, SessionName, StagedArtifact};
use crate::error::AtlasError;

/// Repackaging the same folder can shift an archive's size by a few hundred
/// bytes of header, so keys are matched on size within this window. Size is
/// the only signal available post-hoc: uploads do not round-trip a
/// client-assigned key to a remote identifier, which makes this matching
/// heuristic by construction.
pub const SIZE_TOLERANCE_BYTES: u64 = 512;

/// Archive carrying the per-frame metadata.
pub const METADATA_KEY: &str = "METADATA.zip";
/// Archive carrying the machine-learning outputs.
pub const IA_KEY: &str = "PROCESSED_DATA_IA.zip";

/// Outcome of matching staged artifacts to remote version identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Staged artifact key -> remote version id that stores it.
    pub version_by_key: BTreeMap<String, u64>,
    pub have_raw_data: bool,
    pub have_processed_data: bool,
}

impl Reconciliation {
    /// Version owning the metadata archive, the one frames belong to.
    pub fn metadata_version(&self) -> Option<u64> {
        self.version_by_key.get(METADATA_KEY).copied()
    }

    /// Version owning the machine-learning outputs, the one predictions are
    /// attributed to.
    pub fn ia_version(&self) -> Option<u64> {
        self.version_by_key.get(IA_KEY).copied()
    }
}

/// Maps every staged artifact to the remote version that stores it, by
/// comparing declared byte sizes within `tolerance`. When several versions
/// match the same key, the numerically larger (most recent) id wins. A
/// staged artifact with no match makes the whole reconciliation incomplete:
/// the caller must abort the session rather than guess.
pub fn reconcile(
    session: &SessionName,
    staged: &[StagedArtifact],
    versions: &[RemoteVersion],
    tolerance: u64,
) -> Result<Reconciliation, AtlasError> {
    let mut ordered: Vec<&RemoteVersion> = versions.iter().collect();
    ordered.sort_by_key(|version| version.id);

    let mut version_by_key: BTreeMap<String, u64> = BTreeMap::new();
    let mut have_raw_data = false;
    let mut have_processed_data = false;

    for version in ordered {
        have_raw_data |= version.label.is_raw();
        have_processed_data |= version.label.is_processed();

        for file in &version.files {
            for artifact in staged {
                if artifact.key != file.key {
                    continue;
                }
                if artifact.size.abs_diff(file.size) < tolerance {
                    // Ascending scan order: a later, larger id overwrites.
                    version_by_key.insert(artifact.key.clone(), version.id);
                }
            }
        }
    }

    let missing_keys: Vec<String> = staged
        .iter()
        .filter(|artifact| !version_by_key.contains_key(&artifact.key))
        .map(|artifact| artifact.key.clone())
        .collect();
    if !missing_keys.is_empty() {
        return Err(AtlasError::ReconcileIncomplete {
            session: session.to_string(),
            missing_keys,
        });
    }

    Ok(Reconciliation {
        version_by_key,
        have_raw_data,
        have_processed_data,
    })
}
