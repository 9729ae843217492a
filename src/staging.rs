use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use tempfile::TempDir;

use crate::domain::{SessionName, StagedArtifact};
use crate::error::AtlasError;

/// Filename of the session data contract file inside a staging directory.
pub const SESSION_DATA_FILE: &str = "session_data.json";

/// One frame record handed over by the metadata collaborator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FrameRecord {
    pub filename: String,
    pub original_filename: String,
    #[serde(default)]
    pub relative_path: Option<String>,
    #[serde(default)]
    pub gps_latitude: Option<f64>,
    #[serde(default)]
    pub gps_longitude: Option<f64>,
    #[serde(default)]
    pub gps_altitude: Option<f64>,
    #[serde(default)]
    pub gps_pitch: Option<f64>,
    #[serde(default)]
    pub gps_roll: Option<f64>,
    #[serde(default)]
    pub gps_track: Option<f64>,
    #[serde(default)]
    pub gps_fix: Option<i64>,
    #[serde(default)]
    pub gps_datetime: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClassRecord {
    pub name: String,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_threshold() -> f64 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PredictionRecord {
    pub filename: String,
    pub class_name: String,
    pub score: f64,
}

/// Everything the import pipeline needs about one session, produced by the
/// external metadata/usefulness collaborators.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionData {
    #[serde(default)]
    pub frames: Vec<FrameRecord>,
    /// Filenames retained by the external usefulness filter.
    #[serde(default)]
    pub useful_filenames: Vec<String>,
    #[serde(default)]
    pub classes: Vec<ClassRecord>,
    #[serde(default)]
    pub predictions: Vec<PredictionRecord>,
}

impl Default for FrameRecord {
    fn default() -> Self {
        Self {
            filename: String::new(),
            original_filename: String::new(),
            relative_path: None,
            gps_latitude: None,
            gps_longitude: None,
            gps_altitude: None,
            gps_pitch: None,
            gps_roll: None,
            gps_track: None,
            gps_fix: None,
            gps_datetime: None,
        }
    }
}

impl SessionData {
    pub fn from_json_file(path: &Utf8Path) -> Result<Self, AtlasError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| AtlasError::Filesystem(format!("read {path}: {err}")))?;
        serde_json::from_str(&content)
            .map_err(|err| AtlasError::Integrity(format!("parse {path}: {err}")))
    }
}

/// Exclusive per-session staging directory. Created before a session is
/// processed and removed when dropped, so no state leaks across sessions.
pub struct SessionStaging {
    session: SessionName,
    dir: TempDir,
    path: Utf8PathBuf,
}

impl SessionStaging {
    pub fn create(session: &SessionName) -> Result<Self, AtlasError> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("reef-am-{session}-"))
            .tempdir()
            .map_err(|err| AtlasError::Filesystem(err.to_string()))?;
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .map_err(|_| AtlasError::Filesystem("non-utf8 staging path".to_string()))?;
        Ok(Self {
            session: session.clone(),
            dir,
            path,
        })
    }

    pub fn session(&self) -> &SessionName {
        &self.session
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn collect_artifacts(&self) -> Result<Vec<StagedArtifact>, AtlasError> {
        collect_artifacts(&self.path)
    }

    /// Removes the staging directory eagerly instead of waiting for drop.
    pub fn purge(self) -> Result<(), AtlasError> {
        self.dir
            .close()
            .map_err(|err| AtlasError::Filesystem(err.to_string()))
    }
}

/// Enumerates the staged `(key, path, size)` tuples of a prepared session
/// directory. Only zip archives participate in reconciliation.
pub fn collect_artifacts(dir: &Utf8Path) -> Result<Vec<StagedArtifact>, AtlasError> {
    let entries = fs::read_dir(dir.as_std_path())
        .map_err(|err| AtlasError::Filesystem(format!("read staging dir {dir}: {err}")))?;

    let mut artifacts = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| AtlasError::Filesystem(err.to_string()))?;
        let path = Utf8PathBuf::from_path_buf(entry.path())
            .map_err(|_| AtlasError::Filesystem("non-utf8 staged path".to_string()))?;
        if !path.is_file() || path.extension() != Some("zip") {
            continue;
        }
        let size = entry
            .metadata()
            .map_err(|err| AtlasError::Filesystem(err.to_string()))?
            .len();
        let key = path
            .file_name()
            .ok_or_else(|| AtlasError::Filesystem(format!("unnamed staged file {path}")))?
            .to_string();
        artifacts.push(StagedArtifact { key, path, size });
    }
    artifacts.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(artifacts)
}

/// Loads the session data contract file from a staging directory.
pub fn load_session_data(dir: &Utf8Path) -> Result<SessionData, AtlasError> {
    SessionData::from_json_file(&dir.join(SESSION_DATA_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_only_zip_artifacts() {
        let session: SessionName = "20231021_REU-TROUDEAU_ASV-1_01".parse().unwrap();
        let staging = SessionStaging::create(&session).unwrap();
        fs::write(staging.path().join("METADATA.zip").as_std_path(), b"pk").unwrap();
        fs::write(staging.path().join("notes.txt").as_std_path(), b"x").unwrap();

        let artifacts = staging.collect_artifacts().unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].key, "METADATA.zip");
        assert_eq!(artifacts[0].size, 2);
        staging.purge().unwrap();
    }
}
