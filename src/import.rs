use std::collections::{HashMap, HashSet};

use camino::Utf8Path;
use serde::Deserialize;

use crate::domain::{RemoteVersion, SessionName};
use crate::error::AtlasError;
use crate::geo::{self, GeoPoint};
use crate::reconcile::Reconciliation;
use crate::repo::{
    AnnotationRepository, AnnotationSessionKey, ClassDef, DepositRepository, DepositRow,
    FrameRepository, NewAnnotation, NewFrame, NewPrediction, PredictionRepository,
    SqliteAnnotationRepo, SqliteDepositRepo, SqliteFrameRepo, SqlitePredictionRepo,
    SqliteVersionRepo, VersionRepository, VersionRow,
};
use crate::staging::{FrameRecord, SessionData};
use crate::store::AtlasStore;

/// Everything needed to materialize one reconciled session into the store.
pub struct ImportRequest<'a> {
    pub session: &'a SessionName,
    pub concept_id: u64,
    pub versions: &'a [RemoteVersion],
    pub reconciliation: &'a Reconciliation,
    pub data: &'a SessionData,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub deposit_inserted: bool,
    pub versions_inserted: usize,
    pub frames_inserted: usize,
    pub predictions_inserted: usize,
    pub frames_skipped_partial: usize,
}

/// One annotation row of an operator-provided batch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnnotationRecord {
    pub frame_filename: String,
    pub class_name: String,
    pub value: String,
}

/// A batch of annotations attributed to one (author, dataset, date) session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnnotationBatch {
    pub author_name: String,
    pub dataset_name: String,
    pub annotation_date: String,
    pub annotations: Vec<AnnotationRecord>,
}

impl AnnotationBatch {
    pub fn from_json_file(path: &Utf8Path) -> Result<Self, AtlasError> {
        let content = std::fs::read_to_string(path.as_std_path())
            .map_err(|err| AtlasError::Filesystem(format!("read {path}: {err}")))?;
        serde_json::from_str(&content)
            .map_err(|err| AtlasError::Integrity(format!("parse {path}: {err}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationOutcome {
    Imported { session_id: i64, inserted: usize },
    /// An identical (author, dataset, date) session already exists.
    AlreadyImported,
    /// No annotation matched a known frame and label; the just-created
    /// session was rolled back.
    Empty,
}

/// Materializes reconciled remote state into the store, strictly in
/// dependency order, without ever double-inserting. Safe to re-run: a crash
/// mid-sequence leaves a state the next run completes.
pub struct Importer<'c> {
    deposits: SqliteDepositRepo<'c>,
    versions: SqliteVersionRepo<'c>,
    frames: SqliteFrameRepo<'c>,
    predictions: SqlitePredictionRepo<'c>,
    annotations: SqliteAnnotationRepo<'c>,
}

impl<'c> Importer<'c> {
    pub fn new(store: &'c AtlasStore) -> Self {
        Self {
            deposits: SqliteDepositRepo::new(store),
            versions: SqliteVersionRepo::new(store),
            frames: SqliteFrameRepo::new(store),
            predictions: SqlitePredictionRepo::new(store),
            annotations: SqliteAnnotationRepo::new(store),
        }
    }

    pub fn import_session(&self, request: &ImportRequest<'_>) -> Result<ImportSummary, AtlasError> {
        let deposit_doi = request.concept_id.to_string();
        let mut summary = ImportSummary::default();

        summary.deposit_inserted = self.import_deposit(request, &deposit_doi)?;
        summary.versions_inserted = self.import_versions(request, &deposit_doi)?;

        let Some(metadata_version) = request.reconciliation.metadata_version() else {
            tracing::warn!(session = %request.session, "no metadata-bearing version, skipping frames");
            return Ok(summary);
        };
        let metadata_doi = metadata_version.to_string();
        summary.frames_inserted = self.import_frames(request, &metadata_doi)?;

        if let Some(ia_version) = request.reconciliation.ia_version() {
            let (inserted, skipped) =
                self.import_predictions(request, &metadata_doi, &ia_version.to_string())?;
            summary.predictions_inserted = inserted;
            summary.frames_skipped_partial = skipped;
        }

        Ok(summary)
    }

    /// Step 1: the deposit row, keyed on the concept identifier. The
    /// geospatial footprint and track are computed from the frames'
    /// positions the first time around; an existing row is left untouched.
    fn import_deposit(
        &self,
        request: &ImportRequest<'_>,
        deposit_doi: &str,
    ) -> Result<bool, AtlasError> {
        let positions: Vec<GeoPoint> = request
            .data
            .frames
            .iter()
            .filter_map(|frame| match (frame.gps_longitude, frame.gps_latitude) {
                (Some(longitude), Some(latitude)) => Some(GeoPoint::new(longitude, latitude)),
                _ => None,
            })
            .collect();

        let row = DepositRow {
            doi: deposit_doi.to_string(),
            session_name: request.session.to_string(),
            session_date: Some(request.session.session_date()),
            platform_type: Some(request.session.platform()),
            footprint_wkt: geo::compute_footprint(&positions).map(|footprint| footprint.to_wkt()),
            track_wkt: geo::compute_track(&positions).map(|track| track.to_wkt()),
            have_raw_data: request.reconciliation.have_raw_data,
            have_processed_data: request.reconciliation.have_processed_data,
        };
        self.deposits.insert_or_ignore(&row)
    }

    /// Step 2: one version row per RAW_DATA / PROCESSED_DATA identifier.
    fn import_versions(
        &self,
        request: &ImportRequest<'_>,
        deposit_doi: &str,
    ) -> Result<usize, AtlasError> {
        let mut inserted = 0usize;
        for version in request.versions {
            if !version.label.is_imported() {
                continue;
            }
            let row = VersionRow {
                doi: version.id.to_string(),
                deposit_doi: deposit_doi.to_string(),
            };
            if self.versions.insert_or_ignore(&row)? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Step 3: useful frames of the metadata-bearing version. Duplicates are
    /// pre-filtered against the (version, filename) rows already present;
    /// filename resolution makes insert-or-ignore unusable here.
    fn import_frames(
        &self,
        request: &ImportRequest<'_>,
        metadata_doi: &str,
    ) -> Result<usize, AtlasError> {
        let useful = useful_frames(request.data);
        if useful.is_empty() {
            tracing::warn!(session = %request.session, "no useful frames for session");
            return Ok(0);
        }

        let existing = self.frames.filenames_for_version(metadata_doi)?;
        let new_frames: Vec<NewFrame> = useful
            .iter()
            .filter(|frame| !existing.contains(&frame.filename))
            .map(|frame| NewFrame {
                version_doi: metadata_doi.to_string(),
                filename: frame.filename.clone(),
                original_filename: frame.original_filename.clone(),
                relative_path: frame.relative_path.clone(),
                gps_latitude: frame.gps_latitude,
                gps_longitude: frame.gps_longitude,
                gps_altitude: frame.gps_altitude,
                gps_pitch: frame.gps_pitch,
                gps_roll: frame.gps_roll,
                gps_track: frame.gps_track,
                gps_fix: frame.gps_fix,
                gps_datetime: frame.gps_datetime.clone(),
            })
            .collect();

        if new_frames.is_empty() {
            tracing::debug!(session = %request.session, "all useful frames already imported");
            return Ok(0);
        }
        self.frames.insert_batch(&new_frames)
    }

    /// Step 4: predictions of the IA-processing version, one complete class
    /// set per useful frame. A frame whose stored set is complete is
    /// skipped; a partial set is a data-integrity warning and the frame is
    /// skipped rather than corrected automatically.
    fn import_predictions(
        &self,
        request: &ImportRequest<'_>,
        metadata_doi: &str,
        ia_doi: &str,
    ) -> Result<(usize, usize), AtlasError> {
        let classes = self.predictions.ensure_classes(&class_defs(request.data))?;
        if classes.is_empty() {
            tracing::warn!(session = %request.session, "no prediction classes declared");
            return Ok((0, 0));
        }
        let expected = classes.len() as u64;
        let class_id_by_name: HashMap<&str, i64> = classes
            .iter()
            .map(|class| (class.name.as_str(), class.id))
            .collect();

        let mut scores_by_frame: HashMap<&str, Vec<(&str, f64)>> = HashMap::new();
        for prediction in &request.data.predictions {
            scores_by_frame
                .entry(prediction.filename.as_str())
                .or_default()
                .push((prediction.class_name.as_str(), prediction.score));
        }

        let mut inserted = 0usize;
        let mut skipped_partial = 0usize;
        for frame in useful_frames(request.data) {
            let Some(scores) = scores_by_frame.get(frame.filename.as_str()) else {
                continue;
            };
            let Some(frame_id) = self
                .frames
                .id_by_version_and_filename(metadata_doi, &frame.filename)?
            else {
                tracing::warn!(filename = %frame.filename, "frame missing from store, skipping predictions");
                continue;
            };

            let existing = self
                .predictions
                .count_for_frame_version(frame_id, ia_doi)?;
            if existing == expected {
                continue;
            }
            if existing != 0 {
                tracing::warn!(
                    filename = %frame.filename,
                    existing,
                    expected,
                    "partial prediction set for frame, skipping"
                );
                skipped_partial += 1;
                continue;
            }

            let mut rows = Vec::with_capacity(scores.len());
            for (class_name, score) in scores {
                let Some(class_id) = class_id_by_name.get(class_name) else {
                    tracing::warn!(class = %class_name, "unknown prediction class, skipping record");
                    continue;
                };
                rows.push(NewPrediction {
                    score: *score,
                    version_doi: ia_doi.to_string(),
                    frame_id,
                    class_id: *class_id,
                });
            }
            inserted += self.predictions.insert_batch(&rows)?;
        }
        Ok((inserted, skipped_partial))
    }

    /// Step 5, operator-triggered: attributes a batch to a new annotation
    /// session unless an identical (author, dataset, date) session exists.
    /// A batch in which nothing matches a known frame and label rolls the
    /// just-created session back, so no empty sessions accumulate.
    pub fn import_annotations(
        &self,
        batch: &AnnotationBatch,
    ) -> Result<AnnotationOutcome, AtlasError> {
        let key = AnnotationSessionKey {
            author_name: batch.author_name.clone(),
            dataset_name: batch.dataset_name.clone(),
            annotation_date: batch.annotation_date.clone(),
        };
        if self.annotations.find_session(&key)?.is_some() {
            tracing::info!(
                author = %batch.author_name,
                dataset = %batch.dataset_name,
                date = %batch.annotation_date,
                "annotation session already imported"
            );
            return Ok(AnnotationOutcome::AlreadyImported);
        }

        let session_id = self.annotations.create_session(&key)?;

        let mut rows = Vec::new();
        for record in &batch.annotations {
            let frame_ids = self.frames.ids_by_filename(&record.frame_filename)?;
            let frame_id = match frame_ids.as_slice() {
                [id] => *id,
                [] => {
                    tracing::warn!(filename = %record.frame_filename, "annotated frame not found, skipping");
                    continue;
                }
                _ => {
                    tracing::warn!(filename = %record.frame_filename, "annotated frame is ambiguous, skipping");
                    continue;
                }
            };
            let Some(class) = self.predictions.class_by_name(&record.class_name)? else {
                tracing::warn!(class = %record.class_name, "unknown annotation label, skipping");
                continue;
            };
            rows.push(NewAnnotation {
                value: record.value.clone(),
                frame_id,
                class_id: class.id,
            });
        }

        if rows.is_empty() {
            tracing::warn!(
                dataset = %batch.dataset_name,
                "no annotation matched known frames, rolling back session"
            );
            self.annotations.delete_session(session_id)?;
            return Ok(AnnotationOutcome::Empty);
        }

        let inserted = self.annotations.insert_batch(session_id, &rows)?;
        Ok(AnnotationOutcome::Imported {
            session_id,
            inserted,
        })
    }
}

fn useful_frames(data: &SessionData) -> Vec<&FrameRecord> {
    let useful: HashSet<&str> = data
        .useful_filenames
        .iter()
        .map(String::as_str)
        .collect();
    data.frames
        .iter()
        .filter(|frame| useful.contains(frame.filename.as_str()))
        .collect()
}

fn class_defs(data: &SessionData) -> Vec<ClassDef> {
    data.classes
        .iter()
        .map(|class| ClassDef {
            name: class.name.clone(),
            threshold: class.threshold,
        })
        .collect()
}
