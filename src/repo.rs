use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use rusqlite::{OptionalExtension, params};

use crate::error::AtlasError;
use crate::store::AtlasStore;

#[derive(Debug, Clone, PartialEq)]
pub struct DepositRow {
    pub doi: String,
    pub session_name: String,
    pub session_date: Option<String>,
    pub platform_type: Option<String>,
    pub footprint_wkt: Option<String>,
    pub track_wkt: Option<String>,
    pub have_raw_data: bool,
    pub have_processed_data: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRow {
    pub doi: String,
    pub deposit_doi: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewFrame {
    pub version_doi: String,
    pub filename: String,
    pub original_filename: String,
    pub relative_path: Option<String>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub gps_altitude: Option<f64>,
    pub gps_pitch: Option<f64>,
    pub gps_roll: Option<f64>,
    pub gps_track: Option<f64>,
    pub gps_fix: Option<i64>,
    pub gps_datetime: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionClass {
    pub id: i64,
    pub name: String,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPrediction {
    pub score: f64,
    pub version_doi: String,
    pub frame_id: i64,
    pub class_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnnotationSessionKey {
    pub author_name: String,
    pub dataset_name: String,
    pub annotation_date: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAnnotation {
    pub value: String,
    pub frame_id: i64,
    pub class_id: i64,
}

pub trait DepositRepository {
    /// Insert-or-ignore keyed on the concept doi; returns whether a row was
    /// actually written.
    fn insert_or_ignore(&self, deposit: &DepositRow) -> Result<bool, AtlasError>;
    fn get(&self, doi: &str) -> Result<Option<DepositRow>, AtlasError>;
    fn all_dois(&self) -> Result<Vec<String>, AtlasError>;
}

pub trait VersionRepository {
    fn insert_or_ignore(&self, version: &VersionRow) -> Result<bool, AtlasError>;
    fn get(&self, doi: &str) -> Result<Option<VersionRow>, AtlasError>;
}

pub trait FrameRepository {
    fn insert_batch(&self, frames: &[NewFrame]) -> Result<usize, AtlasError>;
    fn filenames_for_version(&self, version_doi: &str) -> Result<HashSet<String>, AtlasError>;
    fn id_by_version_and_filename(
        &self,
        version_doi: &str,
        filename: &str,
    ) -> Result<Option<i64>, AtlasError>;
    fn count_for_version(&self, version_doi: &str) -> Result<u64, AtlasError>;
    /// All frame ids carrying this filename, any version. More than one hit
    /// means the filename alone is ambiguous.
    fn ids_by_filename(&self, filename: &str) -> Result<Vec<i64>, AtlasError>;
}

pub trait PredictionRepository {
    /// Registers the batch's classes, returning them with ids. Existing
    /// classes keep their stored threshold.
    fn ensure_classes(&self, classes: &[ClassDef]) -> Result<Vec<PredictionClass>, AtlasError>;
    fn count_for_frame_version(&self, frame_id: i64, version_doi: &str)
    -> Result<u64, AtlasError>;
    fn insert_batch(&self, predictions: &[NewPrediction]) -> Result<usize, AtlasError>;
    fn class_by_name(&self, name: &str) -> Result<Option<PredictionClass>, AtlasError>;
}

pub trait AnnotationRepository {
    fn find_session(&self, key: &AnnotationSessionKey) -> Result<Option<i64>, AtlasError>;
    fn create_session(&self, key: &AnnotationSessionKey) -> Result<i64, AtlasError>;
    fn delete_session(&self, session_id: i64) -> Result<(), AtlasError>;
    fn insert_batch(
        &self,
        session_id: i64,
        annotations: &[NewAnnotation],
    ) -> Result<usize, AtlasError>;
    fn count_for_session(&self, session_id: i64) -> Result<u64, AtlasError>;
}

pub struct SqliteDepositRepo<'c> {
    store: &'c AtlasStore,
    by_doi: RefCell<HashMap<String, DepositRow>>,
}

impl<'c> SqliteDepositRepo<'c> {
    pub fn new(store: &'c AtlasStore) -> Self {
        Self {
            store,
            by_doi: RefCell::new(HashMap::new()),
        }
    }
}

impl DepositRepository for SqliteDepositRepo<'_> {
    fn insert_or_ignore(&self, deposit: &DepositRow) -> Result<bool, AtlasError> {
        let changes = self.store.connection().execute(
            "INSERT OR IGNORE INTO deposit
             (doi, session_name, session_date, platform_type, footprint, track,
              have_raw_data, have_processed_data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                deposit.doi,
                deposit.session_name,
                deposit.session_date,
                deposit.platform_type,
                deposit.footprint_wkt,
                deposit.track_wkt,
                deposit.have_raw_data,
                deposit.have_processed_data,
            ],
        )?;
        if changes > 0 {
            self.by_doi
                .borrow_mut()
                .insert(deposit.doi.clone(), deposit.clone());
        }
        Ok(changes > 0)
    }

    fn get(&self, doi: &str) -> Result<Option<DepositRow>, AtlasError> {
        if let Some(row) = self.by_doi.borrow().get(doi) {
            return Ok(Some(row.clone()));
        }
        let row = self
            .store
            .connection()
            .query_row(
                "SELECT doi, session_name, session_date, platform_type, footprint, track,
                        have_raw_data, have_processed_data
                 FROM deposit WHERE doi = ?1",
                params![doi],
                |row| {
                    Ok(DepositRow {
                        doi: row.get(0)?,
                        session_name: row.get(1)?,
                        session_date: row.get(2)?,
                        platform_type: row.get(3)?,
                        footprint_wkt: row.get(4)?,
                        track_wkt: row.get(5)?,
                        have_raw_data: row.get(6)?,
                        have_processed_data: row.get(7)?,
                    })
                },
            )
            .optional()?;
        if let Some(ref row) = row {
            self.by_doi
                .borrow_mut()
                .insert(row.doi.clone(), row.clone());
        }
        Ok(row)
    }

    fn all_dois(&self) -> Result<Vec<String>, AtlasError> {
        let mut statement = self
            .store
            .connection()
            .prepare("SELECT doi FROM deposit ORDER BY doi")?;
        let dois = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(dois)
    }
}

pub struct SqliteVersionRepo<'c> {
    store: &'c AtlasStore,
    by_doi: RefCell<HashMap<String, VersionRow>>,
}

impl<'c> SqliteVersionRepo<'c> {
    pub fn new(store: &'c AtlasStore) -> Self {
        Self {
            store,
            by_doi: RefCell::new(HashMap::new()),
        }
    }
}

impl VersionRepository for SqliteVersionRepo<'_> {
    fn insert_or_ignore(&self, version: &VersionRow) -> Result<bool, AtlasError> {
        let changes = self.store.connection().execute(
            "INSERT OR IGNORE INTO version (doi, deposit_doi) VALUES (?1, ?2)",
            params![version.doi, version.deposit_doi],
        )?;
        if changes > 0 {
            self.by_doi
                .borrow_mut()
                .insert(version.doi.clone(), version.clone());
        }
        Ok(changes > 0)
    }

    fn get(&self, doi: &str) -> Result<Option<VersionRow>, AtlasError> {
        if let Some(row) = self.by_doi.borrow().get(doi) {
            return Ok(Some(row.clone()));
        }
        let row = self
            .store
            .connection()
            .query_row(
                "SELECT doi, deposit_doi FROM version WHERE doi = ?1",
                params![doi],
                |row| {
                    Ok(VersionRow {
                        doi: row.get(0)?,
                        deposit_doi: row.get(1)?,
                    })
                },
            )
            .optional()?;
        if let Some(ref row) = row {
            self.by_doi
                .borrow_mut()
                .insert(row.doi.clone(), row.clone());
        }
        Ok(row)
    }
}

pub struct SqliteFrameRepo<'c> {
    store: &'c AtlasStore,
    id_by_key: RefCell<HashMap<(String, String), i64>>,
}

impl<'c> SqliteFrameRepo<'c> {
    pub fn new(store: &'c AtlasStore) -> Self {
        Self {
            store,
            id_by_key: RefCell::new(HashMap::new()),
        }
    }
}

impl FrameRepository for SqliteFrameRepo<'_> {
    fn insert_batch(&self, frames: &[NewFrame]) -> Result<usize, AtlasError> {
        if frames.is_empty() {
            tracing::warn!("no frames to insert");
            return Ok(0);
        }
        let mut statement = self.store.connection().prepare(
            "INSERT INTO frame
             (version_doi, filename, original_filename, relative_path, gps_latitude,
              gps_longitude, gps_altitude, gps_pitch, gps_roll, gps_track, gps_fix,
              gps_datetime)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        let mut inserted = 0usize;
        for frame in frames {
            inserted += statement.execute(params![
                frame.version_doi,
                frame.filename,
                frame.original_filename,
                frame.relative_path,
                frame.gps_latitude,
                frame.gps_longitude,
                frame.gps_altitude,
                frame.gps_pitch,
                frame.gps_roll,
                frame.gps_track,
                frame.gps_fix,
                frame.gps_datetime,
            ])?;
        }
        Ok(inserted)
    }

    fn filenames_for_version(&self, version_doi: &str) -> Result<HashSet<String>, AtlasError> {
        let mut statement = self
            .store
            .connection()
            .prepare("SELECT filename FROM frame WHERE version_doi = ?1")?;
        let filenames = statement
            .query_map(params![version_doi], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(filenames)
    }

    fn id_by_version_and_filename(
        &self,
        version_doi: &str,
        filename: &str,
    ) -> Result<Option<i64>, AtlasError> {
        let key = (version_doi.to_string(), filename.to_string());
        if let Some(id) = self.id_by_key.borrow().get(&key) {
            return Ok(Some(*id));
        }
        let id = self
            .store
            .connection()
            .query_row(
                "SELECT id FROM frame WHERE version_doi = ?1 AND filename = ?2",
                params![version_doi, filename],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if let Some(id) = id {
            self.id_by_key.borrow_mut().insert(key, id);
        }
        Ok(id)
    }

    fn count_for_version(&self, version_doi: &str) -> Result<u64, AtlasError> {
        let count: i64 = self.store.connection().query_row(
            "SELECT COUNT(*) FROM frame WHERE version_doi = ?1",
            params![version_doi],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn ids_by_filename(&self, filename: &str) -> Result<Vec<i64>, AtlasError> {
        let mut statement = self
            .store
            .connection()
            .prepare("SELECT id FROM frame WHERE filename = ?1 ORDER BY id")?;
        let ids = statement
            .query_map(params![filename], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

pub struct SqlitePredictionRepo<'c> {
    store: &'c AtlasStore,
    class_by_name: RefCell<HashMap<String, PredictionClass>>,
}

impl<'c> SqlitePredictionRepo<'c> {
    pub fn new(store: &'c AtlasStore) -> Self {
        Self {
            store,
            class_by_name: RefCell::new(HashMap::new()),
        }
    }
}

impl PredictionRepository for SqlitePredictionRepo<'_> {
    fn ensure_classes(&self, classes: &[ClassDef]) -> Result<Vec<PredictionClass>, AtlasError> {
        let mut resolved = Vec::with_capacity(classes.len());
        for class in classes {
            if let Some(known) = self.class_by_name.borrow().get(&class.name) {
                resolved.push(known.clone());
                continue;
            }
            self.store.connection().execute(
                "INSERT OR IGNORE INTO prediction_class (name, threshold) VALUES (?1, ?2)",
                params![class.name, class.threshold],
            )?;
            let row = self.store.connection().query_row(
                "SELECT id, name, threshold FROM prediction_class WHERE name = ?1",
                params![class.name],
                |row| {
                    Ok(PredictionClass {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        threshold: row.get(2)?,
                    })
                },
            )?;
            self.class_by_name
                .borrow_mut()
                .insert(row.name.clone(), row.clone());
            resolved.push(row);
        }
        Ok(resolved)
    }

    fn count_for_frame_version(
        &self,
        frame_id: i64,
        version_doi: &str,
    ) -> Result<u64, AtlasError> {
        let count: i64 = self.store.connection().query_row(
            "SELECT COUNT(*) FROM prediction WHERE frame_id = ?1 AND version_doi = ?2",
            params![frame_id, version_doi],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn insert_batch(&self, predictions: &[NewPrediction]) -> Result<usize, AtlasError> {
        if predictions.is_empty() {
            tracing::warn!("no predictions to insert");
            return Ok(0);
        }
        let mut statement = self.store.connection().prepare(
            "INSERT OR IGNORE INTO prediction (score, version_doi, frame_id, class_id)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        let mut inserted = 0usize;
        for prediction in predictions {
            inserted += statement.execute(params![
                prediction.score,
                prediction.version_doi,
                prediction.frame_id,
                prediction.class_id,
            ])?;
        }
        Ok(inserted)
    }

    fn class_by_name(&self, name: &str) -> Result<Option<PredictionClass>, AtlasError> {
        if let Some(known) = self.class_by_name.borrow().get(name) {
            return Ok(Some(known.clone()));
        }
        let row = self
            .store
            .connection()
            .query_row(
                "SELECT id, name, threshold FROM prediction_class WHERE name = ?1",
                params![name],
                |row| {
                    Ok(PredictionClass {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        threshold: row.get(2)?,
                    })
                },
            )
            .optional()?;
        if let Some(ref class) = row {
            self.class_by_name
                .borrow_mut()
                .insert(class.name.clone(), class.clone());
        }
        Ok(row)
    }
}

pub struct SqliteAnnotationRepo<'c> {
    store: &'c AtlasStore,
    session_by_key: RefCell<HashMap<AnnotationSessionKey, i64>>,
}

impl<'c> SqliteAnnotationRepo<'c> {
    pub fn new(store: &'c AtlasStore) -> Self {
        Self {
            store,
            session_by_key: RefCell::new(HashMap::new()),
        }
    }
}

impl AnnotationRepository for SqliteAnnotationRepo<'_> {
    fn find_session(&self, key: &AnnotationSessionKey) -> Result<Option<i64>, AtlasError> {
        if let Some(id) = self.session_by_key.borrow().get(key) {
            return Ok(Some(*id));
        }
        let id = self
            .store
            .connection()
            .query_row(
                "SELECT id FROM annotation_session
                 WHERE author_name = ?1 AND dataset_name = ?2 AND annotation_date = ?3",
                params![key.author_name, key.dataset_name, key.annotation_date],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if let Some(id) = id {
            self.session_by_key.borrow_mut().insert(key.clone(), id);
        }
        Ok(id)
    }

    fn create_session(&self, key: &AnnotationSessionKey) -> Result<i64, AtlasError> {
        self.store.connection().execute(
            "INSERT INTO annotation_session (author_name, dataset_name, annotation_date)
             VALUES (?1, ?2, ?3)",
            params![key.author_name, key.dataset_name, key.annotation_date],
        )?;
        let id = self.store.connection().last_insert_rowid();
        self.session_by_key.borrow_mut().insert(key.clone(), id);
        Ok(id)
    }

    fn delete_session(&self, session_id: i64) -> Result<(), AtlasError> {
        self.store.connection().execute(
            "DELETE FROM annotation_session WHERE id = ?1",
            params![session_id],
        )?;
        self.session_by_key
            .borrow_mut()
            .retain(|_, id| *id != session_id);
        Ok(())
    }

    fn insert_batch(
        &self,
        session_id: i64,
        annotations: &[NewAnnotation],
    ) -> Result<usize, AtlasError> {
        let mut statement = self.store.connection().prepare(
            "INSERT INTO annotation (value, frame_id, class_id, session_id)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        let mut inserted = 0usize;
        for annotation in annotations {
            inserted += statement.execute(params![
                annotation.value,
                annotation.frame_id,
                annotation.class_id,
                session_id,
            ])?;
        }
        Ok(inserted)
    }

    fn count_for_session(&self, session_id: i64) -> Result<u64, AtlasError> {
        let count: i64 = self.store.connection().query_row(
            "SELECT COUNT(*) FROM annotation WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
