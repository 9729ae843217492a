use std::path::Path;

use rusqlite::Connection;

use crate::error::AtlasError;

pub const ATLAS_DB_FILE: &str = "reef_atlas.db";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS deposit (
    doi                 TEXT PRIMARY KEY,
    session_name        TEXT NOT NULL UNIQUE,
    session_date        TEXT,
    platform_type       TEXT,
    footprint           TEXT,
    track               TEXT,
    have_raw_data       INTEGER NOT NULL DEFAULT 0,
    have_processed_data INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS version (
    doi         TEXT PRIMARY KEY,
    deposit_doi TEXT NOT NULL REFERENCES deposit(doi)
);

CREATE TABLE IF NOT EXISTS frame (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    version_doi       TEXT NOT NULL REFERENCES version(doi),
    filename          TEXT NOT NULL,
    original_filename TEXT NOT NULL,
    relative_path     TEXT,
    gps_latitude      REAL,
    gps_longitude     REAL,
    gps_altitude      REAL,
    gps_pitch         REAL,
    gps_roll          REAL,
    gps_track         REAL,
    gps_fix           INTEGER,
    gps_datetime      TEXT,
    UNIQUE (version_doi, filename)
);

CREATE TABLE IF NOT EXISTS prediction_class (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    name      TEXT NOT NULL UNIQUE,
    threshold REAL NOT NULL DEFAULT 0.5
);

CREATE TABLE IF NOT EXISTS prediction (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    score       REAL NOT NULL,
    version_doi TEXT NOT NULL REFERENCES version(doi),
    frame_id    INTEGER NOT NULL REFERENCES frame(id),
    class_id    INTEGER NOT NULL REFERENCES prediction_class(id),
    UNIQUE (version_doi, frame_id, class_id)
);

CREATE TABLE IF NOT EXISTS annotation_session (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    author_name     TEXT NOT NULL,
    dataset_name    TEXT NOT NULL,
    annotation_date TEXT NOT NULL,
    UNIQUE (author_name, dataset_name, annotation_date)
);

CREATE TABLE IF NOT EXISTS annotation (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    value      TEXT NOT NULL,
    frame_id   INTEGER NOT NULL REFERENCES frame(id),
    class_id   INTEGER NOT NULL REFERENCES prediction_class(id),
    session_id INTEGER NOT NULL REFERENCES annotation_session(id)
);

CREATE INDEX IF NOT EXISTS idx_frame_version ON frame(version_doi);
CREATE INDEX IF NOT EXISTS idx_prediction_frame ON prediction(frame_id, version_doi);
CREATE INDEX IF NOT EXISTS idx_annotation_session ON annotation(session_id);
"#;

/// One physical SQLite connection, opened at process start and passed
/// explicitly to every component that reads or writes the atlas.
pub struct AtlasStore {
    conn: Connection,
}

impl AtlasStore {
    pub fn open(path: &Path) -> Result<Self, AtlasError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| AtlasError::Filesystem(err.to_string()))?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, AtlasError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, AtlasError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_reentrant() {
        let store = AtlasStore::open_in_memory().unwrap();
        // CREATE IF NOT EXISTS makes re-running the schema a no-op.
        store.connection().execute_batch(SCHEMA).unwrap();
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let store = AtlasStore::open_in_memory().unwrap();
        let result = store.connection().execute(
            "INSERT INTO version (doi, deposit_doi) VALUES ('1', 'missing')",
            [],
        );
        assert!(result.is_err());
    }
}
