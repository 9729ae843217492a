use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use reef_atlas_manager::domain::{
    RemoteFile, RemoteVersion, SessionName, StagedArtifact, VersionLabel,
};
use reef_atlas_manager::import::{
    AnnotationBatch, AnnotationOutcome, AnnotationRecord, ImportRequest, Importer,
};
use reef_atlas_manager::reconcile::{IA_KEY, METADATA_KEY, reconcile};
use reef_atlas_manager::staging::{ClassRecord, FrameRecord, PredictionRecord, SessionData};
use reef_atlas_manager::store::AtlasStore;

const CONCEPT_ID: u64 = 7;
const METADATA_VERSION: u64 = 11;

fn session() -> SessionName {
    "20231021_REU-TROUDEAU_ASV-1_01".parse().unwrap()
}

fn staged() -> Vec<StagedArtifact> {
    vec![
        StagedArtifact {
            key: METADATA_KEY.to_string(),
            path: Utf8PathBuf::from("/tmp/METADATA.zip"),
            size: 1000,
        },
        StagedArtifact {
            key: IA_KEY.to_string(),
            path: Utf8PathBuf::from("/tmp/PROCESSED_DATA_IA.zip"),
            size: 5000,
        },
    ]
}

fn remote_versions() -> Vec<RemoteVersion> {
    vec![
        RemoteVersion {
            id: 10,
            label: VersionLabel::parse("RAW_DATA"),
            files: vec![RemoteFile {
                id: "f-dcim".to_string(),
                key: "DCIM.zip".to_string(),
                size: 900_000,
                checksum: None,
                download_url: None,
            }],
        },
        RemoteVersion {
            id: METADATA_VERSION,
            label: VersionLabel::parse("PROCESSED_DATA"),
            files: vec![
                RemoteFile {
                    id: "f-meta".to_string(),
                    key: METADATA_KEY.to_string(),
                    size: 1005,
                    checksum: None,
                    download_url: None,
                },
                RemoteFile {
                    id: "f-ia".to_string(),
                    key: IA_KEY.to_string(),
                    size: 5002,
                    checksum: None,
                    download_url: None,
                },
            ],
        },
    ]
}

fn frame(filename: &str, longitude: f64, latitude: f64) -> FrameRecord {
    FrameRecord {
        filename: filename.to_string(),
        original_filename: format!("G00{filename}"),
        relative_path: Some("DCIM/100GOPRO".to_string()),
        gps_latitude: Some(latitude),
        gps_longitude: Some(longitude),
        gps_datetime: Some("2023-10-21 08:12:00".to_string()),
        ..FrameRecord::default()
    }
}

fn classes() -> Vec<ClassRecord> {
    ["Acropora", "Seagrass", "Sand", "Rubble", "Turbid"]
        .into_iter()
        .map(|name| ClassRecord {
            name: name.to_string(),
            threshold: 0.5,
        })
        .collect()
}

fn session_data() -> SessionData {
    let frames = vec![
        frame("img_0001.jpg", 55.01, -21.01),
        frame("img_0002.jpg", 55.02, -21.02),
        frame("img_0003.jpg", 55.03, -21.01),
        // Not in the useful set, must never be imported.
        frame("img_0004.jpg", 55.04, -21.04),
    ];
    let useful = vec![
        "img_0001.jpg".to_string(),
        "img_0002.jpg".to_string(),
        "img_0003.jpg".to_string(),
    ];
    let mut predictions = Vec::new();
    for filename in &useful {
        for class in classes() {
            predictions.push(PredictionRecord {
                filename: filename.clone(),
                class_name: class.name,
                score: 0.42,
            });
        }
    }
    SessionData {
        frames,
        useful_filenames: useful,
        classes: classes(),
        predictions,
    }
}

fn count(store: &AtlasStore, sql: &str) -> i64 {
    store
        .connection()
        .query_row(sql, [], |row| row.get(0))
        .unwrap()
}

fn import_once(store: &AtlasStore, data: &SessionData) {
    let session = session();
    let versions = remote_versions();
    let reconciliation = reconcile(&session, &staged(), &versions, 10).unwrap();
    let importer = Importer::new(store);
    importer
        .import_session(&ImportRequest {
            session: &session,
            concept_id: CONCEPT_ID,
            versions: &versions,
            reconciliation: &reconciliation,
            data,
        })
        .unwrap();
}

#[test]
fn full_import_is_idempotent() {
    let store = AtlasStore::open_in_memory().unwrap();
    let data = session_data();

    import_once(&store, &data);
    let deposits = count(&store, "SELECT COUNT(*) FROM deposit");
    let versions = count(&store, "SELECT COUNT(*) FROM version");
    let frames = count(&store, "SELECT COUNT(*) FROM frame");
    let predictions = count(&store, "SELECT COUNT(*) FROM prediction");

    assert_eq!(deposits, 1);
    assert_eq!(versions, 2);
    assert_eq!(frames, 3);
    assert_eq!(predictions, 15);

    // Second run over the same reconciled input changes nothing.
    import_once(&store, &data);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM deposit"), deposits);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM version"), versions);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM frame"), frames);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM prediction"), predictions);
}

#[test]
fn deposit_carries_footprint_and_session_attributes() {
    let store = AtlasStore::open_in_memory().unwrap();
    import_once(&store, &session_data());

    let (session_date, platform, footprint): (String, String, Option<String>) = store
        .connection()
        .query_row(
            "SELECT session_date, platform_type, footprint FROM deposit WHERE doi = '7'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!(session_date, "2023-10-21");
    assert_eq!(platform, "ASV");
    assert!(footprint.unwrap().starts_with("POLYGON(("));
}

#[test]
fn existing_frames_are_skipped_not_duplicated() {
    let store = AtlasStore::open_in_memory().unwrap();
    let data = session_data();
    import_once(&store, &data);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM frame"), 3);

    // A new frame appears in the metadata while the others already exist.
    let mut grown = data.clone();
    grown.frames.push(frame("img_0005.jpg", 55.05, -21.05));
    grown.useful_filenames.push("img_0005.jpg".to_string());
    import_once(&store, &grown);

    assert_eq!(count(&store, "SELECT COUNT(*) FROM frame"), 4);
    let dupes = count(
        &store,
        "SELECT COUNT(*) FROM (SELECT version_doi, filename FROM frame
         GROUP BY version_doi, filename HAVING COUNT(*) > 1)",
    );
    assert_eq!(dupes, 0);
}

#[test]
fn partial_prediction_sets_are_skipped_with_no_new_rows() {
    let store = AtlasStore::open_in_memory().unwrap();
    let data = session_data();

    // First import establishes deposit, versions and frames.
    import_once(&store, &data);

    // Corrupt one frame's prediction set down to 3 of 5 classes.
    store
        .connection()
        .execute(
            "DELETE FROM prediction WHERE id IN (
                 SELECT p.id FROM prediction p
                 JOIN frame f ON f.id = p.frame_id
                 WHERE f.filename = 'img_0002.jpg' LIMIT 2)",
            [],
        )
        .unwrap();
    assert_eq!(count(&store, "SELECT COUNT(*) FROM prediction"), 13);

    // Re-running does not repair the partial set, it skips the frame.
    import_once(&store, &data);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM prediction"), 13);
}

fn annotation_batch(filename: &str, class_name: &str) -> AnnotationBatch {
    AnnotationBatch {
        author_name: "j.surveyor".to_string(),
        dataset_name: "lagoon-2023".to_string(),
        annotation_date: "2023-11-05".to_string(),
        annotations: vec![AnnotationRecord {
            frame_filename: filename.to_string(),
            class_name: class_name.to_string(),
            value: "1".to_string(),
        }],
    }
}

#[test]
fn annotation_sessions_deduplicate_and_roll_back_when_empty() {
    let store = AtlasStore::open_in_memory().unwrap();
    import_once(&store, &session_data());
    let importer = Importer::new(&store);

    let outcome = importer
        .import_annotations(&annotation_batch("img_0001.jpg", "Acropora"))
        .unwrap();
    assert_matches!(outcome, AnnotationOutcome::Imported { inserted: 1, .. });
    assert_eq!(count(&store, "SELECT COUNT(*) FROM annotation_session"), 1);

    // Identical (author, dataset, date) batch is not imported twice.
    let outcome = importer
        .import_annotations(&annotation_batch("img_0001.jpg", "Acropora"))
        .unwrap();
    assert_matches!(outcome, AnnotationOutcome::AlreadyImported);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM annotation"), 1);

    // A batch matching nothing rolls its just-created session back.
    let mut unmatched = annotation_batch("img_none.jpg", "Acropora");
    unmatched.annotation_date = "2023-11-06".to_string();
    let outcome = importer.import_annotations(&unmatched).unwrap();
    assert_matches!(outcome, AnnotationOutcome::Empty);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM annotation_session"), 1);
}
