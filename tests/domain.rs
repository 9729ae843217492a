use assert_matches::assert_matches;
use reef_atlas_manager::domain::{DepositState, SessionName, VersionLabel};
use reef_atlas_manager::error::AtlasError;

#[test]
fn session_name_round_trip() {
    let name: SessionName = "20240115_SYC-ALDABRA_UVC-2_03".parse().unwrap();
    assert_eq!(name.as_str(), "20240115_SYC-ALDABRA_UVC-2_03");
    assert_eq!(name.session_date(), "2024-01-15");
    assert_eq!(name.platform(), "UVC");
    assert_eq!(name.urn(), "urn:20240115_SYC-ALDABRA_UVC-2_03");
}

#[test]
fn session_name_without_counter() {
    let name: SessionName = "20220910_REU-HERMITAGE_UAV".parse().unwrap();
    assert_eq!(name.platform(), "UAV");
}

#[test]
fn session_name_rejects_malformed_values() {
    for value in ["", "survey-42", "2023_REU_ASV_01", "20231021-REU-ASV-01"] {
        let err = value.parse::<SessionName>().unwrap_err();
        assert_matches!(err, AtlasError::InvalidSessionName(_));
    }
}

#[test]
fn version_label_display_round_trip() {
    for label in ["RAW_DATA", "RAW_DATA_3", "PROCESSED_DATA", "PROCESSED_DATA_2"] {
        assert_eq!(VersionLabel::parse(label).to_string(), label);
    }
}

#[test]
fn continuations_stay_in_their_lineage() {
    assert!(VersionLabel::parse("RAW_DATA_2").is_raw());
    assert!(VersionLabel::parse("PROCESSED DATA").is_processed());
    assert!(VersionLabel::parse("RAW_DATA_2").is_imported());
    assert!(!VersionLabel::parse("DEPRECATED").is_imported());
}

#[test]
fn state_machine_mapping_is_closed() {
    let cases = [
        (("unsubmitted", false), DepositState::Draft, true),
        (("unsubmitted", true), DepositState::EditableDraft, false),
        (("inprogress", true), DepositState::InProgress, true),
        (("done", true), DepositState::Published, false),
    ];
    for ((state, submitted), expected, needs_discard) in cases {
        let parsed = DepositState::from_parts(state, submitted).unwrap();
        assert_eq!(parsed, expected);
        assert_eq!(parsed.needs_discard(), needs_discard);
    }
}
