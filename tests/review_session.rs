use chrono::{NaiveDate, NaiveDateTime};
use std::fs;
use tempfile::tempdir;

use mri_slice_qc::source::{JsonDirSource, SliceSource};
use mri_slice_qc::{CsvTable, Error, KeyCatalog, NavCommand, ReviewSession, ReviewStore, SliceKey};

const HEADER: &str = "key,phonetic_id,series,slice_number,rating,viewed,first_viewed_at,last_updated_at";

fn at(sec: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(9, 0, sec).unwrap()
}

fn catalog() -> KeyCatalog {
    KeyCatalog::build(["p1_sax_slice_0", "p1_sax_slice_1", "p2_lax_slice_0"]).unwrap()
}

#[test]
fn view_and_rate_writes_single_row() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("qc.csv");
    let mut session = ReviewSession::start(catalog(), ReviewStore::new(), CsvTable::new(&path)).unwrap();

    session.on_slice_displayed("p1_sax_slice_0", at(0)).unwrap();
    session.on_rating_changed("p1_sax_slice_0", 2, at(1)).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec![
            HEADER,
            "p1_sax_slice_0,p1,sax,0,2,True,2024-05-01T09:00:00,2024-05-01T09:00:01",
        ]
    );
}

#[test]
fn invalid_rating_leaves_table_untouched() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("qc.csv");
    let mut session = ReviewSession::start(catalog(), ReviewStore::new(), CsvTable::new(&path)).unwrap();
    session.on_slice_displayed("p1_sax_slice_0", at(0)).unwrap();
    let before = fs::read(&path).unwrap();
    let modified = fs::metadata(&path).unwrap().modified().unwrap();

    let err = session.on_rating_changed("p1_sax_slice_0", 5, at(1)).unwrap_err();
    assert!(matches!(err, Error::InvalidRating(_)));
    assert_eq!(fs::read(&path).unwrap(), before);
    assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), modified);
}

#[test]
fn resumed_session_continues_where_it_left_off() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("qc.csv");

    {
        let mut session = ReviewSession::start(catalog(), ReviewStore::new(), CsvTable::new(&path)).unwrap();
        session.on_slice_displayed("p1_sax_slice_0", at(0)).unwrap();
        session.on_rating_changed("p1_sax_slice_0", 3, at(1)).unwrap();
        let landed = session.navigate(&NavCommand::JumpTo("p2_lax_slice_0".into())).unwrap().unwrap();
        session.on_slice_displayed(landed.as_str(), at(2)).unwrap();
    }

    let table = CsvTable::new(&path);
    let report = table.load().unwrap();
    assert!(report.rejected.is_empty());
    let mut session = ReviewSession::start(catalog(), ReviewStore::seeded(report.records), table).unwrap();

    let first = SliceKey::parse("p1_sax_slice_0").unwrap();
    assert_eq!(session.record(&first).rating.map(|r| r.value()), Some(3));
    assert_eq!(session.record(&first).first_viewed_at, Some(at(0)));

    let landed = session.navigate(&NavCommand::NextUnviewed).unwrap().unwrap();
    assert_eq!(landed.as_str(), "p1_sax_slice_1");
    session.on_slice_displayed(landed.as_str(), at(10)).unwrap();
    assert_eq!(session.navigate(&NavCommand::NextUnviewed).unwrap(), None);

    let text = fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), 4);
}

#[test]
fn rows_outside_the_catalog_survive_saves() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("qc.csv");
    fs::write(
        &path,
        format!("{HEADER}\nother_cine_slice_4,other,cine,4,1,True,2024-04-01T08:00:00,2024-04-01T08:00:05\n"),
    )
    .unwrap();

    let table = CsvTable::new(&path);
    let report = table.load().unwrap();
    let mut session = ReviewSession::start(catalog(), ReviewStore::seeded(report.records), table).unwrap();
    session.on_slice_displayed("p1_sax_slice_0", at(0)).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("other_cine_slice_4,other,cine,4,1,True,2024-04-01T08:00:00,2024-04-01T08:00:05"));
    assert!(text.contains("p1_sax_slice_0,p1,sax,0,,True,"));
}

#[test]
fn container_with_bad_key_cannot_start() {
    let dir = tempdir().unwrap();
    for name in ["p1_sax_slice_0", "abc_slice_x"] {
        fs::write(dir.path().join(format!("{name}.json")), r#"{"shape": [1, 1, 1], "data": [0]}"#).unwrap();
    }
    let source = JsonDirSource::open(dir.path()).unwrap();
    let err = KeyCatalog::build(source.list_keys().unwrap()).unwrap_err();
    assert_eq!(err.keys, vec!["abc_slice_x".to_string()]);
}

#[test]
fn rows_split_at_the_first_underscore_survive_saves() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("qc.csv");
    fs::write(
        &path,
        format!("{HEADER}\nalpha_bravo_sax_slice_0,alpha,bravo_sax,0.0,2.0,True,2024-04-01T08:00:00,2024-04-01T08:00:05\n"),
    )
    .unwrap();

    let table = CsvTable::new(&path);
    let report = table.load().unwrap();
    assert!(report.rejected.is_empty());
    assert_eq!(report.warnings.len(), 2);
    let mut session = ReviewSession::start(catalog(), ReviewStore::seeded(report.records), table).unwrap();
    session.on_slice_displayed("p1_sax_slice_0", at(0)).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("alpha_bravo_sax_slice_0,alpha_bravo,sax,0,2,True,2024-04-01T08:00:00,2024-04-01T08:00:05"));
    assert!(CsvTable::new(&path).load().unwrap().warnings.is_empty());
}
