//! Integration tests for the fetch path: range alignment, gap semantics,
//! tiered consolidation, and archive wraparound.
//!
//! The base fixture mirrors a classic round-robin setup: two GAUGE
//! sources sampled every 10 seconds into a full-resolution AVERAGE
//! archive and a 10:1 downsampled AVERAGE archive.

use rotunda::{ConsolidationFn, Database};
use tempfile::tempdir;

/// Creation timestamp of the base fixture; deliberately not step-aligned.
const TIME_REF: i64 = 1_368_278_979;

fn create_args() -> Vec<&'static str> {
    vec![
        "-b 1368278979",
        "-s 10",
        "DS:a:GAUGE:120:0:U",
        "DS:b:GAUGE:120:0:U",
        "RRA:AVERAGE:0.5:1:100",
        "RRA:AVERAGE:0.5:10:1000",
    ]
}

#[test]
fn test_fetch_with_no_updates_is_all_unknown() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.rtd");
    rotunda::create(&path, &create_args()).unwrap();

    let (range, names, rows) = rotunda::fetch(
        &path,
        &["AVERAGE", "-s 1368278979", "-e 1368279179"],
    )
    .unwrap();

    assert_eq!(range.start, 1_368_278_970);
    assert_eq!(range.end, 1_368_279_180);
    assert_eq!(range.step, 10);
    assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(rows.len(), 21);
    assert!(rows.iter().all(|row| row == &vec![None, None]));
}

#[test]
fn test_fetch_with_data_matches_reference_sequence() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.rtd");
    rotunda::create(&path, &create_args()).unwrap();

    // Thirty updates of 100:200, one per step, starting one second after
    // creation.
    let mut db = Database::open(&path).unwrap();
    for k in 0..30 {
        db.update(TIME_REF + 1 + 10 * k, &["100", "200"]).unwrap();
    }
    drop(db);

    let (range, names, rows) = rotunda::fetch(
        &path,
        &["AVERAGE", "-s 1368278979", "-e 1368279379"],
    )
    .unwrap();

    assert_eq!(range.start, 1_368_278_970);
    assert_eq!(range.end, 1_368_279_380);
    assert_eq!(range.step, 10);
    assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(rows.len(), 41);

    // The first interval was mostly unknown (it began before the
    // database existed), the next 29 carry the updates, and everything
    // past the last update is unknown.
    assert_eq!(rows[0], vec![None, None]);
    for row in &rows[1..30] {
        assert_eq!(row, &vec![Some(100.0), Some(200.0)]);
    }
    for row in &rows[30..] {
        assert_eq!(row, &vec![None, None]);
    }
}

#[test]
fn test_downsampled_archive_consolidates_and_honors_xff() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tiers.rtd");
    rotunda::create(&path, &create_args()).unwrap();

    let mut db = Database::open(&path).unwrap();
    for k in 0..30 {
        db.update(TIME_REF + 1 + 10 * k, &["100", "200"]).unwrap();
    }

    // A start older than the fast archive retains falls through to the
    // 100-second archive.
    let start = TIME_REF - 2_000;
    let (range, _, rows) = db
        .fetch(ConsolidationFn::Average, start, TIME_REF + 300)
        .unwrap();
    assert_eq!(range.step, 100);

    // The row window containing the creation time had 8 of 10 step slots
    // unknown, over the 0.5 x-files factor; the two full windows after it
    // consolidated cleanly.
    let row_at = |time: i64| {
        let index = (time - range.start) / 100 - 1;
        rows[index as usize].clone()
    };
    assert_eq!(row_at(1_368_279_000), vec![None, None]);
    assert_eq!(row_at(1_368_279_100), vec![Some(100.0), Some(200.0)]);
    assert_eq!(row_at(1_368_279_200), vec![Some(100.0), Some(200.0)]);
}

#[test]
fn test_sub_step_updates_accumulate_into_one_pdp() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("substep.rtd");

    let mut db = Database::create(
        &path,
        rotunda::CreateSpec {
            step: 10,
            start: 1_000,
            data_sources: vec!["DS:a:GAUGE:120:0:U".parse().unwrap()],
            archives: vec!["RRA:AVERAGE:0.5:1:100".parse().unwrap()],
        },
    )
    .unwrap();

    // One update every second; values alternate so the average matters.
    for t in 1..=20 {
        let value = if t % 2 == 0 { "150" } else { "50" };
        db.update(1_000 + t, &[value]).unwrap();
    }

    let (range, _, rows) = db.fetch(ConsolidationFn::Average, 1_000, 1_020).unwrap();
    assert_eq!(range.step, 10);
    assert_eq!(rows.len(), 2);

    // Each step saw ten one-second intervals alternating 50/150.
    assert_eq!(rows[0], vec![Some(100.0)]);
    assert_eq!(rows[1], vec![Some(100.0)]);
}

#[test]
fn test_wraparound_keeps_only_newest_rows() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wrap.rtd");

    let mut db = Database::create(
        &path,
        rotunda::CreateSpec {
            step: 10,
            start: 1_000,
            data_sources: vec!["DS:a:GAUGE:120:0:U".parse().unwrap()],
            archives: vec!["RRA:LAST:0.5:1:5".parse().unwrap()],
        },
    )
    .unwrap();

    // Twelve rows into a 5-row archive.
    for k in 1..=12 {
        db.update(1_000 + 10 * k, &[format!("{k}").as_str()]).unwrap();
    }

    // The full nominal window: only the newest five rows survive.
    let (range, _, rows) = db.fetch(ConsolidationFn::Last, 1_000, 1_120).unwrap();
    assert_eq!(range.start, 1_000);
    assert_eq!(range.end, 1_120);

    let expected: Vec<Vec<Option<f64>>> = (1..=12)
        .map(|k| {
            if k > 12 - 5 {
                vec![Some(f64::from(k))]
            } else {
                vec![None]
            }
        })
        .collect();
    assert_eq!(rows, expected);
}

#[test]
fn test_gap_longer_than_heartbeat_yields_unknown_rows() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("gap.rtd");

    let mut db = Database::create(
        &path,
        rotunda::CreateSpec {
            step: 10,
            start: 1_000,
            data_sources: vec!["DS:a:GAUGE:25:0:U".parse().unwrap()],
            archives: vec!["RRA:AVERAGE:0.5:1:100".parse().unwrap()],
        },
    )
    .unwrap();

    db.update(1_010, &["5"]).unwrap();
    db.update(1_020, &["5"]).unwrap();
    // 80 seconds of silence, past the 25 second heartbeat.
    db.update(1_100, &["5"]).unwrap();
    db.update(1_110, &["5"]).unwrap();

    let (_, _, rows) = db.fetch(ConsolidationFn::Average, 1_000, 1_110).unwrap();
    assert_eq!(rows.len(), 11);
    assert_eq!(rows[0], vec![Some(5.0)]);
    assert_eq!(rows[1], vec![Some(5.0)]);
    // The whole silent stretch, including the step the late sample
    // landed in, is unknown.
    for row in &rows[2..10] {
        assert_eq!(row, &vec![None]);
    }
    assert_eq!(rows[10], vec![Some(5.0)]);
}

#[test]
fn test_fetch_unknown_cf_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nocf.rtd");
    rotunda::create(&path, &create_args()).unwrap();

    let err = rotunda::fetch(&path, &["MAX", "-s 1368278979", "-e 1368279179"]).unwrap_err();
    assert!(err.to_string().contains("no archive"));
}
