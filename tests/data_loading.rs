use std::fs;
use std::path::{Path, PathBuf};

use analogfx::data::{load_csv, validate_bars};
use analogfx::store::{load_csv_store, CachedPriceStore, PriceStore};
use tempfile::TempDir;

fn write_csv(path: &Path, rows: &[&str]) {
    let mut out = String::from("ts,open,high,low,close,volume\n");
    for row in rows {
        out.push_str(row);
        out.push('\n');
    }
    fs::write(path, out).unwrap();
}

#[test]
fn load_sorts_dedups_and_skips_junk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("spx.csv");
    write_csv(
        &path,
        &[
            "# exported",
            "200,2,2,2,2,10",
            "100,1,1,1,1,",
            "not,a,row,at,all",
            "200,9,9,9,9,10",
            "300,3,3,3,3,10",
        ],
    );
    let bars = load_csv(&path, "SPX", "1d").unwrap();
    let ts: Vec<u64> = bars.iter().map(|b| b.ts).collect();
    assert_eq!(ts, vec![100, 200, 300]);
    assert_eq!(bars[0].volume, None);
    assert_eq!(bars[1].close, 2.0);
    assert!(validate_bars(&bars).is_ok());
}

#[test]
fn missing_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    assert!(load_csv(&dir.path().join("nope.csv"), "X", "1d").is_err());
}

#[test]
fn store_keys_by_file_stem_and_caches() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("AAA.csv");
    let b = dir.path().join("BBB.csv");
    write_csv(&a, &["100,1,1,1,1,1", "200,2,2,2,2,1"]);
    write_csv(&b, &["100,5,5,5,5,1"]);

    let paths: Vec<PathBuf> = vec![a, b];
    let (symbols, inner) = load_csv_store(&paths, "1d").unwrap();
    assert_eq!(symbols, vec!["AAA".to_string(), "BBB".to_string()]);

    let store = CachedPriceStore::new(inner);
    let first = store.shared("AAA", 0, u64::MAX, "1d").unwrap();
    let again = store.shared("AAA", 0, u64::MAX, "1d").unwrap();
    assert_eq!(first.len(), 2);
    assert!(std::sync::Arc::ptr_eq(&first, &again));
    assert_eq!(store.cached_entries(), 1);
    assert_eq!(store.candles("BBB", 0, 150, "1d").unwrap().len(), 1);
}

#[test]
fn empty_csv_rejected_by_store_loader() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("EMPTY.csv");
    write_csv(&path, &[]);
    assert!(load_csv_store(&[path], "1d").is_err());
}
