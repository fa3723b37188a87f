use std::fs;

use chrono::NaiveDate;
use tempfile::TempDir;

use lifelog_core::store::JsonDirStore;
use lifelog_core::traits::DocumentStore;

const SINGLE: &str = r#"{"id":"morning","title":"Morning walk","content":"Walked to the bakery","createdAt":"2024-03-15T07:00:00Z"}"#;
const MANY: &str = r#"[
  {"id":"standup","title":"Standup","content":"Release planning","createdAt":"2024-03-15T09:00:00Z","headings":["Release"]},
  {"id":"dinner","title":"Dinner","content":"Pasta with Sam","createdAt":"2024-03-16T19:00:00Z"}
]"#;

#[tokio::test]
async fn json_dir_store_reads_single_and_array_files() {
    let tmp = TempDir::new().expect("tempdir");
    let nested = tmp.path().join("2024/03");
    fs::create_dir_all(&nested).expect("mkdir");
    fs::write(nested.join("a.json"), SINGLE).expect("write");
    fs::write(nested.join("b.json"), MANY).expect("write");
    fs::write(nested.join("notes.txt"), "ignored").expect("write");

    let store = JsonDirStore::open(tmp.path()).expect("open");
    let docs = store.load_all().await.expect("load all");
    assert_eq!(docs.len(), 3, "two files, three documents, txt ignored");

    let day = NaiveDate::from_ymd_opt(2024, 3, 15).expect("valid");
    let mut ids: Vec<String> = store.load_by_date_range(day, day).await.expect("range").into_iter().map(|(id, _)| id).collect();
    ids.sort();
    assert_eq!(ids, vec!["morning", "standup"]);

    let dinner = store.load("dinner", day.succ_opt().expect("valid")).await.expect("load");
    assert_eq!(dinner.map(|d| d.title), Some("Dinner".to_string()));
}

#[tokio::test]
async fn json_dir_store_skips_malformed_files() {
    let tmp = TempDir::new().expect("tempdir");
    fs::write(tmp.path().join("good.json"), SINGLE).expect("write");
    fs::write(tmp.path().join("bad.json"), "{ not json").expect("write");

    let store = JsonDirStore::open(tmp.path()).expect("open");
    let docs = store.load_all().await.expect("malformed files are skipped, not fatal");
    assert_eq!(docs.len(), 1);
}

#[test]
fn json_dir_store_rejects_missing_directory() {
    let tmp = TempDir::new().expect("tempdir");
    assert!(JsonDirStore::open(tmp.path().join("missing")).is_err());
}
