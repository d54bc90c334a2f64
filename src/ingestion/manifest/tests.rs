use super::*;
use crate::database::sqlite::models::NewCacheEntry;
use std::collections::HashSet;
use tempfile::TempDir;

async fn create_test_database() -> (TempDir, Database) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let database = Database::initialize_from_config_dir(temp_dir.path())
        .await
        .expect("should open database");
    (temp_dir, database)
}

async fn observe(database: &Database, uri: &str, fingerprint: &str) {
    database
        .record_observed(&NewCacheEntry {
            document_uri: uri.to_string(),
            content_fingerprint: fingerprint.to_string(),
            content_type: "text/plain".to_string(),
            size: 1,
        })
        .await
        .expect("should record observation");
}

async fn status_of(database: &Database, uri: &str) -> CacheStatus {
    database
        .get(uri)
        .await
        .expect("should query")
        .expect("entry should exist")
        .status
}

#[tokio::test]
async fn empty_cache_builds_invalid_manifest() {
    let (_temp_dir, database) = create_test_database().await;
    let artifacts = ObjectStorage::in_memory();
    let builder = ManifestBuilder::new(database, artifacts.clone());

    let outcome = builder.build("run-empty").await.expect("should build");

    assert!(!outcome.is_valid);
    assert_eq!(outcome.pending_documents, 0);
    assert_eq!(
        outcome.manifest_location,
        "ingestion_input/run-empty/manifest.jsonl"
    );
    let entries = load_manifest(&artifacts, &outcome.manifest_location)
        .await
        .expect("should load manifest");
    assert!(entries.is_empty());
}

#[tokio::test]
async fn every_pending_entry_is_claimed_once() {
    let (_temp_dir, database) = create_test_database().await;
    for i in 0..5 {
        observe(&database, &format!("doc-{i}.txt"), "f1").await;
    }
    observe(&database, "done.txt", "f1").await;
    database
        .upsert("done.txt", "f1", CacheStatus::Processed)
        .await
        .expect("should mark processed");
    observe(&database, "broken.txt", "f1").await;
    database
        .upsert("broken.txt", "f1", CacheStatus::Failed)
        .await
        .expect("should mark failed");

    let artifacts = ObjectStorage::in_memory();
    let builder = ManifestBuilder::new(database.clone(), artifacts.clone()).with_page_size(2);

    let outcome = builder.build("run-1").await.expect("should build");
    assert!(outcome.is_valid);
    assert_eq!(outcome.pending_documents, 5);

    let entries = load_manifest(&artifacts, &outcome.manifest_location)
        .await
        .expect("should load manifest");
    let uris: HashSet<&str> = entries.iter().map(|e| e.document_uri.as_str()).collect();
    assert_eq!(entries.len(), 5);
    assert_eq!(uris.len(), 5);
    assert!(!uris.contains("done.txt"));
    assert!(!uris.contains("broken.txt"));
    assert!(entries.iter().all(|e| e.content_fingerprint == "f1"));

    for uri in uris {
        assert_eq!(status_of(&database, uri).await, CacheStatus::Processing);
    }
    assert_eq!(status_of(&database, "done.txt").await, CacheStatus::Processed);
}

#[tokio::test]
async fn claimed_entries_are_not_claimed_again() {
    let (_temp_dir, database) = create_test_database().await;
    observe(&database, "a.txt", "f1").await;
    let builder = ManifestBuilder::new(database.clone(), ObjectStorage::in_memory());

    let first = builder.build("run-1").await.expect("should build");
    let second = builder.build("run-2").await.expect("should build");

    assert_eq!(first.pending_documents, 1);
    assert!(!second.is_valid);
}

#[tokio::test]
async fn run_id_cannot_be_reused() {
    let (_temp_dir, database) = create_test_database().await;
    observe(&database, "a.txt", "f1").await;
    let artifacts = ObjectStorage::in_memory();
    let builder = ManifestBuilder::new(database.clone(), artifacts.clone());

    let first = builder.build("same").await.expect("should build");
    assert_eq!(first.pending_documents, 1);

    observe(&database, "b.txt", "f1").await;
    let result = builder.build("same").await;
    assert!(matches!(result, Err(IngestError::ArtifactExists(_))));

    // The first manifest is untouched and nothing new was claimed
    let entries = load_manifest(&artifacts, &first.manifest_location)
        .await
        .expect("should load manifest");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].document_uri, "a.txt");
    assert_eq!(status_of(&database, "b.txt").await, CacheStatus::Pending);
}

#[tokio::test]
async fn failed_manifest_write_releases_claims() {
    let (temp_dir, database) = create_test_database().await;
    observe(&database, "a.txt", "f1").await;

    let artifacts_root = temp_dir.path().join("artifacts");
    let artifacts = ObjectStorage::local(&artifacts_root).expect("should open local store");
    // A file where the run directory should go makes the write fail
    std::fs::write(artifacts_root.join("ingestion_input"), b"blocked")
        .expect("should create blocking file");

    let builder = ManifestBuilder::new(database.clone(), artifacts);
    let result = builder.build("run-1").await;

    assert!(matches!(result, Err(IngestError::Storage(_))));
    assert_eq!(status_of(&database, "a.txt").await, CacheStatus::Pending);
}

#[test]
fn manifest_entry_wire_format() {
    let entry = ManifestEntry {
        document_uri: "reports/a.csv".to_string(),
        content_fingerprint: "f1".to_string(),
        content_type: "text/csv".to_string(),
    };

    let json = serde_json::to_string(&entry).expect("should serialize");
    assert_eq!(
        json,
        r#"{"documentUri":"reports/a.csv","contentFingerprint":"f1","contentType":"text/csv"}"#
    );

    let legacy: ManifestEntry =
        serde_json::from_str(r#"{"documentUri":"a.txt","contentFingerprint":"f2"}"#)
            .expect("should deserialize without content type");
    assert_eq!(legacy.content_type, "text/plain");
}
