use super::*;
use crate::IngestError;
use tempfile::TempDir;

async fn create_test_store() -> (Arc<VectorStore>, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = VectorStore::open(&temp_dir.path().join("vectors"), "embeddings")
        .await
        .expect("should open vector store");
    (Arc::new(store), temp_dir)
}

#[tokio::test]
async fn second_prepare_is_noop() {
    let (store, _temp_dir) = create_test_store().await;
    let preparer = VectorStorePreparer::new(Arc::clone(&store), 4, DistanceMetric::Cosine);

    let first = preparer.prepare(false).await.expect("should prepare");
    let second = preparer.prepare(false).await.expect("should prepare again");

    assert_eq!(first, IndexStatus::Created);
    assert_eq!(second, IndexStatus::Existing);
}

#[tokio::test]
async fn other_dimension_is_rejected() {
    let (store, _temp_dir) = create_test_store().await;
    VectorStorePreparer::new(Arc::clone(&store), 4, DistanceMetric::Cosine)
        .prepare(false)
        .await
        .expect("should prepare");

    let result = VectorStorePreparer::new(Arc::clone(&store), 6, DistanceMetric::Cosine)
        .prepare(false)
        .await;

    assert!(matches!(result, Err(IngestError::SchemaMismatch { .. })));
    let schema = store
        .index_schema()
        .await
        .expect("should read schema")
        .expect("table should exist");
    assert_eq!(schema.dimension, 4);
}

#[tokio::test]
async fn other_metric_is_rejected() {
    let (store, _temp_dir) = create_test_store().await;
    VectorStorePreparer::new(Arc::clone(&store), 4, DistanceMetric::Cosine)
        .prepare(false)
        .await
        .expect("should prepare");

    let result = VectorStorePreparer::new(Arc::clone(&store), 4, DistanceMetric::Dot)
        .prepare(false)
        .await;

    assert!(matches!(result, Err(IngestError::SchemaMismatch { .. })));
    let schema = store
        .index_schema()
        .await
        .expect("should read schema")
        .expect("table should exist");
    assert_eq!(schema.dimension, 4);
    assert_eq!(schema.distance_metric, Some(DistanceMetric::Cosine));
}

#[tokio::test]
async fn purge_changes_dimension() {
    let (store, _temp_dir) = create_test_store().await;
    VectorStorePreparer::new(Arc::clone(&store), 4, DistanceMetric::Cosine)
        .prepare(false)
        .await
        .expect("should prepare");

    let status = VectorStorePreparer::new(Arc::clone(&store), 6, DistanceMetric::L2)
        .prepare(true)
        .await
        .expect("should purge and prepare");

    assert_eq!(status, IndexStatus::Recreated);
    let schema = store
        .index_schema()
        .await
        .expect("should read schema")
        .expect("table should exist");
    assert_eq!(schema.dimension, 6);
    assert_eq!(schema.distance_metric, Some(DistanceMetric::L2));
}

#[tokio::test]
async fn parameters_come_from_config() {
    let (store, temp_dir) = create_test_store().await;
    let mut config = Config::with_base_dir(temp_dir.path());
    config.ollama.embedding_dimension = 384;
    config.vector_store.distance_metric = DistanceMetric::Dot;

    let preparer = VectorStorePreparer::from_config(store, &config);

    assert_eq!(preparer.dimension(), 384);
    assert_eq!(preparer.metric(), DistanceMetric::Dot);
}
