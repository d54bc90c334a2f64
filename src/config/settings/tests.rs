use super::*;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.ollama.protocol, "http");
    assert_eq!(config.ollama.host, "localhost");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.ollama.model, "nomic-embed-text:latest");
    assert_eq!(config.ollama.batch_size, 16);
    assert_eq!(config.ollama.embedding_dimension, 768);
    assert_eq!(config.ingestion.max_concurrency, 50);
    assert_eq!(config.ingestion.lease_timeout(), Duration::from_secs(900));
    assert_eq!(config.chunking.chunk_size, 1000);
    assert_eq!(config.chunking.chunk_overlap, 200);
    assert_eq!(config.vector_store.table_name, "embeddings");
    assert_eq!(config.vector_store.distance_metric, DistanceMetric::Cosine);
}

#[test]
fn config_validation() {
    let config = Config::default();
    assert!(config.validate().is_ok());

    let mut invalid_config = config.clone();
    invalid_config.ollama.protocol = "ftp".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.batch_size = 1001;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.embedding_dimension = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidEmbeddingDimension(0))
    ));

    let mut invalid_config = config.clone();
    invalid_config.ingestion.max_concurrency = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidMaxConcurrency(0))
    ));

    let mut invalid_config = config.clone();
    invalid_config.ingestion.lease_timeout_seconds = 5;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidLeaseTimeout(5))
    ));

    let mut invalid_config = config.clone();
    invalid_config.vector_store.table_name = "drop table;".to_string();
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidTableName(_))
    ));
}

#[test]
fn chunk_overlap_must_be_smaller_than_chunk_size() {
    let mut config = Config::default();
    config.chunking.chunk_size = 500;
    config.chunking.chunk_overlap = 500;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::ChunkOverlapTooLarge(500, 500))
    ));

    config.chunking.chunk_overlap = 499;
    assert!(config.validate().is_ok());

    config.chunking.chunk_size = 50;
    config.chunking.chunk_overlap = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidChunkSize(50))
    ));
}

#[test]
fn ollama_url_generation() {
    let config = Config::default();
    let url = config
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_uses_defaults() {
    let toml_str = r#"
        [ingestion]
        max_concurrency = 8

        [vector_store]
        distance_metric = "l2"
    "#;
    let config: Config = toml::from_str(toml_str).expect("should parse partial toml");

    assert_eq!(config.ingestion.max_concurrency, 8);
    assert_eq!(config.ingestion.lease_timeout_seconds, 900);
    assert_eq!(config.vector_store.distance_metric, DistanceMetric::L2);
    assert_eq!(config.vector_store.table_name, "embeddings");
    assert_eq!(config.ollama, OllamaConfig::default());
}

#[test]
fn storage_paths_resolve_against_base_dir() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config::with_base_dir(temp_dir.path());

    assert_eq!(config.uploads_path(), temp_dir.path().join("uploads"));
    assert_eq!(config.artifacts_path(), temp_dir.path().join("artifacts"));
    assert_eq!(config.database_path(), temp_dir.path().join("cache.db"));

    config.storage.uploads_dir = Some(PathBuf::from("incoming"));
    assert_eq!(config.uploads_path(), temp_dir.path().join("incoming"));

    let absolute = temp_dir.path().join("elsewhere");
    config.storage.artifacts_dir = Some(absolute.clone());
    assert_eq!(config.artifacts_path(), absolute);
}

#[test]
fn load_missing_file_returns_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::load(temp_dir.path()).expect("should load defaults");

    assert_eq!(config.get_base_dir(), temp_dir.path());
    assert_eq!(config.ingestion, IngestionConfig::default());
}

#[test]
fn save_and_load_round_trip() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config::with_base_dir(temp_dir.path());
    config.ingestion.max_concurrency = 4;
    config.ollama.embedding_dimension = 384;

    config.save().expect("should save config");
    assert!(config.config_file_path().exists());

    let loaded = Config::load(temp_dir.path()).expect("should load saved config");
    assert_eq!(loaded, config);
}

#[test]
fn load_rejects_invalid_values() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[ingestion]\nmax_concurrency = 0\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}
