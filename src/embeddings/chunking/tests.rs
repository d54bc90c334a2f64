use super::estimate_token_count as estimate_token_count_impl;
use super::*;

fn long_text() -> String {
    (0..60)
        .map(|i| format!("Sentence number {i} talks about quarterly revenue and staffing."))
        .collect::<Vec<_>>()
        .join(" ")
}

#[test]
fn estimate_token_count() {
    assert_eq!(estimate_token_count_impl("hello world"), 2);
    assert_eq!(estimate_token_count_impl("This is a test."), 5);
    assert_eq!(estimate_token_count_impl(""), 0);
}

#[test]
fn default_config_matches_ingestion_defaults() {
    let config = ChunkingConfig::default();
    assert_eq!(config.chunk_size, 1000);
    assert_eq!(config.chunk_overlap, 200);
    assert!(!config.concat_csv_rows);
}

#[test]
fn chunk_small_content() {
    let config = ChunkingConfig::default();

    let chunks = chunk_text("A short note about the release.", &config)
        .expect("chunk_text should succeed");

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].content, "A short note about the release.");
    assert_eq!(chunks[0].chunk_index, 0);
    assert!(chunks[0].token_count > 0);
}

#[test]
fn chunk_large_content_respects_size() {
    let text = long_text();
    let config = ChunkingConfig {
        chunk_size: 200,
        chunk_overlap: 0,
        ..ChunkingConfig::default()
    };

    let chunks = chunk_text(&text, &config).expect("chunk_text should succeed");

    assert!(chunks.len() > 1);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i);
        assert!(chunk.content.chars().count() <= 200);
    }
}

#[test]
fn overlap_produces_more_chunks() {
    let text = long_text();
    let without_overlap = ChunkingConfig {
        chunk_size: 200,
        chunk_overlap: 0,
        ..ChunkingConfig::default()
    };
    let with_overlap = ChunkingConfig {
        chunk_overlap: 100,
        ..without_overlap.clone()
    };

    let plain = chunk_text(&text, &without_overlap).expect("chunk_text should succeed");
    let overlapped = chunk_text(&text, &with_overlap).expect("chunk_text should succeed");

    assert!(overlapped.len() > plain.len());
}

#[test]
fn overlap_not_smaller_than_size_is_rejected() {
    let config = ChunkingConfig {
        chunk_size: 100,
        chunk_overlap: 100,
        ..ChunkingConfig::default()
    };

    assert!(chunk_text(&long_text(), &config).is_err());
}

#[test]
fn empty_content() {
    let config = ChunkingConfig::default();

    assert!(chunk_text("", &config).expect("should succeed").is_empty());
    assert!(
        chunk_text("  \n\t  ", &config)
            .expect("should succeed")
            .is_empty()
    );
}

#[test]
fn config_from_partial_toml() {
    let config: ChunkingConfig =
        toml::from_str("concat_csv_rows = true").expect("should parse toml");
    assert!(config.concat_csv_rows);
    assert_eq!(config.chunk_size, 1000);
}
