// Configuration management module
// Loads the TOML settings file and validates every section before a run

pub mod settings;


pub use settings::{
    Config, ConfigError, IngestionConfig, OllamaConfig, StorageConfig, VectorStoreConfig,
};

/// Environment variable that overrides the default base directory
pub const BASE_DIR_ENV: &str = "CORPUS_INGEST_HOME";

/// Get the default base directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}

/// Render the effective configuration as TOML for display
#[inline]
pub fn show_config(config: &Config) -> anyhow::Result<String> {
    let rendered = toml::to_string_pretty(config)?;
    Ok(format!(
        "# Base directory: {}\n{}",
        config.get_base_dir().display(),
        rendered
    ))
}
