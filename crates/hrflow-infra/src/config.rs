//! Configuration loader and data-directory resolution.
//!
//! Reads `hrflow.toml` from the data directory (`~/.hrflow/` unless
//! `HRFLOW_DATA_DIR` is set) into [`EngineConfig`]. A missing or malformed
//! file falls back to defaults.

use std::path::{Path, PathBuf};

use hrflow_types::config::EngineConfig;

pub const CONFIG_FILE: &str = "hrflow.toml";
pub const DATABASE_FILE: &str = "hrflow.db";

/// Resolve the data directory: `HRFLOW_DATA_DIR`, else `~/.hrflow`.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("HRFLOW_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hrflow")
}

/// SQLite URL for the database inside `data_dir`.
pub fn database_url(data_dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", data_dir.join(DATABASE_FILE).display())
}

/// Load engine configuration from `{data_dir}/hrflow.toml`.
pub async fn load_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE} found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", config_path.display());
            EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).await;
        assert_eq!(config.max_commit_attempts, 5);
        assert_eq!(config.dispatch.max_attempts, 3);
        assert!(config.webhook_url.is_none());
    }

    #[tokio::test]
    async fn load_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join(CONFIG_FILE),
            r#"
max_commit_attempts = 8
webhook_url = "http://localhost:9000/hooks/hr"

[dispatch]
max_attempts = 6
base_backoff_ms = 50
"#,
        )
        .await
        .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config.max_commit_attempts, 8);
        assert_eq!(config.dispatch.max_attempts, 6);
        assert_eq!(config.dispatch.base_backoff_ms, 50);
        assert_eq!(config.dispatch.attempt_timeout_ms, 10_000);
        assert_eq!(config.event_bus_capacity, 1024);
        assert_eq!(config.webhook_url.as_deref(), Some("http://localhost:9000/hooks/hr"));
    }

    #[tokio::test]
    async fn load_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join(CONFIG_FILE), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn database_url_points_into_data_dir() {
        let url = database_url(Path::new("/var/lib/hrflow"));
        assert_eq!(url, "sqlite:///var/lib/hrflow/hrflow.db?mode=rwc");
    }
}
