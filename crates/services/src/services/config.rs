use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// What `start_project` does when the project is already in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Refuse the second start with a conflict error.
    Reject,
    /// Re-trigger the pipeline from the first stage.
    Restart,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(default)]
pub struct OrchestrationConfig {
    pub restart_policy: RestartPolicy,
    /// Pipeline worker loops pulling from the hand-off queue.
    pub worker_count: usize,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            restart_policy: RestartPolicy::Reject,
            worker_count: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(default)]
pub struct GenerationConfig {
    pub endpoint: String,
    pub model: String,
    /// Upper bound on one generation call; on expiry the stage fails and the
    /// hand-off is redelivered by the queue.
    pub timeout_secs: u64,
    /// Env var holding the API key for the generation endpoint.
    pub api_key_env: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 120,
            api_key_env: "SPECFORGE_GENERATION_API_KEY".to_string(),
        }
    }
}

impl GenerationConfig {
    pub fn credentials(&self) -> GenerationCredentials {
        GenerationCredentials::from_env(&self.api_key_env)
    }
}

/// Credentials resolved once at startup and injected into the generation
/// client, instead of a process-wide secret cache.
#[derive(Debug, Clone)]
pub struct GenerationCredentials {
    api_key: Option<String>,
}

impl GenerationCredentials {
    pub fn from_env(var: &str) -> Self {
        let api_key = std::env::var(var).ok().filter(|v| !v.is_empty());
        if api_key.is_none() {
            tracing::warn!(
                "generation credentials missing - {} not set, generation calls will fail",
                var
            );
        }
        Self { api_key }
    }

    pub fn from_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(default)]
pub struct QueueConfig {
    /// Window inside which an identical (project, agent) hand-off is
    /// suppressed as a duplicate.
    pub dedup_window_secs: i64,
    /// How long a delivered message may stay unacked before it is redelivered.
    pub visibility_timeout_secs: u64,
    /// Delivery attempts before a message dead-letters.
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 10,
            visibility_timeout_secs: 300,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(default)]
pub struct Config {
    pub orchestration: OrchestrationConfig,
    pub generation: GenerationConfig,
    pub queue: QueueConfig,
}

/// Lossy load: a missing or unreadable config file yields the defaults.
pub async fn load_config_from_file(path: &Path) -> Config {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    "failed to parse config at {}: {}, using defaults",
                    path.display(),
                    e
                );
                Config::default()
            }
        },
        Err(_) => Config::default(),
    }
}

pub async fn save_config_to_file(config: &Config, path: &Path) -> Result<(), ConfigError> {
    let contents = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, contents).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from_file(&dir.path().join("config.json")).await;
        assert_eq!(config.orchestration.restart_policy, RestartPolicy::Reject);
        assert_eq!(config.queue.max_attempts, 3);
    }

    #[tokio::test]
    async fn test_save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.orchestration.restart_policy = RestartPolicy::Restart;
        config.queue.max_attempts = 5;
        save_config_to_file(&config, &path).await.unwrap();

        let reloaded = load_config_from_file(&path).await;
        assert_eq!(reloaded.orchestration.restart_policy, RestartPolicy::Restart);
        assert_eq!(reloaded.queue.max_attempts, 5);
    }

    #[tokio::test]
    async fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, r#"{"queue": {"max_attempts": 7}}"#)
            .await
            .unwrap();

        let config = load_config_from_file(&path).await;
        assert_eq!(config.queue.max_attempts, 7);
        assert_eq!(config.queue.dedup_window_secs, 10);
    }
}
