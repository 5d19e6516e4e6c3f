use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::config::{GenerationConfig, GenerationCredentials};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation credentials missing ({0} not set)")]
    MissingCredentials(String),
    #[error("Generation request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Generation endpoint returned {status}: {body}")]
    Endpoint { status: u16, body: String },
    #[error("Malformed generation response: {0}")]
    Malformed(String),
}

/// Input to one generation call: the stage's role, what it should produce,
/// and the requirements object derived from its predecessor artifact.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub agent_name: String,
    pub objective: String,
    pub requirements: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedSpec {
    /// Domain-specific specification object produced by the model.
    pub content: Value,
    pub model: Option<String>,
}

/// Seam to the hosted completion service. The pipeline only ever sees this
/// trait, so tests substitute a deterministic implementation.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedSpec, GenerationError>;
}

pub struct HttpGenerationService {
    client: Client,
    endpoint: String,
    model: String,
    api_key_env: String,
    credentials: GenerationCredentials,
}

impl HttpGenerationService {
    pub fn new(config: &GenerationConfig, credentials: GenerationCredentials) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("failed to build generation http client");

        if credentials.api_key().is_some() {
            tracing::info!("generation provider initialized for {}", config.endpoint);
        }

        Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key_env: config.api_key_env.clone(),
            credentials,
        }
    }
}

#[async_trait]
impl GenerationService for HttpGenerationService {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedSpec, GenerationError> {
        let api_key = self
            .credentials
            .api_key()
            .ok_or_else(|| GenerationError::MissingCredentials(self.api_key_env.clone()))?;

        let payload = serde_json::json!({
            "model": self.model,
            "agent": request.agent_name,
            "objective": request.objective,
            "requirements": request.requirements,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Endpoint {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await?;
        let content = body
            .get("specification")
            .cloned()
            .unwrap_or_else(|| body.clone());
        if !content.is_object() {
            return Err(GenerationError::Malformed(
                "expected a specification object".to_string(),
            ));
        }

        let model = body
            .get("model")
            .and_then(|m| m.as_str())
            .map(str::to_string);

        Ok(GeneratedSpec { content, model })
    }
}
