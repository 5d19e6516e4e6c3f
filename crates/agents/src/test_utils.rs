use std::{str::FromStr, sync::Mutex};

use async_trait::async_trait;
use db::models::project::{CreateProject, Project};
use serde_json::json;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use uuid::Uuid;

use services::services::generation::{
    GeneratedSpec, GenerationError, GenerationRequest, GenerationService,
};

pub(crate) async fn setup_test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("invalid sqlite config")
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("failed to open sqlite memory db");

    db::MIGRATOR
        .run(&pool)
        .await
        .expect("failed to run migrations");

    pool
}

pub(crate) async fn create_test_project(pool: &SqlitePool) -> Project {
    let project_id = Uuid::new_v4();
    let data = CreateProject {
        owner_id: None,
        name: format!("Test Project {}", project_id),
        request: "Build an inventory tracker with barcode scanning".to_string(),
    };

    Project::create(pool, &data, project_id)
        .await
        .expect("failed to create test project")
}

/// Deterministic generation stub that records every request it sees and
/// echoes the requirements back as the generated specification.
pub(crate) struct RecordingGeneration {
    requests: Mutex<Vec<GenerationRequest>>,
}

impl RecordingGeneration {
    pub(crate) fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationService for RecordingGeneration {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedSpec, GenerationError> {
        let content = json!({
            "agent": request.agent_name,
            "derived_from": request.requirements,
        });
        self.requests.lock().unwrap().push(request);
        Ok(GeneratedSpec {
            content,
            model: Some("stub".to_string()),
        })
    }
}

/// Generation stub that always fails, optionally only for one agent.
pub(crate) struct FailingGeneration {
    message: String,
    only_agent: Option<String>,
    fallback: RecordingGeneration,
}

impl FailingGeneration {
    pub(crate) fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            only_agent: None,
            fallback: RecordingGeneration::new(),
        }
    }

    pub(crate) fn for_agent(agent_name: &str, message: &str) -> Self {
        Self {
            message: message.to_string(),
            only_agent: Some(agent_name.to_string()),
            fallback: RecordingGeneration::new(),
        }
    }
}

#[async_trait]
impl GenerationService for FailingGeneration {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedSpec, GenerationError> {
        match &self.only_agent {
            Some(agent) if *agent != request.agent_name => {
                self.fallback.generate(request).await
            }
            _ => Err(GenerationError::Malformed(self.message.clone())),
        }
    }
}
