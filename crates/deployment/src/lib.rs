use std::sync::Arc;

use agents::orchestrator::Orchestrator;
use anyhow::Error as AnyhowError;
use async_trait::async_trait;
use db::{
    DBService,
    models::project::{Project, ProjectError, ProjectStatus},
};
use services::services::{
    config::{Config, ConfigError},
    events::EventService,
    generation::GenerationService,
    notify::NotificationHub,
    queue::HandoffQueue,
};
use sqlx::Error as SqlxError;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sqlx(#[from] SqlxError),
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Other(#[from] AnyhowError),
}

#[async_trait]
pub trait Deployment: Clone + Send + Sync + 'static {
    async fn new() -> Result<Self, DeploymentError>;

    fn config(&self) -> &Arc<RwLock<Config>>;

    fn db(&self) -> &DBService;

    fn queue(&self) -> &Arc<HandoffQueue>;

    fn generation(&self) -> &Arc<dyn GenerationService>;

    fn notifications(&self) -> &Arc<NotificationHub>;

    fn events(&self) -> &EventService;

    fn orchestrator(&self) -> &Orchestrator;

    /// Projects left in progress by a previous process can never finish: the
    /// hand-off queue does not survive a restart. Mark them failed at boot.
    async fn recover_interrupted_projects(&self) -> Result<(), DeploymentError> {
        let pool = &self.db().pool;
        let stuck = Project::find_by_status(pool, ProjectStatus::InProgress).await?;
        for project in stuck {
            tracing::warn!(
                project_id = %project.id,
                "marking interrupted project as failed"
            );
            Project::update_status(pool, project.id, ProjectStatus::Failed).await?;
            if let Some(updated) = Project::find_by_id(pool, project.id).await? {
                self.events().project_status_changed(&updated);
            }
        }
        Ok(())
    }
}
