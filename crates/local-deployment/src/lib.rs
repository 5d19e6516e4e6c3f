use std::sync::Arc;

use agents::{orchestrator::Orchestrator, runner::PipelineRunner};
use async_trait::async_trait;
use db::DBService;
use deployment::{Deployment, DeploymentError};
use services::services::{
    config::{Config, load_config_from_file, save_config_to_file},
    events::EventService,
    generation::{GenerationService, HttpGenerationService},
    notify::NotificationHub,
    queue::HandoffQueue,
};
use tokio::sync::RwLock;
use utils::assets::config_path;

#[derive(Clone)]
pub struct LocalDeployment {
    config: Arc<RwLock<Config>>,
    db: DBService,
    queue: Arc<HandoffQueue>,
    generation: Arc<dyn GenerationService>,
    notifications: Arc<NotificationHub>,
    events: EventService,
    orchestrator: Orchestrator,
}

#[async_trait]
impl Deployment for LocalDeployment {
    async fn new() -> Result<Self, DeploymentError> {
        let raw_config = load_config_from_file(&config_path()).await;
        // Always save config so newly added fields land on disk.
        save_config_to_file(&raw_config, &config_path()).await?;

        let credentials = raw_config.generation.credentials();
        let generation: Arc<dyn GenerationService> = Arc::new(HttpGenerationService::new(
            &raw_config.generation,
            credentials,
        ));

        let db = DBService::new().await?;
        let queue = Arc::new(HandoffQueue::new(raw_config.queue.clone()));
        let notifications = Arc::new(NotificationHub::new());
        let events = EventService::new(notifications.clone());

        let orchestrator = Orchestrator::new(
            db.clone(),
            queue.clone(),
            events.clone(),
            raw_config.orchestration.restart_policy,
        );

        let runner = Arc::new(PipelineRunner::new(
            db.clone(),
            queue.clone(),
            generation.clone(),
            events.clone(),
        ));
        runner.spawn_workers(raw_config.orchestration.worker_count);
        runner.spawn_redelivery_sweeper();
        tracing::info!(
            workers = raw_config.orchestration.worker_count,
            "pipeline runner online"
        );

        let config = Arc::new(RwLock::new(raw_config));

        Ok(Self {
            config,
            db,
            queue,
            generation,
            notifications,
            events,
            orchestrator,
        })
    }

    fn config(&self) -> &Arc<RwLock<Config>> {
        &self.config
    }

    fn db(&self) -> &DBService {
        &self.db
    }

    fn queue(&self) -> &Arc<HandoffQueue> {
        &self.queue
    }

    fn generation(&self) -> &Arc<dyn GenerationService> {
        &self.generation
    }

    fn notifications(&self) -> &Arc<NotificationHub> {
        &self.notifications
    }

    fn events(&self) -> &EventService {
        &self.events
    }

    fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }
}
