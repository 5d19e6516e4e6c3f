use std::sync::Arc;

use db::{
    DBService,
    models::{
        project::{Project, ProjectError, ProjectStatus},
        task::{CreateTask, Task, TaskError},
    },
};
use thiserror::Error;
use uuid::Uuid;

use crate::stage;
use services::services::{
    config::RestartPolicy,
    events::EventService,
    queue::{HandoffMessage, HandoffQueue},
};

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error("Project not found: {0}")]
    ProjectNotFound(Uuid),
    #[error("Project {0} is already in progress")]
    AlreadyRunning(Uuid),
}

/// Entry point of the pipeline: flips the project to in-progress and enqueues
/// the hand-off for the first stage.
#[derive(Clone)]
pub struct Orchestrator {
    db: DBService,
    queue: Arc<HandoffQueue>,
    events: EventService,
    restart_policy: RestartPolicy,
}

impl Orchestrator {
    pub fn new(
        db: DBService,
        queue: Arc<HandoffQueue>,
        events: EventService,
        restart_policy: RestartPolicy,
    ) -> Self {
        Self {
            db,
            queue,
            events,
            restart_policy,
        }
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        self.restart_policy
    }

    pub async fn start_project(&self, project_id: Uuid) -> Result<Project, OrchestrationError> {
        let pool = &self.db.pool;

        let project = Project::find_by_id(pool, project_id)
            .await?
            .ok_or(OrchestrationError::ProjectNotFound(project_id))?;

        if project.status == ProjectStatus::InProgress
            && self.restart_policy == RestartPolicy::Reject
        {
            return Err(OrchestrationError::AlreadyRunning(project_id));
        }

        Project::update_status(pool, project_id, ProjectStatus::InProgress).await?;

        // The stage task exists from the moment its agent is enqueued.
        let stage = stage::first_stage();
        Task::create(
            pool,
            &CreateTask {
                project_id,
                agent_name: stage.agent.agent_name().to_string(),
                depends_on: None,
            },
            Uuid::new_v4(),
        )
        .await?;

        let enqueued = self.queue.enqueue(HandoffMessage {
            project_id,
            agent_name: stage.agent.agent_name().to_string(),
        });
        if !enqueued {
            tracing::debug!(
                project_id = %project_id,
                "start hand-off suppressed as duplicate"
            );
        } else {
            tracing::info!(
                project_id = %project_id,
                agent = %stage.agent,
                "orchestration started"
            );
        }

        let project = Project::find_by_id(pool, project_id)
            .await?
            .ok_or(OrchestrationError::ProjectNotFound(project_id))?;
        self.events.project_status_changed(&project);

        Ok(project)
    }
}

#[cfg(test)]
mod tests {
    use db::models::task::TaskStatus;
    use services::services::{config::QueueConfig, notify::NotificationHub};
    use tokio::time::{Duration, timeout};

    use super::*;
    use crate::test_utils::{create_test_project, setup_test_pool};

    fn orchestrator_with(
        pool: sqlx::SqlitePool,
        policy: RestartPolicy,
    ) -> (Orchestrator, Arc<HandoffQueue>) {
        let queue = Arc::new(HandoffQueue::new(QueueConfig::default()));
        let events = EventService::new(Arc::new(NotificationHub::new()));
        let orchestrator = Orchestrator::new(DBService { pool }, queue.clone(), events, policy);
        (orchestrator, queue)
    }

    #[tokio::test]
    async fn test_start_missing_project_enqueues_nothing() {
        let pool = setup_test_pool().await;
        let (orchestrator, queue) = orchestrator_with(pool, RestartPolicy::Reject);

        let missing = Uuid::new_v4();
        let result = orchestrator.start_project(missing).await;
        assert!(matches!(
            result,
            Err(OrchestrationError::ProjectNotFound(id)) if id == missing
        ));

        assert_eq!(queue.pending_count(missing), 0);
        assert_eq!(queue.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_start_enqueues_exactly_one_product_manager_handoff() {
        let pool = setup_test_pool().await;
        let project = create_test_project(&pool).await;
        let (orchestrator, queue) = orchestrator_with(pool.clone(), RestartPolicy::Reject);

        let started = orchestrator.start_project(project.id).await.unwrap();
        assert_eq!(started.status, ProjectStatus::InProgress);

        let delivery = timeout(Duration::from_secs(1), queue.recv())
            .await
            .expect("expected the first hand-off");
        assert_eq!(delivery.message.agent_name, "ProductManagerAgent");
        assert_eq!(queue.pending_count(project.id), 0);

        // Stage task created alongside the enqueue.
        let task = Task::find_by_project_and_agent(&pool, project.id, "ProductManagerAgent")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.status, TaskStatus::Todo);
    }

    #[tokio::test]
    async fn test_reject_policy_conflicts_on_running_project() {
        let pool = setup_test_pool().await;
        let project = create_test_project(&pool).await;
        let (orchestrator, _queue) = orchestrator_with(pool, RestartPolicy::Reject);

        orchestrator.start_project(project.id).await.unwrap();
        let second = orchestrator.start_project(project.id).await;
        assert!(matches!(
            second,
            Err(OrchestrationError::AlreadyRunning(id)) if id == project.id
        ));
    }

    #[tokio::test]
    async fn test_restart_policy_reenqueues_stage_one() {
        let pool = setup_test_pool().await;
        let project = create_test_project(&pool).await;

        let queue = Arc::new(HandoffQueue::new(QueueConfig {
            dedup_window_secs: 0,
            ..QueueConfig::default()
        }));
        let events = EventService::new(Arc::new(NotificationHub::new()));
        let orchestrator = Orchestrator::new(
            DBService { pool },
            queue.clone(),
            events,
            RestartPolicy::Restart,
        );

        orchestrator.start_project(project.id).await.unwrap();
        let first = timeout(Duration::from_secs(1), queue.recv()).await.unwrap();
        queue.ack(first.receipt);

        let restarted = orchestrator.start_project(project.id).await.unwrap();
        assert_eq!(restarted.status, ProjectStatus::InProgress);

        let second = timeout(Duration::from_secs(1), queue.recv()).await.unwrap();
        assert_eq!(second.message.agent_name, "ProductManagerAgent");
    }
}
