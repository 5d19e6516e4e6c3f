use std::{sync::Arc, time::Duration};

use db::{
    DBService,
    models::{
        artifact::Artifact,
        project::{Project, ProjectStatus},
        task::{CreateTask, Task, TaskStatus, UpdateTask},
    },
};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    stage::{self, AgentKind},
    unit::{AgentInvocation, AgentUnit},
};
use services::services::{
    events::EventService,
    generation::GenerationService,
    queue::{Delivery, HandoffMessage, HandoffQueue, NackOutcome},
};

/// Consumes hand-off messages and drives agent units through the pipeline:
/// stage bookkeeping, artifact events, succession, and terminal handling.
pub struct PipelineRunner {
    db: DBService,
    queue: Arc<HandoffQueue>,
    generation: Arc<dyn GenerationService>,
    events: EventService,
}

impl PipelineRunner {
    pub fn new(
        db: DBService,
        queue: Arc<HandoffQueue>,
        generation: Arc<dyn GenerationService>,
        events: EventService,
    ) -> Self {
        Self {
            db,
            queue,
            generation,
            events,
        }
    }

    /// Worker loops are independent consumers; per-project serialization is
    /// the queue's job, not theirs.
    pub fn spawn_workers(self: &Arc<Self>, count: usize) -> Vec<JoinHandle<()>> {
        (0..count.max(1))
            .map(|worker| {
                let runner = self.clone();
                tokio::spawn(async move {
                    loop {
                        let delivery = runner.queue.recv().await;
                        runner.process(worker, delivery).await;
                    }
                })
            })
            .collect()
    }

    /// Periodically redelivers messages whose visibility timeout expired and
    /// terminally fails projects whose hand-offs dead-lettered there.
    pub fn spawn_redelivery_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let runner = self.clone();
        let period = Duration::from_secs(
            (self.queue.config().visibility_timeout_secs / 2).max(1),
        );
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                for outcome in runner.queue.release_expired() {
                    if let NackOutcome::DeadLettered(message) = outcome {
                        runner.fail_pipeline(&message).await;
                    }
                }
            }
        })
    }

    async fn process(&self, worker: usize, delivery: Delivery) {
        let message = delivery.message.clone();

        let Some(agent) = AgentKind::parse(&message.agent_name) else {
            tracing::warn!(
                agent = %message.agent_name,
                "discarding hand-off for unknown agent"
            );
            self.queue.ack(delivery.receipt);
            return;
        };

        let pool = &self.db.pool;
        let project = match Project::find_by_id(pool, message.project_id).await {
            Ok(Some(project)) => project,
            Ok(None) => {
                tracing::warn!(
                    project_id = %message.project_id,
                    "discarding hand-off for deleted project"
                );
                self.queue.ack(delivery.receipt);
                return;
            }
            Err(e) => {
                tracing::error!("failed to load project for hand-off: {}", e);
                self.handle_nack(delivery.receipt, &message).await;
                return;
            }
        };

        tracing::info!(
            worker,
            project_id = %project.id,
            agent = %agent,
            attempt = delivery.attempt,
            "processing hand-off"
        );

        let task = match self.stage_task(&project, agent).await {
            Ok(task) => task,
            Err(e) => {
                tracing::error!("failed to prepare stage task: {}", e);
                self.handle_nack(delivery.receipt, &message).await;
                return;
            }
        };

        let previous_artifacts = match Artifact::find_by_project_id(pool, project.id).await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                tracing::error!("failed to load artifact history: {}", e);
                self.handle_nack(delivery.receipt, &message).await;
                return;
            }
        };

        let unit = AgentUnit::new(agent, self.generation.clone());
        let outcome = unit
            .run(
                pool,
                AgentInvocation {
                    project: project.clone(),
                    previous_artifacts,
                },
            )
            .await;

        if outcome.success {
            match self.complete_stage(&project, agent, &task, &outcome.artifacts).await {
                Ok(()) => self.queue.ack(delivery.receipt),
                Err(e) => {
                    // The stage itself is idempotent, so redelivery retries
                    // the bookkeeping safely.
                    tracing::error!("stage bookkeeping failed, releasing hand-off: {}", e);
                    self.handle_nack(delivery.receipt, &message).await;
                }
            }
        } else {
            tracing::warn!(
                project_id = %project.id,
                agent = %agent,
                attempt = delivery.attempt,
                "stage failed: {}",
                outcome.error_message.as_deref().unwrap_or("unknown error")
            );
            if let Err(e) = self.reset_stage_task(&task).await {
                tracing::error!("failed to reset stage task: {}", e);
            }
            self.handle_nack(delivery.receipt, &message).await;
        }
    }

    /// The stage task is created when the agent is enqueued; recreate it if a
    /// redelivery arrives after a restart lost it.
    async fn stage_task(&self, project: &Project, agent: AgentKind) -> anyhow::Result<Task> {
        let pool = &self.db.pool;
        let existing =
            Task::find_by_project_and_agent(pool, project.id, agent.agent_name()).await?;
        let task = match existing {
            Some(task) => task,
            None => {
                Task::create(
                    pool,
                    &CreateTask {
                        project_id: project.id,
                        agent_name: agent.agent_name().to_string(),
                        depends_on: None,
                    },
                    Uuid::new_v4(),
                )
                .await?
            }
        };

        let task = Task::update(
            pool,
            task.id,
            &UpdateTask {
                status: Some(TaskStatus::InProgress),
                depends_on: None,
            },
        )
        .await?;
        self.events.task_updated(&task);
        Ok(task)
    }

    async fn complete_stage(
        &self,
        project: &Project,
        agent: AgentKind,
        task: &Task,
        artifacts: &[Artifact],
    ) -> anyhow::Result<()> {
        let pool = &self.db.pool;

        for artifact in artifacts {
            self.events.artifact_created(artifact);
        }

        let task = Task::update(
            pool,
            task.id,
            &UpdateTask {
                status: Some(TaskStatus::Done),
                depends_on: None,
            },
        )
        .await?;
        self.events.task_updated(&task);

        match stage::next_agent(agent) {
            Some(next) => {
                // Successor task first, then its hand-off. A redelivered
                // completion reuses the stage task it already created.
                let existing =
                    Task::find_by_project_and_agent(pool, project.id, next.agent_name()).await?;
                let next_task = match existing {
                    Some(task) => task,
                    None => {
                        Task::create(
                            pool,
                            &CreateTask {
                                project_id: project.id,
                                agent_name: next.agent_name().to_string(),
                                depends_on: Some(vec![task.id]),
                            },
                            Uuid::new_v4(),
                        )
                        .await?
                    }
                };
                self.events.task_updated(&next_task);

                self.queue.enqueue(HandoffMessage {
                    project_id: project.id,
                    agent_name: next.agent_name().to_string(),
                });
            }
            None => {
                // Terminal stage: the pipeline is done.
                Project::update_status(pool, project.id, ProjectStatus::Completed).await?;
                if let Some(completed) = Project::find_by_id(pool, project.id).await? {
                    self.events.project_status_changed(&completed);
                }
                tracing::info!(project_id = %project.id, "pipeline completed");
            }
        }

        Ok(())
    }

    async fn reset_stage_task(&self, task: &Task) -> anyhow::Result<()> {
        let task = Task::update(
            &self.db.pool,
            task.id,
            &UpdateTask {
                status: Some(TaskStatus::Todo),
                depends_on: None,
            },
        )
        .await?;
        self.events.task_updated(&task);
        Ok(())
    }

    async fn handle_nack(&self, receipt: Uuid, message: &HandoffMessage) {
        match self.queue.nack(receipt) {
            Some(NackOutcome::Requeued { attempt }) => {
                tracing::warn!(
                    project_id = %message.project_id,
                    agent = %message.agent_name,
                    attempt,
                    "hand-off requeued for redelivery"
                );
            }
            Some(NackOutcome::DeadLettered(dead)) => {
                self.fail_pipeline(&dead).await;
            }
            None => {}
        }
    }

    /// Terminal failure: delivery attempts are exhausted, so the stage task
    /// and the project both fail.
    async fn fail_pipeline(&self, message: &HandoffMessage) {
        let pool = &self.db.pool;
        tracing::error!(
            project_id = %message.project_id,
            agent = %message.agent_name,
            "hand-off dead-lettered, failing project"
        );

        match Task::find_by_project_and_agent(pool, message.project_id, &message.agent_name).await
        {
            Ok(Some(task)) => {
                match Task::update(
                    pool,
                    task.id,
                    &UpdateTask {
                        status: Some(TaskStatus::Failed),
                        depends_on: None,
                    },
                )
                .await
                {
                    Ok(task) => self.events.task_updated(&task),
                    Err(e) => tracing::error!("failed to mark stage task failed: {}", e),
                }
            }
            Ok(None) => {}
            Err(e) => tracing::error!("failed to load stage task: {}", e),
        }

        if let Err(e) =
            Project::update_status(pool, message.project_id, ProjectStatus::Failed).await
        {
            tracing::error!("failed to mark project failed: {}", e);
            return;
        }
        if let Ok(Some(project)) = Project::find_by_id(pool, message.project_id).await {
            self.events.project_status_changed(&project);
        }
    }
}
