use std::sync::Arc;

use db::models::{
    artifact::{Artifact, ArtifactError, CreateArtifact},
    project::Project,
};
use serde_json::{Value, json};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::stage::{AgentKind, StageDescriptor, stage_for};
use services::services::generation::{GenerationError, GenerationRequest, GenerationService};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Input handed to a stage: the project record plus its full artifact
/// history, ordered by creation time.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub project: Project,
    pub previous_artifacts: Vec<Artifact>,
}

/// What a stage hands back. Failure is data, not a fault: an unsuccessful
/// outcome carries the error message and an empty artifact list.
#[derive(Debug)]
pub struct AgentOutcome {
    pub success: bool,
    pub artifacts: Vec<Artifact>,
    pub error_message: Option<String>,
}

/// Stateless execution of one pipeline stage: derive requirements from the
/// most recent predecessor artifact, call the generation service, persist the
/// stage outputs.
pub struct AgentUnit {
    stage: &'static StageDescriptor,
    generation: Arc<dyn GenerationService>,
}

impl AgentUnit {
    pub fn new(agent: AgentKind, generation: Arc<dyn GenerationService>) -> Self {
        Self {
            stage: stage_for(agent),
            generation,
        }
    }

    pub fn agent(&self) -> AgentKind {
        self.stage.agent
    }

    pub async fn run(&self, pool: &SqlitePool, invocation: AgentInvocation) -> AgentOutcome {
        match self.execute(pool, &invocation).await {
            Ok(artifacts) => AgentOutcome {
                success: true,
                artifacts,
                error_message: None,
            },
            Err(e) => {
                tracing::error!(
                    agent = %self.stage.agent,
                    project_id = %invocation.project.id,
                    "agent stage failed: {}",
                    e
                );
                AgentOutcome {
                    success: false,
                    artifacts: Vec::new(),
                    error_message: Some(e.to_string()),
                }
            }
        }
    }

    /// Requirements for the generation call. Missing upstream data is not an
    /// error: with no predecessor artifact the stage works from an empty
    /// requirements object.
    fn requirements(&self, invocation: &AgentInvocation) -> Value {
        match &self.stage.reads {
            Some(artifact_type) => invocation
                .previous_artifacts
                .iter()
                .rev()
                .find(|a| a.artifact_type == *artifact_type)
                .and_then(|a| a.metadata_json())
                .unwrap_or_else(|| json!({})),
            None => json!({ "request": invocation.project.request }),
        }
    }

    async fn execute(
        &self,
        pool: &SqlitePool,
        invocation: &AgentInvocation,
    ) -> Result<Vec<Artifact>, AgentError> {
        let requirements = self.requirements(invocation);

        // The generation call runs before any write, so its failure leaves
        // the store untouched.
        let spec = self
            .generation
            .generate(GenerationRequest {
                agent_name: self.stage.agent.agent_name().to_string(),
                objective: self.stage.objective.to_string(),
                requirements,
            })
            .await?;

        let project_id = invocation.project.id;
        let creates: Vec<CreateArtifact> = self
            .stage
            .writes
            .iter()
            .map(|output| CreateArtifact {
                project_id,
                artifact_type: output.artifact_type.clone(),
                title: output.title.to_string(),
                description: None,
                metadata: Some(spec.content.clone()),
                location: format!(
                    "projects/{}/artifacts/{}-v{}.json",
                    project_id, output.artifact_type, output.version
                ),
                version: output.version,
            })
            .collect();

        let artifacts = Artifact::create_many(pool, &creates).await?;
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use db::models::artifact::ArtifactType;
    use serde_json::json;

    use super::*;
    use crate::test_utils::{
        FailingGeneration, RecordingGeneration, create_test_project, setup_test_pool,
    };

    async fn invocation_for(pool: &SqlitePool, project: &Project) -> AgentInvocation {
        AgentInvocation {
            project: project.clone(),
            previous_artifacts: Artifact::find_by_project_id(pool, project.id).await.unwrap(),
        }
    }

    #[tokio::test]
    async fn test_product_manager_derives_requirements_from_request() {
        let pool = setup_test_pool().await;
        let project = create_test_project(&pool).await;
        let generation = Arc::new(RecordingGeneration::new());

        let unit = AgentUnit::new(AgentKind::ProductManager, generation.clone());
        let outcome = unit.run(&pool, invocation_for(&pool, &project).await).await;

        assert!(outcome.success);
        assert_eq!(outcome.artifacts.len(), 1);
        assert_eq!(
            outcome.artifacts[0].artifact_type,
            ArtifactType::SrsDocument
        );

        let seen = generation.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].requirements["request"], json!(project.request));
    }

    #[tokio::test]
    async fn test_stage_without_predecessor_uses_empty_requirements() {
        let pool = setup_test_pool().await;
        let project = create_test_project(&pool).await;
        let generation = Arc::new(RecordingGeneration::new());

        // Backend stage with no SRS in the history.
        let unit = AgentUnit::new(AgentKind::BackendEngineer, generation.clone());
        let outcome = unit.run(&pool, invocation_for(&pool, &project).await).await;

        assert!(outcome.success, "{:?}", outcome.error_message);
        let seen = generation.requests();
        assert_eq!(seen[0].requirements, json!({}));
    }

    #[tokio::test]
    async fn test_stage_reads_most_recent_artifact_of_its_type() {
        let pool = setup_test_pool().await;
        let project = create_test_project(&pool).await;
        let generation = Arc::new(RecordingGeneration::new());

        // Two source_code artifacts; the DevOps stage must see the latest.
        for (version, service) in [(1, "backend"), (2, "frontend")] {
            Artifact::create(
                &pool,
                &CreateArtifact {
                    project_id: project.id,
                    artifact_type: ArtifactType::SourceCode,
                    title: format!("{service} specification"),
                    description: None,
                    metadata: Some(json!({"service": service})),
                    location: format!("projects/{}/artifacts/source_code-v{version}.json", project.id),
                    version,
                },
            )
            .await
            .unwrap();
        }

        let unit = AgentUnit::new(AgentKind::DevopsEngineer, generation.clone());
        let outcome = unit.run(&pool, invocation_for(&pool, &project).await).await;

        assert!(outcome.success);
        let seen = generation.requests();
        assert_eq!(seen[0].requirements["service"], json!("frontend"));
    }

    #[tokio::test]
    async fn test_double_run_does_not_duplicate_artifacts() {
        let pool = setup_test_pool().await;
        let project = create_test_project(&pool).await;
        let generation = Arc::new(RecordingGeneration::new());

        let unit = AgentUnit::new(AgentKind::ProductManager, generation);
        let input = invocation_for(&pool, &project).await;

        let first = unit.run(&pool, input.clone()).await;
        let second = unit.run(&pool, input).await;

        assert!(first.success && second.success);
        assert_eq!(first.artifacts[0].id, second.artifacts[0].id);

        let history = Artifact::find_by_project_id(&pool, project.id).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_generation_failure_persists_nothing() {
        let pool = setup_test_pool().await;
        let project = create_test_project(&pool).await;

        let unit = AgentUnit::new(
            AgentKind::ProductManager,
            Arc::new(FailingGeneration::new("model overloaded")),
        );
        let outcome = unit.run(&pool, invocation_for(&pool, &project).await).await;

        assert!(!outcome.success);
        assert!(outcome.artifacts.is_empty());
        assert!(
            outcome
                .error_message
                .as_deref()
                .unwrap_or_default()
                .contains("model overloaded")
        );

        let history = Artifact::find_by_project_id(&pool, project.id).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_devops_stage_writes_both_outputs() {
        let pool = setup_test_pool().await;
        let project = create_test_project(&pool).await;

        let unit = AgentUnit::new(
            AgentKind::DevopsEngineer,
            Arc::new(RecordingGeneration::new()),
        );
        let outcome = unit.run(&pool, invocation_for(&pool, &project).await).await;

        assert!(outcome.success);
        let types: Vec<_> = outcome
            .artifacts
            .iter()
            .map(|a| a.artifact_type.clone())
            .collect();
        assert_eq!(
            types,
            vec![ArtifactType::DeploymentUrl, ArtifactType::TestReport]
        );
    }
}
