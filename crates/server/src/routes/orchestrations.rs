use axum::{
    Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::post,
};
use db::models::project::ProjectStatus;
use deployment::Deployment;
use serde::Serialize;
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{DeploymentImpl, error::ApiError};

#[derive(Debug, Serialize, TS)]
pub struct StartOrchestrationResponse {
    pub project_id: Uuid,
    pub status: ProjectStatus,
}

/// Kick off the pipeline for a project: flips it to in-progress and enqueues
/// the hand-off for the first stage.
pub async fn start_orchestration(
    Path(project_id): Path<Uuid>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<StartOrchestrationResponse>>, ApiError> {
    let project = deployment.orchestrator().start_project(project_id).await?;
    Ok(ResponseJson(ApiResponse::success(
        StartOrchestrationResponse {
            project_id: project.id,
            status: project.status,
        },
    )))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().route("/projects/{project_id}/start", post(start_orchestration))
}
