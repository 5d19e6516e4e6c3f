use agents::stage::AgentKind;
use axum::{
    Json, Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::{delete, get, post, put},
};
use db::models::{
    project::Project,
    task::{CreateTask, Task, UpdateTask},
};
use deployment::Deployment;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{DeploymentImpl, error::ApiError};

pub async fn create_task(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<CreateTask>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let pool = &deployment.db().pool;
    if Project::find_by_id(pool, payload.project_id).await?.is_none() {
        return Err(ApiError::NotFound(format!(
            "Project {} not found",
            payload.project_id
        )));
    }
    if AgentKind::parse(&payload.agent_name).is_none() {
        return Err(ApiError::BadRequest(format!(
            "Unknown agent: {}",
            payload.agent_name
        )));
    }

    let task = Task::create(pool, &payload, Uuid::new_v4()).await?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn get_task(
    Path(task_id): Path<Uuid>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let task = Task::find_by_id(&deployment.db().pool, task_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Task {} not found", task_id)))?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn update_task(
    Path(task_id): Path<Uuid>,
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<UpdateTask>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let task = Task::update(&deployment.db().pool, task_id, &payload).await?;
    deployment.events().task_updated(&task);
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn delete_task(
    Path(task_id): Path<Uuid>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let deleted = Task::delete(&deployment.db().pool, task_id).await?;
    if deleted == 0 {
        return Err(ApiError::NotFound(format!("Task {} not found", task_id)));
    }
    Ok(ResponseJson(ApiResponse::success(())))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new()
        .route("/tasks", post(create_task))
        .route("/tasks/{task_id}", get(get_task))
        .route("/tasks/{task_id}", put(update_task))
        .route("/tasks/{task_id}", delete(delete_task))
}
