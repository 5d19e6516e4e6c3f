use axum::{
    Json, Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::{delete, get, post, put},
};
use db::models::{
    artifact::Artifact,
    project::{CreateProject, Project, UpdateProject},
    task::Task,
    user::User,
};
use deployment::Deployment;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{DeploymentImpl, error::ApiError};

pub async fn get_projects(
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<Vec<Project>>>, ApiError> {
    let projects = Project::find_all(&deployment.db().pool).await?;
    Ok(ResponseJson(ApiResponse::success(projects)))
}

pub async fn create_project(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<CreateProject>,
) -> Result<ResponseJson<ApiResponse<Project>>, ApiError> {
    if payload.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Project name is required".to_string()));
    }
    if payload.request.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Project request text is required".to_string(),
        ));
    }
    if let Some(owner_id) = payload.owner_id {
        if User::find_by_id(&deployment.db().pool, owner_id)
            .await?
            .is_none()
        {
            return Err(ApiError::BadRequest(format!(
                "Owner {} does not exist",
                owner_id
            )));
        }
    }

    let project = Project::create(&deployment.db().pool, &payload, Uuid::new_v4()).await?;
    Ok(ResponseJson(ApiResponse::success(project)))
}

pub async fn get_project(
    Path(project_id): Path<Uuid>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<Project>>, ApiError> {
    let project = Project::find_by_id(&deployment.db().pool, project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Project {} not found", project_id)))?;
    Ok(ResponseJson(ApiResponse::success(project)))
}

pub async fn update_project(
    Path(project_id): Path<Uuid>,
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<UpdateProject>,
) -> Result<ResponseJson<ApiResponse<Project>>, ApiError> {
    let project = Project::update(&deployment.db().pool, project_id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(project)))
}

pub async fn delete_project(
    Path(project_id): Path<Uuid>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let deleted = Project::delete(&deployment.db().pool, project_id).await?;
    if deleted == 0 {
        return Err(ApiError::NotFound(format!(
            "Project {} not found",
            project_id
        )));
    }
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn get_project_tasks(
    Path(project_id): Path<Uuid>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<Vec<Task>>>, ApiError> {
    let pool = &deployment.db().pool;
    if Project::find_by_id(pool, project_id).await?.is_none() {
        return Err(ApiError::NotFound(format!(
            "Project {} not found",
            project_id
        )));
    }
    let tasks = Task::find_by_project_id(pool, project_id).await?;
    Ok(ResponseJson(ApiResponse::success(tasks)))
}

/// Full artifact history, ordered by creation time.
pub async fn get_project_artifacts(
    Path(project_id): Path<Uuid>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<Vec<Artifact>>>, ApiError> {
    let pool = &deployment.db().pool;
    if Project::find_by_id(pool, project_id).await?.is_none() {
        return Err(ApiError::NotFound(format!(
            "Project {} not found",
            project_id
        )));
    }
    let artifacts = Artifact::find_by_project_id(pool, project_id).await?;
    Ok(ResponseJson(ApiResponse::success(artifacts)))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new()
        .route("/projects", get(get_projects))
        .route("/projects", post(create_project))
        .route("/projects/{project_id}", get(get_project))
        .route("/projects/{project_id}", put(update_project))
        .route("/projects/{project_id}", delete(delete_project))
        .route("/projects/{project_id}/tasks", get(get_project_tasks))
        .route(
            "/projects/{project_id}/artifacts",
            get(get_project_artifacts),
        )
}
