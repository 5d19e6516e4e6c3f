use agents::orchestrator::OrchestrationError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use db::models::{
    artifact::ArtifactError, project::ProjectError, task::TaskError, user::UserError,
};
use thiserror::Error;
use utils::response::ApiResponse;

/// Tagged error kinds for the API surface. Each maps onto a status code and a
/// stable code string; operational errors are expected request outcomes,
/// non-operational ones indicate a bug and are logged at the boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    User(#[from] UserError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Bad Request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Too Many Requests: {0}")]
    TooManyRequests(String),
    #[error("Internal Server Error: {0}")]
    InternalError(String),
    #[error("Service Unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<OrchestrationError> for ApiError {
    fn from(err: OrchestrationError) -> Self {
        match err {
            OrchestrationError::ProjectNotFound(id) => {
                ApiError::NotFound(format!("Project {} not found", id))
            }
            OrchestrationError::AlreadyRunning(id) => {
                ApiError::Conflict(format!("Project {} is already in progress", id))
            }
            OrchestrationError::Database(e) => ApiError::Database(e),
            OrchestrationError::Project(e) => ApiError::Project(e),
            OrchestrationError::Task(e) => ApiError::Task(e),
        }
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Project(ProjectError::NotFound) => StatusCode::NOT_FOUND,
            ApiError::Project(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Task(TaskError::NotFound) => StatusCode::NOT_FOUND,
            ApiError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Artifact(ArtifactError::NotFound) => StatusCode::NOT_FOUND,
            ApiError::Artifact(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::User(UserError::NotFound) => StatusCode::NOT_FOUND,
            ApiError::User(UserError::AlreadyExists) => StatusCode::CONFLICT,
            ApiError::User(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Stable tag for clients and logs.
    pub fn code(&self) -> &'static str {
        match self.status_code() {
            StatusCode::BAD_REQUEST => "validation_error",
            StatusCode::UNAUTHORIZED => "unauthorized",
            StatusCode::FORBIDDEN => "forbidden",
            StatusCode::NOT_FOUND => "not_found",
            StatusCode::CONFLICT => "conflict",
            StatusCode::TOO_MANY_REQUESTS => "rate_limited",
            StatusCode::SERVICE_UNAVAILABLE => "service_unavailable",
            _ => "internal_error",
        }
    }

    /// Operational errors are expected request outcomes; everything in the
    /// 500 class points at a defect.
    pub fn is_operational(&self) -> bool {
        self.status_code() != StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        if !self.is_operational() {
            tracing::error!("{}: {}", self.code(), self);
        }

        let response = ApiResponse::<()>::error(&self.to_string());
        (status_code, Json(response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn test_taxonomy_maps_to_status_codes() {
        assert_eq!(
            ApiError::BadRequest("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthorized("no".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Forbidden("no".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::NotFound("gone".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Conflict("busy".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::TooManyRequests("slow down".into()).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::InternalError("bug".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::ServiceUnavailable("later".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_orchestration_errors_convert() {
        let id = Uuid::new_v4();
        let not_found: ApiError = OrchestrationError::ProjectNotFound(id).into();
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);

        let running: ApiError = OrchestrationError::AlreadyRunning(id).into();
        assert_eq!(running.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_only_500_class_is_non_operational() {
        assert!(ApiError::NotFound("gone".into()).is_operational());
        assert!(ApiError::ServiceUnavailable("later".into()).is_operational());
        assert!(!ApiError::InternalError("bug".into()).is_operational());
        assert!(!ApiError::Database(sqlx::Error::RowNotFound).is_operational());
    }

    #[test]
    fn test_model_not_found_maps_to_404() {
        assert_eq!(
            ApiError::Project(ProjectError::NotFound).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ApiError::Project(ProjectError::NotFound).code(), "not_found");
        assert_eq!(
            ApiError::User(UserError::AlreadyExists).status_code(),
            StatusCode::CONFLICT
        );
    }
}
