use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Project not found")]
    NotFound,
}

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS)]
#[sqlx(type_name = "project_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ProjectStatus {
    /// Completed and failed projects never leave their state again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProjectStatus::Completed | ProjectStatus::Failed)
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectStatus::Pending => write!(f, "pending"),
            ProjectStatus::InProgress => write!(f, "in_progress"),
            ProjectStatus::Completed => write!(f, "completed"),
            ProjectStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Project {
    pub id: Uuid,
    pub owner_id: Option<Uuid>,
    pub name: String,
    /// The natural-language request the pipeline was started from.
    pub request: String,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, TS)]
pub struct CreateProject {
    pub owner_id: Option<Uuid>,
    pub name: String,
    pub request: String,
}

#[derive(Debug, Deserialize, TS)]
pub struct UpdateProject {
    pub name: Option<String>,
    pub request: Option<String>,
}

impl Project {
    pub async fn create(
        pool: &SqlitePool,
        data: &CreateProject,
        project_id: Uuid,
    ) -> Result<Self, ProjectError> {
        let status_str = ProjectStatus::Pending.to_string();

        let project = sqlx::query_as::<_, Project>(
            r#"
            INSERT INTO projects (id, owner_id, name, request, status)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING *
            "#,
        )
        .bind(project_id)
        .bind(data.owner_id)
        .bind(&data.name)
        .bind(&data.request)
        .bind(status_str)
        .fetch_one(pool)
        .await?;

        Ok(project)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, ProjectError> {
        let project = sqlx::query_as::<_, Project>(r#"SELECT * FROM projects WHERE id = ?1"#)
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(project)
    }

    pub async fn find_all(pool: &SqlitePool) -> Result<Vec<Self>, ProjectError> {
        let projects =
            sqlx::query_as::<_, Project>(r#"SELECT * FROM projects ORDER BY created_at DESC"#)
                .fetch_all(pool)
                .await?;

        Ok(projects)
    }

    pub async fn find_by_status(
        pool: &SqlitePool,
        status: ProjectStatus,
    ) -> Result<Vec<Self>, ProjectError> {
        let status_str = status.to_string();
        let projects = sqlx::query_as::<_, Project>(
            r#"SELECT * FROM projects WHERE status = ?1 ORDER BY created_at ASC"#,
        )
        .bind(status_str)
        .fetch_all(pool)
        .await?;

        Ok(projects)
    }

    pub async fn update(
        pool: &SqlitePool,
        id: Uuid,
        data: &UpdateProject,
    ) -> Result<Self, ProjectError> {
        let project = sqlx::query_as::<_, Project>(
            r#"
            UPDATE projects
            SET name = COALESCE(?2, name),
                request = COALESCE(?3, request),
                updated_at = datetime('now','subsec')
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&data.name)
        .bind(&data.request)
        .fetch_optional(pool)
        .await?
        .ok_or(ProjectError::NotFound)?;

        Ok(project)
    }

    /// Status is mutated only by the orchestrator (on start) and the pipeline
    /// runner (on stage completion or failure).
    pub async fn update_status(
        pool: &SqlitePool,
        id: Uuid,
        status: ProjectStatus,
    ) -> Result<(), ProjectError> {
        let status_str = status.to_string();
        sqlx::query(
            r#"UPDATE projects SET status = ?2, updated_at = datetime('now','subsec') WHERE id = ?1"#,
        )
        .bind(id)
        .bind(status_str)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, ProjectError> {
        let result = sqlx::query(r#"DELETE FROM projects WHERE id = ?1"#)
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn count(pool: &SqlitePool) -> Result<i64, ProjectError> {
        let count: (i64,) = sqlx::query_as(r#"SELECT COUNT(*) FROM projects"#)
            .fetch_one(pool)
            .await?;

        Ok(count.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_utils::setup_test_pool;

    #[tokio::test]
    async fn test_create_and_find_project() {
        let pool = setup_test_pool().await;
        let id = Uuid::new_v4();
        let data = CreateProject {
            owner_id: None,
            name: "storefront".to_string(),
            request: "Build me an online storefront with a product catalog".to_string(),
        };

        let created = Project::create(&pool, &data, id).await.unwrap();
        assert_eq!(created.status, ProjectStatus::Pending);

        let found = Project::find_by_id(&pool, id).await.unwrap().unwrap();
        assert_eq!(found.name, "storefront");
        assert_eq!(found.request, data.request);
    }

    #[tokio::test]
    async fn test_update_status_and_find_by_status() {
        let pool = setup_test_pool().await;
        let id = Uuid::new_v4();
        let data = CreateProject {
            owner_id: None,
            name: "blog".to_string(),
            request: "A personal blog".to_string(),
        };
        Project::create(&pool, &data, id).await.unwrap();

        Project::update_status(&pool, id, ProjectStatus::InProgress)
            .await
            .unwrap();

        let running = Project::find_by_status(&pool, ProjectStatus::InProgress)
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, id);

        let pending = Project::find_by_status(&pool, ProjectStatus::Pending)
            .await
            .unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_project_is_not_found() {
        let pool = setup_test_pool().await;
        let result = Project::update(
            &pool,
            Uuid::new_v4(),
            &UpdateProject {
                name: Some("renamed".to_string()),
                request: None,
            },
        )
        .await;

        assert!(matches!(result, Err(ProjectError::NotFound)));
    }

    #[test]
    fn test_terminal_states() {
        assert!(ProjectStatus::Completed.is_terminal());
        assert!(ProjectStatus::Failed.is_terminal());
        assert!(!ProjectStatus::Pending.is_terminal());
        assert!(!ProjectStatus::InProgress.is_terminal());
    }
}
