use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Task not found")]
    NotFound,
}

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
    Failed,
    PendingApproval,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Todo => write!(f, "todo"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::PendingApproval => write!(f, "pending_approval"),
        }
    }
}

/// One task per pipeline stage, created when the stage's agent is enqueued.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub agent_name: String,
    pub status: TaskStatus,
    #[sqlx(default)]
    pub depends_on: Option<String>, // JSON array of task ids
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, TS)]
pub struct CreateTask {
    pub project_id: Uuid,
    pub agent_name: String,
    pub depends_on: Option<Vec<Uuid>>,
}

#[derive(Debug, Deserialize, TS)]
pub struct UpdateTask {
    pub status: Option<TaskStatus>,
    pub depends_on: Option<Vec<Uuid>>,
}

impl Task {
    fn serialize_id_array(ids: &Option<Vec<Uuid>>) -> Option<String> {
        ids.as_ref()
            .map(|v| serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string()))
    }

    /// Ordered list of the task ids this task depends on.
    pub fn depends_on_ids(&self) -> Vec<Uuid> {
        self.depends_on
            .as_ref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default()
    }

    pub async fn create(
        pool: &SqlitePool,
        data: &CreateTask,
        task_id: Uuid,
    ) -> Result<Self, TaskError> {
        let status_str = TaskStatus::Todo.to_string();
        let depends_on_json = Self::serialize_id_array(&data.depends_on);

        let task = sqlx::query_as::<_, Task>(
            r#"
            INSERT INTO tasks (id, project_id, agent_name, status, depends_on)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING *
            "#,
        )
        .bind(task_id)
        .bind(data.project_id)
        .bind(&data.agent_name)
        .bind(status_str)
        .bind(depends_on_json)
        .fetch_one(pool)
        .await?;

        Ok(task)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, TaskError> {
        let task = sqlx::query_as::<_, Task>(r#"SELECT * FROM tasks WHERE id = ?1"#)
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(task)
    }

    pub async fn find_by_project_id(
        pool: &SqlitePool,
        project_id: Uuid,
    ) -> Result<Vec<Self>, TaskError> {
        let tasks = sqlx::query_as::<_, Task>(
            r#"
            SELECT * FROM tasks
            WHERE project_id = ?1
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(project_id)
        .fetch_all(pool)
        .await?;

        Ok(tasks)
    }

    /// The most recently created stage task for an agent. Redelivered
    /// hand-offs and pipeline restarts can leave several tasks per agent;
    /// the latest one is the live stage record.
    pub async fn find_by_project_and_agent(
        pool: &SqlitePool,
        project_id: Uuid,
        agent_name: &str,
    ) -> Result<Option<Self>, TaskError> {
        let task = sqlx::query_as::<_, Task>(
            r#"
            SELECT * FROM tasks
            WHERE project_id = ?1 AND agent_name = ?2
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(project_id)
        .bind(agent_name)
        .fetch_optional(pool)
        .await?;

        Ok(task)
    }

    pub async fn update(
        pool: &SqlitePool,
        id: Uuid,
        data: &UpdateTask,
    ) -> Result<Self, TaskError> {
        let status_str = data.status.map(|s| s.to_string());
        let depends_on_json = Self::serialize_id_array(&data.depends_on);

        let task = sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks
            SET status = COALESCE(?2, status),
                depends_on = COALESCE(?3, depends_on),
                updated_at = datetime('now','subsec')
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status_str)
        .bind(depends_on_json)
        .fetch_optional(pool)
        .await?
        .ok_or(TaskError::NotFound)?;

        Ok(task)
    }

    pub async fn update_status(
        pool: &SqlitePool,
        id: Uuid,
        status: TaskStatus,
    ) -> Result<(), TaskError> {
        let status_str = status.to_string();
        sqlx::query(
            r#"UPDATE tasks SET status = ?2, updated_at = datetime('now','subsec') WHERE id = ?1"#,
        )
        .bind(id)
        .bind(status_str)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, TaskError> {
        let result = sqlx::query(r#"DELETE FROM tasks WHERE id = ?1"#)
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected())
    }
}
