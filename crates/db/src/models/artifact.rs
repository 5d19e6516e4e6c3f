use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, SqliteConnection, SqlitePool, Type};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Artifact not found")]
    NotFound,
}

#[derive(Debug, Clone, Type, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[sqlx(type_name = "artifact_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    SrsDocument,
    SourceCode,
    DeploymentUrl,
    TestReport,
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactType::SrsDocument => write!(f, "srs_document"),
            ArtifactType::SourceCode => write!(f, "source_code"),
            ArtifactType::DeploymentUrl => write!(f, "deployment_url"),
            ArtifactType::TestReport => write!(f, "test_report"),
        }
    }
}

/// Work product of one pipeline stage. Artifacts are append-only: there is no
/// update or delete operation, and a unique index on
/// (project_id, artifact_type, version) makes creation idempotent.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Artifact {
    pub id: Uuid,
    pub project_id: Uuid,
    pub artifact_type: ArtifactType,
    pub title: String,
    pub description: Option<String>,
    #[sqlx(default)]
    pub metadata: Option<String>, // JSON string
    pub location: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct CreateArtifact {
    pub project_id: Uuid,
    pub artifact_type: ArtifactType,
    pub title: String,
    pub description: Option<String>,
    pub metadata: Option<Value>,
    pub location: String,
    pub version: i64,
}

impl Artifact {
    /// Idempotent create: a second insert for the same
    /// (project, type, version) returns the existing row unchanged.
    pub async fn create(pool: &SqlitePool, data: &CreateArtifact) -> Result<Self, ArtifactError> {
        let mut tx = pool.begin().await?;
        let artifact = Self::create_in_tx(&mut tx, data).await?;
        tx.commit().await?;

        Ok(artifact)
    }

    /// Create several artifacts as a single transaction, so a multi-output
    /// stage never leaves a partial write behind.
    pub async fn create_many(
        pool: &SqlitePool,
        items: &[CreateArtifact],
    ) -> Result<Vec<Self>, ArtifactError> {
        let mut tx = pool.begin().await?;
        let mut artifacts = Vec::with_capacity(items.len());
        for data in items {
            artifacts.push(Self::create_in_tx(&mut tx, data).await?);
        }
        tx.commit().await?;

        Ok(artifacts)
    }

    async fn create_in_tx(
        conn: &mut SqliteConnection,
        data: &CreateArtifact,
    ) -> Result<Self, ArtifactError> {
        let id = Uuid::new_v4();
        let artifact_type_str = data.artifact_type.to_string();
        let metadata_str = data.metadata.as_ref().map(|v| v.to_string());

        let inserted = sqlx::query_as::<_, Artifact>(
            r#"
            INSERT INTO artifacts (id, project_id, artifact_type, title, description, metadata, location, version)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(project_id, artifact_type, version) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(data.project_id)
        .bind(&artifact_type_str)
        .bind(&data.title)
        .bind(&data.description)
        .bind(metadata_str)
        .bind(&data.location)
        .bind(data.version)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(artifact) = inserted {
            return Ok(artifact);
        }

        // Redelivered hand-off: the artifact already exists.
        let existing = sqlx::query_as::<_, Artifact>(
            r#"
            SELECT * FROM artifacts
            WHERE project_id = ?1 AND artifact_type = ?2 AND version = ?3
            "#,
        )
        .bind(data.project_id)
        .bind(&artifact_type_str)
        .bind(data.version)
        .fetch_one(&mut *conn)
        .await?;

        Ok(existing)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, ArtifactError> {
        let artifact = sqlx::query_as::<_, Artifact>(r#"SELECT * FROM artifacts WHERE id = ?1"#)
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(artifact)
    }

    /// Full artifact history for a project, ordered by creation time, so a
    /// consumer can select the most recent artifact of the type it needs.
    pub async fn find_by_project_id(
        pool: &SqlitePool,
        project_id: Uuid,
    ) -> Result<Vec<Self>, ArtifactError> {
        let artifacts = sqlx::query_as::<_, Artifact>(
            r#"
            SELECT * FROM artifacts
            WHERE project_id = ?1
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(project_id)
        .fetch_all(pool)
        .await?;

        Ok(artifacts)
    }

    pub async fn find_latest_by_type(
        pool: &SqlitePool,
        project_id: Uuid,
        artifact_type: ArtifactType,
    ) -> Result<Option<Self>, ArtifactError> {
        let artifact_type_str = artifact_type.to_string();
        let artifact = sqlx::query_as::<_, Artifact>(
            r#"
            SELECT * FROM artifacts
            WHERE project_id = ?1 AND artifact_type = ?2
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(project_id)
        .bind(&artifact_type_str)
        .fetch_optional(pool)
        .await?;

        Ok(artifact)
    }

    /// Parse metadata as JSON Value
    pub fn metadata_json(&self) -> Option<Value> {
        self.metadata
            .as_ref()
            .and_then(|s| serde_json::from_str(s).ok())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::models::test_utils::{create_test_project, setup_test_pool};

    fn srs(project_id: Uuid) -> CreateArtifact {
        CreateArtifact {
            project_id,
            artifact_type: ArtifactType::SrsDocument,
            title: "Software requirements specification".to_string(),
            description: None,
            metadata: Some(json!({"features": ["catalog", "checkout"]})),
            location: format!("projects/{project_id}/artifacts/srs_document-v1.json"),
            version: 1,
        }
    }

    #[tokio::test]
    async fn test_create_is_idempotent_per_project_type_version() {
        let pool = setup_test_pool().await;
        let project_id = create_test_project(&pool).await;

        let first = Artifact::create(&pool, &srs(project_id)).await.unwrap();
        let second = Artifact::create(&pool, &srs(project_id)).await.unwrap();

        assert_eq!(first.id, second.id);
        let history = Artifact::find_by_project_id(&pool, project_id)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_history_is_append_only_and_stable() {
        let pool = setup_test_pool().await;
        let project_id = create_test_project(&pool).await;

        let created = Artifact::create(&pool, &srs(project_id)).await.unwrap();

        // A later write of the same tuple never mutates the stored record.
        let mut replay = srs(project_id);
        replay.metadata = Some(json!({"features": ["something else entirely"]}));
        replay.title = "Rewritten".to_string();
        Artifact::create(&pool, &replay).await.unwrap();

        let reread = Artifact::find_by_id(&pool, created.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reread.title, created.title);
        assert_eq!(reread.metadata, created.metadata);
        assert_eq!(reread.created_at, created.created_at);
    }

    #[tokio::test]
    async fn test_find_latest_by_type_is_last_matching() {
        let pool = setup_test_pool().await;
        let project_id = create_test_project(&pool).await;

        let backend = CreateArtifact {
            project_id,
            artifact_type: ArtifactType::SourceCode,
            title: "Backend service specification".to_string(),
            description: None,
            metadata: Some(json!({"service": "api"})),
            location: format!("projects/{project_id}/artifacts/source_code-v1.json"),
            version: 1,
        };
        let frontend = CreateArtifact {
            artifact_type: ArtifactType::SourceCode,
            title: "Frontend application specification".to_string(),
            metadata: Some(json!({"app": "web"})),
            location: format!("projects/{project_id}/artifacts/source_code-v2.json"),
            version: 2,
            ..backend.clone()
        };

        Artifact::create(&pool, &backend).await.unwrap();
        let expected = Artifact::create(&pool, &frontend).await.unwrap();

        let latest = Artifact::find_latest_by_type(&pool, project_id, ArtifactType::SourceCode)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, expected.id);
        assert_eq!(latest.version, 2);
    }

    #[tokio::test]
    async fn test_create_many_is_a_single_transaction() {
        let pool = setup_test_pool().await;
        let project_id = create_test_project(&pool).await;

        let items = vec![
            CreateArtifact {
                project_id,
                artifact_type: ArtifactType::DeploymentUrl,
                title: "Deployment endpoint".to_string(),
                description: None,
                metadata: Some(json!({"url": "https://app.example.dev"})),
                location: format!("projects/{project_id}/artifacts/deployment_url-v1.json"),
                version: 1,
            },
            CreateArtifact {
                project_id,
                artifact_type: ArtifactType::TestReport,
                title: "Verification report".to_string(),
                description: None,
                metadata: Some(json!({"passed": 12, "failed": 0})),
                location: format!("projects/{project_id}/artifacts/test_report-v1.json"),
                version: 1,
            },
        ];

        let artifacts = Artifact::create_many(&pool, &items).await.unwrap();
        assert_eq!(artifacts.len(), 2);

        let history = Artifact::find_by_project_id(&pool, project_id)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].artifact_type, ArtifactType::DeploymentUrl);
        assert_eq!(history[1].artifact_type, ArtifactType::TestReport);
    }
}
