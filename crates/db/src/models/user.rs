use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum UserError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("User not found")]
    NotFound,
    #[error("Username already taken")]
    AlreadyExists,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, TS)]
pub struct CreateUser {
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize, TS)]
pub struct UpdateUser {
    pub display_name: Option<String>,
    pub email: Option<String>,
}

impl User {
    pub async fn create(
        pool: &SqlitePool,
        data: &CreateUser,
        user_id: Uuid,
    ) -> Result<Self, UserError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, display_name, email)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(&data.username)
        .bind(&data.display_name)
        .bind(&data.email)
        .fetch_one(pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => UserError::AlreadyExists,
            other => UserError::Database(other),
        })?;

        Ok(user)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, UserError> {
        let user = sqlx::query_as::<_, User>(r#"SELECT * FROM users WHERE id = ?1"#)
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(user)
    }

    pub async fn find_all(pool: &SqlitePool) -> Result<Vec<Self>, UserError> {
        let users = sqlx::query_as::<_, User>(r#"SELECT * FROM users ORDER BY username ASC"#)
            .fetch_all(pool)
            .await?;

        Ok(users)
    }

    pub async fn update(
        pool: &SqlitePool,
        id: Uuid,
        data: &UpdateUser,
    ) -> Result<Self, UserError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET display_name = COALESCE(?2, display_name),
                email = COALESCE(?3, email),
                updated_at = datetime('now','subsec')
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&data.display_name)
        .bind(&data.email)
        .fetch_optional(pool)
        .await?
        .ok_or(UserError::NotFound)?;

        Ok(user)
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, UserError> {
        let result = sqlx::query(r#"DELETE FROM users WHERE id = ?1"#)
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected())
    }
}
