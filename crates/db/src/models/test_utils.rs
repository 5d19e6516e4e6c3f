use std::str::FromStr;

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use uuid::Uuid;

use super::project::{CreateProject, Project};
use crate::MIGRATOR;

pub(crate) async fn setup_test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("invalid sqlite config")
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("failed to open sqlite memory db");

    MIGRATOR.run(&pool).await.expect("failed to run migrations");

    pool
}

pub(crate) async fn create_test_project(pool: &SqlitePool) -> Uuid {
    let project_id = Uuid::new_v4();
    let data = CreateProject {
        owner_id: None,
        name: format!("Test Project {}", project_id),
        request: "Build a small web application".to_string(),
    };

    Project::create(pool, &data, project_id)
        .await
        .expect("failed to create test project");

    project_id
}
