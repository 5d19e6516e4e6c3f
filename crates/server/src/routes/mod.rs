use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;

use crate::DeploymentImpl;

pub mod artifacts;
pub mod health;
pub mod notifications;
pub mod orchestrations;
pub mod projects;
pub mod tasks;
pub mod users;

pub fn router(deployment: DeploymentImpl) -> Router {
    let base_routes = Router::new()
        .route("/health", get(health::health_check))
        .merge(projects::router(&deployment))
        .merge(orchestrations::router(&deployment))
        .merge(tasks::router(&deployment))
        .merge(artifacts::router(&deployment))
        .merge(users::router(&deployment))
        .merge(notifications::router(&deployment))
        .with_state(deployment);

    Router::new()
        .nest("/api", base_routes)
        .layer(CorsLayer::permissive())
}
