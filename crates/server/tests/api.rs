use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use deployment::Deployment;
use serde_json::{Value, json};
use server::{DeploymentImpl, routes};
use tower::ServiceExt;
use uuid::Uuid;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    serde_json::from_slice(&bytes).expect("response was not JSON")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, payload: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_api_surface() {
    let assets = tempfile::tempdir().unwrap();
    unsafe {
        std::env::set_var("SPECFORGE_ASSET_DIR", assets.path());
    }

    let deployment = DeploymentImpl::new().await.unwrap();
    let router = routes::router(deployment);

    // Health probe.
    let response = router.clone().oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Unknown project id is a structured 404.
    let missing = Uuid::new_v4();
    let response = router
        .clone()
        .oneshot(get(&format!("/api/projects/{missing}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["success"], json!(false));

    // Starting orchestration for a missing project is also a 404.
    let response = router
        .clone()
        .oneshot(post(&format!("/api/projects/{missing}/start"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Validation failures are 400s.
    let response = router
        .clone()
        .oneshot(post(
            "/api/projects",
            json!({"owner_id": null, "name": "", "request": "whatever"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Create a project and start its pipeline.
    let response = router
        .clone()
        .oneshot(post(
            "/api/projects",
            json!({
                "owner_id": null,
                "name": "storefront",
                "request": "Build an online storefront with a product catalog"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], json!(true));
    let project_id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["status"], json!("pending"));

    let response = router
        .clone()
        .oneshot(post(&format!("/api/projects/{project_id}/start"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["status"], json!("in_progress"));
    assert_eq!(body["data"]["project_id"], json!(project_id));

    // The first stage task exists from the moment its agent was enqueued.
    let response = router
        .clone()
        .oneshot(get(&format!("/api/projects/{project_id}/tasks")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let tasks = body["data"].as_array().unwrap();
    assert!(!tasks.is_empty());
    assert_eq!(tasks[0]["agent_name"], json!("ProductManagerAgent"));

    // Artifact history endpoint answers (possibly empty this early).
    let response = router
        .clone()
        .oneshot(get(&format!("/api/projects/{project_id}/artifacts")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
