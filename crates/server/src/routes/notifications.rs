use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
    routing::get,
};
use db::models::project::Project;
use deployment::Deployment;
use futures::{SinkExt, StreamExt};
use services::services::notify::NotificationHub;
use uuid::Uuid;

use crate::{DeploymentImpl, error::ApiError};

/// WebSocket endpoint streaming a project's state-change events.
pub async fn project_notifications_ws(
    ws: WebSocketUpgrade,
    Path(project_id): Path<Uuid>,
    State(deployment): State<DeploymentImpl>,
) -> Result<Response, ApiError> {
    if Project::find_by_id(&deployment.db().pool, project_id)
        .await?
        .is_none()
    {
        return Err(ApiError::NotFound(format!(
            "Project {} not found",
            project_id
        )));
    }

    let hub = deployment.notifications().clone();
    Ok(ws.on_upgrade(move |socket| handle_notifications_socket(socket, hub, project_id)))
}

async fn handle_notifications_socket(
    socket: WebSocket,
    hub: Arc<NotificationHub>,
    project_id: Uuid,
) {
    let (connection_id, mut notifications) = hub.subscribe(project_id);
    tracing::debug!(
        project_id = %project_id,
        connection_id = %connection_id,
        "notification client connected"
    );

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            notification = notifications.recv() => {
                let Some(notification) = notification else { break };
                let text = match serde_json::to_string(&notification) {
                    Ok(text) => text,
                    Err(_) => continue,
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!("notification socket error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    hub.unsubscribe(project_id, connection_id);
    tracing::debug!(
        project_id = %project_id,
        connection_id = %connection_id,
        "notification client disconnected"
    );
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().route(
        "/projects/{project_id}/notifications/ws",
        get(project_notifications_ws),
    )
}
