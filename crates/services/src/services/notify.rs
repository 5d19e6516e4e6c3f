use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use ts_rs::TS;
use uuid::Uuid;

/// Event pushed to clients watching a project.
#[derive(Debug, Clone, Serialize, TS)]
pub struct ProjectNotification {
    #[serde(rename = "type")]
    pub kind: String,
    pub project_id: Uuid,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl ProjectNotification {
    pub fn new(kind: impl Into<String>, project_id: Uuid, data: Value) -> Self {
        Self {
            kind: kind.into(),
            project_id,
            data,
            timestamp: Utc::now(),
        }
    }
}

struct Connection {
    id: Uuid,
    tx: mpsc::UnboundedSender<ProjectNotification>,
}

/// Registry of live client connections per project. Delivery is best-effort
/// and independent per connection: a connection whose receiver is gone is
/// pruned on its first failed send, and `publish` never fails.
pub struct NotificationHub {
    connections: DashMap<Uuid, Vec<Connection>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub fn subscribe(
        &self,
        project_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<ProjectNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4();
        self.connections
            .entry(project_id)
            .or_default()
            .push(Connection {
                id: connection_id,
                tx,
            });
        (connection_id, rx)
    }

    pub fn unsubscribe(&self, project_id: Uuid, connection_id: Uuid) {
        let mut empty = false;
        if let Some(mut connections) = self.connections.get_mut(&project_id) {
            connections.retain(|c| c.id != connection_id);
            empty = connections.is_empty();
        }
        if empty {
            self.connections
                .remove_if(&project_id, |_, connections| connections.is_empty());
        }
    }

    /// Returns the number of connections the event reached.
    pub fn publish(&self, notification: ProjectNotification) -> usize {
        let mut delivered = 0;
        let mut empty = false;
        if let Some(mut connections) = self.connections.get_mut(&notification.project_id) {
            connections.retain(|connection| {
                match connection.tx.send(notification.clone()) {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(_) => {
                        tracing::debug!(
                            project_id = %notification.project_id,
                            connection_id = %connection.id,
                            "pruning stale notification connection"
                        );
                        false
                    }
                }
            });
            empty = connections.is_empty();
        }
        if empty {
            self.connections
                .remove_if(&notification.project_id, |_, connections| {
                    connections.is_empty()
                });
        }
        delivered
    }

    pub fn connection_count(&self, project_id: Uuid) -> usize {
        self.connections.get(&project_id).map_or(0, |c| c.len())
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_gone_connection_is_pruned_without_disturbing_others() {
        let hub = NotificationHub::new();
        let project_id = Uuid::new_v4();

        let (_gone_id, gone_rx) = hub.subscribe(project_id);
        let (_live_id, mut live_rx) = hub.subscribe(project_id);
        assert_eq!(hub.connection_count(project_id), 2);

        // Peer goes away.
        drop(gone_rx);

        let delivered = hub.publish(ProjectNotification::new(
            "project_status_changed",
            project_id,
            json!({"status": "in_progress"}),
        ));
        assert_eq!(delivered, 1);
        assert_eq!(hub.connection_count(project_id), 1);

        let received = live_rx.recv().await.unwrap();
        assert_eq!(received.kind, "project_status_changed");
        assert_eq!(received.project_id, project_id);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_a_no_op() {
        let hub = NotificationHub::new();
        let delivered = hub.publish(ProjectNotification::new(
            "artifact_created",
            Uuid::new_v4(),
            json!({}),
        ));
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_connection() {
        let hub = NotificationHub::new();
        let project_id = Uuid::new_v4();

        let (connection_id, _rx) = hub.subscribe(project_id);
        hub.unsubscribe(project_id, connection_id);
        assert_eq!(hub.connection_count(project_id), 0);
    }

    #[tokio::test]
    async fn test_events_only_reach_their_project() {
        let hub = NotificationHub::new();
        let watched = Uuid::new_v4();
        let other = Uuid::new_v4();

        let (_id, mut rx) = hub.subscribe(watched);
        hub.publish(ProjectNotification::new("task_updated", other, json!({})));

        assert!(rx.try_recv().is_err());
    }
}
