use std::sync::Arc;

use db::models::{artifact::Artifact, project::Project, task::Task};
use serde_json::json;

use super::notify::{NotificationHub, ProjectNotification};

/// Turns store lifecycle changes into client notifications.
#[derive(Clone)]
pub struct EventService {
    hub: Arc<NotificationHub>,
}

impl EventService {
    pub fn new(hub: Arc<NotificationHub>) -> Self {
        Self { hub }
    }

    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    pub fn project_status_changed(&self, project: &Project) {
        self.hub.publish(ProjectNotification::new(
            "project_status_changed",
            project.id,
            json!({
                "name": project.name,
                "status": project.status,
            }),
        ));
    }

    pub fn task_updated(&self, task: &Task) {
        self.hub.publish(ProjectNotification::new(
            "task_updated",
            task.project_id,
            json!({
                "task_id": task.id,
                "agent_name": task.agent_name,
                "status": task.status,
            }),
        ));
    }

    pub fn artifact_created(&self, artifact: &Artifact) {
        self.hub.publish(ProjectNotification::new(
            "artifact_created",
            artifact.project_id,
            json!({
                "artifact_id": artifact.id,
                "artifact_type": artifact.artifact_type,
                "version": artifact.version,
                "title": artifact.title,
            }),
        ));
    }
}
