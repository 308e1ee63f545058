use serde::{Deserialize, Serialize};

use super::{OutputLine, ProjectStatus};

/// Notifications the core publishes for presentation layers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LauncherEvent {
    StatusChanged {
        project_id: String,
        from: ProjectStatus,
        to: ProjectStatus,
    },
    Output {
        project_id: String,
        line: OutputLine,
    },
    ExternalUrlChanged {
        project_id: String,
        url: Option<String>,
    },
    ProjectRemoved {
        project_id: String,
    },
}

impl LauncherEvent {
    pub fn project_id(&self) -> &str {
        match self {
            LauncherEvent::StatusChanged { project_id, .. }
            | LauncherEvent::Output { project_id, .. }
            | LauncherEvent::ExternalUrlChanged { project_id, .. }
            | LauncherEvent::ProjectRemoved { project_id } => project_id,
        }
    }
}
