use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Project;
use crate::error::{LauncherError, Result};

/// Catalog format version written by this crate.
pub const CATALOG_VERSION: u32 = 1;

/// The persisted project list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectCatalog {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub projects: Vec<Project>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredCatalog {
    Versioned(ProjectCatalog),
    // Early releases wrote the bare project array.
    Legacy(Vec<Project>),
}

/// Just enough of the envelope to read the version before decoding records,
/// whose schema may differ in newer formats.
#[derive(Deserialize)]
struct CatalogEnvelope {
    version: u32,
}

impl ProjectCatalog {
    pub fn new(projects: Vec<Project>) -> Self {
        Self {
            version: CATALOG_VERSION,
            saved_at: Utc::now(),
            projects,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Decode a stored catalog. Runtime state (status, pid, URL) is reset since
    /// no process outlives the launcher under supervision.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if let Ok(CatalogEnvelope { version }) = serde_json::from_slice::<CatalogEnvelope>(bytes) {
            if version > CATALOG_VERSION {
                return Err(LauncherError::UnsupportedCatalogVersion(version));
            }
        }

        let mut catalog = match serde_json::from_slice::<StoredCatalog>(bytes)? {
            StoredCatalog::Versioned(catalog) => catalog,
            StoredCatalog::Legacy(projects) => ProjectCatalog {
                version: 0,
                saved_at: Utc::now(),
                projects,
            },
        };

        for project in catalog.projects.iter_mut() {
            project.normalize_loaded();
        }
        catalog.version = CATALOG_VERSION;
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewProject, ProjectStatus, ProjectType};

    fn sample() -> Project {
        Project::new(NewProject::new("shop", "/srv/shop", ProjectType::NextJs), 3000)
    }

    #[test]
    fn running_state_is_not_restored() {
        let mut project = sample();
        project.status = ProjectStatus::Running;
        project.pid = Some(4242);
        let bytes = ProjectCatalog::new(vec![project.clone()]).to_bytes().unwrap();

        let loaded = ProjectCatalog::from_bytes(&bytes).unwrap();
        assert_eq!(loaded.projects.len(), 1);
        assert_eq!(loaded.projects[0].id, project.id);
        assert_eq!(loaded.projects[0].status, ProjectStatus::Stopped);
        assert_eq!(loaded.projects[0].pid, None);
    }

    #[test]
    fn legacy_array_is_accepted() {
        let bytes = serde_json::to_vec(&vec![sample()]).unwrap();
        let loaded = ProjectCatalog::from_bytes(&bytes).unwrap();
        assert_eq!(loaded.version, CATALOG_VERSION);
        assert_eq!(loaded.projects[0].name, "shop");
    }

    #[test]
    fn newer_version_is_rejected() {
        let mut catalog = ProjectCatalog::new(vec![]);
        catalog.version = CATALOG_VERSION + 1;
        let bytes = serde_json::to_vec(&catalog).unwrap();
        assert!(matches!(
            ProjectCatalog::from_bytes(&bytes),
            Err(LauncherError::UnsupportedCatalogVersion(v)) if v == CATALOG_VERSION + 1
        ));
    }

    #[test]
    fn newer_version_with_unknown_record_shape_is_rejected_by_version() {
        let json = br#"{"version":7,"projects":{"by_id":{"a":{"label":"api"}}}}"#;
        assert!(matches!(
            ProjectCatalog::from_bytes(json),
            Err(LauncherError::UnsupportedCatalogVersion(7))
        ));
    }

    #[test]
    fn minimal_project_record_uses_defaults() {
        let json = r#"{"version":1,"saved_at":"2024-01-01T00:00:00Z","projects":[
            {"id":"a","name":"api","path":"/srv/api","type":"fastapi","port":8000}
        ]}"#;
        let loaded = ProjectCatalog::from_bytes(json.as_bytes()).unwrap();
        let project = &loaded.projects[0];
        assert_eq!(project.project_type, ProjectType::FastApi);
        assert!(project.start_command.is_empty());
        assert!(project.auto_start);
        assert_eq!(project.status, ProjectStatus::Stopped);
    }
}
