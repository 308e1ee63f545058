use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the launcher core.
///
/// Validation errors (`InvalidPath`, `InvalidCommand`, `PortInUse`,
/// `PortChangeWhileActive`) are raised before any process is spawned.
/// `Persistence` never reaches command callers; it only shows up in logs and
/// in [`crate::services::CatalogStore`] results.
#[derive(Debug, Error)]
pub enum LauncherError {
    #[error("execution directory does not exist: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("start command is empty for project {0}")]
    InvalidCommand(String),

    #[error("port {port} is already held by project {owner}")]
    PortInUse { port: u16, owner: String },

    #[error("process exited during startup ({status})")]
    FailedToStart { status: String, output: String },

    #[error("cannot move project {id} to port {port} while it is active")]
    PortChangeWhileActive { id: String, port: u16 },

    #[error("no process is tracked for project {0}")]
    ProcessNotFound(String),

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("path is already registered by project {owner}: {}", .path.display())]
    DuplicatePath { path: PathBuf, owner: String },

    #[error("failed to persist project catalog: {0}")]
    Persistence(String),

    #[error("cannot determine the home directory")]
    HomeDirUnavailable,

    #[error("unsupported catalog version {0}")]
    UnsupportedCatalogVersion(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LauncherError>;

impl LauncherError {
    /// Captured process output attached to a startup failure, if any.
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            LauncherError::FailedToStart { output, .. } => Some(output.as_str()),
            _ => None,
        }
    }
}
