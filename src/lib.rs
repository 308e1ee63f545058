//! Process lifecycle and state reconciliation for local development servers.
//!
//! [`state::AppState`] wires the services together: the
//! [`services::ProjectRegistry`] holds the catalog, the
//! [`services::ProcessSupervisor`] owns OS processes, the
//! [`services::StatusReconciler`] drives status transitions and the
//! [`services::LivenessProber`] heals state after crashes.

pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

pub use error::{LauncherError, Result};
pub use state::{AppState, Collaborators};
