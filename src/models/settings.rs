use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// User-editable launcher settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LauncherSettings {
    pub port_range_start: u16,
    pub port_range_end: u16,
    /// Also skip ports that some foreign process has bound.
    pub check_system_ports: bool,
    /// Lines of server output kept per project.
    pub output_buffer_lines: usize,
    pub persist_debounce_ms: u64,
    /// Catalog location; `projects.json` in the config directory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_path: Option<PathBuf>,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            port_range_start: 3000,
            port_range_end: 3300,
            check_system_ports: false,
            output_buffer_lines: 5000,
            persist_debounce_ms: 1000,
            catalog_path: None,
        }
    }
}
