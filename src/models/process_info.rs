use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of a supervised process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessInfo {
    pub project_id: String,
    pub pid: u32,
    pub port: u16,
    pub command: String,
    pub started_at: DateTime<Utc>,
    /// Whether the assigned port accepted a connection after the grace period.
    pub listening: bool,
    /// Port announced in the process output, when it differs from `port`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_port: Option<u16>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One captured line of server output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputLine {
    pub timestamp: DateTime<Utc>,
    pub stream: OutputStream,
    pub text: String,
}

impl OutputLine {
    pub fn new(stream: OutputStream, text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream,
            text: text.into(),
        }
    }
}

/// How a supervised process ended when it was stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StopOutcome {
    /// Already exited before the stop request.
    Exited,
    /// Exited within the graceful termination window.
    Terminated,
    /// Force-killed after the window elapsed.
    Killed,
}
