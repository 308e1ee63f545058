use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::status_reconciler::StatusReconciler;
use crate::utils::port_checker::is_port_listening;

/// Periodic sweep that moves crashed `running` projects to `stopped`.
pub struct LivenessProber {
    reconciler: Arc<StatusReconciler>,
    interval: Duration,
}

impl LivenessProber {
    pub fn new(reconciler: Arc<StatusReconciler>) -> Self {
        let interval = reconciler.supervisor().timings().probe_interval;
        Self {
            reconciler,
            interval,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run sweeps until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_ms = self.interval.as_millis() as u64, "liveness prober started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                }
            }
            info!("liveness prober stopped");
        })
    }

    /// One pass over every `running` project. Returns how many were moved
    /// to `stopped`.
    pub async fn sweep(&self) -> usize {
        let running = self.reconciler.registry().running().await;
        let mut reconciled = 0;
        for project in running {
            if self.reconciler.reconcile_liveness(&project.id).await {
                reconciled += 1;
                continue;
            }
            // Informational only: frameworks may bind a different port.
            let reachable = is_port_listening(project.port).await;
            debug!(project_id = %project.id, port = project.port, reachable, "liveness probe");
        }
        if reconciled > 0 {
            info!(reconciled, "liveness sweep stopped crashed servers");
        }
        reconciled
    }
}
