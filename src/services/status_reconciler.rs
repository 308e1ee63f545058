use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::external::{EventEmitter, ExternalIpResolver, PortForwarder};
use super::process_manager::ProcessSupervisor;
use super::project_registry::ProjectRegistry;
use crate::error::{LauncherError, Result};
use crate::models::{LauncherEvent, Project, ProjectStatus};

const EXTERNAL_URL_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a batch command, one entry per project.
pub type BatchOutcome = Vec<(String, Result<Project>)>;

/// Owns the legal status transitions of projects and their side effects.
///
/// Transitions for one project id run one at a time behind a per-id async
/// mutex; different ids never contend.
pub struct StatusReconciler {
    registry: Arc<ProjectRegistry>,
    supervisor: Arc<ProcessSupervisor>,
    emitter: Arc<dyn EventEmitter>,
    forwarder: Arc<dyn PortForwarder>,
    resolver: Arc<dyn ExternalIpResolver>,
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl StatusReconciler {
    pub fn new(
        registry: Arc<ProjectRegistry>,
        supervisor: Arc<ProcessSupervisor>,
        emitter: Arc<dyn EventEmitter>,
        forwarder: Arc<dyn PortForwarder>,
        resolver: Arc<dyn ExternalIpResolver>,
    ) -> Self {
        Self {
            registry,
            supervisor,
            emitter,
            forwarder,
            resolver,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ProjectRegistry> {
        &self.registry
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    fn drop_lock(&self, id: &str) {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id);
    }

    /// Start the project's server. A project already running with a live
    /// process is returned as is; a concurrent second start waits for the
    /// first and then takes that path.
    pub async fn start(&self, id: &str) -> Result<Project> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        self.start_locked(id).await
    }

    /// Stop the project's server. `ProcessNotFound` leaves the status alone.
    pub async fn stop(&self, id: &str) -> Result<Project> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        self.stop_locked(id).await
    }

    /// Stop (when a process is tracked), wait for the restart delay, start.
    /// Both halves run under the same per-id lock, so the old process is
    /// gone before the new one is spawned.
    pub async fn restart(&self, id: &str) -> Result<Project> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        if self.supervisor.is_tracked(id).await {
            self.stop_locked(id).await?;
            tokio::time::sleep(self.supervisor.timings().restart_delay).await;
        }
        self.start_locked(id).await
    }

    /// Stop the project if needed and remove it from the registry.
    pub async fn delete(&self, id: &str) -> Result<Project> {
        let lock = self.lock_for(id);
        let removed = {
            let _guard = lock.lock().await;

            if self.supervisor.is_tracked(id).await {
                if let Err(e) = self.stop_locked(id).await {
                    warn!(project_id = %id, error = %e, "stop before delete failed, removing anyway");
                }
            }
            let removed = self.registry.remove(id).await?;
            self.supervisor.clear_output(id);
            self.emitter.emit(LauncherEvent::ProjectRemoved {
                project_id: id.to_string(),
            });
            removed
        };
        self.drop_lock(id);
        Ok(removed)
    }

    /// Start every project flagged `auto_start` that is not already active.
    pub async fn start_all(self: &Arc<Self>) -> BatchOutcome {
        let ids = self
            .registry
            .list()
            .await
            .into_iter()
            .filter(|p| p.auto_start && !p.is_active())
            .map(|p| p.id)
            .collect();
        self.start_many(ids).await
    }

    /// Start the given projects in parallel.
    pub async fn start_many(self: &Arc<Self>, ids: Vec<String>) -> BatchOutcome {
        self.run_batch(ids, "start", |reconciler, id| async move {
            reconciler.start(&id).await
        })
        .await
    }

    /// Stop every project with a tracked process, in parallel.
    pub async fn stop_all(self: &Arc<Self>) -> BatchOutcome {
        let ids = self.supervisor.tracked_ids().await;
        self.run_batch(ids, "stop", |reconciler, id| async move {
            reconciler.stop(&id).await
        })
        .await
    }

    async fn run_batch<F, Fut>(self: &Arc<Self>, ids: Vec<String>, action: &'static str, op: F) -> BatchOutcome
    where
        F: Fn(Arc<Self>, String) -> Fut,
        Fut: std::future::Future<Output = Result<Project>> + Send + 'static,
    {
        let mut tasks = JoinSet::new();
        for id in ids {
            let fut = op(self.clone(), id.clone());
            tasks.spawn(async move { (id, fut.await) });
        }

        let mut outcome = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, result)) => {
                    if let Err(e) = &result {
                        warn!(project_id = %id, action, error = %e, "batch operation failed");
                    }
                    outcome.push((id, result));
                }
                Err(e) => error!(action, error = %e, "batch task panicked"),
            }
        }
        outcome
    }

    /// Move a `running` project whose process has disappeared to `stopped`.
    ///
    /// Skips the project when a transition holds its lock. Returns whether a
    /// change was made.
    pub async fn reconcile_liveness(&self, id: &str) -> bool {
        let lock = self.lock_for(id);
        let Ok(_guard) = lock.try_lock() else {
            debug!(project_id = %id, "transition in progress, skipping liveness check");
            return false;
        };

        let Some(project) = self.registry.get(id).await else {
            return false;
        };
        if project.status != ProjectStatus::Running {
            return false;
        }
        if self.supervisor.is_alive(id, project.pid).await {
            return false;
        }

        let forgotten = self.supervisor.forget(id).await;
        warn!(
            project_id = %id,
            pid = ?project.pid,
            tracked = forgotten.is_some(),
            "dev server exited on its own"
        );

        let had_url = project.external_url.is_some();
        match self
            .registry
            .modify(id, |p| {
                p.status = ProjectStatus::Stopped;
                p.pid = None;
                p.external_url = None;
                p.last_stopped = Some(Utc::now());
            })
            .await
        {
            Ok(stopped) => {
                self.emit_status(id, ProjectStatus::Running, ProjectStatus::Stopped);
                if had_url {
                    self.emit_url(id, None);
                }
                self.spawn_teardown(id, stopped.port);
                true
            }
            Err(e) => {
                debug!(project_id = %id, error = %e, "project vanished during liveness check");
                false
            }
        }
    }

    async fn start_locked(&self, id: &str) -> Result<Project> {
        let project = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| LauncherError::ProjectNotFound(id.to_string()))?;

        if project.status == ProjectStatus::Running && self.supervisor.is_alive(id, project.pid).await {
            debug!(project_id = %id, "already running");
            return Ok(project);
        }

        let (previous, project) = match self.registry.begin_start(id).await {
            Ok(started) => started,
            Err(e @ LauncherError::PortInUse { .. }) => {
                self.mark_failed(id, project.status, &e).await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        self.emit_status(id, previous, ProjectStatus::Starting);
        info!(project_id = %id, name = %project.name, port = project.port, "starting dev server");

        match self.supervisor.start(&project).await {
            Ok(process) => {
                let running = self
                    .registry
                    .modify(id, |p| {
                        p.status = ProjectStatus::Running;
                        p.pid = Some(process.pid);
                        p.last_started = Some(Utc::now());
                        p.last_error = None;
                        p.external_url = None;
                    })
                    .await?;
                self.emit_status(id, ProjectStatus::Starting, ProjectStatus::Running);
                info!(
                    project_id = %id,
                    pid = process.pid,
                    url = %running.local_url(),
                    listening = process.listening,
                    "dev server running"
                );
                self.spawn_running_side_effects(&running, process.pid);
                Ok(running)
            }
            Err(e) => {
                self.mark_failed(id, ProjectStatus::Starting, &e).await;
                Err(e)
            }
        }
    }

    async fn stop_locked(&self, id: &str) -> Result<Project> {
        let project = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| LauncherError::ProjectNotFound(id.to_string()))?;
        if !self.supervisor.is_tracked(id).await {
            return Err(LauncherError::ProcessNotFound(id.to_string()));
        }

        self.registry
            .modify(id, |p| p.status = ProjectStatus::Stopping)
            .await?;
        self.emit_status(id, project.status, ProjectStatus::Stopping);

        match self.supervisor.stop(id).await {
            Ok(outcome) => {
                let stopped = self
                    .registry
                    .modify(id, |p| {
                        p.status = ProjectStatus::Stopped;
                        p.pid = None;
                        p.external_url = None;
                        p.last_stopped = Some(Utc::now());
                    })
                    .await?;
                self.emit_status(id, ProjectStatus::Stopping, ProjectStatus::Stopped);
                if project.external_url.is_some() {
                    self.emit_url(id, None);
                }
                debug!(project_id = %id, outcome = ?outcome, "stop resolved");
                self.spawn_teardown(id, stopped.port);
                Ok(stopped)
            }
            Err(e) => {
                self.mark_failed(id, ProjectStatus::Stopping, &e).await;
                Err(e)
            }
        }
    }

    async fn mark_failed(&self, id: &str, from: ProjectStatus, err: &LauncherError) {
        let message = err.to_string();
        error!(project_id = %id, error = %message, "transition failed");
        let result = self
            .registry
            .modify(id, |p| {
                p.status = ProjectStatus::Error;
                p.pid = None;
                p.external_url = None;
                p.last_error = Some(message.clone());
            })
            .await;
        match result {
            Ok(_) => self.emit_status(id, from, ProjectStatus::Error),
            Err(e) => warn!(project_id = %id, error = %e, "could not record failure"),
        }
    }

    fn emit_status(&self, id: &str, from: ProjectStatus, to: ProjectStatus) {
        debug!(project_id = %id, from = %from, to = %to, "status changed");
        self.emitter.emit(LauncherEvent::StatusChanged {
            project_id: id.to_string(),
            from,
            to,
        });
    }

    fn emit_url(&self, id: &str, url: Option<String>) {
        self.emitter.emit(LauncherEvent::ExternalUrlChanged {
            project_id: id.to_string(),
            url,
        });
    }

    /// Port forwarding and external URL lookup. Neither blocks the
    /// transition; failures are logged.
    fn spawn_running_side_effects(&self, project: &Project, pid: u32) {
        let forwarder = self.forwarder.clone();
        let port = project.port;
        let id = project.id.clone();
        tokio::spawn(async move {
            if let Err(e) = forwarder.setup(port).await {
                warn!(project_id = %id, port, error = %e, "port forwarding setup failed");
            }
        });

        let resolver = self.resolver.clone();
        let registry = self.registry.clone();
        let emitter = self.emitter.clone();
        let id = project.id.clone();
        tokio::spawn(async move {
            let ip = match timeout(EXTERNAL_URL_TIMEOUT, resolver.resolve()).await {
                Ok(Some(ip)) => ip,
                Ok(None) => return,
                Err(_) => {
                    debug!(project_id = %id, "external address lookup timed out");
                    return;
                }
            };
            let url = format!("http://{}:{}", ip, port);

            // The project may have been stopped or restarted meanwhile.
            let mut applied = false;
            let result = registry
                .modify(&id, |p| {
                    if p.status == ProjectStatus::Running && p.pid == Some(pid) {
                        p.external_url = Some(url.clone());
                        applied = true;
                    }
                })
                .await;
            if result.is_ok() && applied {
                debug!(project_id = %id, url = %url, "external url resolved");
                emitter.emit(LauncherEvent::ExternalUrlChanged {
                    project_id: id,
                    url: Some(url),
                });
            }
        });
    }

    fn spawn_teardown(&self, id: &str, port: u16) {
        let forwarder = self.forwarder.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            if let Err(e) = forwarder.teardown(port).await {
                warn!(project_id = %id, port, error = %e, "port forwarding teardown failed");
            }
        });
    }
}
