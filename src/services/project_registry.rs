use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::catalog_store::CatalogStore;
use super::port_manager::PortAllocator;
use crate::error::{LauncherError, Result};
use crate::models::{NewProject, Project, ProjectCatalog, ProjectStatus};

pub const DEFAULT_PERSIST_DEBOUNCE: Duration = Duration::from_secs(1);

/// Authoritative project list plus derived lookup indices. Always mutated as
/// a whole under the registry's write lock.
#[derive(Debug, Default)]
struct RegistryIndex {
    order: Vec<String>,
    projects: HashMap<String, Project>,
    by_port: HashMap<u16, Vec<String>>,
    by_path: HashMap<PathBuf, String>,
}

impl RegistryIndex {
    fn rebuild(projects: Vec<Project>) -> Self {
        let mut index = RegistryIndex::default();
        for project in projects {
            if index.projects.contains_key(&project.id) {
                warn!(project_id = %project.id, "duplicate project id in catalog, skipping");
                continue;
            }
            if let Some(owner) = index.by_path.get(&project.path) {
                warn!(
                    project_id = %project.id,
                    owner = %owner,
                    path = %project.path.display(),
                    "duplicate project path in catalog"
                );
            }
            index.insert(project);
        }
        index
    }

    fn insert(&mut self, project: Project) {
        self.order.push(project.id.clone());
        self.index(&project);
        self.projects.insert(project.id.clone(), project);
    }

    fn remove(&mut self, id: &str) -> Option<Project> {
        let project = self.projects.remove(id)?;
        self.order.retain(|known| known != id);
        self.unindex(&project);
        Some(project)
    }

    /// Swap in a new version of an existing record, moving index entries.
    fn replace(&mut self, project: Project) -> Option<Project> {
        let previous = self.projects.remove(&project.id)?;
        self.unindex(&previous);
        self.index(&project);
        self.projects.insert(project.id.clone(), project);
        Some(previous)
    }

    fn index(&mut self, project: &Project) {
        self.by_port
            .entry(project.port)
            .or_default()
            .push(project.id.clone());
        self.by_path
            .entry(project.path.clone())
            .or_insert_with(|| project.id.clone());
    }

    fn unindex(&mut self, project: &Project) {
        if let Some(ids) = self.by_port.get_mut(&project.port) {
            ids.retain(|id| id != &project.id);
            if ids.is_empty() {
                self.by_port.remove(&project.port);
            }
        }
        if self.by_path.get(&project.path) == Some(&project.id) {
            self.by_path.remove(&project.path);
            // Hand the path to another record sharing it (only possible after a bulk load).
            if let Some(other) = self
                .order
                .iter()
                .filter_map(|id| self.projects.get(id))
                .find(|p| p.id != project.id && p.path == project.path)
            {
                self.by_path.insert(other.path.clone(), other.id.clone());
            }
        }
    }

    fn list(&self) -> Vec<Project> {
        self.order
            .iter()
            .filter_map(|id| self.projects.get(id))
            .cloned()
            .collect()
    }

    /// Active holder of `port` if any, otherwise the earliest created.
    fn port_holder(&self, port: u16) -> Option<&Project> {
        self.by_port
            .get(&port)?
            .iter()
            .filter_map(|id| self.projects.get(id))
            .min_by(|a, b| holder_rank(a).cmp(&holder_rank(b)))
    }

    fn path_owner(&self, path: &Path) -> Option<&Project> {
        self.by_path.get(path).and_then(|id| self.projects.get(id))
    }

    fn active_holder(&self, port: u16, except: &str) -> Option<&Project> {
        self.by_port
            .get(&port)?
            .iter()
            .filter(|id| id.as_str() != except)
            .filter_map(|id| self.projects.get(id))
            .find(|p| p.is_active())
    }

    fn all_ports(&self) -> HashSet<u16> {
        self.by_port.keys().copied().collect()
    }

    fn active_ports(&self, except: &str) -> HashSet<u16> {
        self.projects
            .values()
            .filter(|p| p.id != except && p.is_active())
            .map(|p| p.port)
            .collect()
    }
}

/// Ordering used to pick among projects sharing a port.
pub(crate) fn holder_rank(project: &Project) -> (bool, chrono::DateTime<chrono::Utc>, String) {
    (!project.is_active(), project.created_at, project.id.clone())
}

/// In-memory project catalog with constant-time id/port/path lookup and
/// debounced persistence.
///
/// In-memory state is authoritative. Persistence failures are logged and
/// retried on the next quiet period; they never reach command callers.
pub struct ProjectRegistry {
    state: Arc<RwLock<RegistryIndex>>,
    allocator: PortAllocator,
    store: Arc<dyn CatalogStore>,
    persist_tx: mpsc::UnboundedSender<()>,
    writer: JoinHandle<()>,
}

impl ProjectRegistry {
    /// Load the catalog from `store` and start the persistence writer.
    /// Must be called inside a tokio runtime.
    pub async fn load(
        store: Arc<dyn CatalogStore>,
        allocator: PortAllocator,
        debounce: Duration,
    ) -> Result<Self> {
        let projects = match store.load().await? {
            Some(bytes) => ProjectCatalog::from_bytes(&bytes)?.projects,
            None => Vec::new(),
        };
        info!(count = projects.len(), "project catalog loaded");

        let state = Arc::new(RwLock::new(RegistryIndex::rebuild(projects)));
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(
            state.clone(),
            store.clone(),
            debounce,
            persist_rx,
        ));

        Ok(Self {
            state,
            allocator,
            store,
            persist_tx,
            writer,
        })
    }

    /// Register a new project. Its port is moved off any port another project
    /// already uses; allocation and insertion share one critical section.
    pub async fn add(&self, input: NewProject) -> Result<Project> {
        let project = {
            let mut state = self.state.write().await;
            if let Some(owner) = state.path_owner(&input.path) {
                return Err(LauncherError::DuplicatePath {
                    path: input.path.clone(),
                    owner: owner.id.clone(),
                });
            }
            let preferred = input.preferred_port();
            let port = self.allocator.allocate(preferred, &state.all_ports());
            let project = Project::new(input, port);
            state.insert(project.clone());
            project
        };

        info!(
            project_id = %project.id,
            name = %project.name,
            port = project.port,
            "project added"
        );
        self.schedule_persist();
        Ok(project)
    }

    /// Replace a project's configuration. Runtime fields (status, pid,
    /// timestamps, URL) are kept from the stored record. The port of an
    /// active project cannot change.
    pub async fn update(&self, project: Project) -> Result<Project> {
        let updated = {
            let mut state = self.state.write().await;
            let existing = state
                .projects
                .get(&project.id)
                .cloned()
                .ok_or_else(|| LauncherError::ProjectNotFound(project.id.clone()))?;

            if let Some(owner) = state.path_owner(&project.path) {
                if owner.id != project.id {
                    return Err(LauncherError::DuplicatePath {
                        path: project.path.clone(),
                        owner: owner.id.clone(),
                    });
                }
            }
            // The running process and its forwarding stay bound to the old port.
            if existing.is_active() && project.port != existing.port {
                return Err(LauncherError::PortChangeWhileActive {
                    id: project.id.clone(),
                    port: project.port,
                });
            }

            let mut updated = project;
            updated.adopt_runtime_state(&existing);
            state.replace(updated.clone());
            updated
        };

        debug!(project_id = %updated.id, "project updated");
        self.schedule_persist();
        Ok(updated)
    }

    /// Atomic read-modify-write of one record. The id cannot be changed.
    pub(crate) async fn modify<F>(&self, id: &str, f: F) -> Result<Project>
    where
        F: FnOnce(&mut Project),
    {
        let updated = {
            let mut state = self.state.write().await;
            let mut project = state
                .projects
                .get(id)
                .cloned()
                .ok_or_else(|| LauncherError::ProjectNotFound(id.to_string()))?;
            f(&mut project);
            project.id = id.to_string();
            state.replace(project.clone());
            project
        };
        self.schedule_persist();
        Ok(updated)
    }

    /// Move a project to `starting`, first moving it off a port held by
    /// another active project. Returns the previous status and the updated
    /// record; the status is left alone when no port is free.
    pub(crate) async fn begin_start(&self, id: &str) -> Result<(ProjectStatus, Project)> {
        let result = {
            let mut state = self.state.write().await;
            let mut project = state
                .projects
                .get(id)
                .cloned()
                .ok_or_else(|| LauncherError::ProjectNotFound(id.to_string()))?;
            let previous = project.status;

            if let Some(holder) = state.active_holder(project.port, id) {
                let used = state.active_ports(id);
                let port = self.allocator.allocate(project.port, &used);
                if used.contains(&port) {
                    return Err(LauncherError::PortInUse {
                        port: project.port,
                        owner: holder.id.clone(),
                    });
                }
                info!(project_id = %id, from = project.port, to = port, "reassigned conflicting port");
                project.port = port;
            }

            project.status = ProjectStatus::Starting;
            state.replace(project.clone());
            (previous, project)
        };
        self.schedule_persist();
        Ok(result)
    }

    /// Drop a record from the list and every index. Processes are not
    /// touched; `StatusReconciler::delete` stops them first.
    pub(crate) async fn remove(&self, id: &str) -> Result<Project> {
        let removed = self
            .state
            .write()
            .await
            .remove(id)
            .ok_or_else(|| LauncherError::ProjectNotFound(id.to_string()))?;
        info!(project_id = %id, name = %removed.name, "project removed");
        self.schedule_persist();
        Ok(removed)
    }

    pub async fn list(&self) -> Vec<Project> {
        self.state.read().await.list()
    }

    pub async fn get(&self, id: &str) -> Option<Project> {
        self.state.read().await.projects.get(id).cloned()
    }

    pub async fn get_by_port(&self, port: u16) -> Option<Project> {
        self.state.read().await.port_holder(port).cloned()
    }

    pub async fn get_by_path(&self, path: &Path) -> Option<Project> {
        self.state.read().await.path_owner(path).cloned()
    }

    /// Projects currently in `running` status.
    pub async fn running(&self) -> Vec<Project> {
        self.with_status(|status| status == ProjectStatus::Running).await
    }

    /// Projects in `starting`, `running` or `stopping`.
    pub async fn active(&self) -> Vec<Project> {
        self.with_status(ProjectStatus::is_active).await
    }

    async fn with_status(&self, keep: impl Fn(ProjectStatus) -> bool) -> Vec<Project> {
        self.state
            .read()
            .await
            .list()
            .into_iter()
            .filter(|p| keep(p.status))
            .collect()
    }

    /// Ports held by projects in an active status.
    pub async fn active_ports(&self) -> HashSet<u16> {
        self.state.read().await.active_ports("")
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Write the catalog now, bypassing the debounce.
    pub async fn flush(&self) -> Result<()> {
        write_snapshot(&self.state, self.store.as_ref()).await
    }

    fn schedule_persist(&self) {
        if self.persist_tx.send(()).is_err() {
            warn!("catalog writer is gone, change will not be persisted");
        }
    }
}

impl Drop for ProjectRegistry {
    fn drop(&mut self) {
        // A pending write is lost; callers flush on shutdown.
        self.writer.abort();
    }
}

/// Coalesce change signals: wait until no signal arrived for `debounce`,
/// then write one snapshot. A failed write is retried after the next quiet
/// period even without new changes.
async fn run_writer(
    state: Arc<RwLock<RegistryIndex>>,
    store: Arc<dyn CatalogStore>,
    debounce: Duration,
    mut rx: mpsc::UnboundedReceiver<()>,
) {
    let mut dirty = false;
    loop {
        if !dirty && rx.recv().await.is_none() {
            break;
        }

        let mut closed = false;
        loop {
            match timeout(debounce, rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => {
                    closed = true;
                    break;
                }
                Err(_) => break,
            }
        }

        dirty = write_snapshot(&state, store.as_ref()).await.is_err();
        if closed {
            break;
        }
    }
    debug!("catalog writer stopped");
}

async fn write_snapshot(state: &RwLock<RegistryIndex>, store: &dyn CatalogStore) -> Result<()> {
    let projects = state.read().await.list();
    let count = projects.len();
    let result = match ProjectCatalog::new(projects).to_bytes() {
        Ok(bytes) => store.save(bytes).await,
        Err(e) => Err(e),
    };
    match &result {
        Ok(()) => debug!(count, "project catalog persisted"),
        Err(e) => warn!(error = %e, "failed to persist project catalog, will retry"),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProjectType;
    use crate::services::catalog_store::MemoryStore;

    async fn registry() -> ProjectRegistry {
        ProjectRegistry::load(
            Arc::new(MemoryStore::new()),
            PortAllocator::default(),
            Duration::from_millis(50),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn add_moves_conflicting_ports() {
        let registry = registry().await;
        let a = registry
            .add(NewProject::new("a", "/srv/a", ProjectType::NodeJs))
            .await
            .unwrap();
        let b = registry
            .add(NewProject::new("b", "/srv/b", ProjectType::NodeJs))
            .await
            .unwrap();
        assert_eq!(a.port, 3000);
        assert_eq!(b.port, 3001);
        assert_eq!(registry.get_by_port(3001).await.unwrap().id, b.id);
    }

    #[tokio::test]
    async fn duplicate_path_is_rejected() {
        let registry = registry().await;
        registry
            .add(NewProject::new("a", "/srv/a", ProjectType::NodeJs))
            .await
            .unwrap();
        let err = registry
            .add(NewProject::new("again", "/srv/a", ProjectType::Vite))
            .await
            .unwrap_err();
        assert!(matches!(err, LauncherError::DuplicatePath { .. }));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn update_keeps_runtime_fields_and_moves_indices() {
        let registry = registry().await;
        let project = registry
            .add(NewProject::new("a", "/srv/a", ProjectType::NodeJs))
            .await
            .unwrap();
        registry
            .modify(&project.id, |p| {
                p.status = ProjectStatus::Error;
                p.last_error = Some("boom".to_string());
            })
            .await
            .unwrap();

        let mut edited = project.clone();
        edited.path = PathBuf::from("/srv/renamed");
        edited.port = 3100;
        edited.status = ProjectStatus::Running;
        let updated = registry.update(edited).await.unwrap();

        assert_eq!(updated.status, ProjectStatus::Error);
        assert_eq!(updated.last_error.as_deref(), Some("boom"));
        assert!(registry.get_by_path(Path::new("/srv/a")).await.is_none());
        assert_eq!(registry.get_by_path(Path::new("/srv/renamed")).await.unwrap().id, project.id);
        assert!(registry.get_by_port(3000).await.is_none());
        assert_eq!(registry.get_by_port(3100).await.unwrap().id, project.id);
    }

    #[tokio::test]
    async fn active_project_keeps_its_port_on_update() {
        let registry = registry().await;
        let project = registry
            .add(NewProject::new("a", "/srv/a", ProjectType::NodeJs))
            .await
            .unwrap();
        registry
            .modify(&project.id, |p| p.status = ProjectStatus::Running)
            .await
            .unwrap();

        let mut moved = registry.get(&project.id).await.unwrap();
        moved.port = 3100;
        moved.name = "renamed".to_string();
        let err = registry.update(moved).await.unwrap_err();
        assert!(matches!(
            err,
            LauncherError::PortChangeWhileActive { port: 3100, .. }
        ));

        let stored = registry.get(&project.id).await.unwrap();
        assert_eq!(stored.port, 3000);
        assert_eq!(stored.name, "a");
        assert_eq!(registry.get_by_port(3000).await.unwrap().id, project.id);
        assert!(registry.get_by_port(3100).await.is_none());

        // Other edits on the same port still go through.
        let mut renamed = stored.clone();
        renamed.name = "renamed".to_string();
        assert_eq!(registry.update(renamed).await.unwrap().name, "renamed");
    }

    #[tokio::test]
    async fn stopped_project_can_change_port() {
        let registry = registry().await;
        let project = registry
            .add(NewProject::new("a", "/srv/a", ProjectType::NodeJs))
            .await
            .unwrap();
        let mut moved = project.clone();
        moved.port = 3100;
        assert_eq!(registry.update(moved).await.unwrap().port, 3100);
    }

    #[tokio::test]
    async fn begin_start_reassigns_port_held_by_active_project() {
        let registry = registry().await;
        let a = registry
            .add(NewProject::new("a", "/srv/a", ProjectType::NodeJs))
            .await
            .unwrap();
        let b = registry
            .add(NewProject::new("b", "/srv/b", ProjectType::NodeJs))
            .await
            .unwrap();
        // Both end up on 3000 through a manual edit while stopped.
        let mut same = b.clone();
        same.port = a.port;
        registry.update(same).await.unwrap();

        registry.begin_start(&a.id).await.unwrap();
        let (previous, started) = registry.begin_start(&b.id).await.unwrap();
        assert_eq!(previous, ProjectStatus::Stopped);
        assert_eq!(started.status, ProjectStatus::Starting);
        assert_ne!(started.port, a.port);
        assert_eq!(registry.get_by_port(a.port).await.unwrap().id, a.id);
    }

    #[tokio::test]
    async fn burst_of_changes_is_written_once() {
        let store = Arc::new(MemoryStore::new());
        let registry = ProjectRegistry::load(
            store.clone(),
            PortAllocator::default(),
            Duration::from_millis(100),
        )
        .await
        .unwrap();

        for i in 0..10 {
            registry
                .add(NewProject::new(format!("p{}", i), format!("/srv/p{}", i), ProjectType::Vite))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(store.save_count(), 1);
        let saved = ProjectCatalog::from_bytes(&store.contents().unwrap()).unwrap();
        assert_eq!(saved.projects.len(), 10);
    }

    #[tokio::test]
    async fn failed_write_is_retried_without_new_changes() {
        let store = Arc::new(MemoryStore::new());
        store.set_failing(true);
        let registry = ProjectRegistry::load(
            store.clone(),
            PortAllocator::default(),
            Duration::from_millis(50),
        )
        .await
        .unwrap();

        registry
            .add(NewProject::new("a", "/srv/a", ProjectType::NodeJs))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.save_count(), 0);
        // In-memory state is unaffected by the failure.
        assert_eq!(registry.len().await, 1);

        store.set_failing(false);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn catalog_round_trips_through_store() {
        let store = Arc::new(MemoryStore::new());
        let first = ProjectRegistry::load(store.clone(), PortAllocator::default(), DEFAULT_PERSIST_DEBOUNCE)
            .await
            .unwrap();
        let added = first
            .add(NewProject::new("a", "/srv/a", ProjectType::Django))
            .await
            .unwrap();
        first.flush().await.unwrap();
        drop(first);

        let second = ProjectRegistry::load(store, PortAllocator::default(), DEFAULT_PERSIST_DEBOUNCE)
            .await
            .unwrap();
        assert_eq!(second.get(&added.id).await.unwrap().name, "a");
        assert_eq!(second.get_by_path(Path::new("/srv/a")).await.unwrap().id, added.id);
    }
}
