use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::models::LauncherSettings;
use crate::services::{
    BroadcastEmitter, CatalogStore, EventEmitter, ExternalIpResolver, FsPathValidator, JsonFileStore,
    LanIpResolver, LivenessProber, NoopPortForwarder, PathValidator, PortAllocator, PortForwarder,
    ProcessSupervisor, ProjectRegistry, SettingsService, StatusReconciler, Timings,
};

/// External services the core talks to. Defaults suit headless use.
pub struct Collaborators {
    pub store: Arc<dyn CatalogStore>,
    pub paths: Arc<dyn PathValidator>,
    pub forwarder: Arc<dyn PortForwarder>,
    pub resolver: Arc<dyn ExternalIpResolver>,
    pub timings: Timings,
}

impl Collaborators {
    pub fn with_store(store: Arc<dyn CatalogStore>) -> Self {
        Self {
            store,
            paths: Arc::new(FsPathValidator),
            forwarder: Arc::new(NoopPortForwarder),
            resolver: Arc::new(LanIpResolver),
            timings: Timings::default(),
        }
    }
}

/// The service graph, built once at startup and shared by reference.
pub struct AppState {
    pub settings: LauncherSettings,
    pub events: Arc<BroadcastEmitter>,
    pub registry: Arc<ProjectRegistry>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub reconciler: Arc<StatusReconciler>,
    prober: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl AppState {
    /// Build the services from on-disk settings, with the catalog in a JSON file.
    pub async fn from_config(config: &SettingsService) -> Result<Self> {
        let settings = config.load()?;
        let store = Arc::new(JsonFileStore::new(config.catalog_path(&settings)));
        Self::initialize(settings, Collaborators::with_store(store)).await
    }

    pub async fn initialize(settings: LauncherSettings, collaborators: Collaborators) -> Result<Self> {
        let events = Arc::new(BroadcastEmitter::default());
        let emitter: Arc<dyn EventEmitter> = events.clone();

        let allocator = PortAllocator::new(settings.port_range_start, settings.port_range_end)
            .with_system_check(settings.check_system_ports);
        let registry = Arc::new(
            ProjectRegistry::load(
                collaborators.store,
                allocator,
                Duration::from_millis(settings.persist_debounce_ms),
            )
            .await?,
        );

        let supervisor = Arc::new(
            ProcessSupervisor::new(emitter.clone(), collaborators.paths)
                .with_timings(collaborators.timings)
                .with_output_lines(settings.output_buffer_lines),
        );

        let reconciler = Arc::new(StatusReconciler::new(
            registry.clone(),
            supervisor.clone(),
            emitter,
            collaborators.forwarder,
            collaborators.resolver,
        ));

        Ok(Self {
            settings,
            events,
            registry,
            supervisor,
            reconciler,
            prober: Mutex::new(None),
        })
    }

    /// Start the liveness prober if it is not running yet.
    pub async fn start_prober(&self) {
        let mut prober = self.prober.lock().await;
        if prober.is_some() {
            return;
        }
        let token = CancellationToken::new();
        let handle = LivenessProber::new(self.reconciler.clone()).spawn(token.clone());
        *prober = Some((token, handle));
    }

    /// Stop the prober and every server, then write the catalog.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some((token, handle)) = self.prober.lock().await.take() {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "liveness prober ended abnormally");
            }
        }

        let stopped = self.reconciler.stop_all().await;
        info!(count = stopped.len(), "stopped running servers");
        self.registry.flush().await
    }
}
