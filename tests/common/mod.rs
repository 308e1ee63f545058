//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use devserver_launcher::models::{LauncherEvent, LauncherSettings, NewProject, Project, ProjectType};
use devserver_launcher::services::{
    CatalogStore, ExternalIpResolver, FsPathValidator, MemoryStore, NoopIpResolver, PortForwarder,
    Timings,
};
use devserver_launcher::{AppState, Collaborators, Result};

/// Timings short enough for tests, long enough for `sh` to start.
pub fn fast_timings() -> Timings {
    Timings {
        startup_grace: Duration::from_millis(300),
        termination_window: Duration::from_secs(2),
        termination_poll: Duration::from_millis(50),
        restart_delay: Duration::from_millis(200),
        probe_interval: Duration::from_millis(150),
    }
}

/// Port forwarder that counts calls and remembers their ports.
#[derive(Debug, Default)]
pub struct RecordingForwarder {
    pub setups: AtomicUsize,
    pub teardowns: AtomicUsize,
    pub setup_ports: Mutex<Vec<u16>>,
    pub teardown_ports: Mutex<Vec<u16>>,
}

#[async_trait]
impl PortForwarder for RecordingForwarder {
    async fn setup(&self, port: u16) -> Result<()> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        self.setup_ports.lock().unwrap().push(port);
        Ok(())
    }

    async fn teardown(&self, port: u16) -> Result<()> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        self.teardown_ports.lock().unwrap().push(port);
        Ok(())
    }
}

/// Resolver that hands out queued addresses, each after its own delay.
/// Returns `None` once the queue is empty.
#[derive(Debug, Default)]
pub struct ScriptedResolver {
    answers: Mutex<VecDeque<(IpAddr, Duration)>>,
}

impl ScriptedResolver {
    pub fn new(answers: impl IntoIterator<Item = (&'static str, Duration)>) -> Self {
        let answers = answers
            .into_iter()
            .map(|(ip, delay)| (ip.parse().unwrap(), delay))
            .collect();
        Self {
            answers: Mutex::new(answers),
        }
    }
}

#[async_trait]
impl ExternalIpResolver for ScriptedResolver {
    async fn resolve(&self) -> Option<IpAddr> {
        let next = self.answers.lock().unwrap().pop_front();
        let (ip, delay) = next?;
        tokio::time::sleep(delay).await;
        Some(ip)
    }
}

pub struct Harness {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub forwarder: Arc<RecordingForwarder>,
    pub dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new())).await
    }

    pub async fn with_store(store: Arc<MemoryStore>) -> Self {
        Self::build(store, Arc::new(NoopIpResolver)).await
    }

    pub async fn with_resolver(resolver: Arc<dyn ExternalIpResolver>) -> Self {
        Self::build(Arc::new(MemoryStore::new()), resolver).await
    }

    async fn build(store: Arc<MemoryStore>, resolver: Arc<dyn ExternalIpResolver>) -> Self {
        let forwarder = Arc::new(RecordingForwarder::default());
        let settings = LauncherSettings {
            persist_debounce_ms: 50,
            ..LauncherSettings::default()
        };
        let catalog: Arc<dyn CatalogStore> = store.clone();
        let collaborators = Collaborators {
            store: catalog,
            paths: Arc::new(FsPathValidator),
            forwarder: forwarder.clone(),
            resolver,
            timings: fast_timings(),
        };
        let state = AppState::initialize(settings, collaborators).await.unwrap();
        Self {
            state,
            store,
            forwarder,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// Register a project in a fresh sub-directory running `command`.
    pub async fn add(&self, name: &str, command: &str) -> Project {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(&path).unwrap();
        self.state
            .registry
            .add(NewProject::new(name, path, ProjectType::NodeJs).with_command(command))
            .await
            .unwrap()
    }

    pub async fn project(&self, id: &str) -> Project {
        self.state.registry.get(id).await.unwrap()
    }
}

/// Drain every event already queued on `rx`.
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<LauncherEvent>) -> Vec<LauncherEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
