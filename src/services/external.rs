//! Collaborators the core consumes but does not implement in earnest.
//!
//! Each trait has a default implementation good enough for headless use;
//! richer adapters (firewall scripts, UPnP, a GUI event bridge) plug in
//! behind the same traits.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::models::LauncherEvent;

/// Filesystem existence check used before spawning.
pub trait PathValidator: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FsPathValidator;

impl PathValidator for FsPathValidator {
    fn exists(&self, path: &Path) -> bool {
        path.is_dir()
    }
}

/// Opens and closes inbound access to a port.
#[async_trait]
pub trait PortForwarder: Send + Sync {
    async fn setup(&self, port: u16) -> Result<()>;
    async fn teardown(&self, port: u16) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPortForwarder;

#[async_trait]
impl PortForwarder for NoopPortForwarder {
    async fn setup(&self, _port: u16) -> Result<()> {
        Ok(())
    }

    async fn teardown(&self, _port: u16) -> Result<()> {
        Ok(())
    }
}

/// Best-effort lookup of the address other machines reach us on.
#[async_trait]
pub trait ExternalIpResolver: Send + Sync {
    async fn resolve(&self) -> Option<IpAddr>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopIpResolver;

#[async_trait]
impl ExternalIpResolver for NoopIpResolver {
    async fn resolve(&self) -> Option<IpAddr> {
        None
    }
}

/// Address of the interface used for outbound traffic.
///
/// Connecting a UDP socket selects a route without sending any packet.
#[derive(Debug, Clone, Copy, Default)]
pub struct LanIpResolver;

#[async_trait]
impl ExternalIpResolver for LanIpResolver {
    async fn resolve(&self) -> Option<IpAddr> {
        tokio::task::spawn_blocking(|| {
            let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
            socket.connect((Ipv4Addr::new(192, 0, 2, 1), 80)).ok()?;
            let ip = socket.local_addr().ok()?.ip();
            (!ip.is_unspecified() && !ip.is_loopback()).then_some(ip)
        })
        .await
        .ok()
        .flatten()
    }
}

/// Sink for [`LauncherEvent`]s. Must not block.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: LauncherEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEmitter;

impl EventEmitter for NoopEmitter {
    fn emit(&self, _event: LauncherEvent) {}
}

/// Fan-out emitter backed by a tokio broadcast channel. Slow subscribers
/// lose the oldest events rather than stall the core.
#[derive(Debug, Clone)]
pub struct BroadcastEmitter {
    tx: broadcast::Sender<LauncherEvent>,
}

impl BroadcastEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LauncherEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEmitter {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventEmitter for BroadcastEmitter {
    fn emit(&self, event: LauncherEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProjectStatus;

    #[tokio::test]
    async fn broadcast_emitter_delivers_to_subscribers() {
        let emitter = BroadcastEmitter::new(8);
        let mut rx = emitter.subscribe();
        emitter.emit(LauncherEvent::StatusChanged {
            project_id: "p".to_string(),
            from: ProjectStatus::Stopped,
            to: ProjectStatus::Starting,
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.project_id(), "p");
    }

    #[test]
    fn emitting_without_subscribers_is_harmless() {
        BroadcastEmitter::new(1).emit(LauncherEvent::ProjectRemoved {
            project_id: "gone".to_string(),
        });
    }
}
