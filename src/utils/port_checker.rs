use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

/// Ports dev servers tend to fall back to when they ignore the requested one.
pub const COMMON_WEB_PORTS: [u16; 12] = [
    3000, 3001, 4000, 4200, 5000, 5001, 5173, 8000, 8080, 8081, 8888, 9000,
];

const CONNECT_TIMEOUT: Duration = Duration::from_millis(300);

/// Check whether `port` can be bound on the loopback interface.
pub fn is_port_available(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}

/// Check whether something accepts TCP connections on `127.0.0.1:port`.
pub async fn is_port_listening(port: u16) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    matches!(timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await, Ok(Ok(_)))
}

/// First port of `candidates` that accepts connections.
pub async fn first_listening_port(candidates: &[u16]) -> Option<u16> {
    for &port in candidates {
        if is_port_listening(port).await {
            return Some(port);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_port_is_unavailable() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!is_port_available(port));
        drop(listener);
        assert!(is_port_available(port));
    }

    #[tokio::test]
    async fn listening_port_is_detected() {
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(is_port_listening(port).await);
        assert_eq!(first_listening_port(&[port]).await, Some(port));

        drop(listener);
        assert!(!is_port_listening(port).await);
    }
}
