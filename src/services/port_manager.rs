use std::collections::HashSet;

use tracing::{debug, warn};

use crate::utils::port_checker::is_port_available;

pub const DEFAULT_PORT_RANGE_START: u16 = 3000;
pub const DEFAULT_PORT_RANGE_END: u16 = 3300;

/// Picks ports for projects from a bounded range.
///
/// The allocator holds no state of its own: callers pass the set of ports
/// that are taken and perform allocation and insertion under one lock, which
/// is what makes concurrent adds race-free.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    range_start: u16,
    range_end: u16,
    check_system: bool,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_RANGE_START, DEFAULT_PORT_RANGE_END)
    }
}

impl PortAllocator {
    pub fn new(range_start: u16, range_end: u16) -> Self {
        let (range_start, range_end) = if range_start <= range_end {
            (range_start, range_end)
        } else {
            (range_end, range_start)
        };
        Self {
            range_start,
            range_end,
            check_system: false,
        }
    }

    /// Also treat ports bound by foreign processes as taken.
    pub fn with_system_check(mut self, enabled: bool) -> Self {
        self.check_system = enabled;
        self
    }

    pub fn range(&self) -> (u16, u16) {
        (self.range_start, self.range_end)
    }

    /// First free port scanning upward from `preferred` to the end of the range.
    ///
    /// A preferred port outside the range is tried alone first, then the whole
    /// range is scanned. When nothing is free the preferred port is returned
    /// unchanged; this is a known degradation, not an error.
    pub fn allocate(&self, preferred: u16, used: &HashSet<u16>) -> u16 {
        if self.is_free(preferred, used) {
            return preferred;
        }

        let scan_from = if (self.range_start..=self.range_end).contains(&preferred) {
            preferred
        } else {
            self.range_start
        };

        match (scan_from..=self.range_end).find(|&port| self.is_free(port, used)) {
            Some(port) => {
                debug!(preferred, port, "allocated replacement port");
                port
            }
            None => {
                warn!(
                    preferred,
                    range_start = self.range_start,
                    range_end = self.range_end,
                    "port range exhausted, keeping requested port"
                );
                preferred
            }
        }
    }

    fn is_free(&self, port: u16, used: &HashSet<u16>) -> bool {
        port != 0 && !used.contains(&port) && (!self.check_system || is_port_available(port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn used(ports: &[u16]) -> HashSet<u16> {
        ports.iter().copied().collect()
    }

    #[test]
    fn free_preferred_port_is_kept() {
        let allocator = PortAllocator::default();
        assert_eq!(allocator.allocate(3000, &used(&[])), 3000);
    }

    #[test]
    fn taken_port_scans_upward() {
        let allocator = PortAllocator::default();
        assert_eq!(allocator.allocate(3000, &used(&[3000, 3001, 3003])), 3002);
    }

    #[test]
    fn out_of_range_preferred_falls_into_range() {
        let allocator = PortAllocator::new(3000, 3005);
        assert_eq!(allocator.allocate(8080, &used(&[8080, 3000])), 3001);
        assert_eq!(allocator.allocate(8080, &used(&[])), 8080);
    }

    #[test]
    fn exhausted_range_returns_preferred() {
        let allocator = PortAllocator::new(3000, 3002);
        assert_eq!(allocator.allocate(3001, &used(&[3000, 3001, 3002])), 3001);
    }

    #[test]
    fn scan_does_not_wrap_below_preferred() {
        let allocator = PortAllocator::new(3000, 3002);
        // 3000 is free but below the preferred port.
        assert_eq!(allocator.allocate(3001, &used(&[3001, 3002])), 3001);
    }

    #[test]
    fn reversed_bounds_are_normalized() {
        assert_eq!(PortAllocator::new(3300, 3000).range(), (3000, 3300));
    }

    #[test]
    fn system_check_skips_bound_ports() {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let allocator = PortAllocator::new(port, port.saturating_add(50)).with_system_check(true);
        assert_ne!(allocator.allocate(port, &used(&[])), port);
    }
}
