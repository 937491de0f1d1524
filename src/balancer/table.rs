//! Worker endpoint table with a round-robin cursor
//!
//! Built once at balancer start and never changed afterwards. Rotation is
//! strict: it ignores load, latency and health, so a dead worker keeps its
//! share of traffic until the supervisor has respawned it.

use crate::common::config::derive_worker_ports;
use crate::common::Result;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
pub struct WorkerTable {
    endpoints: Vec<SocketAddr>,
    cursor: AtomicUsize,
}

impl WorkerTable {
    pub fn new(endpoints: Vec<SocketAddr>) -> Self {
        Self {
            endpoints,
            cursor: AtomicUsize::new(0),
        }
    }

    /// `count` endpoints on `host`, at `port + 1 ..= port + count`.
    pub fn from_base_port(host: IpAddr, port: u16, count: usize) -> Result<Self> {
        let endpoints = derive_worker_ports(port, count)?
            .into_iter()
            .map(|p| SocketAddr::new(host, p))
            .collect();
        Ok(Self::new(endpoints))
    }

    /// Next endpoint in rotation, or `None` when the table is empty.
    pub fn select(&self) -> Option<SocketAddr> {
        let len = self.endpoints.len();
        if len == 0 {
            return None;
        }
        let index = match self
            .cursor
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| Some((c + 1) % len))
        {
            Ok(prev) | Err(prev) => prev,
        };
        self.endpoints.get(index % len).copied()
    }

    pub fn endpoints(&self) -> &[SocketAddr] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn localhost() -> IpAddr {
        IpAddr::from([127, 0, 0, 1])
    }

    #[test]
    fn test_strict_rotation() {
        let table = WorkerTable::from_base_port(localhost(), 4000, 3).unwrap();
        let ports: Vec<u16> = (0..7).map(|_| table.select().unwrap().port()).collect();
        assert_eq!(ports, vec![4001, 4002, 4003, 4001, 4002, 4003, 4001]);
    }

    #[test]
    fn test_every_prefix_follows_table_order() {
        for n in 1..=5 {
            let table = WorkerTable::from_base_port(localhost(), 9000, n).unwrap();
            for m in 0..(3 * n + 2) {
                let expected = table.endpoints()[m % n];
                assert_eq!(table.select(), Some(expected), "n={} m={}", n, m);
            }
        }
    }

    #[test]
    fn test_empty_table_has_no_endpoint() {
        let table = WorkerTable::new(vec![]);
        assert!(table.is_empty());
        assert_eq!(table.select(), None);
        assert_eq!(table.select(), None);
    }

    #[test]
    fn test_overflowing_port_range() {
        assert!(WorkerTable::from_base_port(localhost(), 65535, 1).is_err());
    }

    #[test]
    fn test_concurrent_selection_is_fair() {
        let table = Arc::new(WorkerTable::from_base_port(localhost(), 7000, 4).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                std::thread::spawn(move || {
                    (0..1000)
                        .map(|_| table.select().unwrap().port())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts: HashMap<u16, usize> = HashMap::new();
        for handle in handles {
            for port in handle.join().unwrap() {
                *counts.entry(port).or_default() += 1;
            }
        }
        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|&c| c == 2000));
    }
}
