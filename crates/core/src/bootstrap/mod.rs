//! Bootstrap seeding: discovery of candidate peers.
//!
//! A seeder produces `host:port` candidates into a sink channel the
//! overlay consumes. The overlay owns a phase counter it advances whenever
//! it needs the search widened; driving the phase to [PHASE_DONE] tells
//! the seeder to stop, upon which it closes the sink by dropping it.

pub mod directory;

use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::Config;

/// Terminal phase value: the seeder shuts down.
pub const PHASE_DONE: u32 = u32::MAX;

/// Expand probe hosts with the configured bootstrap ports into dialable
/// endpoints, the target list of a port scanning seeder.
pub fn scan_targets(hosts: &[String], config: &Config) -> Vec<String> {
    hosts
        .iter()
        .flat_map(|host| {
            config
                .boot_ports
                .iter()
                .map(move |port| format!("{host}:{port}"))
        })
        .collect()
}

/// A producer of candidate peer endpoints.
#[async_trait]
pub trait Seeder: Send {
    /// Feed candidates into `sink` until the phase counter turns terminal.
    /// The sink closes when the seeder returns.
    async fn run(self: Box<Self>, sink: mpsc::Sender<String>, phase: Arc<AtomicU32>);
}

/// Seeder over a fixed endpoint list, rescanning while bootstrap is
/// active. An empty list closes the sink immediately, booting a lone node.
pub struct StaticSeeder {
    seeds: Vec<String>,
    rescan: Duration,
}

impl StaticSeeder {
    /// Seed from the given endpoints.
    pub fn new(seeds: Vec<String>, rescan: Duration) -> Box<Self> {
        Box::new(Self { seeds, rescan })
    }

    /// A seeder that produces nothing: the lone bootstrap.
    pub fn empty() -> Box<Self> {
        Box::new(Self {
            seeds: Vec::new(),
            rescan: Duration::from_secs(1),
        })
    }
}

#[async_trait]
impl Seeder for StaticSeeder {
    async fn run(self: Box<Self>, sink: mpsc::Sender<String>, phase: Arc<AtomicU32>) {
        if self.seeds.is_empty() {
            return;
        }
        loop {
            if phase.load(Ordering::Relaxed) == PHASE_DONE {
                return;
            }
            for seed in &self.seeds {
                if sink.send(seed.clone()).await.is_err() {
                    return;
                }
            }
            tokio::time::sleep(self.rescan).await;
        }
    }
}

/// Interface network filter for advertised bootstrap endpoints.
#[derive(Clone, Copy, Debug)]
pub struct NetFilter {
    net: IpAddr,
    bits: u8,
}

impl NetFilter {
    /// Admit only addresses inside `net/bits`.
    pub fn new(net: IpAddr, bits: u8) -> Self {
        Self { net, bits }
    }

    /// Admit every address.
    pub fn any() -> Self {
        Self {
            net: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            bits: 0,
        }
    }

    /// Admit only the IPv4 loopback network.
    pub fn loopback() -> Self {
        Self {
            net: IpAddr::V4(Ipv4Addr::LOCALHOST),
            bits: 8,
        }
    }

    /// Whether an address falls inside the configured network.
    pub fn admits(&self, addr: IpAddr) -> bool {
        if self.bits == 0 {
            return true;
        }
        match (self.net, addr) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let shift = 32 - u32::from(self.bits.min(32));
                let mask = if shift == 32 { 0 } else { u32::MAX << shift };
                u32::from_be_bytes(net.octets()) & mask == u32::from_be_bytes(addr.octets()) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let shift = 128 - u128::from(self.bits.min(128));
                let mask = if shift == 128 { 0 } else { u128::MAX << shift };
                u128::from_be_bytes(net.octets()) & mask
                    == u128::from_be_bytes(addr.octets()) & mask
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_seeder_emits_and_rescans() {
        let seeder = StaticSeeder::new(
            vec!["127.0.0.1:1".to_string(), "127.0.0.1:2".to_string()],
            Duration::from_millis(5),
        );
        let (sink, mut seeds) = mpsc::channel(16);
        let phase = Arc::new(AtomicU32::new(0));
        tokio::spawn(seeder.run(sink, phase.clone()));

        assert_eq!(seeds.recv().await.unwrap(), "127.0.0.1:1");
        assert_eq!(seeds.recv().await.unwrap(), "127.0.0.1:2");
        // Rescan re-emits the same list.
        assert_eq!(seeds.recv().await.unwrap(), "127.0.0.1:1");

        phase.store(PHASE_DONE, Ordering::Relaxed);
        while seeds.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn empty_seeder_closes_sink() {
        let (sink, mut seeds) = mpsc::channel(16);
        let phase = Arc::new(AtomicU32::new(0));
        tokio::spawn(StaticSeeder::empty().run(sink, phase));
        assert_eq!(seeds.recv().await, None);
    }

    #[test]
    fn scan_targets_cross_hosts_and_ports() {
        let config = Config {
            boot_ports: vec![14142, 24142],
            ..Default::default()
        };
        assert_eq!(
            scan_targets(&["127.0.0.1".to_string(), "10.0.0.9".to_string()], &config),
            vec![
                "127.0.0.1:14142",
                "127.0.0.1:24142",
                "10.0.0.9:14142",
                "10.0.0.9:24142"
            ]
        );
    }

    #[test]
    fn loopback_filter_splits_networks() {
        let filter = NetFilter::loopback();
        assert!(filter.admits("127.0.0.1".parse().unwrap()));
        assert!(filter.admits("127.3.2.1".parse().unwrap()));
        assert!(!filter.admits("192.168.0.1".parse().unwrap()));
        assert!(!filter.admits("::1".parse().unwrap()));
    }

    #[test]
    fn open_filter_admits_everything() {
        let filter = NetFilter::any();
        assert!(filter.admits("10.0.0.1".parse().unwrap()));
        assert!(filter.admits("::1".parse().unwrap()));
    }

    #[test]
    fn v6_prefix_filter() {
        let filter = NetFilter::new("fd00::".parse().unwrap(), 8);
        assert!(filter.admits("fd12:3456::1".parse().unwrap()));
        assert!(!filter.admits("fe80::1".parse().unwrap()));
    }
}
