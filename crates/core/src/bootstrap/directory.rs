//! Directory backed seeding.
//!
//! Machine clusters often run a membership directory (an etcd service on
//! the CoreOS ports, for instance) that already knows every participant.
//! The [DirectorySeeder] polls such a directory and feeds the advertised
//! endpoints through the configured interface filter into the seed sink.
//! The directory query protocol itself lives behind the [Directory] trait.

use std::net::SocketAddr;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::NetFilter;
use super::Seeder;
use super::PHASE_DONE;
use crate::error::Result;

/// A queryable membership directory.
#[async_trait]
pub trait Directory: Send + Sync {
    /// The endpoints currently advertised by the directory.
    async fn members(&self) -> Result<Vec<SocketAddr>>;
}

/// Seeder polling a membership directory.
pub struct DirectorySeeder {
    directory: Box<dyn Directory>,
    filter: NetFilter,
    fast_rescan: Duration,
    slow_rescan: Duration,
}

impl DirectorySeeder {
    /// Poll `directory`, admitting only endpoints the filter accepts.
    pub fn new(
        directory: Box<dyn Directory>,
        filter: NetFilter,
        fast_rescan: Duration,
        slow_rescan: Duration,
    ) -> Box<Self> {
        Box::new(Self {
            directory,
            filter,
            fast_rescan,
            slow_rescan,
        })
    }

    /// Poll with the rescan intervals of an overlay configuration.
    pub fn from_config(
        directory: Box<dyn Directory>,
        filter: NetFilter,
        config: &crate::config::Config,
    ) -> Box<Self> {
        Self::new(directory, filter, config.fast_rescan, config.slow_rescan)
    }
}

#[async_trait]
impl Seeder for DirectorySeeder {
    async fn run(self: Box<Self>, sink: mpsc::Sender<String>, phase: Arc<AtomicU32>) {
        let mut last_phase = phase.load(Ordering::Relaxed);
        let mut scans = 0u64;
        loop {
            match self.directory.members().await {
                Ok(members) => {
                    for addr in members {
                        if !self.filter.admits(addr.ip()) {
                            tracing::debug!("seed {addr} outside the bootstrap interface");
                            continue;
                        }
                        if sink.send(addr.to_string()).await.is_err() {
                            return;
                        }
                    }
                }
                Err(err) => tracing::warn!("directory scan failed: {err}"),
            }
            scans += 1;

            let current = phase.load(Ordering::Relaxed);
            if current == PHASE_DONE {
                return;
            }
            // Poll quickly while bootstrap is still hungry: during the
            // first scans and right after a phase advance.
            let hungry = scans < 3 || current != last_phase;
            last_phase = current;
            tokio::time::sleep(if hungry {
                self.fast_rescan
            } else {
                self.slow_rescan
            })
            .await;
        }
    }
}
