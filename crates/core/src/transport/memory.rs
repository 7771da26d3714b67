//! In-process transport for local testing.
//!
//! A [MemoryHub] connects any number of transports inside one process with
//! no real network. The hub is an explicit instance handed to every
//! transport, so independent test universes never interfere. Links can be
//! severed per direction to simulate silent network partitions without
//! surfacing send errors.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::DashSet;
use tokio::sync::mpsc;

use super::Link;
use super::LinkReceiver;
use super::LinkSender;
use super::Transport;
use crate::error::Error;
use crate::error::Result;

const CHANNEL_DEPTH: usize = 256;

/// Endpoint scheme used by memory transports.
pub const SCHEME: &str = "mem://";

/// Shared registry wiring memory transports together.
#[derive(Default)]
pub struct MemoryHub {
    inboxes: DashMap<String, mpsc::Sender<Link>>,
    severed: DashSet<(String, String)>,
}

impl MemoryHub {
    /// A fresh, empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Silently discard all delivery from `from` to `to` (one direction).
    /// Sends still succeed, mimicking a stalled path rather than a broken
    /// one.
    pub fn sever(&self, from: &str, to: &str) {
        self.severed.insert((from.to_string(), to.to_string()));
    }

    /// Restore delivery from `from` to `to`.
    pub fn heal(&self, from: &str, to: &str) {
        self.severed.remove(&(from.to_string(), to.to_string()));
    }

    fn is_severed(&self, from: &str, to: &str) -> bool {
        self.severed
            .contains(&(from.to_string(), to.to_string()))
    }
}

/// One simulated node endpoint on a [MemoryHub].
pub struct MemoryTransport {
    hub: Arc<MemoryHub>,
    name: String,
    endpoint: String,
    inbox: Mutex<Option<mpsc::Receiver<Link>>>,
}

impl MemoryTransport {
    /// Register `name` on the hub and return its transport. The advertised
    /// endpoint is `mem://<name>`.
    pub fn new(hub: Arc<MemoryHub>, name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        let endpoint = format!("{SCHEME}{name}");
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        hub.inboxes.insert(endpoint.clone(), tx);
        Arc::new(Self {
            hub,
            name,
            endpoint,
            inbox: Mutex::new(Some(rx)),
        })
    }

    fn make_pair(
        hub: &Arc<MemoryHub>,
        local: &str,
        remote: &str,
    ) -> ((MemorySender, MemoryReceiver), (MemorySender, MemoryReceiver)) {
        let (fwd_tx, fwd_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (bwd_tx, bwd_rx) = mpsc::channel(CHANNEL_DEPTH);
        let here = (
            MemorySender {
                hub: hub.clone(),
                from: local.to_string(),
                to: remote.to_string(),
                tx: Mutex::new(Some(fwd_tx)),
            },
            MemoryReceiver { rx: bwd_rx },
        );
        let there = (
            MemorySender {
                hub: hub.clone(),
                from: remote.to_string(),
                to: local.to_string(),
                tx: Mutex::new(Some(bwd_tx)),
            },
            MemoryReceiver { rx: fwd_rx },
        );
        (here, there)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_name(&self) -> &str {
        &self.name
    }

    fn addrs(&self) -> Vec<String> {
        vec![self.endpoint.clone()]
    }

    async fn dial(&self, addrs: &[String]) -> Result<Link> {
        for addr in addrs {
            let Some(remote_name) = addr.strip_prefix(SCHEME) else {
                continue;
            };
            let Some(inbox) = self.hub.inboxes.get(addr).map(|e| e.value().clone()) else {
                continue;
            };
            let ((tx, rx), (remote_tx, remote_rx)) =
                Self::make_pair(&self.hub, &self.endpoint, addr);
            let accepted = Link {
                name: self.name.clone(),
                tx: Box::new(remote_tx),
                rx: Box::new(remote_rx),
            };
            if inbox.send(accepted).await.is_err() {
                continue;
            }
            return Ok(Link {
                name: remote_name.to_string(),
                tx: Box::new(tx),
                rx: Box::new(rx),
            });
        }
        Err(Error::Unreachable(addrs.join(", ")))
    }

    async fn accept(&self) -> Result<Option<Link>> {
        let mut rx = {
            let mut slot = self
                .inbox
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            slot.take().ok_or(Error::LinkClosed)?
        };
        let link = rx.recv().await;
        let mut slot = self
            .inbox
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        *slot = Some(rx);
        Ok(link)
    }
}

/// Sending half of a memory link.
pub struct MemorySender {
    hub: Arc<MemoryHub>,
    from: String,
    to: String,
    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
}

#[async_trait]
impl LinkSender for MemorySender {
    async fn send(&self, frame: Bytes) -> Result<()> {
        let tx = {
            let guard = self.tx.lock().unwrap_or_else(|poison| poison.into_inner());
            guard.clone().ok_or(Error::LinkBroken)?
        };
        if self.hub.is_severed(&self.from, &self.to) {
            return Ok(());
        }
        tx.send(frame).await.map_err(|_| Error::LinkBroken)
    }

    async fn close(&self) {
        self.tx
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take();
    }
}

/// Receiving half of a memory link.
pub struct MemoryReceiver {
    rx: mpsc::Receiver<Bytes>,
}

#[async_trait]
impl LinkReceiver for MemoryReceiver {
    async fn recv(&mut self) -> Result<Option<Bytes>> {
        Ok(self.rx.recv().await)
    }
}
