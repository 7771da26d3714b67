//! Live peer registry entry.
//!
//! A peer is one established connection to a remote node. The entry itself
//! is passive: outbound frames are enqueued onto the writer task through an
//! unbounded channel, and the hot liveness fields are atomics updated
//! without the overlay lock.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::watch;

use super::space::Id;
use super::wire::Envelope;
use crate::error::Error;
use crate::error::Result;

/// A live connection to a remote node.
pub(crate) struct Peer {
    /// Overlay id of the remote.
    pub id: Id,
    /// Negotiated identity name of the remote.
    pub name: String,
    /// Endpoints the remote advertises, refreshed by joins and exchanges.
    addrs: Mutex<Vec<String>>,
    /// Whether the remote last claimed this link as an active route entry.
    pub remote_active: AtomicBool,
    /// Milliseconds since the overlay epoch of the last heartbeat received.
    last_beat: AtomicU64,
    /// Highest state exchange version processed from this sender.
    seen_version: AtomicU64,
    out: mpsc::UnboundedSender<Bytes>,
    shut: watch::Sender<bool>,
}

impl Peer {
    /// Create the registry entry together with the writer queue and the
    /// teardown signal its tasks listen on.
    pub fn new(
        id: Id,
        name: String,
        addrs: Vec<String>,
        epoch: Instant,
    ) -> (Self, mpsc::UnboundedReceiver<Bytes>, watch::Receiver<bool>) {
        let (out, out_rx) = mpsc::unbounded_channel();
        let (shut, shut_rx) = watch::channel(false);
        let peer = Self {
            id,
            name,
            addrs: Mutex::new(addrs),
            remote_active: AtomicBool::new(false),
            last_beat: AtomicU64::new(epoch.elapsed().as_millis() as u64),
            seen_version: AtomicU64::new(0),
            out,
            shut,
        };
        (peer, out_rx, shut_rx)
    }

    /// Enqueue a packet for the writer task.
    pub fn send(&self, env: &Envelope) -> Result<()> {
        let frame = env.encode()?;
        self.out.send(frame).map_err(|_| Error::LinkBroken)
    }

    /// Accept a state exchange version, refusing anything not strictly
    /// beyond the last processed snapshot from this sender.
    pub fn advance_version(&self, version: u64) -> Result<()> {
        let seen = self.seen_version.load(Ordering::Acquire);
        if version <= seen {
            return Err(Error::StaleState {
                got: version,
                seen,
            });
        }
        self.seen_version.store(version, Ordering::Release);
        Ok(())
    }

    /// Record a heartbeat arrival.
    pub fn touch(&self, epoch: Instant) {
        self.last_beat
            .store(epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    /// How long the peer has been silent.
    pub fn silent_for(&self, epoch: Instant) -> Duration {
        let now = epoch.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_beat.load(Ordering::Relaxed)))
    }

    /// Snapshot of the advertised endpoints.
    pub fn addrs(&self) -> Vec<String> {
        self.addrs
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    /// Replace the advertised endpoints.
    pub fn set_addrs(&self, addrs: Vec<String>) {
        if addrs.is_empty() {
            return;
        }
        *self
            .addrs
            .lock()
            .unwrap_or_else(|poison| poison.into_inner()) = addrs;
    }

    /// Signal the reader and writer tasks to tear the link down.
    pub fn close(&self) {
        let _ = self.shut.send(true);
    }
}
