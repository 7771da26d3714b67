//! Implementation of the Pastry style routing overlay.
//!
//! The overlay self organizes cooperating nodes into a circular identifier
//! space and routes application messages by logical id rather than network
//! address. This module owns the live peer registry and the routing table,
//! drives the join, repair, state exchange, beat and close protocol, and
//! feeds the heartbeat service that detects silent peers.

pub mod callback;
mod handler;
mod maintenance;
pub(crate) mod peer;
pub mod space;
pub mod table;
pub mod wire;

use std::collections::HashMap;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;
use std::time::Instant;

use tokio::sync::broadcast;
use tokio::sync::mpsc;

use self::callback::AppCallback;
use self::peer::Peer;
use self::space::Id;
use self::space::Space;
use self::table::RoutingTable;
use self::wire::Envelope;
use self::wire::Header;
use crate::bootstrap::Seeder;
use crate::config::Config;
use crate::error::Error;
use crate::error::Result;
use crate::heart::Heart;
use crate::transport::Link;
use crate::transport::Transport;

/// Lifecycle of a local overlay node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Constructed, not yet booted.
    Unbooted,
    /// Dialing seeds and announcing the local id.
    Joining,
    /// First state exchange received, table converging.
    Synchronizing,
    /// Steady state, heartbeats running.
    Active,
    /// Leave notifications sent, draining outbound queues.
    Closing,
    /// Terminated.
    Closed,
}

/// Point in time snapshot of an overlay, for diagnostics and tests.
#[derive(Clone, Debug)]
pub struct OverlayInspect {
    /// Current lifecycle state.
    pub status: Status,
    /// Ids of every live peer, ascending.
    pub peers: Vec<Id>,
    /// Peers whose last heartbeat claimed the link as an active route
    /// entry on their side.
    pub active_claims: Vec<Id>,
    /// Current leaf set in clockwise order.
    pub leaves: Vec<Id>,
    /// Distinct nodes referenced by the routing table.
    pub fill: usize,
    /// Current state version counter.
    pub version: u64,
}

/// Guarded overlay state: everything that must change atomically across
/// the peer registry and the routing table.
pub(crate) struct OverlayState {
    pub(crate) status: Status,
    pub(crate) peers: HashMap<Id, Arc<Peer>>,
    pub(crate) table: RoutingTable,
    /// Version counter, bumped on every table mutation.
    pub(crate) time: u64,
}

/// A local node of the routing overlay.
pub struct Overlay {
    config: Config,
    space: Arc<Space>,
    node_id: Id,
    name: String,
    transport: Arc<dyn Transport>,
    state: RwLock<OverlayState>,
    /// Version already gossiped at the last beat. Only the beat task
    /// writes it.
    stat: AtomicU64,
    /// Bootstrap phase counter shared with the seeder.
    phase: Arc<AtomicU32>,
    epoch: Instant,
    heart: Arc<Heart>,
    app: RwLock<Option<Arc<dyn AppCallback>>>,
    quit: broadcast::Sender<()>,
}

impl Overlay {
    /// Create an unbooted overlay node named `name` on the given session
    /// transport. The node id is the resolved name.
    pub fn new(name: impl Into<String>, config: Config, transport: Arc<dyn Transport>) -> Result<Arc<Self>> {
        let name = name.into();
        let space = Arc::new(Space::new(&config)?);
        let node_id = space.resolve(&name);
        let table = RoutingTable::new(space.clone(), node_id.clone(), config.leaves);
        let heart = Heart::new(config.beat_period, config.kill_timeout);
        let (quit, _) = broadcast::channel(1);
        Ok(Arc::new(Self {
            config,
            space,
            node_id,
            name,
            transport,
            state: RwLock::new(OverlayState {
                status: Status::Unbooted,
                peers: HashMap::new(),
                table,
                time: 0,
            }),
            stat: AtomicU64::new(0),
            phase: Arc::new(AtomicU32::new(0)),
            epoch: Instant::now(),
            heart,
            app: RwLock::new(None),
            quit,
        }))
    }

    /// Overlay id of the local node.
    pub fn id(&self) -> &Id {
        &self.node_id
    }

    /// Identity name of the local node.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The identifier space this overlay routes in.
    pub fn space(&self) -> &Arc<Space> {
        &self.space
    }

    /// Current lifecycle state.
    pub fn status(&self) -> Status {
        self.read().status
    }

    /// Resolve a textual name into this overlay's id space.
    pub fn resolve(&self, name: &str) -> Id {
        self.space.resolve(name)
    }

    /// Register the upper layer callback.
    pub fn bind_callback(&self, callback: Arc<dyn AppCallback>) {
        *self
            .app
            .write()
            .unwrap_or_else(|poison| poison.into_inner()) = Some(callback);
    }

    /// Diagnostic snapshot.
    pub fn inspect(&self) -> OverlayInspect {
        let st = self.read();
        let mut peers: Vec<Id> = st.peers.keys().cloned().collect();
        peers.sort();
        let mut active_claims: Vec<Id> = st
            .peers
            .values()
            .filter(|p| p.remote_active.load(Ordering::Relaxed))
            .map(|p| p.id.clone())
            .collect();
        active_claims.sort();
        OverlayInspect {
            status: st.status,
            peers,
            active_claims,
            leaves: st.table.leaves().to_vec(),
            fill: st.table.fill(),
            version: st.time,
        }
    }

    /// Boot the overlay: start accepting sessions, consume bootstrap seeds
    /// from the seeder, announce the local id and converge. Returns the
    /// number of peers live at the end of the boot dial out.
    ///
    /// A seeder that closes its sink without producing a single seed boots
    /// a lone node; a seeder that stays silent past the boot deadline is
    /// reported as bootstrap starvation.
    pub async fn boot(self: &Arc<Self>, seeder: Box<dyn Seeder>) -> Result<usize> {
        {
            let mut st = self.write();
            if st.status != Status::Unbooted {
                return Err(Error::LateLifecycle("booted"));
            }
            st.status = Status::Joining;
        }
        tracing::info!("overlay {} booting as {}", self.name, self.node_id);

        self.spawn_acceptor();

        let (sink, mut seeds) = mpsc::channel(64);
        tokio::spawn(seeder.run(sink, self.phase.clone()));

        match tokio::time::timeout(self.config.boot_timeout, seeds.recv()).await {
            Err(_) => {
                tracing::warn!("overlay {} starved waiting for seeds", self.name);
                return Err(Error::BootstrapStarvation);
            }
            Ok(None) => {
                tracing::info!("overlay {} bootstrapping alone", self.name);
            }
            Ok(Some(seed)) => {
                if let Err(err) = self.join_seed(&seed).await {
                    tracing::debug!("seed {seed} unusable: {err}");
                }
                self.spawn_seed_consumer(seeds);
            }
        }
        self.spawn_stabilizer();

        Ok(self.read().peers.len())
    }

    /// Gracefully leave the overlay: notify every live peer, stop the
    /// heartbeats and give outbound queues a bounded drain window.
    pub async fn shutdown(&self) {
        let peers: Vec<Arc<Peer>> = {
            let mut st = self.write();
            if matches!(st.status, Status::Closing | Status::Closed) {
                return;
            }
            st.status = Status::Closing;
            st.peers.values().cloned().collect()
        };
        tracing::info!("overlay {} closing {} peers", self.name, peers.len());
        for peer in &peers {
            self.send_close(peer);
        }
        self.heart.stop();
        let _ = self.quit.send(());

        tokio::time::sleep(self.config.shutdown_grace()).await;

        let mut st = self.write();
        for peer in st.peers.values() {
            peer.close();
        }
        let ids: Vec<Id> = st.peers.keys().cloned().collect();
        for id in &ids {
            st.table.remove(id);
        }
        st.peers.clear();
        st.status = Status::Closed;
    }

    /// Route an application message toward `dest`, delivering it locally
    /// when this node is the closest one known.
    pub async fn send_app(&self, dest: &Id, meta: Vec<u8>, data: Vec<u8>) -> Result<()> {
        if !self.space.contains(dest) {
            return Err(Error::IdOverflow(dest.to_string()));
        }
        let env = Envelope::with_data(Header::app(dest, meta), data);
        self.forward_or_deliver(env).await;
        Ok(())
    }

    /// Monitor a topic member through the heartbeat service, keyed by the
    /// collision free compound id.
    pub fn monitor_member(&self, topic: &Id, node: &Id) -> Result<()> {
        self.member_key(topic, node)
            .and_then(|id| self.heart.monitor(id))
    }

    /// Stop monitoring a topic member.
    pub fn unmonitor_member(&self, topic: &Id, node: &Id) -> Result<()> {
        self.member_key(topic, node)
            .and_then(|id| self.heart.unmonitor(&id))
    }

    /// Refresh the last ping time of a topic member.
    pub fn ping_member(&self, topic: &Id, node: &Id) -> Result<()> {
        self.member_key(topic, node)
            .and_then(|id| self.heart.ping(&id))
    }

    fn member_key(&self, topic: &Id, node: &Id) -> Result<Id> {
        if *topic == Id::from(0u64) {
            // Topic zero would collide with plain overlay peers.
            return Err(Error::MalformedId("topic zero".to_string()));
        }
        Ok(self.space.member_id(topic, node))
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, OverlayState> {
        // Poisoning only follows a panic elsewhere, the state stays valid.
        self.state
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, OverlayState> {
        self.state
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    pub(crate) fn app_callback(&self) -> Option<Arc<dyn AppCallback>> {
        self.app
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    /// Dial an endpoint and announce the local id toward it.
    async fn join_seed(self: &Arc<Self>, seed: &str) -> Result<()> {
        if self.transport.addrs().contains(&seed.to_string()) {
            return Ok(());
        }
        let peer = self.connect(&[seed.to_string()]).await?;
        self.send_join(&peer);
        Ok(())
    }

    /// Open a session to the first reachable endpoint and register the
    /// resulting peer.
    pub(crate) async fn connect(self: &Arc<Self>, addrs: &[String]) -> Result<Arc<Peer>> {
        let link = self.transport.dial(addrs).await?;
        self.attach_link(link, addrs.to_vec())
    }

    /// Register a freshly established link as a live peer and spawn its
    /// reader and writer tasks. Duplicate handshakes collapse onto the
    /// already registered entry.
    pub(crate) fn attach_link(
        self: &Arc<Self>,
        link: Link,
        addrs: Vec<String>,
    ) -> Result<Arc<Peer>> {
        let Link { name, tx, rx } = link;
        let id = self.space.resolve(&name);
        if id == self.node_id {
            tokio::spawn(async move { tx.close().await });
            return Err(Error::UnknownPeer("self dial".to_string()));
        }
        let (peer, out_rx, shut_rx) = Peer::new(id.clone(), name, addrs, self.epoch);
        let peer = Arc::new(peer);

        {
            let mut st = self.write();
            if matches!(st.status, Status::Closing | Status::Closed) {
                tokio::spawn(async move { tx.close().await });
                return Err(Error::LateLifecycle("closing"));
            }
            if let Some(existing) = st.peers.get(&id) {
                // Duplicate handshake, keep the canonical entry.
                let existing = existing.clone();
                tokio::spawn(async move { tx.close().await });
                return Ok(existing);
            }
            st.peers.insert(id.clone(), peer.clone());
            if st.table.insert(&id) {
                st.time += 1;
            }
        }
        if let Err(err) = self.heart.monitor(id.clone()) {
            tracing::debug!("monitoring {id} again: {err}");
        }
        tracing::debug!("overlay {} attached peer {}", self.name, id);

        self.spawn_writer(peer.clone(), out_rx, shut_rx.clone(), tx);
        self.spawn_reader(peer.clone(), shut_rx, rx);
        Ok(peer)
    }

    fn spawn_acceptor(self: &Arc<Self>) {
        let overlay = self.clone();
        let mut quit = self.quit.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    inbound = overlay.transport.accept() => match inbound {
                        Ok(Some(link)) => {
                            if let Err(err) = overlay.attach_link(link, Vec::new()) {
                                tracing::debug!("inbound session rejected: {err}");
                            }
                        }
                        Ok(None) => break,
                        Err(err) => tracing::debug!("accept failed: {err}"),
                    },
                    _ = quit.recv() => break,
                }
            }
        });
    }

    fn spawn_seed_consumer(self: &Arc<Self>, mut seeds: mpsc::Receiver<String>) {
        let overlay = self.clone();
        let mut quit = self.quit.subscribe();
        tokio::spawn(async move {
            let mut attempted = std::collections::HashSet::new();
            let mut last_phase = overlay.phase.load(Ordering::Relaxed);
            loop {
                let seed = tokio::select! {
                    seed = seeds.recv() => match seed {
                        Some(seed) => seed,
                        None => break,
                    },
                    _ = quit.recv() => break,
                };
                // A phase advance widens the search, retry old seeds too.
                let phase = overlay.phase.load(Ordering::Relaxed);
                if phase != last_phase {
                    attempted.clear();
                    last_phase = phase;
                }
                if !attempted.insert(seed.clone()) {
                    continue;
                }
                if let Err(err) = overlay.join_seed(&seed).await {
                    tracing::debug!("seed {seed} unusable: {err}");
                }
            }
        });
    }

    /// After the stabilization window the node goes active and the
    /// heartbeat loop starts.
    fn spawn_stabilizer(self: &Arc<Self>) {
        let overlay = self.clone();
        let mut quit = self.quit.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(overlay.config.sync_window) => {}
                _ = quit.recv() => return,
            }
            {
                let mut st = overlay.write();
                if !matches!(st.status, Status::Joining | Status::Synchronizing) {
                    return;
                }
                st.status = Status::Active;
            }
            tracing::info!("overlay {} active", overlay.name);
            overlay
                .heart
                .start(Arc::new(maintenance::BeatHandler::new(overlay.clone())));
        });
    }

    fn spawn_writer(
        self: &Arc<Self>,
        peer: Arc<Peer>,
        mut out_rx: mpsc::UnboundedReceiver<bytes::Bytes>,
        mut shut_rx: tokio::sync::watch::Receiver<bool>,
        tx: crate::transport::BoxedSender,
    ) {
        let overlay = self.clone();
        let mut quit = self.quit.subscribe();
        tokio::spawn(async move {
            let mut broken = false;
            loop {
                tokio::select! {
                    frame = out_rx.recv() => {
                        let Some(frame) = frame else { break };
                        match tokio::time::timeout(overlay.config.write_timeout, tx.send(frame))
                            .await
                        {
                            Ok(Ok(())) => {}
                            Ok(Err(_)) | Err(_) => {
                                broken = true;
                                break;
                            }
                        }
                    }
                    _ = shut_rx.changed() => break,
                    _ = quit.recv() => break,
                }
            }
            // Flush whatever was already queued before tearing down.
            if !broken {
                while let Ok(frame) = out_rx.try_recv() {
                    match tokio::time::timeout(overlay.config.write_timeout, tx.send(frame)).await
                    {
                        Ok(Ok(())) => {}
                        Ok(Err(_)) | Err(_) => {
                            broken = true;
                            break;
                        }
                    }
                }
            }
            tx.close().await;
            if broken {
                overlay.drop_peer(&peer.id, "send failed");
            }
        });
    }

    fn spawn_reader(
        self: &Arc<Self>,
        peer: Arc<Peer>,
        mut shut_rx: tokio::sync::watch::Receiver<bool>,
        mut rx: crate::transport::BoxedReceiver,
    ) {
        let overlay = self.clone();
        let mut quit = self.quit.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    inbound = rx.recv() => match inbound {
                        Ok(Some(frame)) => match Envelope::decode(&frame) {
                            Ok(env) => overlay.dispatch(peer.id.clone(), env).await,
                            Err(err) => {
                                tracing::warn!("undecodable frame from {}: {err}", peer.id);
                                overlay.drop_peer(&peer.id, "undecodable frame");
                                break;
                            }
                        },
                        Ok(None) => {
                            overlay.drop_peer(&peer.id, "remote closed");
                            break;
                        }
                        Err(err) => {
                            tracing::debug!("receive from {} failed: {err}", peer.id);
                            overlay.drop_peer(&peer.id, "receive failed");
                            break;
                        }
                    },
                    _ = shut_rx.changed() => break,
                    _ = quit.recv() => break,
                }
            }
        });
    }
}
