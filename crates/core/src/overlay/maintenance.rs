//! Periodic maintenance and the peer drop protocol.
//!
//! The heartbeat service drives [BeatHandler], which sends the periodic
//! active and passive beats, gossips fresh routing state, asks silent
//! peers for repairs and reports detected deaths. State assembly happens
//! under the overlay read lock; the sends themselves are plain queue
//! pushes after the lock is released.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;

use super::peer::Peer;
use super::space::Id;
use super::wire::Envelope;
use super::wire::Header;
use super::wire::State;
use super::Overlay;
use super::Status;
use crate::heart::HeartCallback;

/// Adapter feeding heartbeat events into the overlay.
pub(crate) struct BeatHandler {
    overlay: Arc<Overlay>,
}

impl BeatHandler {
    pub fn new(overlay: Arc<Overlay>) -> Self {
        Self { overlay }
    }
}

#[async_trait]
impl HeartCallback for BeatHandler {
    async fn beat(&self) {
        self.overlay.beat_tick().await;
    }

    async fn dead(&self, id: Id) {
        self.overlay.declare_dead(id).await;
    }
}

impl Overlay {
    /// One heartbeat period: beat every peer, gossip state if the table
    /// changed since the last tick, nudge silent peers and invoke the
    /// upper layer hook.
    pub(crate) async fn beat_tick(&self) {
        let (beats, repairs, version, gossip) = {
            let st = self.read();
            if st.status != Status::Active {
                return;
            }
            let mut beats = Vec::with_capacity(st.peers.len());
            let mut repairs = Vec::new();
            for (id, peer) in &st.peers {
                beats.push((peer.clone(), !st.table.contains(id)));
                let silent = peer.silent_for(self.epoch);
                if silent > self.config.silent_timeout && silent <= self.config.kill_timeout {
                    repairs.push(peer.clone());
                }
            }
            let gossip = st.time > self.stat.load(Ordering::Relaxed);
            (beats, repairs, st.time, gossip)
        };

        for (peer, passive) in &beats {
            self.send_beat(peer, *passive);
        }
        if gossip {
            self.stat.store(version, Ordering::Relaxed);
            for (peer, _) in &beats {
                self.send_state(peer);
            }
        }
        for peer in &repairs {
            self.send_repair(peer);
        }
        if let Some(app) = self.app_callback() {
            app.beat().await;
        }
    }

    /// The heartbeat service declared a monitored identity dead. Plain ids
    /// are overlay peers and follow the drop protocol; compound ids are
    /// topic members and get reported to the upper layer.
    pub(crate) async fn declare_dead(&self, id: Id) {
        let (topic, node) = self.space.split_member(&id);
        if topic == Id::from(0u64) {
            tracing::warn!("overlay {} peer {node} death report", self.name);
            self.drop_peer(&node, "heartbeat death");
            return;
        }
        match self.app_callback() {
            Some(app) => app.member_dead(topic, node).await,
            None => tracing::info!("topic {topic} already dead, member {node} report dropped"),
        }
    }

    /// Remove a peer from the registry and every table slot, stop
    /// monitoring it and tear its link down. Schedules a bootstrap
    /// assisted repair when the table runs too thin.
    pub(crate) fn drop_peer(&self, id: &Id, reason: &str) {
        let (peer, starved) = {
            let mut st = self.write();
            let Some(peer) = st.peers.remove(id) else {
                tracing::debug!("drop of unknown peer {id}, ignored");
                return;
            };
            if st.table.remove(id) {
                st.time += 1;
            }
            let starved = st.status == Status::Active && st.table.fill() < self.config.min_fill;
            (peer, starved)
        };
        tracing::info!("overlay {} dropped peer {id}: {reason}", self.name);
        if let Err(err) = self.heart.unmonitor(id) {
            tracing::debug!("unmonitor of {id}: {err}");
        }
        peer.close();
        if starved {
            // Widen the seeder's search to refill the table.
            self.phase.fetch_add(1, Ordering::Relaxed);
            tracing::info!("overlay {} table under min fill, rescanning seeds", self.name);
        }
    }

    /// Send through the peer queue, falling back to the drop protocol on
    /// failure. There is no per message retry.
    pub(crate) fn send_or_drop(&self, peer: &Arc<Peer>, env: &Envelope) {
        if peer.send(env).is_err() {
            self.drop_peer(&peer.id, "send failed");
        }
    }

    /// Announce the local id and endpoints toward a peer.
    pub(crate) fn send_join(&self, peer: &Arc<Peer>) {
        let head = Header::join(&self.node_id, self.transport.addrs());
        self.send_or_drop(peer, &Envelope::new(head));
    }

    /// Ask a peer for a fresh state exchange.
    pub(crate) fn send_repair(&self, peer: &Arc<Peer>) {
        let head = Header::repair(&self.node_id);
        self.send_or_drop(peer, &Envelope::new(head));
    }

    /// Heartbeat a peer, tagged by whether it occupies a table slot.
    pub(crate) fn send_beat(&self, peer: &Arc<Peer>, passive: bool) {
        let head = Header::beat(&peer.id, passive);
        self.send_or_drop(peer, &Envelope::new(head));
    }

    /// Send the state snapshot a peer needs: our own endpoints, the leaf
    /// set and the routing row on the shared prefix.
    pub(crate) fn send_state(&self, peer: &Arc<Peer>) {
        let state = {
            let st = self.read();
            let mut addrs = BTreeMap::new();
            addrs.insert(self.node_id.to_string(), self.transport.addrs());
            for leaf in st.table.leaves() {
                if let Some(entry) = st.peers.get(leaf) {
                    addrs.insert(leaf.to_string(), entry.addrs());
                }
            }
            let (level, _) = self.space.prefix(&self.node_id, &peer.id);
            if level < self.space.digits() {
                for cell in st.table.row(level).iter().flatten() {
                    if let Some(entry) = st.peers.get(cell) {
                        addrs.insert(cell.to_string(), entry.addrs());
                    }
                }
            }
            State {
                addrs,
                version: st.time,
            }
        };
        let head = Header::exchange(&peer.id, state);
        self.send_or_drop(peer, &Envelope::new(head));
    }

    /// Notify a peer of the local node leaving.
    pub(crate) fn send_close(&self, peer: &Arc<Peer>) {
        let head = Header::close(&peer.id);
        self.send_or_drop(peer, &Envelope::new(head));
    }
}
