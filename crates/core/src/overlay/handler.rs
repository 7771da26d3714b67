//! Inbound packet dispatch.
//!
//! Packets arrive in order per peer link; the reader task feeds them here
//! one at a time. Handlers take the overlay lock only to decide, never
//! across an await or a send: messages are enqueued after the lock is
//! released, and dials for newly discovered nodes run in the calling
//! reader task.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::space::Id;
use super::wire::Envelope;
use super::wire::OpCode;
use super::wire::State;
use super::Overlay;
use super::Status;

impl Overlay {
    /// Demultiplex one inbound packet from the peer identified by `from`.
    pub(crate) async fn dispatch(self: &Arc<Self>, from: Id, env: Envelope) {
        if matches!(self.status(), Status::Closing | Status::Closed) {
            return;
        }
        tracing::trace!("overlay {} got {:?} from {}", self.name, env.head.op, from);
        match env.head.op {
            OpCode::Nop => self.forward_or_deliver(env).await,
            OpCode::Join => self.handle_join(from, env).await,
            OpCode::Repair => self.handle_repair(from),
            OpCode::Active => self.handle_beat(from, false),
            OpCode::Passive => self.handle_beat(from, true),
            OpCode::Exchange => self.handle_exchange(from, env).await,
            OpCode::Close => self.drop_peer(&from, "peer left"),
        }
    }

    /// Route a packet one hop toward its destination, or hand it to the
    /// upper layer when this node is the closest one known.
    pub(crate) async fn forward_or_deliver(&self, env: Envelope) {
        let next = {
            let st = self.read();
            st.table
                .route(&env.head.dest)
                .and_then(|id| st.peers.get(&id).cloned())
        };
        match next {
            Some(peer) => self.send_or_drop(&peer, &env),
            None => {
                let meta = env.head.meta.unwrap_or_default();
                if let Some(app) = self.app_callback() {
                    app.deliver(meta, env.data).await;
                } else {
                    tracing::debug!("overlay {} has no upper layer, message dropped", self.name);
                }
            }
        }
    }

    /// A node announced itself: discover it, forward the announcement
    /// along the routing path and answer with a tailored state snapshot.
    async fn handle_join(self: &Arc<Self>, from: Id, env: Envelope) {
        let joiner = env.head.dest.clone();
        if joiner == self.node_id {
            tracing::debug!("overlay {} ignoring its own join echo", self.name);
            return;
        }
        let Some(state) = env.head.state.clone() else {
            tracing::warn!("join from {from} carries no state, ignored");
            return;
        };
        let addrs = state
            .addrs
            .get(&joiner.to_string())
            .cloned()
            .unwrap_or_default();

        // Forward along the path toward the joiner's own id.
        let next = {
            let st = self.read();
            st.table
                .route(&joiner)
                .filter(|id| *id != joiner)
                .and_then(|id| st.peers.get(&id).cloned())
        };
        if let Some(next) = next {
            self.send_or_drop(&next, &env);
        }

        // Answer with our state so the joiner can populate its table.
        let peer = {
            let st = self.read();
            st.peers.get(&joiner).cloned()
        };
        let peer = match peer {
            Some(peer) => {
                peer.set_addrs(addrs);
                peer
            }
            None => match self.connect(&addrs).await {
                Ok(peer) => peer,
                Err(err) => {
                    tracing::debug!("cannot reach joiner {joiner}: {err}");
                    return;
                }
            },
        };
        self.send_state(&peer);
    }

    /// Merge a state snapshot: skip stale versions, refresh the sender's
    /// endpoints and dial every node we do not know yet.
    async fn handle_exchange(self: &Arc<Self>, from: Id, env: Envelope) {
        let Some(state) = env.head.state else {
            tracing::warn!("exchange from {from} carries no state, ignored");
            return;
        };
        let Some(peer) = self.read().peers.get(&from).cloned() else {
            tracing::debug!("exchange from unknown peer {from}, ignored");
            return;
        };
        if let Err(err) = peer.advance_version(state.version) {
            tracing::debug!("exchange from {from} dropped: {err}");
            return;
        }

        // The first exchange moves a joining node into synchronization.
        {
            let mut st = self.write();
            if st.status == Status::Joining {
                st.status = Status::Synchronizing;
                tracing::info!("overlay {} synchronizing", self.name);
            }
        }
        if let Some(addrs) = state.addrs.get(&from.to_string()) {
            peer.set_addrs(addrs.clone());
        }
        self.merge_state(&state).await;
    }

    /// Dial every address in a snapshot we have no live peer for.
    async fn merge_state(self: &Arc<Self>, state: &State) {
        for (sid, addrs) in &state.addrs {
            let id: Id = match sid.parse() {
                Ok(id) => id,
                Err(err) => {
                    tracing::warn!("exchange entry with malformed id {sid}: {err}");
                    continue;
                }
            };
            if id == self.node_id {
                continue;
            }
            let known = self.read().peers.contains_key(&id);
            if known {
                continue;
            }
            match self.connect(addrs).await {
                Ok(_) => tracing::debug!("overlay {} discovered {id}", self.name),
                Err(err) => tracing::debug!("discovered node {id} unreachable: {err}"),
            }
        }
    }

    /// Answer a repair request with a state snapshot tailored to the
    /// requester.
    fn handle_repair(&self, from: Id) {
        let peer = self.read().peers.get(&from).cloned();
        match peer {
            Some(peer) => self.send_state(&peer),
            None => tracing::debug!("repair request from unknown peer {from}, ignored"),
        }
    }

    /// Heartbeat bookkeeping: refresh liveness and reconcile the link role
    /// when the two sides disagree about table membership.
    fn handle_beat(&self, from: Id, passive: bool) {
        let (peer, in_table) = {
            let st = self.read();
            (st.peers.get(&from).cloned(), st.table.contains(&from))
        };
        let Some(peer) = peer else {
            tracing::debug!("beat from unknown peer {from}, ignored");
            return;
        };
        peer.touch(self.epoch);
        if let Err(err) = self.heart.ping(&from) {
            tracing::debug!("ping for {from} not monitored: {err}");
        }
        peer.remote_active.store(!passive, Ordering::Relaxed);

        // We rely on this link while the remote holds it passive: ask for
        // a state refresh so both sides converge on the same view.
        if in_table && passive {
            self.send_repair(&peer);
        }
    }
}
