//! Wire protocol of the overlay.
//!
//! Every overlay packet is an [Envelope] carrying an opcode tagged [Header]
//! and an opaque payload. Headers are serialized with bincode; address maps
//! are ordered so a fixed input always encodes to the same bytes.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

use super::space::Id;
use crate::error::Error;
use crate::error::Result;

/// Overlay operation codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpCode {
    /// Application layer message.
    Nop,
    /// Join request.
    Join,
    /// Routing table repair request.
    Repair,
    /// Heartbeat for an active peer.
    Active,
    /// Heartbeat for a passive peer.
    Passive,
    /// Routing state exchange.
    Exchange,
    /// Leave request.
    Close,
}

/// Routing state exchange message: the sender's known peers with their
/// network endpoints, versioned to skip stale snapshots.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Known peers and their network endpoints, keyed by the id string.
    pub addrs: BTreeMap<String, Vec<String>>,
    /// Version counter to skip old messages.
    pub version: u64,
}

/// Extra headers for the overlay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// The operation to execute.
    pub op: OpCode,
    /// Destination id.
    pub dest: Id,
    /// Routing table state exchange.
    pub state: Option<State>,
    /// Additional upper layer headers, opaque to the overlay.
    pub meta: Option<Vec<u8>>,
}

impl Header {
    /// Join announcement: routed toward the sender's own id, carrying only
    /// the sender's addresses.
    pub fn join(sender: &Id, addrs: Vec<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(sender.to_string(), addrs);
        Self {
            op: OpCode::Join,
            dest: sender.clone(),
            state: Some(State {
                addrs: map,
                version: 0,
            }),
            meta: None,
        }
    }

    /// Request a fresh state exchange to fill gaps.
    pub fn repair(sender: &Id) -> Self {
        Self {
            op: OpCode::Repair,
            dest: sender.clone(),
            state: None,
            meta: None,
        }
    }

    /// Heartbeat, tagged whether the connection is an active route entry.
    pub fn beat(dest: &Id, passive: bool) -> Self {
        Self {
            op: if passive {
                OpCode::Passive
            } else {
                OpCode::Active
            },
            dest: dest.clone(),
            state: None,
            meta: None,
        }
    }

    /// Full state snapshot for the destination.
    pub fn exchange(dest: &Id, state: State) -> Self {
        Self {
            op: OpCode::Exchange,
            dest: dest.clone(),
            state: Some(state),
            meta: None,
        }
    }

    /// Graceful leave notification.
    pub fn close(dest: &Id) -> Self {
        Self {
            op: OpCode::Close,
            dest: dest.clone(),
            state: None,
            meta: None,
        }
    }

    /// Application message keyed by an upper layer header.
    pub fn app(dest: &Id, meta: Vec<u8>) -> Self {
        Self {
            op: OpCode::Nop,
            dest: dest.clone(),
            state: None,
            meta: Some(meta),
        }
    }
}

/// The framed packet container moving between two peers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Overlay header.
    pub head: Header,
    /// Payload bytes.
    pub data: Vec<u8>,
}

impl Envelope {
    /// Wrap a bare header with no payload.
    pub fn new(head: Header) -> Self {
        Self { head, data: Vec::new() }
    }

    /// Wrap a header together with its payload.
    pub fn with_data(head: Header, data: Vec<u8>) -> Self {
        Self { head, data }
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> Result<Bytes> {
        bincode::serialize(self)
            .map(Bytes::from)
            .map_err(Error::Serialize)
    }

    /// Deserialize off the wire.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        bincode::deserialize(raw).map_err(Error::Deserialize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_bit_for_bit() {
        let mut addrs = BTreeMap::new();
        addrs.insert("0x10".to_string(), vec!["127.0.0.1:14142".to_string()]);
        addrs.insert("0xf0".to_string(), vec![
            "10.0.0.7:24142".to_string(),
            "[::1]:24142".to_string(),
        ]);

        let env = Envelope::with_data(
            Header {
                op: OpCode::Exchange,
                dest: Id::from(0x85u64),
                state: Some(State { addrs, version: 42 }),
                meta: Some(vec![0xde, 0xad]),
            },
            b"payload".to_vec(),
        );
        let decoded = Envelope::decode(&env.encode().unwrap()).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn optional_fields_survive_absence() {
        let env = Envelope::new(Header::beat(&Id::from(7u64), true));
        let decoded = Envelope::decode(&env.encode().unwrap()).unwrap();
        assert_eq!(decoded.head.op, OpCode::Passive);
        assert_eq!(decoded.head.state, None);
        assert_eq!(decoded.head.meta, None);
    }

    #[test]
    fn encoding_is_deterministic() {
        let mut addrs = BTreeMap::new();
        addrs.insert("0x01".to_string(), vec!["a:1".to_string()]);
        addrs.insert("0x02".to_string(), vec!["b:2".to_string()]);
        let env = Envelope::new(Header::exchange(&Id::from(1u64), State {
            addrs,
            version: 1,
        }));
        assert_eq!(env.encode().unwrap(), env.encode().unwrap());
    }

    #[test]
    fn join_carries_only_sender_addrs() {
        let head = Header::join(&Id::from(0x33u64), vec!["host:1".to_string()]);
        assert_eq!(head.op, OpCode::Join);
        assert_eq!(head.dest, Id::from(0x33u64));
        let state = head.state.unwrap();
        assert_eq!(state.addrs.len(), 1);
        assert_eq!(state.addrs["0x33"], vec!["host:1".to_string()]);
    }
}
