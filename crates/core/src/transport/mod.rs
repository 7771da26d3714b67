//! Session transport management.
//!
//! The overlay treats sessions as opaque duplex byte streams tagged by a
//! negotiated peer identity name. This module defines that surface and two
//! implementations: an in-process [memory] hub for multi overlay tests and
//! a framed [tcp] transport for real deployments.

pub mod memory;
pub mod tcp;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Boxed sending half of a link.
pub type BoxedSender = Box<dyn LinkSender>;
/// Boxed receiving half of a link.
pub type BoxedReceiver = Box<dyn LinkReceiver>;

/// An established duplex channel to one remote node.
pub struct Link {
    /// Negotiated identity name of the remote.
    pub name: String,
    /// Sending half.
    pub tx: BoxedSender,
    /// Receiving half.
    pub rx: BoxedReceiver,
}

/// Outbound half of a peer link.
#[async_trait]
pub trait LinkSender: Send + Sync {
    /// Frame one message onto the underlying session. Fails with a broken
    /// link error once the session is torn down.
    async fn send(&self, frame: Bytes) -> Result<()>;

    /// Orderly teardown of the outbound direction.
    async fn close(&self);
}

/// Inbound half of a peer link.
#[async_trait]
pub trait LinkReceiver: Send {
    /// The next inbound framed message, or `None` on orderly teardown.
    async fn recv(&mut self) -> Result<Option<Bytes>>;
}

/// Dialing and listening surface of a session transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The identity name links from this transport authenticate as.
    fn local_name(&self) -> &str;

    /// Endpoints remote nodes can dial to reach this transport.
    fn addrs(&self) -> Vec<String>;

    /// Open a session toward the first reachable of the given endpoints.
    async fn dial(&self, addrs: &[String]) -> Result<Link>;

    /// The next inbound session, or `None` once the transport shut down.
    async fn accept(&self) -> Result<Option<Link>>;
}
