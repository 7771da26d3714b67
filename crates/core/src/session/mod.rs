//! Session message surface of the authenticated transport.
//!
//! The overlay consumes sessions as opaque duplex byte streams; this
//! module defines the envelope the session layer moves and the pump that
//! forwards application messages onto a link and back. Key material in the
//! header is carried verbatim, the handshake producing it lives outside
//! this crate.

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::error::Result;
use crate::transport::Link;

/// Security envelope of one session message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHeader {
    /// Identity name of the sender.
    pub origin: String,
    /// Identity name of the addressee.
    pub target: String,
    /// Payload encryption key, already sealed for the addressee.
    pub key: Vec<u8>,
    /// Cipher initialization vector.
    pub iv: Vec<u8>,
    /// Authentication code over the payload, absent on unauthenticated
    /// frames.
    pub mac: Option<Vec<u8>>,
}

/// One message moving through a session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMessage {
    /// Security envelope.
    pub head: SessionHeader,
    /// Payload bytes.
    pub data: Vec<u8>,
}

impl SessionMessage {
    /// Serialize for the wire.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(Error::Serialize)
    }

    /// Deserialize off the wire.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        bincode::deserialize(raw).map_err(Error::Deserialize)
    }
}

/// Channel pair an application uses to talk through a pumped session.
pub struct SessionChannels {
    /// Messages to frame onto the link.
    pub outbound: mpsc::Sender<SessionMessage>,
    /// Messages received off the link.
    pub inbound: mpsc::Receiver<SessionMessage>,
}

/// Pump a link in both directions until it closes or `quit` fires.
/// Messages submitted on the outbound channel are framed onto the link in
/// order; inbound frames are decoded and handed to the inbound channel.
pub fn communicate(link: Link, mut quit: broadcast::Receiver<()>) -> SessionChannels {
    let Link { name, tx, mut rx } = link;
    let (out_tx, mut out_rx) = mpsc::channel::<SessionMessage>(64);
    let (in_tx, in_rx) = mpsc::channel::<SessionMessage>(64);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = out_rx.recv() => {
                    let Some(msg) = msg else { break };
                    let frame = match msg.encode() {
                        Ok(frame) => frame,
                        Err(err) => {
                            tracing::warn!("session to {name} dropped a message: {err}");
                            continue;
                        }
                    };
                    if tx.send(frame.into()).await.is_err() {
                        break;
                    }
                }
                frame = rx.recv() => {
                    let frame = match frame {
                        Ok(Some(frame)) => frame,
                        Ok(None) | Err(_) => break,
                    };
                    match SessionMessage::decode(&frame) {
                        Ok(msg) => {
                            if in_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            tracing::warn!("session from {name} sent garbage: {err}");
                            break;
                        }
                    }
                }
                _ = quit.recv() => break,
            }
        }
        tx.close().await;
    });

    SessionChannels {
        outbound: out_tx,
        inbound: in_rx,
    }
}
