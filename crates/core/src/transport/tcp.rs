//! Framed TCP transport.
//!
//! Frames are length prefixed with a big endian u32, capped at
//! [MAX_FRAME_SIZE]. A single hello frame carrying the identity name is
//! exchanged right after connecting, standing in for the session
//! authentication collaborator that tags every stream with the negotiated
//! peer name.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;

use super::Link;
use super::LinkReceiver;
use super::LinkSender;
use super::Transport;
use crate::consts::MAX_FRAME_SIZE;
use crate::error::Error;
use crate::error::Result;

/// TCP session transport bound to one listening socket.
pub struct TcpTransport {
    name: String,
    addr: String,
    listener: AsyncMutex<TcpListener>,
}

impl TcpTransport {
    /// Bind `addr` and advertise the resolved local address.
    pub async fn bind(name: impl Into<String>, addr: &str) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?.to_string();
        Ok(Arc::new(Self {
            name: name.into(),
            addr,
            listener: AsyncMutex::new(listener),
        }))
    }

    async fn handshake(&self, stream: TcpStream, dialer: bool) -> Result<Link> {
        stream.set_nodelay(true)?;
        let (mut rd, mut wr) = stream.into_split();

        let remote = if dialer {
            write_frame(&mut wr, self.name.as_bytes()).await?;
            read_frame(&mut rd).await?.ok_or(Error::LinkClosed)?
        } else {
            let name = read_frame(&mut rd).await?.ok_or(Error::LinkClosed)?;
            write_frame(&mut wr, self.name.as_bytes()).await?;
            name
        };
        let name = String::from_utf8(remote.to_vec())
            .map_err(|_| Error::MalformedId("non utf-8 identity hello".to_string()))?;
        Ok(Link {
            name,
            tx: Box::new(TcpSender {
                writer: AsyncMutex::new(Some(wr)),
            }),
            rx: Box::new(TcpReceiver { reader: rd }),
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_name(&self) -> &str {
        &self.name
    }

    fn addrs(&self) -> Vec<String> {
        vec![self.addr.clone()]
    }

    async fn dial(&self, addrs: &[String]) -> Result<Link> {
        for addr in addrs {
            let Ok(stream) = TcpStream::connect(addr).await else {
                continue;
            };
            match self.handshake(stream, true).await {
                Ok(link) => return Ok(link),
                Err(err) => {
                    tracing::debug!("identity hello with {addr} failed: {err}");
                    continue;
                }
            }
        }
        Err(Error::Unreachable(addrs.join(", ")))
    }

    async fn accept(&self) -> Result<Option<Link>> {
        let (stream, _) = {
            let listener = self.listener.lock().await;
            listener.accept().await?
        };
        match self.handshake(stream, false).await {
            Ok(link) => Ok(Some(link)),
            Err(err) => {
                tracing::debug!("inbound identity hello failed: {err}");
                Err(err)
            }
        }
    }
}

/// Sending half of a TCP link.
pub struct TcpSender {
    writer: AsyncMutex<Option<OwnedWriteHalf>>,
}

#[async_trait]
impl LinkSender for TcpSender {
    async fn send(&self, frame: Bytes) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(Error::LinkBroken)?;
        if let Err(err) = write_frame(writer, &frame).await {
            // A failed write poisons the stream, tear it down.
            guard.take();
            return Err(err);
        }
        Ok(())
    }

    async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}

/// Receiving half of a TCP link.
pub struct TcpReceiver {
    reader: OwnedReadHalf,
}

#[async_trait]
impl LinkReceiver for TcpReceiver {
    async fn recv(&mut self) -> Result<Option<Bytes>> {
        read_frame(&mut self.reader).await
    }
}

async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, frame: &[u8]) -> Result<()> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(Error::OversizedFrame(frame.len()));
    }
    writer.write_u32(frame.len() as u32).await?;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Bytes>> {
    let size = match reader.read_u32().await {
        Ok(size) => size as usize,
        // EOF on the length word is an orderly teardown.
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if size > MAX_FRAME_SIZE {
        return Err(Error::OversizedFrame(size));
    }
    let mut buf = vec![0; size];
    reader.read_exact(&mut buf).await?;
    Ok(Some(Bytes::from(buf)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hello_negotiates_names() {
        let server = TcpTransport::bind("server", "127.0.0.1:0").await.unwrap();
        let client = TcpTransport::bind("client", "127.0.0.1:0").await.unwrap();

        let addr = server.addrs();
        let dial = tokio::spawn(async move { client.dial(&addr).await.unwrap() });
        let accepted = server.accept().await.unwrap().unwrap();
        let dialed = dial.await.unwrap();

        assert_eq!(accepted.name, "client");
        assert_eq!(dialed.name, "server");
    }

    #[tokio::test]
    async fn frames_round_trip() {
        let server = TcpTransport::bind("server", "127.0.0.1:0").await.unwrap();
        let client = TcpTransport::bind("client", "127.0.0.1:0").await.unwrap();

        let addr = server.addrs();
        let dial = tokio::spawn(async move { client.dial(&addr).await.unwrap() });
        let mut accepted = server.accept().await.unwrap().unwrap();
        let mut dialed = dial.await.unwrap();

        dialed.tx.send(Bytes::from(vec![7u8; 10_000])).await.unwrap();
        let got = accepted.rx.recv().await.unwrap().unwrap();
        assert_eq!(got.len(), 10_000);
        assert!(got.iter().all(|b| *b == 7));

        accepted.tx.close().await;
        assert_eq!(dialed.rx.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn dialing_dead_endpoint_fails() {
        let client = TcpTransport::bind("client", "127.0.0.1:0").await.unwrap();
        assert!(matches!(
            client.dial(&["127.0.0.1:1".to_string()]).await,
            Err(Error::Unreachable(_))
        ));
    }
}
