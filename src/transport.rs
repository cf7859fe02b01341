// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The abstract transport contract (§4.1).
//!
//! A transport is a type-erased, ordered byte-duplex connection. The
//! protocol engine only ever talks to this trait; concrete transports
//! (a serial port, a `TcpStream`, a UDP socket demultiplexed by peer
//! address) are supplied by the embedding application and are out of
//! scope for this crate — see [`IoTransport`] for the adapter that turns
//! any [`AsyncRead`] + [`AsyncWrite`] connection into one.

use std::{future::Future, pin::Pin, sync::Arc};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::Mutex,
};

use crate::Result;

/// Distinguishes a serial transport (whose baud rate feeds the RTU 3.5T
/// calculation) from any networked transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// A serial line, at the given baud rate.
    Serial { baud_rate: u32 },
    /// Anything else (TCP, UDP, an in-memory duplex …).
    Net,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Targets a reply at the peer that produced a [`TransportEvent::Data`]
/// event. For a point-to-point stream transport (TCP client socket, serial
/// port) this is necessarily the same connection the bytes arrived on; for
/// a UDP socket or a TCP server fielding many peers on one transport it
/// carries the originating peer's address so the reply reaches the right
/// client.
pub struct Reply(Arc<dyn Fn(Bytes) -> BoxFuture<'static, Result<()>> + Send + Sync>);

impl Reply {
    /// Build a reply handle from a closure.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self(Arc::new(move |bytes| Box::pin(f(bytes))))
    }

    /// A reply that is a no-op; used by the server for broadcast requests,
    /// for which §4.5 mandates "the reply closure for a broadcast is a
    /// no-op".
    #[must_use]
    pub fn discard() -> Self {
        Self::new(|_bytes| async { Ok(()) })
    }

    /// Send `bytes` to the originating peer.
    pub async fn send(&self, bytes: Bytes) -> Result<()> {
        (self.0)(bytes).await
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply").finish_non_exhaustive()
    }
}

/// An event emitted by a [`Transport`].
#[derive(Debug)]
pub enum TransportEvent {
    /// A burst of inbound bytes, together with a handle to reply to
    /// whichever peer sent them.
    Data(Bytes, Reply),
    /// The transport failed; it is not usable afterwards.
    Error(std::io::Error),
    /// The transport was closed by the peer or by a local `close()`.
    Closed,
}

/// The transport contract consumed by the protocol engine (§4.1).
#[async_trait]
pub trait Transport: Send {
    /// Open the transport. Idempotent; fails with an error once the
    /// transport has been [`destroy`](Transport::destroy)ed.
    async fn open(&mut self) -> Result<()>;

    /// Write `bytes`, completing once they are flushed. Fails if the
    /// transport is not open.
    async fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Close the transport. Idempotent.
    async fn close(&mut self) -> Result<()>;

    /// Permanently destroy the transport; subsequent `open` calls fail.
    fn destroy(&mut self);

    fn is_open(&self) -> bool;

    fn is_destroyed(&self) -> bool;

    /// Distinguishes serial transports (for RTU 3.5T timing) from
    /// networked ones.
    fn kind(&self) -> TransportKind;

    /// Await the next inbound event. Returns `None` once the transport is
    /// destroyed and will never produce another event.
    async fn next_event(&mut self) -> Option<TransportEvent>;
}

/// Adapts any [`AsyncRead`] + [`AsyncWrite`] connection (a `TcpStream`, a
/// `tokio_serial::SerialStream`, an in-memory `tokio::io::DuplexStream`, …)
/// into a [`Transport`]. Since such a connection has exactly one peer, its
/// [`Reply`] simply writes back on the same connection — matching §4.1's
/// "ignored/self-targeting for client sockets and serial".
pub struct IoTransport<T> {
    read_half: ReadHalf<T>,
    write_half: Arc<Mutex<WriteHalf<T>>>,
    kind: TransportKind,
    open: bool,
    destroyed: bool,
}

impl<T> std::fmt::Debug for IoTransport<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoTransport")
            .field("kind", &self.kind)
            .field("open", &self.open)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

impl<T> IoTransport<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an already-connected duplex stream as a networked transport.
    #[must_use]
    pub fn net(io: T) -> Self {
        Self::new(io, TransportKind::Net)
    }

    /// Wrap an already-connected duplex stream as a serial transport at the
    /// given baud rate, used by the RTU framer to compute its 3.5T timer.
    #[must_use]
    pub fn serial(io: T, baud_rate: u32) -> Self {
        Self::new(io, TransportKind::Serial { baud_rate })
    }

    fn new(io: T, kind: TransportKind) -> Self {
        let (read_half, write_half) = tokio::io::split(io);
        Self {
            read_half,
            write_half: Arc::new(Mutex::new(write_half)),
            kind,
            open: true,
            destroyed: false,
        }
    }
}

#[async_trait]
impl<T> Transport for IoTransport<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn open(&mut self) -> Result<()> {
        if self.destroyed {
            return Err(crate::Error::Transport(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "transport is destroyed",
            )));
        }
        self.open = true;
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.open {
            return Err(crate::Error::Transport(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "transport is not open",
            )));
        }
        let mut write_half = self.write_half.lock().await;
        write_half.write_all(bytes).await?;
        write_half.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn destroy(&mut self) {
        self.open = false;
        self.destroyed = true;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        if self.destroyed {
            return None;
        }
        let mut buf = BytesMut::with_capacity(1024);
        match self.read_half.read_buf(&mut buf).await {
            Ok(0) => {
                self.open = false;
                Some(TransportEvent::Closed)
            }
            Ok(_) => {
                let write_half = Arc::clone(&self.write_half);
                let reply = Reply::new(move |bytes| {
                    let write_half = Arc::clone(&write_half);
                    async move {
                        let mut write_half = write_half.lock().await;
                        write_half.write_all(&bytes).await?;
                        write_half.flush().await?;
                        Ok(())
                    }
                });
                Some(TransportEvent::Data(buf.freeze(), reply))
            }
            Err(err) => Some(TransportEvent::Error(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn io_transport_round_trips_bytes() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut transport = IoTransport::net(client);

        server.write_all(b"hello").await.unwrap();
        let event = transport.next_event().await.unwrap();
        match event {
            TransportEvent::Data(bytes, _reply) => assert_eq!(&bytes[..], b"hello"),
            other => panic!("unexpected event: {other:?}"),
        }

        transport.write(b"world").await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");
    }

    #[tokio::test]
    async fn destroyed_transport_refuses_to_open() {
        let (client, _server) = tokio::io::duplex(64);
        let mut transport = IoTransport::net(client);
        transport.destroy();
        assert!(transport.open().await.is_err());
        assert!(transport.next_event().await.is_none());
    }
}
