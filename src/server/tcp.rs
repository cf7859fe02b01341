// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP/TCP server connections (§4.5): a listener accepting one task per
//! peer, each decoding self-delimited frames and replying with the
//! transaction id echoed back unchanged.

use std::{net::SocketAddr, sync::Arc};

use bytes::BytesMut;
use log::error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    codec,
    error::Result,
    frame::tcp::ResponseAdu,
    server::Server,
    transport::{IoTransport, Transport, TransportEvent},
};

/// Bind `addr` and serve MBAP/TCP connections against `server` until an
/// unrecoverable accept error occurs. One task is spawned per accepted
/// connection; none of them outlive a connection failure in another.
pub async fn serve(addr: SocketAddr, server: Arc<Server>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(err) = serve_connection(stream, server).await {
                error!("MBAP/TCP connection from {peer_addr} failed: {err}");
            }
        });
    }
}

/// Serve a single already-accepted connection until it closes.
pub async fn serve_connection<T>(stream: T, server: Arc<Server>) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut transport: Box<dyn Transport> = Box::new(IoTransport::net(stream));
    let mut codec = codec::tcp::ServerCodec;
    let mut buf = BytesMut::new();

    loop {
        loop {
            let before = buf.len();
            let adu = match codec.decode(&mut buf) {
                Ok(Some(adu)) => adu,
                Ok(None) => break,
                Err(err) => {
                    log::warn!("discarding malformed MBAP/TCP request: {err}");
                    if buf.len() == before {
                        break;
                    }
                    continue;
                }
            };
            let transaction_id = adu.hdr.transaction_id;
            let unit_id = adu.hdr.unit_id;
            let Some(payload) = server.dispatch(unit_id, &adu.request).await else {
                continue;
            };
            let mut wire = BytesMut::new();
            codec.encode(
                ResponseAdu {
                    hdr: crate::frame::tcp::Header { transaction_id, unit_id },
                    payload,
                },
                &mut wire,
            )?;
            transport.write(&wire).await?;
        }
        match transport.next_event().await {
            Some(TransportEvent::Data(bytes, _reply)) => buf.extend_from_slice(&bytes),
            Some(TransportEvent::Error(err)) => return Err(err.into()),
            Some(TransportEvent::Closed) | None => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Model;

    #[tokio::test]
    async fn replies_preserving_transaction_id() {
        let (client_io, server_io) = tokio::io::duplex(256);

        let mut server = Server::new();
        server.add(Model::new(0x06).with_write_single_register(|addr, value| async move {
            assert_eq!((addr, value), (0x0001, 0x0003));
            Ok(())
        }));
        let server = Arc::new(server);
        let serve_task = tokio::spawn(serve_connection(server_io, server));

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut client_io = client_io;
        client_io
            .write_all(&[0x00, 0x2A, 0x00, 0x00, 0x00, 0x06, 0x06, 0x06, 0x00, 0x01, 0x00, 0x03])
            .await
            .unwrap();

        let mut buf = [0u8; 12];
        client_io.read_exact(&mut buf).await.unwrap();
        assert_eq!(
            &buf,
            &[0x00, 0x2A, 0x00, 0x00, 0x00, 0x06, 0x06, 0x06, 0x00, 0x01, 0x00, 0x03]
        );

        drop(client_io);
        let _ = serve_task.await;
    }

    #[tokio::test]
    async fn malformed_request_is_dropped_without_closing_the_connection() {
        let (client_io, server_io) = tokio::io::duplex(256);

        let mut server = Server::new();
        server.add(Model::new(0x01).with_write_single_register(|addr, value| async move {
            assert_eq!((addr, value), (0x0001, 0x0003));
            Ok(())
        }));
        let server = Arc::new(server);
        let serve_task = tokio::spawn(serve_connection(server_io, server));

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut client_io = client_io;
        // FC05 (write single coil) with a coil value that is neither 0x0000
        // nor 0xFF00: the request fails to decode past the MBAP header.
        client_io
            .write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x05, 0x00, 0x00, 0x12, 0x34])
            .await
            .unwrap();
        client_io
            .write_all(&[0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x01, 0x00, 0x03])
            .await
            .unwrap();

        let mut buf = [0u8; 12];
        client_io.read_exact(&mut buf).await.unwrap();
        assert_eq!(
            &buf,
            &[0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x01, 0x00, 0x03]
        );

        drop(client_io);
        let _ = serve_task.await;
    }

    #[tokio::test]
    async fn broadcast_suppresses_the_reply() {
        let (client_io, server_io) = tokio::io::duplex(256);

        let mut server = Server::new();
        server.add(Model::new(0x06).with_write_single_register(|_, _| async { Ok(()) }));
        let server = Arc::new(server);
        let serve_task = tokio::spawn(serve_connection(server_io, server));

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut client_io = client_io;
        client_io
            .write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x00, 0x06, 0x00, 0x01, 0x00, 0x03])
            .await
            .unwrap();

        let mut buf = [0u8; 1];
        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), client_io.read(&mut buf))
                .await;
        assert!(result.is_err(), "a broadcast request must not get a reply");

        drop(client_io);
        let _ = serve_task.await;
    }
}
