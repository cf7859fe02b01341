// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! ASCII server connections (§4.5). Framing is self-delimited by `:`/`\r\n`,
//! so unlike RTU there is no silence timer: the greedy decoder used by a
//! client works directly for a server too.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    codec,
    error::Result,
    frame::ascii::ResponseAdu,
    server::Server,
    transport::{IoTransport, Transport, TransportEvent},
};

/// Serve one ASCII connection until the transport closes, dispatching every
/// decoded request against `server` and writing back whatever non-`None`
/// response it produces.
pub async fn serve<T>(transport: T, server: Arc<Server>) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut transport: Box<dyn Transport> = Box::new(IoTransport::net(transport));
    let mut codec = codec::ascii::ServerCodec;
    let mut buf = BytesMut::new();

    loop {
        loop {
            let before = buf.len();
            let adu = match codec.decode(&mut buf) {
                Ok(Some(adu)) => adu,
                Ok(None) => break,
                Err(err) => {
                    log::warn!("discarding malformed ASCII request: {err}");
                    if buf.len() == before {
                        break;
                    }
                    continue;
                }
            };
            let Some(payload) = server.dispatch(adu.hdr.slave.0, &adu.request).await else {
                continue;
            };
            let mut wire = BytesMut::new();
            codec.encode(ResponseAdu { hdr: adu.hdr, payload }, &mut wire)?;
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
    use crate::{frame::Response, server::Model};

    /// Hex-encode `body` (unit byte + PDU) into a `:...LRC\r\n` frame.
    fn ascii_frame(body: &[u8]) -> String {
        let mut s = String::from(":");
        for &b in body {
            s.push_str(&format!("{b:02X}"));
        }
        s.push_str(&format!("{:02X}", crate::util::lrc(body)));
        s.push_str("\r\n");
        s
    }

    #[tokio::test]
    async fn replies_to_a_registered_unit() {
        let (transport_io, mut peer) = tokio::io::duplex(256);

        let mut server = Server::new();
        server.add(
            Model::new(0x0B).with_read_coils(|addr, quantity| async move {
                assert_eq!((addr, quantity), (0x0013, 0x0013));
                Ok(vec![true; 0x0013])
            }),
        );
        let server = Arc::new(server);
        let serve_task = tokio::spawn(serve(transport_io, server));

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        peer.write_all(b":0B0100130013CE\r\n").await.unwrap();

        let mut wire = BytesMut::new();
        let payload: crate::frame::ResponsePayload = Ok(Response::ReadCoils(vec![true; 0x0013]));
        codec::ascii::ServerCodec
            .encode(
                ResponseAdu {
                    hdr: crate::frame::ascii::Header { slave: crate::slave::Slave(0x0B) },
                    payload,
                },
                &mut wire,
            )
            .unwrap();

        let mut buf = vec![0u8; wire.len()];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, wire.to_vec());

        drop(peer);
        let _ = serve_task.await;
    }

    #[tokio::test]
    async fn malformed_request_is_dropped_without_closing_the_connection() {
        let (transport_io, mut peer) = tokio::io::duplex(256);

        let mut server = Server::new();
        server.add(Model::new(0x0B).with_write_single_register(|addr, value| async move {
            assert_eq!((addr, value), (0x0001, 0x0003));
            Ok(())
        }));
        let server = Arc::new(server);
        let serve_task = tokio::spawn(serve(transport_io, server));

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        // FC05 with a coil value that is neither 0x0000 nor 0xFF00, so the
        // frame is grammatically valid (correct LRC) but fails to decode
        // into a request.
        peer.write_all(ascii_frame(&[0x0B, 0x05, 0x00, 0x01, 0x12, 0x34]).as_bytes())
            .await
            .unwrap();
        peer.write_all(ascii_frame(&[0x0B, 0x06, 0x00, 0x01, 0x00, 0x03]).as_bytes())
            .await
            .unwrap();

        let mut wire = BytesMut::new();
        let payload: crate::frame::ResponsePayload =
            Ok(Response::WriteSingleRegister(0x0001, 0x0003));
        codec::ascii::ServerCodec
            .encode(
                ResponseAdu {
                    hdr: crate::frame::ascii::Header { slave: crate::slave::Slave(0x0B) },
                    payload,
                },
                &mut wire,
            )
            .unwrap();

        let mut buf = vec![0u8; wire.len()];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, wire.to_vec());

        drop(peer);
        let _ = serve_task.await;
    }
}
