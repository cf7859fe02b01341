// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU server connections (§4.5), driven by the silence-timer framer in
//! "not waiting" mode (§4.3.a) rather than the greedy per-burst decoder a
//! client uses.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Encoder;

use crate::{
    codec::{self, rtu::ServerFramer},
    error::Result,
    frame::rtu::ResponseAdu,
    server::Server,
    transport::{IoTransport, Transport},
};

/// Serve one RTU connection until the transport closes, dispatching every
/// decoded request against `server` and writing back whatever non-`None`
/// response it produces.
pub async fn serve<T>(transport: T, baud_rate: u32, server: Arc<Server>) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut transport: Box<dyn Transport> = Box::new(IoTransport::serial(transport, baud_rate));
    let quiet = codec::rtu::silence_duration(transport.kind(), None);
    let mut framer = ServerFramer::new(quiet);
    let mut codec = codec::rtu::ServerCodec::default();

    while let Some(result) = framer.next_request(transport.as_mut()).await {
        let (adu, reply) = result?;
        let Some(payload) = server.dispatch(adu.hdr.slave.0, &adu.request).await else {
            continue;
        };
        let mut wire = BytesMut::new();
        codec.encode(ResponseAdu { hdr: adu.hdr, payload }, &mut wire)?;
        reply.send(wire.freeze()).await?;
    }
    Ok(())
}
