// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! ASCII client connections (§4.4), addressed by [`Slave`] id. Framing is
//! self-delimited by `:`/`\r\n`, so unlike RTU there is no 3.5T silence
//! timer to configure.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    codec,
    error::Result,
    frame::{
        ascii::{Header, RequestAdu, ResponseAdu},
        Request, Response,
    },
    slave::{Slave, SlaveContext},
    transport::{IoTransport, Transport},
};

use super::{call_adu, Client as ClientTrait, ClientConfig, Engine};

/// A client bound to a single ASCII serial link, addressing one slave
/// device (or the broadcast address) at a time.
#[derive(Debug)]
pub struct Client {
    engine: Engine<codec::ascii::ClientCodec>,
    slave: Slave,
}

impl Client {
    /// Attach to an already-open serial transport, sending to the broadcast
    /// address until [`SlaveContext::set_slave`] is called.
    pub fn attach<T>(transport: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::attach_slave(transport, Slave::broadcast())
    }

    /// Attach to an already-open serial transport, addressing `slave`.
    pub fn attach_slave<T>(transport: T, slave: Slave) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::new(Box::new(IoTransport::net(transport)), slave)
    }

    fn new(transport: Box<dyn Transport>, slave: Slave) -> Self {
        Self {
            engine: Engine::new(transport, ClientConfig::default()),
            slave,
        }
    }
}

impl SlaveContext for Client {
    fn set_slave(&mut self, slave: Slave) {
        self.slave = slave;
    }
}

#[async_trait]
impl ClientTrait for Client {
    async fn call(&mut self, request: Request) -> Result<Option<Response>> {
        let slave = self.slave;
        let is_broadcast = slave.is_broadcast();
        let adu = RequestAdu {
            hdr: Header { slave },
            request,
        };
        let rsp: Option<ResponseAdu> =
            call_adu(&mut self.engine, adu, is_broadcast, |rsp: &ResponseAdu| {
                rsp.hdr.slave == slave
            })
            .await?;
        match rsp {
            None => Ok(None),
            Some(adu) => Ok(Some(adu.payload?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use tokio_util::codec::Encoder;

    use super::*;
    use crate::client::Reader;
    use crate::frame::{ascii::ResponseAdu, ResponsePayload};

    #[tokio::test]
    async fn round_trips_read_coils() {
        let (client_io, mut server_io) = tokio::io::duplex(256);
        let mut client = Client::attach_slave(client_io, Slave(0x0B));

        let server_task = tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let mut buf = [0u8; 18];
            server_io.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b":0B0100130013CE\r\n");

            let mut codec = codec::ascii::ServerCodec;
            let mut wire = BytesMut::new();
            let payload: ResponsePayload =
                Ok(Response::ReadCoils(vec![true; 0x0013]));
            codec
                .encode(
                    ResponseAdu {
                        hdr: Header { slave: Slave(0x0B) },
                        payload,
                    },
                    &mut wire,
                )
                .unwrap();
            server_io.write_all(&wire).await.unwrap();
        });

        let coils = client.read_coils(0x0013, 0x0013).await.unwrap();
        assert_eq!(coils.len(), 0x0013);
        server_task.await.unwrap();
    }
}
