// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU client connections (§4.4), addressed by [`Slave`] id over a serial
//! transport.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    codec,
    error::Result,
    frame::{
        rtu::{Header, RequestAdu, ResponseAdu},
        Request, Response,
    },
    slave::{Slave, SlaveContext},
    transport::{IoTransport, Transport},
};

use super::{call_adu, Client as ClientTrait, ClientConfig, Engine};

/// A client bound to a single RTU serial link, addressing one slave device
/// (or the broadcast address) at a time.
#[derive(Debug)]
pub struct Client {
    engine: Engine<codec::rtu::ClientCodec>,
    slave: Slave,
}

impl Client {
    /// Attach to an already-open serial transport, sending to the broadcast
    /// address until [`SlaveContext::set_slave`] is called.
    pub fn attach<T>(transport: T, baud_rate: u32) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::attach_slave(transport, baud_rate, Slave::broadcast())
    }

    /// Attach to an already-open serial transport, addressing `slave`.
    pub fn attach_slave<T>(transport: T, baud_rate: u32, slave: Slave) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::new(Box::new(IoTransport::serial(transport, baud_rate)), slave)
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
    use super::*;
    use crate::client::{Reader, Writer};

    #[tokio::test]
    async fn round_trips_read_holding_registers() {
        let (client_io, mut server_io) = tokio::io::duplex(256);
        let mut client = Client::attach_slave(client_io, 19200, Slave(0x0B));

        let server_task = tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let mut buf = [0u8; 8];
            server_io.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, &[0x0B, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x87]);
            server_io
                .write_all(&[
                    0x0B, 0x03, 0x06, 0xAE, 0x41, 0x56, 0x52, 0x43, 0x40, 0x49, 0xAD,
                ])
                .await
                .unwrap();
        });

        let words = client.read_holding_registers(0x006B, 3).await.unwrap();
        assert_eq!(words, vec![0xAE41, 0x5652, 0x4340]);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn broadcast_write_returns_without_waiting() {
        let (client_io, mut server_io) = tokio::io::duplex(256);
        let mut client = Client::attach(client_io, 19200);

        let server_task = tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut buf = [0u8; 8];
            server_io.read_exact(&mut buf).await.unwrap();
        });

        client.write_single_register(0x0001, 0x0003).await.unwrap();
        server_task.await.unwrap();
    }
}
