// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP/TCP client connections (§4.4), addressed by a unit id and a
//! self-assigned, skip-zero transaction id (§4.3.c).

use std::{fmt, net::SocketAddr};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use crate::{
    codec,
    error::Result,
    frame::{
        tcp::{Header, RequestAdu, ResponseAdu, TransactionId},
        Request, Response,
    },
    slave::{Slave, SlaveContext},
    transport::{IoTransport, Transport},
};

use super::{call_adu, Client as ClientTrait, ClientConfig, Engine};

/// A client bound to a single MBAP/TCP connection, addressing one unit id
/// (defaulting to [`Slave::tcp_device`], the reserved "no gateway forwarding"
/// id) at a time.
#[derive(Debug)]
pub struct Client {
    engine: Engine<codec::tcp::ClientCodec>,
    unit_id: u8,
    next_transaction_id: TransactionId,
}

impl Client {
    /// Open a direct connection to a Modbus TCP coupler.
    pub async fn connect(socket_addr: SocketAddr) -> Result<Self> {
        Self::connect_slave(socket_addr, Slave::tcp_device()).await
    }

    /// Open a connection, addressing `slave` through a TCP/RTU gateway.
    pub async fn connect_slave(socket_addr: SocketAddr, slave: Slave) -> Result<Self> {
        let stream = TcpStream::connect(socket_addr).await?;
        Ok(Self::attach_slave(stream, slave))
    }

    /// Attach to an already-connected stream (a [`TcpStream`] or a TLS
    /// connection wrapping one), addressing [`Slave::tcp_device`].
    pub fn attach<T>(transport: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + fmt::Debug + 'static,
    {
        Self::attach_slave(transport, Slave::tcp_device())
    }

    /// Attach to an already-connected stream, addressing `slave` through a
    /// TCP/RTU gateway.
    pub fn attach_slave<T>(transport: T, slave: Slave) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + fmt::Debug + 'static,
    {
        Self {
            engine: Engine::new(Box::new(IoTransport::net(transport)), ClientConfig::default()),
            unit_id: slave.0,
            next_transaction_id: 1,
        }
    }

    /// Allocate the next transaction id. Skips 0: 0 has no special meaning
    /// on the wire, but reserving it avoids any confusion with the unit id's
    /// own "no id" sentinels and matches widespread master implementations.
    fn take_transaction_id(&mut self) -> TransactionId {
        let id = self.next_transaction_id;
        self.next_transaction_id = match self.next_transaction_id.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        id
    }
}

impl SlaveContext for Client {
    fn set_slave(&mut self, slave: Slave) {
        self.unit_id = slave.0;
    }
}

#[async_trait]
impl ClientTrait for Client {
    async fn call(&mut self, request: Request) -> Result<Option<Response>> {
        let unit_id = self.unit_id;
        let is_broadcast = Slave(unit_id).is_broadcast();
        let transaction_id = self.take_transaction_id();
        let adu = RequestAdu {
            hdr: Header {
                transaction_id,
                unit_id,
            },
            request,
        };
        let rsp: Option<ResponseAdu> =
            call_adu(&mut self.engine, adu, is_broadcast, |rsp: &ResponseAdu| {
                rsp.hdr.transaction_id == transaction_id
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
    use crate::client::Writer;

    #[tokio::test]
    async fn round_trips_write_single_register() {
        let (client_io, mut server_io) = tokio::io::duplex(256);
        let mut client = Client::attach_slave(client_io, Slave(0x06));

        let server_task = tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let mut buf = [0u8; 12];
            server_io.read_exact(&mut buf).await.unwrap();
            assert_eq!(
                &buf,
                &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x06, 0x06, 0x00, 0x01, 0x00, 0x03]
            );
            server_io.write_all(&buf).await.unwrap();
        });

        client.write_single_register(0x0001, 0x0003).await.unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn write_single_register_rejects_a_mismatched_echo() {
        let (client_io, mut server_io) = tokio::io::duplex(256);
        let mut client = Client::attach_slave(client_io, Slave(0x06));

        let server_task = tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let mut buf = [0u8; 12];
            server_io.read_exact(&mut buf).await.unwrap();
            // Echo back the wrong register value (0x0099 instead of 0x0003).
            let mut reply = buf;
            reply[10] = 0x00;
            reply[11] = 0x99;
            server_io.write_all(&reply).await.unwrap();
        });

        let err = client
            .write_single_register(0x0001, 0x0003)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::InvalidResponse(_)));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn transaction_id_skips_zero_on_wraparound() {
        let (client_io, _server_io) = tokio::io::duplex(256);
        let mut client = Client::attach_slave(client_io, Slave::tcp_device());
        client.next_transaction_id = u16::MAX;
        assert_eq!(client.take_transaction_id(), u16::MAX);
        assert_eq!(client.take_transaction_id(), 1);
    }
}
