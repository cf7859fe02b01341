// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end client/server scenarios exercising one framing variant each.

use std::{sync::Arc, time::Duration};

use modbus_stack::{
    client::{rtu as rtu_client, tcp as tcp_client, Reader as _, Writer as _},
    frame::Exception,
    server::{tcp as tcp_server, Model, Server},
    slave::Slave,
    Error,
};

#[tokio::test]
async fn rtu_round_trip_reads_holding_registers() {
    let (client_io, mut wire) = tokio::io::duplex(256);
    let mut client = rtu_client::Client::attach_slave(client_io, 19200, Slave(0x11));

    let server_task = tokio::spawn(async move {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut buf = [0u8; 8];
        wire.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, &[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x87]);
        wire.write_all(&[
            0x11, 0x03, 0x06, 0xAE, 0x41, 0x56, 0x52, 0x43, 0x40, 0x49, 0xAD,
        ])
        .await
        .unwrap();
    });

    let words = client.read_holding_registers(0x006B, 3).await.unwrap();
    assert_eq!(words, vec![0xAE41, 0x5652, 0x4340]);
    server_task.await.unwrap();
}

#[tokio::test]
async fn tcp_broadcast_write_completes_without_a_response() {
    let (client_io, mut wire) = tokio::io::duplex(256);
    let mut client = tcp_client::Client::attach_slave(client_io, Slave::broadcast());

    let server_task = tokio::spawn(async move {
        use tokio::io::AsyncReadExt;
        let mut buf = [0u8; 17];
        wire.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf[6], 0x00, "unit id must be the broadcast address");
    });

    client
        .write_multiple_registers(0x0001, &[0x000A, 0x0102])
        .await
        .unwrap();
    server_task.await.unwrap();
}

/// A model exposing only `readCoils` must answer an FC3 request with an
/// exception response (ILLEGAL_FUNCTION), never a panic or a dropped
/// connection.
#[tokio::test]
async fn missing_callback_yields_illegal_function_exception() {
    let (client_io, server_io) = tokio::io::duplex(256);

    let mut server = Server::new();
    server.add(Model::new(0x01).with_read_coils(|_, _| async { Ok(vec![true]) }));
    let server = Arc::new(server);
    tokio::spawn(tcp_server::serve_connection(server_io, server));

    let mut client = tcp_client::Client::attach_slave(client_io, Slave(0x01));
    let err = client.read_holding_registers(0x0000, 1).await.unwrap_err();
    match err {
        Error::Exception(exception_response) => {
            assert_eq!(exception_response.exception, Exception::IllegalFunction);
        }
        other => panic!("expected an exception response, got {other:?}"),
    }
}

#[tokio::test]
async fn client_request_times_out_when_the_server_never_replies() {
    let (client_io, _server_io) = tokio::io::duplex(256);
    let mut client = tcp_client::Client::attach_slave(client_io, Slave(0x01));

    let err = tokio::time::timeout(
        Duration::from_secs(2),
        client.read_holding_registers(0x0000, 1),
    )
    .await
    .expect("the client's own timeout should fire well before the test timeout")
    .unwrap_err();
    assert!(matches!(err, Error::Timeout));
}

/// A response delivered across two separate bursts (header, then body) must
/// still resolve the waiting request rather than being treated as a
/// malformed frame.
#[tokio::test]
async fn client_recovers_from_a_response_split_across_two_bursts() {
    let (client_io, mut wire) = tokio::io::duplex(256);
    let mut client = rtu_client::Client::attach_slave(client_io, 19200, Slave(0x11));

    let server_task = tokio::spawn(async move {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut buf = [0u8; 8];
        wire.read_exact(&mut buf).await.unwrap();

        let response = [
            0x11, 0x03, 0x06, 0xAE, 0x41, 0x56, 0x52, 0x43, 0x40, 0x49, 0xAD,
        ];
        wire.write_all(&response[..4]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        wire.write_all(&response[4..]).await.unwrap();
    });

    let words = client.read_holding_registers(0x006B, 3).await.unwrap();
    assert_eq!(words, vec![0xAE41, 0x5652, 0x4340]);
    server_task.await.unwrap();
}
