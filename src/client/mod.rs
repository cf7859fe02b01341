// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The client (master) role (§4.4): one request outstanding at a time,
//! enforced simply by every request method taking `&mut self`.

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "ascii")]
pub mod ascii;

#[cfg(feature = "tcp")]
pub mod tcp;

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::{Error, Result},
    frame::{Address, Coil, DeviceIdentification, Quantity, Request, Response, Word},
    transport::{Transport, TransportEvent},
};

/// Per-request timing. The default 1000 ms request timeout matches common
/// field practice for serial links at 9600 baud and below.
#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(1000),
        }
    }
}

/// The codec-and-transport plumbing shared by every framing variant's
/// client. Not part of the public API; each variant wraps one of these and
/// adds the header construction its ADU shape needs.
pub(crate) struct Engine<C> {
    transport: Box<dyn Transport>,
    buf: BytesMut,
    codec: C,
    config: ClientConfig,
}

impl<C> std::fmt::Debug for Engine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<C: Default> Engine<C> {
    pub(crate) fn new(transport: Box<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            transport,
            buf: BytesMut::new(),
            codec: C::default(),
            config,
        }
    }
}

/// Encode `request_adu`, write it, and — unless `is_broadcast` — wait up to
/// the configured timeout for a response ADU satisfying `response_matches`,
/// discarding any response that doesn't (a stale reply to a prior, already
/// timed-out request). Broadcast requests complete as soon as the write is
/// flushed, per §4.2/§4.4: there is nothing to wait for.
pub(crate) async fn call_adu<C, ReqAdu, RspAdu>(
    engine: &mut Engine<C>,
    request_adu: ReqAdu,
    is_broadcast: bool,
    response_matches: impl Fn(&RspAdu) -> bool,
) -> Result<Option<RspAdu>>
where
    C: Decoder<Item = RspAdu, Error = Error> + Encoder<ReqAdu, Error = Error>,
{
    let mut out = BytesMut::new();
    engine.codec.encode(request_adu, &mut out)?;
    engine.transport.write(&out).await?;
    if is_broadcast {
        log::debug!("broadcast request sent, not waiting for a response");
        return Ok(None);
    }

    let deadline = tokio::time::Instant::now() + engine.config.request_timeout;
    loop {
        if let Some(rsp) = engine.codec.decode(&mut engine.buf)? {
            if response_matches(&rsp) {
                return Ok(Some(rsp));
            }
            log::debug!("discarding a response that doesn't match the outstanding request");
            continue;
        }
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(Error::Timeout);
        }
        match tokio::time::timeout(remaining, engine.transport.next_event()).await {
            Ok(Some(TransportEvent::Data(bytes, _reply))) => engine.buf.extend_from_slice(&bytes),
            Ok(Some(TransportEvent::Error(err))) => return Err(err.into()),
            Ok(Some(TransportEvent::Closed) | None) => {
                return Err(Error::Transport(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "transport closed while awaiting a response",
                )))
            }
            Err(_elapsed) => return Err(Error::Timeout),
        }
    }
}

fn unexpected_response(res: &Response) -> Error {
    Error::invalid_response(format!("unexpected response: {res:?}"))
}

fn check_quantity(quantity: Quantity, min: Quantity, max: Quantity) -> Result<()> {
    if quantity < min || quantity > max {
        return Err(Error::invalid_response(format!(
            "quantity {quantity} out of range ({min}..={max})"
        )));
    }
    Ok(())
}

/// The general request/response contract (§4.4). Each framing variant
/// implements only this; [`Reader`] and [`Writer`] are blanket-implemented
/// on top of it, so the per-function-code API only needs to be written
/// once.
#[async_trait]
pub trait Client: Send {
    /// Send `request` and, unless it addresses the broadcast unit, await
    /// its response. Returns `Ok(None)` only for a broadcast request.
    async fn call(&mut self, request: Request) -> Result<Option<Response>>;

    async fn report_server_id(&mut self) -> Result<(u8, bool, Vec<u8>)> {
        match self.call(Request::ReportServerId).await? {
            Some(Response::ReportServerId {
                server_id,
                run_indicator,
                additional_data,
            }) => Ok((server_id, run_indicator, additional_data)),
            Some(res) => Err(unexpected_response(&res)),
            None => Err(Error::invalid_response(
                "report server id cannot be broadcast",
            )),
        }
    }

    async fn read_device_identification(
        &mut self,
        read_device_id_code: u8,
        object_id: u8,
    ) -> Result<DeviceIdentification> {
        match self
            .call(Request::ReadDeviceIdentification(
                read_device_id_code,
                object_id,
            ))
            .await?
        {
            Some(Response::ReadDeviceIdentification(ident)) => Ok(ident),
            Some(res) => Err(unexpected_response(&res)),
            None => Err(Error::invalid_response(
                "read device identification cannot be broadcast",
            )),
        }
    }

    async fn mask_write_register(&mut self, addr: Address, and_mask: u16, or_mask: u16) -> Result<()> {
        match self
            .call(Request::MaskWriteRegister(addr, and_mask, or_mask))
            .await?
        {
            Some(Response::MaskWriteRegister(echo_addr, echo_and, echo_or)) => {
                if (echo_addr, echo_and, echo_or) == (addr, and_mask, or_mask) {
                    Ok(())
                } else {
                    Err(Error::invalid_response(format!(
                        "mask write register echoed ({echo_addr:#06X}, {echo_and:#06X}, \
                         {echo_or:#06X}), expected ({addr:#06X}, {and_mask:#06X}, {or_mask:#06X})"
                    )))
                }
            }
            None => Ok(()),
            Some(res) => Err(unexpected_response(&res)),
        }
    }
}

/// Read-only function codes (§4.4). Blanket-implemented for every [`Client`].
#[async_trait]
pub trait Reader {
    async fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;
    async fn read_discrete_inputs(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;
    async fn read_input_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;
    async fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;
    async fn read_write_multiple_registers(
        &mut self,
        read_addr: Address,
        read_cnt: Quantity,
        write_addr: Address,
        data: &[Word],
    ) -> Result<Vec<Word>>;
}

/// Write function codes (§4.4). Blanket-implemented for every [`Client`].
#[async_trait]
pub trait Writer {
    async fn write_single_coil(&mut self, addr: Address, coil: Coil) -> Result<()>;
    async fn write_multiple_coils(&mut self, addr: Address, coils: &[Coil]) -> Result<()>;
    async fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()>;
    async fn write_multiple_registers(&mut self, addr: Address, data: &[Word]) -> Result<()>;
}

#[async_trait]
impl<T: Client + ?Sized> Reader for T {
    async fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        check_quantity(cnt, 1, 2000)?;
        match self.call(Request::ReadCoils(addr, cnt)).await? {
            Some(Response::ReadCoils(coils)) => Ok(coils),
            Some(res) => Err(unexpected_response(&res)),
            None => Err(Error::invalid_response("reads cannot be broadcast")),
        }
    }

    async fn read_discrete_inputs(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        check_quantity(cnt, 1, 2000)?;
        match self.call(Request::ReadDiscreteInputs(addr, cnt)).await? {
            Some(Response::ReadDiscreteInputs(coils)) => Ok(coils),
            Some(res) => Err(unexpected_response(&res)),
            None => Err(Error::invalid_response("reads cannot be broadcast")),
        }
    }

    async fn read_input_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        check_quantity(cnt, 1, 125)?;
        match self.call(Request::ReadInputRegisters(addr, cnt)).await? {
            Some(Response::ReadInputRegisters(words)) => Ok(words),
            Some(res) => Err(unexpected_response(&res)),
            None => Err(Error::invalid_response("reads cannot be broadcast")),
        }
    }

    async fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        check_quantity(cnt, 1, 125)?;
        match self.call(Request::ReadHoldingRegisters(addr, cnt)).await? {
            Some(Response::ReadHoldingRegisters(words)) => Ok(words),
            Some(res) => Err(unexpected_response(&res)),
            None => Err(Error::invalid_response("reads cannot be broadcast")),
        }
    }

    async fn read_write_multiple_registers(
        &mut self,
        read_addr: Address,
        read_cnt: Quantity,
        write_addr: Address,
        data: &[Word],
    ) -> Result<Vec<Word>> {
        check_quantity(read_cnt, 1, 125)?;
        check_quantity(data.len() as Quantity, 1, 121)?;
        match self
            .call(Request::ReadWriteMultipleRegisters(
                read_addr,
                read_cnt,
                write_addr,
                data.to_vec(),
            ))
            .await?
        {
            Some(Response::ReadWriteMultipleRegisters(words)) => Ok(words),
            Some(res) => Err(unexpected_response(&res)),
            None => Err(Error::invalid_response("reads cannot be broadcast")),
        }
    }
}

#[async_trait]
impl<T: Client + ?Sized> Writer for T {
    async fn write_single_coil(&mut self, addr: Address, coil: Coil) -> Result<()> {
        match self.call(Request::WriteSingleCoil(addr, coil)).await? {
            Some(Response::WriteSingleCoil(echo_addr, echo_coil)) => {
                if (echo_addr, echo_coil) == (addr, coil) {
                    Ok(())
                } else {
                    Err(Error::invalid_response(format!(
                        "write single coil echoed ({echo_addr}, {echo_coil}), expected ({addr}, {coil})"
                    )))
                }
            }
            None => Ok(()),
            Some(res) => Err(unexpected_response(&res)),
        }
    }

    async fn write_multiple_coils(&mut self, addr: Address, coils: &[Coil]) -> Result<()> {
        check_quantity(coils.len() as Quantity, 1, 1968)?;
        let quantity = coils.len() as Quantity;
        match self
            .call(Request::WriteMultipleCoils(addr, coils.to_vec()))
            .await?
        {
            Some(Response::WriteMultipleCoils(echo_addr, echo_quantity)) => {
                if (echo_addr, echo_quantity) == (addr, quantity) {
                    Ok(())
                } else {
                    Err(Error::invalid_response(format!(
                        "write multiple coils echoed ({echo_addr}, {echo_quantity}), expected ({addr}, {quantity})"
                    )))
                }
            }
            None => Ok(()),
            Some(res) => Err(unexpected_response(&res)),
        }
    }

    async fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()> {
        match self.call(Request::WriteSingleRegister(addr, word)).await? {
            Some(Response::WriteSingleRegister(echo_addr, echo_word)) => {
                if (echo_addr, echo_word) == (addr, word) {
                    Ok(())
                } else {
                    Err(Error::invalid_response(format!(
                        "write single register echoed ({echo_addr}, {echo_word}), expected ({addr}, {word})"
                    )))
                }
            }
            None => Ok(()),
            Some(res) => Err(unexpected_response(&res)),
        }
    }

    async fn write_multiple_registers(&mut self, addr: Address, data: &[Word]) -> Result<()> {
        check_quantity(data.len() as Quantity, 1, 123)?;
        let quantity = data.len() as Quantity;
        match self
            .call(Request::WriteMultipleRegisters(addr, data.to_vec()))
            .await?
        {
            Some(Response::WriteMultipleRegisters(echo_addr, echo_quantity)) => {
                if (echo_addr, echo_quantity) == (addr, quantity) {
                    Ok(())
                } else {
                    Err(Error::invalid_response(format!(
                        "write multiple registers echoed ({echo_addr}, {echo_quantity}), expected ({addr}, {quantity})"
                    )))
                }
            }
            None => Ok(()),
            Some(res) => Err(unexpected_response(&res)),
        }
    }
}
