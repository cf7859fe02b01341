// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Protocol data units: requests, responses, exceptions and the wire
//! encoding shared by every framing variant.

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "ascii")]
pub mod ascii;

#[cfg(feature = "tcp")]
pub mod tcp;

use std::fmt;

use byteorder::{BigEndian, ReadBytesExt};
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// A register or coil address.
pub type Address = u16;

/// A quantity of registers or coils.
pub type Quantity = u16;

/// A single coil/discrete-input bit.
pub type Coil = bool;

/// A single 16-bit register value.
pub type Word = u16;

/// The 8-bit Modbus function code.
pub type FunctionCode = u8;

/// The MODBUS Encapsulated Interface sub-function used by FC 43/14.
const MEI_READ_DEVICE_IDENTIFICATION: u8 = 0x0E;

/// Shared header for the header-less unit-addressed framing variants (RTU
/// and ASCII both just carry a unit/slave address, no transaction id).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialHeader {
    /// The addressed unit (slave).
    pub slave: crate::slave::Slave,
}

/// A request, the parameters of which are already known to be well-formed
/// (bounds are re-checked by the server per function code, see
/// [`crate::server`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils(Address, Quantity),
    ReadDiscreteInputs(Address, Quantity),
    WriteSingleCoil(Address, Coil),
    WriteMultipleCoils(Address, Vec<Coil>),
    ReadInputRegisters(Address, Quantity),
    ReadHoldingRegisters(Address, Quantity),
    WriteSingleRegister(Address, Word),
    WriteMultipleRegisters(Address, Vec<Word>),
    ReadWriteMultipleRegisters(Address, Quantity, Address, Vec<Word>),
    ReportServerId,
    MaskWriteRegister(Address, u16, u16),
    ReadDeviceIdentification(u8, u8),
    /// An application-defined function code with a raw payload.
    Custom(FunctionCode, Vec<u8>),
    /// Not a wire request: releases an exclusively-held transport (e.g. a
    /// serial port) without sending anything.
    Disconnect,
}

impl Request {
    /// The function code this request is carried under.
    #[must_use]
    pub fn function_code(&self) -> FunctionCode {
        use Request::*;
        match self {
            ReadCoils(..) => 0x01,
            ReadDiscreteInputs(..) => 0x02,
            WriteSingleCoil(..) => 0x05,
            WriteMultipleCoils(..) => 0x0F,
            ReadInputRegisters(..) => 0x04,
            ReadHoldingRegisters(..) => 0x03,
            WriteSingleRegister(..) => 0x06,
            WriteMultipleRegisters(..) => 0x10,
            ReadWriteMultipleRegisters(..) => 0x17,
            ReportServerId => 0x11,
            MaskWriteRegister(..) => 0x16,
            ReadDeviceIdentification(..) => 0x2B,
            Custom(code, _) => *code,
            Disconnect => unreachable!("Disconnect is never encoded on the wire"),
        }
    }

    /// Encode the PDU (function code byte followed by the payload).
    pub(crate) fn encode(&self) -> Bytes {
        use Request::*;
        let mut data = BytesMut::with_capacity(8);
        data.put_u8(self.function_code());
        match self {
            ReadCoils(address, quantity)
            | ReadDiscreteInputs(address, quantity)
            | ReadInputRegisters(address, quantity)
            | ReadHoldingRegisters(address, quantity) => {
                data.put_u16(*address);
                data.put_u16(*quantity);
            }
            WriteSingleCoil(address, state) => {
                data.put_u16(*address);
                data.put_u16(bool_to_coil(*state));
            }
            WriteMultipleCoils(address, coils) => {
                data.put_u16(*address);
                data.put_u16(coils.len() as u16);
                let packed = pack_coils(coils);
                data.put_u8(packed.len() as u8);
                data.extend_from_slice(&packed);
            }
            WriteSingleRegister(address, word) => {
                data.put_u16(*address);
                data.put_u16(*word);
            }
            WriteMultipleRegisters(address, words) => {
                data.put_u16(*address);
                data.put_u16(words.len() as u16);
                data.put_u8((words.len() * 2) as u8);
                for w in words {
                    data.put_u16(*w);
                }
            }
            ReadWriteMultipleRegisters(read_address, read_quantity, write_address, words) => {
                data.put_u16(*read_address);
                data.put_u16(*read_quantity);
                data.put_u16(*write_address);
                data.put_u16(words.len() as u16);
                data.put_u8((words.len() * 2) as u8);
                for w in words {
                    data.put_u16(*w);
                }
            }
            ReportServerId => {}
            MaskWriteRegister(address, and_mask, or_mask) => {
                data.put_u16(*address);
                data.put_u16(*and_mask);
                data.put_u16(*or_mask);
            }
            ReadDeviceIdentification(read_device_id_code, object_id) => {
                data.put_u8(MEI_READ_DEVICE_IDENTIFICATION);
                data.put_u8(*read_device_id_code);
                data.put_u8(*object_id);
            }
            Custom(_, payload) => data.extend_from_slice(payload),
            Disconnect => unreachable!("Disconnect is never encoded on the wire"),
        }
        data.freeze()
    }

    /// Decode a PDU (function code byte + payload) into a request. Used by
    /// the server to parse an inbound ADU's payload.
    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        let mut rdr = std::io::Cursor::new(bytes);
        let fn_code = rdr
            .read_u8()
            .map_err(|_| Error::invalid_response("empty PDU"))?;
        let req = match fn_code {
            0x01 => Request::ReadCoils(read_u16(&mut rdr)?, read_u16(&mut rdr)?),
            0x02 => Request::ReadDiscreteInputs(read_u16(&mut rdr)?, read_u16(&mut rdr)?),
            0x03 => Request::ReadHoldingRegisters(read_u16(&mut rdr)?, read_u16(&mut rdr)?),
            0x04 => Request::ReadInputRegisters(read_u16(&mut rdr)?, read_u16(&mut rdr)?),
            0x05 => {
                Request::WriteSingleCoil(read_u16(&mut rdr)?, coil_to_bool(read_u16(&mut rdr)?)?)
            }
            0x06 => Request::WriteSingleRegister(read_u16(&mut rdr)?, read_u16(&mut rdr)?),
            0x0F => {
                let address = read_u16(&mut rdr)?;
                let quantity = read_u16(&mut rdr)?;
                let byte_count = rdr
                    .read_u8()
                    .map_err(|_| Error::invalid_response("missing byte count"))?
                    as usize;
                let pos = rdr.position() as usize;
                if bytes.len() < pos + byte_count {
                    return Err(Error::invalid_response("truncated coil payload"));
                }
                Request::WriteMultipleCoils(address, unpack_coils(&bytes[pos..], quantity))
            }
            0x10 => {
                let address = read_u16(&mut rdr)?;
                let quantity = read_u16(&mut rdr)?;
                let byte_count = rdr
                    .read_u8()
                    .map_err(|_| Error::invalid_response("missing byte count"))?
                    as usize;
                if byte_count != quantity as usize * 2 {
                    return Err(Error::invalid_response("byte count / quantity mismatch"));
                }
                let mut words = Vec::with_capacity(quantity as usize);
                for _ in 0..quantity {
                    words.push(read_u16(&mut rdr)?);
                }
                Request::WriteMultipleRegisters(address, words)
            }
            0x11 => Request::ReportServerId,
            0x16 => Request::MaskWriteRegister(
                read_u16(&mut rdr)?,
                read_u16(&mut rdr)?,
                read_u16(&mut rdr)?,
            ),
            0x17 => {
                let read_address = read_u16(&mut rdr)?;
                let read_quantity = read_u16(&mut rdr)?;
                let write_address = read_u16(&mut rdr)?;
                let write_quantity = read_u16(&mut rdr)?;
                let byte_count = rdr
                    .read_u8()
                    .map_err(|_| Error::invalid_response("missing byte count"))?
                    as usize;
                if byte_count != write_quantity as usize * 2 {
                    return Err(Error::invalid_response("byte count / quantity mismatch"));
                }
                let mut words = Vec::with_capacity(write_quantity as usize);
                for _ in 0..write_quantity {
                    words.push(read_u16(&mut rdr)?);
                }
                Request::ReadWriteMultipleRegisters(
                    read_address,
                    read_quantity,
                    write_address,
                    words,
                )
            }
            0x2B => {
                let mei_type = rdr
                    .read_u8()
                    .map_err(|_| Error::invalid_response("missing MEI type"))?;
                if mei_type != MEI_READ_DEVICE_IDENTIFICATION {
                    return Err(Error::invalid_response("unsupported MEI type"));
                }
                let read_device_id_code = rdr
                    .read_u8()
                    .map_err(|_| Error::invalid_response("missing read device id code"))?;
                let object_id = rdr
                    .read_u8()
                    .map_err(|_| Error::invalid_response("missing object id"))?;
                Request::ReadDeviceIdentification(read_device_id_code, object_id)
            }
            code if code < 0x80 => Request::Custom(code, bytes[1..].to_vec()),
            code => {
                return Err(Error::invalid_response(format!(
                    "invalid function code: 0x{code:02X}"
                )))
            }
        };
        Ok(req)
    }
}

/// A normal (non-exception) response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadCoils(Vec<Coil>),
    ReadDiscreteInputs(Vec<Coil>),
    WriteSingleCoil(Address, Coil),
    WriteMultipleCoils(Address, Quantity),
    ReadInputRegisters(Vec<Word>),
    ReadHoldingRegisters(Vec<Word>),
    WriteSingleRegister(Address, Word),
    WriteMultipleRegisters(Address, Quantity),
    ReadWriteMultipleRegisters(Vec<Word>),
    ReportServerId {
        server_id: u8,
        run_indicator: bool,
        additional_data: Vec<u8>,
    },
    MaskWriteRegister(Address, u16, u16),
    ReadDeviceIdentification(DeviceIdentification),
    Custom(FunctionCode, Vec<u8>),
}

/// The decoded payload of a FC 43/14 Read Device Identification response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentification {
    pub read_device_id_code: u8,
    pub conformity_level: u8,
    pub more_follows: bool,
    pub next_object_id: u8,
    pub objects: Vec<(u8, Vec<u8>)>,
}

impl Response {
    #[must_use]
    pub fn function_code(&self) -> FunctionCode {
        use Response::*;
        match self {
            ReadCoils(_) => 0x01,
            ReadDiscreteInputs(_) => 0x02,
            WriteSingleCoil(..) => 0x05,
            WriteMultipleCoils(..) => 0x0F,
            ReadInputRegisters(_) => 0x04,
            ReadHoldingRegisters(_) => 0x03,
            WriteSingleRegister(..) => 0x06,
            WriteMultipleRegisters(..) => 0x10,
            ReadWriteMultipleRegisters(_) => 0x17,
            ReportServerId { .. } => 0x11,
            MaskWriteRegister(..) => 0x16,
            ReadDeviceIdentification(_) => 0x2B,
            Custom(code, _) => *code,
        }
    }

    pub(crate) fn encode(&self) -> Bytes {
        use Response::*;
        let mut data = BytesMut::with_capacity(8);
        data.put_u8(self.function_code());
        match self {
            ReadCoils(coils) | ReadDiscreteInputs(coils) => {
                let packed = pack_coils(coils);
                data.put_u8(packed.len() as u8);
                data.extend_from_slice(&packed);
            }
            ReadInputRegisters(words)
            | ReadHoldingRegisters(words)
            | ReadWriteMultipleRegisters(words) => {
                data.put_u8((words.len() * 2) as u8);
                for w in words {
                    data.put_u16(*w);
                }
            }
            WriteSingleCoil(address, state) => {
                data.put_u16(*address);
                data.put_u16(bool_to_coil(*state));
            }
            WriteMultipleCoils(address, quantity) | WriteMultipleRegisters(address, quantity) => {
                data.put_u16(*address);
                data.put_u16(*quantity);
            }
            WriteSingleRegister(address, word) => {
                data.put_u16(*address);
                data.put_u16(*word);
            }
            ReportServerId {
                server_id,
                run_indicator,
                additional_data,
            } => {
                data.put_u8(1 + 1 + additional_data.len() as u8);
                data.put_u8(*server_id);
                data.put_u8(if *run_indicator { 0xFF } else { 0x00 });
                data.extend_from_slice(additional_data);
            }
            MaskWriteRegister(address, and_mask, or_mask) => {
                data.put_u16(*address);
                data.put_u16(*and_mask);
                data.put_u16(*or_mask);
            }
            ReadDeviceIdentification(ident) => {
                data.put_u8(MEI_READ_DEVICE_IDENTIFICATION);
                data.put_u8(ident.read_device_id_code);
                data.put_u8(ident.conformity_level);
                data.put_u8(if ident.more_follows { 0xFF } else { 0x00 });
                data.put_u8(ident.next_object_id);
                data.put_u8(ident.objects.len() as u8);
                for (id, value) in &ident.objects {
                    data.put_u8(*id);
                    data.put_u8(value.len() as u8);
                    data.extend_from_slice(value);
                }
            }
            Custom(_, payload) => data.extend_from_slice(payload),
        }
        data.freeze()
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        let mut rdr = std::io::Cursor::new(bytes);
        let fn_code = rdr
            .read_u8()
            .map_err(|_| Error::invalid_response("empty PDU"))?;
        let rsp = match fn_code {
            0x01 | 0x02 => {
                let byte_count = rdr
                    .read_u8()
                    .map_err(|_| Error::invalid_response("missing byte count"))?;
                let pos = rdr.position() as usize;
                let quantity = u16::from(byte_count) * 8;
                let coils = unpack_coils(&bytes[pos..], quantity);
                if fn_code == 0x01 {
                    Response::ReadCoils(coils)
                } else {
                    Response::ReadDiscreteInputs(coils)
                }
            }
            0x03 | 0x04 | 0x17 => {
                let byte_count = rdr
                    .read_u8()
                    .map_err(|_| Error::invalid_response("missing byte count"))?;
                let quantity = byte_count / 2;
                let mut words = Vec::with_capacity(quantity as usize);
                for _ in 0..quantity {
                    words.push(read_u16(&mut rdr)?);
                }
                match fn_code {
                    0x03 => Response::ReadHoldingRegisters(words),
                    0x04 => Response::ReadInputRegisters(words),
                    _ => Response::ReadWriteMultipleRegisters(words),
                }
            }
            0x05 => {
                Response::WriteSingleCoil(read_u16(&mut rdr)?, coil_to_bool(read_u16(&mut rdr)?)?)
            }
            0x06 => Response::WriteSingleRegister(read_u16(&mut rdr)?, read_u16(&mut rdr)?),
            0x0F => Response::WriteMultipleCoils(read_u16(&mut rdr)?, read_u16(&mut rdr)?),
            0x10 => Response::WriteMultipleRegisters(read_u16(&mut rdr)?, read_u16(&mut rdr)?),
            0x11 => {
                let byte_count = rdr
                    .read_u8()
                    .map_err(|_| Error::invalid_response("missing byte count"))?
                    as usize;
                if bytes.len() < 2 + byte_count || byte_count < 2 {
                    return Err(Error::invalid_response(
                        "malformed report-server-id response",
                    ));
                }
                let server_id = bytes[2];
                let run_indicator = bytes[3] == 0xFF;
                let additional_data = bytes[4..2 + byte_count].to_vec();
                Response::ReportServerId {
                    server_id,
                    run_indicator,
                    additional_data,
                }
            }
            0x16 => Response::MaskWriteRegister(
                read_u16(&mut rdr)?,
                read_u16(&mut rdr)?,
                read_u16(&mut rdr)?,
            ),
            0x2B => {
                let mei_type = rdr
                    .read_u8()
                    .map_err(|_| Error::invalid_response("missing MEI type"))?;
                if mei_type != MEI_READ_DEVICE_IDENTIFICATION {
                    return Err(Error::invalid_response("unsupported MEI type"));
                }
                let read_device_id_code = rdr
                    .read_u8()
                    .map_err(|_| Error::invalid_response("missing read device id code"))?;
                let conformity_level = rdr
                    .read_u8()
                    .map_err(|_| Error::invalid_response("missing conformity level"))?;
                let more_follows = rdr
                    .read_u8()
                    .map_err(|_| Error::invalid_response("missing more-follows byte"))?
                    == 0xFF;
                let next_object_id = rdr
                    .read_u8()
                    .map_err(|_| Error::invalid_response("missing next object id"))?;
                let count = rdr
                    .read_u8()
                    .map_err(|_| Error::invalid_response("missing object count"))?;
                let mut objects = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let id = rdr
                        .read_u8()
                        .map_err(|_| Error::invalid_response("truncated object list"))?;
                    let len = rdr
                        .read_u8()
                        .map_err(|_| Error::invalid_response("truncated object list"))?
                        as usize;
                    let pos = rdr.position() as usize;
                    if bytes.len() < pos + len {
                        return Err(Error::invalid_response("truncated object value"));
                    }
                    objects.push((id, bytes[pos..pos + len].to_vec()));
                    rdr.set_position((pos + len) as u64);
                }
                Response::ReadDeviceIdentification(DeviceIdentification {
                    read_device_id_code,
                    conformity_level,
                    more_follows,
                    next_object_id,
                    objects,
                })
            }
            code => Response::Custom(code, bytes[1..].to_vec()),
        };
        Ok(rsp)
    }
}

/// One of the nine exception codes defined by the Modbus application
/// protocol specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Exception {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDeviceFailedToRespond = 0x0B,
}

impl Exception {
    #[must_use]
    pub fn description(&self) -> &'static str {
        use Exception::*;
        match self {
            IllegalFunction => "Illegal function",
            IllegalDataAddress => "Illegal data address",
            IllegalDataValue => "Illegal data value",
            ServerDeviceFailure => "Server device failure",
            Acknowledge => "Acknowledge",
            ServerDeviceBusy => "Server device busy",
            MemoryParityError => "Memory parity error",
            GatewayPathUnavailable => "Gateway path unavailable",
            GatewayTargetDeviceFailedToRespond => "Gateway target device failed to respond",
        }
    }
}

impl TryFrom<u8> for Exception {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        use Exception::*;
        Ok(match code {
            0x01 => IllegalFunction,
            0x02 => IllegalDataAddress,
            0x03 => IllegalDataValue,
            0x04 => ServerDeviceFailure,
            0x05 => Acknowledge,
            0x06 => ServerDeviceBusy,
            0x08 => MemoryParityError,
            0x0A => GatewayPathUnavailable,
            0x0B => GatewayTargetDeviceFailedToRespond,
            code => {
                return Err(Error::invalid_response(format!(
                    "invalid exception code: {code}"
                )))
            }
        })
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// A Modbus exception response: the request's function code with the high
/// bit set, and a single exception-code byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    /// The *original* (non-OR'd) function code that was rejected.
    pub function: FunctionCode,
    pub exception: Exception,
}

impl ExceptionResponse {
    pub(crate) fn encode(&self) -> Bytes {
        debug_assert!(self.function < 0x80);
        let mut data = BytesMut::with_capacity(2);
        data.put_u8(self.function | 0x80);
        data.put_u8(self.exception as u8);
        data.freeze()
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        let fn_err_code = *bytes
            .first()
            .ok_or_else(|| Error::invalid_response("empty PDU"))?;
        if fn_err_code < 0x80 {
            return Err(Error::invalid_response("not an exception response"));
        }
        let exception = Exception::try_from(
            *bytes
                .get(1)
                .ok_or_else(|| Error::invalid_response("missing exception code"))?,
        )?;
        Ok(ExceptionResponse {
            function: fn_err_code - 0x80,
            exception,
        })
    }
}

impl std::error::Error for ExceptionResponse {}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Modbus function {}: {}",
            self.function,
            self.exception.description()
        )
    }
}

/// Either a normal response or an exception response, as decoded from a
/// single PDU (the high bit of the function code discriminates).
pub(crate) type ResponsePayload = std::result::Result<Response, ExceptionResponse>;

pub(crate) fn encode_response_payload(payload: &ResponsePayload) -> Bytes {
    match payload {
        Ok(rsp) => rsp.encode(),
        Err(ex) => ex.encode(),
    }
}

pub(crate) fn decode_response_payload(bytes: &[u8]) -> Result<ResponsePayload> {
    let fn_code = *bytes
        .first()
        .ok_or_else(|| Error::invalid_response("empty PDU"))?;
    if fn_code & 0x80 != 0 {
        Ok(Err(ExceptionResponse::decode(bytes)?))
    } else {
        Ok(Ok(Response::decode(bytes)?))
    }
}

fn read_u16(rdr: &mut std::io::Cursor<&[u8]>) -> Result<u16> {
    rdr.read_u16::<BigEndian>()
        .map_err(|_| Error::invalid_response("truncated PDU"))
}

fn bool_to_coil(state: bool) -> u16 {
    if state {
        0xFF00
    } else {
        0x0000
    }
}

fn coil_to_bool(coil: u16) -> Result<bool> {
    match coil {
        0xFF00 => Ok(true),
        0x0000 => Ok(false),
        value => Err(Error::invalid_response(format!(
            "invalid coil value: 0x{value:04X}"
        ))),
    }
}

/// Pack coil booleans LSB-first into bytes, per §4.6.
pub(crate) fn pack_coils(coils: &[Coil]) -> Vec<u8> {
    let packed_size = (coils.len() + 7) / 8;
    let mut packed = vec![0u8; packed_size];
    for (i, coil) in coils.iter().enumerate() {
        if *coil {
            packed[i / 8] |= 1 << (i % 8);
        }
    }
    packed
}

/// Unpack `count` coil booleans LSB-first from packed bytes.
pub(crate) fn unpack_coils(bytes: &[u8], count: u16) -> Vec<Coil> {
    let mut coils = Vec::with_capacity(count as usize);
    for i in 0..count {
        let byte = bytes[(i / 8) as usize];
        coils.push((byte >> (i % 8)) & 0b1 != 0);
    }
    coils
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_read_holding_registers_request() {
        let req = Request::ReadHoldingRegisters(0x006B, 3);
        let encoded = req.encode();
        assert_eq!(&encoded[..], &[0x03, 0x00, 0x6B, 0x00, 0x03]);
        assert_eq!(Request::decode(&encoded).unwrap(), req);
    }

    #[test]
    fn round_trip_read_holding_registers_response() {
        let rsp = Response::ReadHoldingRegisters(vec![0xAE41, 0x5652, 0x4340]);
        let encoded = rsp.encode();
        assert_eq!(
            &encoded[..],
            &[0x03, 0x06, 0xAE, 0x41, 0x56, 0x52, 0x43, 0x40]
        );
        assert_eq!(Response::decode(&encoded).unwrap(), rsp);
    }

    #[test]
    fn round_trip_write_multiple_coils() {
        let req = Request::WriteMultipleCoils(0x0001, vec![true, false, true]);
        let encoded = req.encode();
        assert_eq!(Request::decode(&encoded).unwrap(), req);
    }

    #[test]
    fn round_trip_mask_write_register() {
        let req = Request::MaskWriteRegister(0x0004, 0x00F2, 0x0025);
        let encoded = req.encode();
        assert_eq!(&encoded[..], &[0x16, 0x00, 0x04, 0x00, 0xF2, 0x00, 0x25]);
        assert_eq!(Request::decode(&encoded).unwrap(), req);
    }

    #[test]
    fn round_trip_read_device_identification_request() {
        let req = Request::ReadDeviceIdentification(0x01, 0x00);
        let encoded = req.encode();
        assert_eq!(&encoded[..], &[0x2B, 0x0E, 0x01, 0x00]);
        assert_eq!(Request::decode(&encoded).unwrap(), req);
    }

    #[test]
    fn round_trip_read_device_identification_response() {
        let ident = DeviceIdentification {
            read_device_id_code: 0x01,
            conformity_level: 0x81,
            more_follows: false,
            next_object_id: 0x00,
            objects: vec![(0x00, b"acme".to_vec()), (0x01, b"widget".to_vec())],
        };
        let rsp = Response::ReadDeviceIdentification(ident.clone());
        let encoded = rsp.encode();
        assert_eq!(
            Response::decode(&encoded).unwrap(),
            Response::ReadDeviceIdentification(ident)
        );
    }

    #[test]
    fn exception_response_display() {
        let ex = ExceptionResponse {
            function: 0x02,
            exception: Exception::IllegalDataValue,
        };
        assert_eq!(format!("{ex}"), "Modbus function 2: Illegal data value");
    }

    #[test]
    fn exception_response_round_trip() {
        let ex = ExceptionResponse {
            function: 0x03,
            exception: Exception::IllegalFunction,
        };
        let encoded = ex.encode();
        assert_eq!(&encoded[..], &[0x83, 0x01]);
        assert_eq!(ExceptionResponse::decode(&encoded).unwrap(), ex);
    }

    #[test]
    fn pack_unpack_coils() {
        let coils = vec![
            true, false, true, true, false, false, true, true, true, true, false, true, false,
            true, true, false, true, false, true,
        ];
        let packed = pack_coils(&coils);
        assert_eq!(packed, vec![0xCD, 0x6B, 0x05]);
        assert_eq!(unpack_coils(&packed, coils.len() as u16), coils);
    }
}
