// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP/TCP framing (§4.3.c): a 7-byte header (transaction id, protocol id,
//! length, unit id) followed by a PDU. The length field makes the frame
//! self-delimiting, so — unlike RTU/ASCII — there is no resynchronization
//! concern: a malformed header is a terminal decode error.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::{Error, Result},
    frame::tcp::{Header, RequestAdu, ResponseAdu},
    frame::{decode_response_payload, encode_response_payload, Request},
};

const HEADER_LEN: usize = 7;
const PROTOCOL_ID: u16 = 0x0000;

fn decode_frame(buf: &[u8]) -> Result<Option<(usize, Header, Bytes)>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let transaction_id = u16::from_be_bytes([buf[0], buf[1]]);
    let protocol_id = u16::from_be_bytes([buf[2], buf[3]]);
    if protocol_id != PROTOCOL_ID {
        return Err(Error::invalid_response(format!(
            "invalid MBAP protocol id: {protocol_id}"
        )));
    }
    let length = u16::from_be_bytes([buf[4], buf[5]]) as usize;
    if length == 0 {
        return Err(Error::invalid_response("MBAP length field is zero"));
    }
    let unit_id = buf[6];
    let total = HEADER_LEN + (length - 1);
    if buf.len() < total {
        return Ok(None);
    }
    let header = Header {
        transaction_id,
        unit_id,
    };
    let pdu = Bytes::copy_from_slice(&buf[HEADER_LEN..total]);
    Ok(Some((total, header, pdu)))
}

fn encode_adu(header: Header, pdu: &[u8], dst: &mut BytesMut) {
    dst.put_u16(header.transaction_id);
    dst.put_u16(PROTOCOL_ID);
    dst.put_u16((pdu.len() + 1) as u16);
    dst.put_u8(header.unit_id);
    dst.extend_from_slice(pdu);
}

/// Decodes responses, encodes requests; used by an MBAP/TCP client.
#[derive(Debug, Default)]
pub struct ClientCodec;

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some((consumed, hdr, pdu)) = decode_frame(src)? else {
            return Ok(None);
        };
        src.advance(consumed);
        let payload = decode_response_payload(&pdu)?;
        Ok(Some(ResponseAdu { hdr, payload }))
    }
}

impl Encoder<RequestAdu> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu, dst: &mut BytesMut) -> Result<()> {
        encode_adu(adu.hdr, &adu.request.encode(), dst);
        Ok(())
    }
}

/// Decodes requests, encodes responses; used by an MBAP/TCP server.
#[derive(Debug, Default)]
pub struct ServerCodec;

impl Decoder for ServerCodec {
    type Item = RequestAdu;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some((consumed, hdr, pdu)) = decode_frame(src)? else {
            return Ok(None);
        };
        src.advance(consumed);
        let request = Request::decode(&pdu)?;
        Ok(Some(RequestAdu { hdr, request }))
    }
}

impl Encoder<ResponseAdu> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, adu: ResponseAdu, dst: &mut BytesMut) -> Result<()> {
        encode_adu(adu.hdr, &encode_response_payload(&adu.payload), dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_codec_encodes_known_frame() {
        let mut codec = ClientCodec;
        let mut buf = BytesMut::new();
        let adu = RequestAdu {
            hdr: Header {
                transaction_id: 0x0001,
                unit_id: 0x06,
            },
            request: Request::WriteSingleRegister(0x0001, 0x0003),
        };
        codec.encode(adu, &mut buf).unwrap();
        assert_eq!(
            &buf[..],
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x06, 0x06, 0x00, 0x01, 0x00, 0x03]
        );
    }

    #[test]
    fn server_codec_decodes_known_frame() {
        let mut codec = ServerCodec;
        let mut buf = BytesMut::from(
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x06, 0x06, 0x00, 0x01, 0x00, 0x03][..],
        );
        let adu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(adu.hdr.transaction_id, 0x0001);
        assert_eq!(adu.hdr.unit_id, 0x06);
        assert_eq!(adu.request, Request::WriteSingleRegister(0x0001, 0x0003));
        assert!(buf.is_empty());
    }

    #[test]
    fn server_codec_waits_for_full_pdu() {
        let mut codec = ServerCodec;
        let mut buf = BytesMut::from(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x06][..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn server_codec_rejects_bad_protocol_id() {
        let mut codec = ServerCodec;
        let mut buf = BytesMut::from(
            &[0x00, 0x01, 0x00, 0x01, 0x00, 0x06, 0x06, 0x06, 0x00, 0x01, 0x00, 0x03][..],
        );
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn broadcast_unit_round_trips() {
        let mut codec = ServerCodec;
        let mut buf = BytesMut::new();
        encode_adu(
            Header {
                transaction_id: 0x0042,
                unit_id: 0x00,
            },
            &Request::ReadHoldingRegisters(0, 1).encode(),
            &mut buf,
        );
        let adu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(adu.hdr.unit_id, 0x00);
    }
}
