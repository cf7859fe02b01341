// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! ASCII framing (§4.3.b): `:` + hex-encoded (unit, PDU, LRC) + `\r\n`.
//!
//! [`find_frame`] runs the three-state scan directly: idle until a `:`
//! start delimiter appears, then accumulating frame bytes (an embedded `:`
//! restarts the frame at that point), then watching for the `\r\n`
//! terminator (a `\r` not immediately followed by `\n` drops back to idle,
//! resynchronizing past whatever noise preceded it).

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::{Error, Result},
    frame::ascii::{Header, RequestAdu, ResponseAdu},
    frame::{decode_response_payload, encode_response_payload, Request},
    slave::Slave,
    util::lrc,
};

const MAX_ASCII_FRAME_LEN: usize = 513; // ':' + 2*256 hex digits + "\r\n"

enum ScanState {
    Idle,
    Reception,
    WaitingEnd,
}

/// Locate a `:...\r\n` frame in `buf`, returning the index of `:` and the
/// index of the `\r` that starts its terminator. Any bytes before `:` are
/// noise and are skipped (not consumed) by the caller once a frame is
/// found, per §4.3.b's idle-state behaviour.
///
/// Runs the three-state scanner literally rather than searching for `:`
/// and `\r\n` independently: an embedded `:` restarts reception, and a
/// `\r` not immediately followed by `\n` drops back to idle so a single
/// stray byte can't desynchronize the scan from every frame after it.
fn find_frame(buf: &[u8]) -> Option<(usize, usize)> {
    let mut state = ScanState::Idle;
    let mut start = 0;
    for (i, &byte) in buf.iter().enumerate() {
        match state {
            ScanState::Idle => {
                if byte == b':' {
                    start = i;
                    state = ScanState::Reception;
                }
            }
            ScanState::Reception => {
                if byte == b':' {
                    start = i;
                } else if byte == b'\r' {
                    state = ScanState::WaitingEnd;
                }
            }
            ScanState::WaitingEnd => {
                if byte == b'\n' {
                    return Some((start, i - 1));
                } else if byte == b':' {
                    start = i;
                    state = ScanState::Reception;
                } else {
                    state = ScanState::Idle;
                }
            }
        }
    }
    None
}

fn hex_nibble(byte: u8) -> Result<u8> {
    match byte {
        b'0'..=b'9' => Ok(byte - b'0'),
        b'A'..=b'F' => Ok(byte - b'A' + 10),
        b'a'..=b'f' => Ok(byte - b'a' + 10),
        _ => Err(Error::invalid_response("invalid ASCII hex digit")),
    }
}

/// Hex-decode and LRC-check the frame body between the `:` and `\r\n`.
/// Returns the unit byte followed by the PDU, with the trailing LRC byte
/// stripped off.
fn decode_body(buf: &[u8], start: usize, end: usize) -> Result<Vec<u8>> {
    let hex = &buf[start + 1..end];
    if hex.is_empty() || hex.len() % 2 != 0 {
        return Err(Error::invalid_response("malformed ASCII hex payload"));
    }
    let mut raw = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.chunks(2) {
        raw.push((hex_nibble(chunk[0])? << 4) | hex_nibble(chunk[1])?);
    }
    if raw.len() < 2 {
        return Err(Error::invalid_response("ASCII frame too short"));
    }
    let (body, trailer) = raw.split_at(raw.len() - 1);
    if lrc(body) != trailer[0] {
        return Err(Error::ChecksumMismatch);
    }
    Ok(body.to_vec())
}

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

fn put_hex_byte(byte: u8, dst: &mut BytesMut) {
    dst.put_u8(HEX_DIGITS[(byte >> 4) as usize]);
    dst.put_u8(HEX_DIGITS[(byte & 0x0F) as usize]);
}

fn encode_adu(header: Header, pdu: &[u8], dst: &mut BytesMut) {
    let mut body = Vec::with_capacity(1 + pdu.len());
    body.push(header.slave.0);
    body.extend_from_slice(pdu);
    let checksum = lrc(&body);
    dst.put_u8(b':');
    for byte in body.iter().chain(std::iter::once(&checksum)) {
        put_hex_byte(*byte, dst);
    }
    dst.extend_from_slice(b"\r\n");
}

/// Decodes responses, encodes requests; used by an ASCII client.
#[derive(Debug, Default)]
pub struct ClientCodec;

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let Some((start, end)) = find_frame(src) else {
                if src.len() > MAX_ASCII_FRAME_LEN {
                    return Err(Error::invalid_response(
                        "no ASCII frame terminator within maximum frame length",
                    ));
                }
                return Ok(None);
            };
            let consumed = end + 2;
            match decode_body(src, start, end) {
                Ok(body) => {
                    let header = Header { slave: Slave(body[0]) };
                    let payload = decode_response_payload(&body[1..]);
                    src.advance(consumed);
                    return payload.map(|payload| Some(ResponseAdu { hdr: header, payload }));
                }
                Err(Error::ChecksumMismatch) => {
                    log::warn!("ASCII response checksum mismatch, discarding frame");
                    src.advance(consumed);
                }
                Err(err) => {
                    src.advance(consumed);
                    return Err(err);
                }
            }
        }
    }
}

impl Encoder<RequestAdu> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu, dst: &mut BytesMut) -> Result<()> {
        encode_adu(adu.hdr, &adu.request.encode(), dst);
        Ok(())
    }
}

/// Decodes requests, encodes responses; used by an ASCII server.
#[derive(Debug, Default)]
pub struct ServerCodec;

impl Decoder for ServerCodec {
    type Item = RequestAdu;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let Some((start, end)) = find_frame(src) else {
                if src.len() > MAX_ASCII_FRAME_LEN {
                    return Err(Error::invalid_response(
                        "no ASCII frame terminator within maximum frame length",
                    ));
                }
                return Ok(None);
            };
            let consumed = end + 2;
            match decode_body(src, start, end) {
                Ok(body) => {
                    let header = Header { slave: Slave(body[0]) };
                    let request = Request::decode(&body[1..]);
                    src.advance(consumed);
                    return request.map(|request| Some(RequestAdu { hdr: header, request }));
                }
                Err(Error::ChecksumMismatch) => {
                    log::warn!("ASCII request checksum mismatch, discarding frame");
                    src.advance(consumed);
                }
                Err(err) => {
                    src.advance(consumed);
                    return Err(err);
                }
            }
        }
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
            hdr: Header { slave: Slave(0x0B) },
            request: Request::ReadCoils(0x0013, 0x0013),
        };
        codec.encode(adu, &mut buf).unwrap();
        assert_eq!(&buf[..], b":0B0100130013CE\r\n");
    }

    #[test]
    fn server_codec_decodes_known_frame() {
        let mut codec = ServerCodec;
        let mut buf = BytesMut::from(&b":0B0100130013CE\r\n"[..]);
        let adu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(adu.hdr.slave, Slave(0x0B));
        assert_eq!(adu.request, Request::ReadCoils(0x0013, 0x0013));
        assert!(buf.is_empty());
    }

    #[test]
    fn server_codec_skips_leading_noise() {
        let mut codec = ServerCodec;
        let mut buf = BytesMut::from(&b"\x00\x00:0B0100130013CE\r\n"[..]);
        let adu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(adu.request, Request::ReadCoils(0x0013, 0x0013));
    }

    #[test]
    fn server_codec_restarts_reception_on_an_embedded_colon() {
        let mut codec = ServerCodec;
        // The first ':' starts a frame that never completes; a second ':'
        // arrives before any '\r\n' and must restart the scan from there.
        let mut buf = BytesMut::from(&b":FFFF:0B0100130013CE\r\n"[..]);
        let adu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(adu.hdr.slave, Slave(0x0B));
        assert_eq!(adu.request, Request::ReadCoils(0x0013, 0x0013));
    }

    #[test]
    fn server_codec_resyncs_past_a_bare_cr() {
        let mut codec = ServerCodec;
        // '\r' not immediately followed by '\n' must drop back to idle
        // instead of treating it as the start of a real terminator.
        let mut buf = BytesMut::from(&b":0B0100130013CE\rX:0B0100130013CE\r\n"[..]);
        let adu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(adu.hdr.slave, Slave(0x0B));
        assert_eq!(adu.request, Request::ReadCoils(0x0013, 0x0013));
    }

    #[test]
    fn server_codec_waits_for_terminator() {
        let mut codec = ServerCodec;
        let mut buf = BytesMut::from(&b":0B010013"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn server_codec_discards_bad_checksum_and_keeps_scanning() {
        let mut codec = ServerCodec;
        let mut buf = BytesMut::from(&b":0B0100130013FF\r\n:0B0100130013CE\r\n"[..]);
        let adu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(adu.request, Request::ReadCoils(0x0013, 0x0013));
        assert!(buf.is_empty());
    }
}
