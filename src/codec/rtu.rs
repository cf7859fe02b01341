// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU framing (§4.3.a): a unit byte, a PDU, and a CRC-16 trailer.
//!
//! Two distinct decoding strategies are provided, matching the two modes
//! the application layer runs the framer in:
//!
//! - [`ClientCodec`]/[`ServerCodec`] implement [`Decoder`] greedily: as soon
//!   as a buffer holds enough bytes for a grammatically complete, checksum
//!   valid frame it is emitted, and a checksum failure drops a single byte
//!   and retries. This is "waiting" mode — a client that already knows a
//!   response is due attempts to frame every burst it receives.
//! - [`ServerFramer`] instead accumulates bytes until the line has been
//!   silent for one 3.5-character interval, then makes a single attempt to
//!   frame the whole buffer and unconditionally discards it afterwards,
//!   matching "not waiting" mode's reliance on inter-frame silence rather
//!   than a grammar-driven length guess.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::request_pdu_len;
use crate::{
    error::{Error, Result},
    frame::rtu::{Header, RequestAdu, ResponseAdu},
    frame::{decode_response_payload, encode_response_payload, Request},
    slave::Slave,
    transport::{Reply, Transport, TransportEvent},
    util::crc16,
};

const MAX_FRAME_LEN: usize = 256;
const MAX_RESYNC_RETRIES: usize = 16;

/// Compute the RTU inter-frame silence interval: 3.5 character times (11
/// bits/character) at the transport's baud rate, floored at the fixed
/// 1.75 ms carve-out the Modbus specification mandates above 19200 baud.
/// `override_duration` lets an application pin an exact value instead.
#[must_use]
pub fn silence_duration(
    kind: crate::transport::TransportKind,
    override_duration: Option<Duration>,
) -> Duration {
    use crate::transport::TransportKind;
    if let Some(duration) = override_duration {
        return duration;
    }
    let baud_rate = match kind {
        TransportKind::Serial { baud_rate } => baud_rate,
        TransportKind::Net => return Duration::from_micros(1750),
    };
    if baud_rate > 19200 {
        Duration::from_micros(1750)
    } else {
        Duration::from_secs_f64(11.0 * 3.5 / f64::from(baud_rate))
    }
}

/// Attempt to split one complete, checksum-valid RTU frame (unit byte + PDU
/// + CRC) off the front of `buf`. Returns the number of bytes consumed, the
/// header and the raw PDU bytes, or `None` if more data is needed.
fn try_decode(
    buf: &[u8],
    pdu_len_of: fn(&[u8]) -> Result<Option<usize>>,
) -> Result<Option<(usize, Header, Bytes)>> {
    if buf.is_empty() {
        return Ok(None);
    }
    let Some(pdu_len) = pdu_len_of(&buf[1..])? else {
        if buf.len() > MAX_FRAME_LEN {
            return Err(Error::invalid_response("RTU frame exceeds maximum length"));
        }
        return Ok(None);
    };
    let frame_len = 1 + pdu_len;
    if buf.len() < frame_len + 2 {
        return Ok(None);
    }
    let expected = crc16(&buf[..frame_len]).to_le_bytes();
    if buf[frame_len..frame_len + 2] != expected {
        return Err(Error::ChecksumMismatch);
    }
    let header = Header {
        slave: Slave(buf[0]),
    };
    let pdu = Bytes::copy_from_slice(&buf[1..frame_len]);
    Ok(Some((frame_len + 2, header, pdu)))
}

fn encode_adu(header: Header, pdu: &[u8], dst: &mut BytesMut) {
    let start = dst.len();
    dst.put_u8(header.slave.0);
    dst.extend_from_slice(pdu);
    let crc = crc16(&dst[start..]);
    dst.extend_from_slice(&crc.to_le_bytes());
}

/// Decodes responses, encodes requests; used by an RTU client.
#[derive(Debug, Default)]
pub struct ClientCodec {
    resync_attempts: usize,
}

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match try_decode(src, super::response_pdu_len) {
                Ok(Some((consumed, hdr, pdu))) => {
                    let payload = decode_response_payload(&pdu)?;
                    src.advance(consumed);
                    self.resync_attempts = 0;
                    return Ok(Some(ResponseAdu { hdr, payload }));
                }
                Ok(None) => return Ok(None),
                Err(Error::ChecksumMismatch) if self.resync_attempts < MAX_RESYNC_RETRIES => {
                    log::debug!("RTU response checksum mismatch, dropping one byte to resync");
                    self.resync_attempts += 1;
                    src.advance(1);
                }
                Err(err) => return Err(err),
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

/// Decodes requests, encodes responses; used directly (via
/// [`tokio_util::codec::Framed`]) wherever greedy per-burst framing is
/// acceptable, and as the one-shot decoder [`ServerFramer`] calls once its
/// silence timer expires.
#[derive(Debug, Default)]
pub struct ServerCodec {
    resync_attempts: usize,
}

impl Decoder for ServerCodec {
    type Item = RequestAdu;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match try_decode(src, request_pdu_len) {
                Ok(Some((consumed, hdr, pdu))) => {
                    let request = Request::decode(&pdu)?;
                    src.advance(consumed);
                    self.resync_attempts = 0;
                    return Ok(Some(RequestAdu { hdr, request }));
                }
                Ok(None) => return Ok(None),
                Err(Error::ChecksumMismatch) if self.resync_attempts < MAX_RESYNC_RETRIES => {
                    log::debug!("RTU request checksum mismatch, dropping one byte to resync");
                    self.resync_attempts += 1;
                    src.advance(1);
                }
                Err(err) => return Err(err),
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

/// One-shot framing attempt made when the silence timer expires: a CRC
/// failure drops the leading byte and retries against the still-buffered
/// remainder (the same resynchronization the greedy decoders use), but
/// unlike them this never waits for more data — an incomplete trailing PDU
/// at this point is noise, not a frame in progress, since §4.3.a mandates
/// the whole buffer is discarded after the attempt regardless of outcome.
fn decode_whole_buffer(mut buf: &[u8]) -> Option<RequestAdu> {
    loop {
        if buf.is_empty() {
            return None;
        }
        match try_decode(buf, request_pdu_len) {
            Ok(Some((_consumed, hdr, pdu))) => {
                return match Request::decode(&pdu) {
                    Ok(request) => Some(RequestAdu { hdr, request }),
                    Err(err) => {
                        log::warn!("discarding malformed RTU request: {err}");
                        None
                    }
                };
            }
            Ok(None) => {
                log::warn!("discarding incomplete RTU request after silence timeout");
                return None;
            }
            Err(Error::ChecksumMismatch) => {
                log::debug!(
                    "RTU request checksum mismatch at silence timeout, dropping one byte to resync"
                );
                buf = &buf[1..];
            }
            Err(err) => {
                log::warn!("discarding RTU request: {err}");
                return None;
            }
        }
    }
}

/// Drives RTU "not waiting" reception (§4.3.a): accumulates inbound bytes
/// and, once the line has fallen silent for one 3.5-character interval,
/// makes a single attempt to frame the whole buffer before unconditionally
/// clearing it.
#[derive(Debug)]
pub struct ServerFramer {
    buf: BytesMut,
    quiet: Duration,
}

impl ServerFramer {
    #[must_use]
    pub fn new(quiet: Duration) -> Self {
        Self {
            buf: BytesMut::new(),
            quiet,
        }
    }

    /// Await the next request. Returns `None` once the transport is closed
    /// or destroyed.
    pub async fn next_request(
        &mut self,
        transport: &mut dyn Transport,
    ) -> Option<Result<(RequestAdu, Reply)>> {
        let mut last_reply: Option<Reply> = None;
        loop {
            let event = if self.buf.is_empty() {
                transport.next_event().await
            } else {
                match tokio::time::timeout(self.quiet, transport.next_event()).await {
                    Ok(event) => event,
                    Err(_elapsed) => {
                        let request = decode_whole_buffer(&self.buf);
                        self.buf.clear();
                        if let (Some(request), Some(reply)) = (request, last_reply.take()) {
                            return Some(Ok((request, reply)));
                        }
                        continue;
                    }
                }
            };
            match event? {
                TransportEvent::Data(bytes, reply) => {
                    self.buf.extend_from_slice(&bytes);
                    last_reply = Some(reply);
                }
                TransportEvent::Error(err) => return Some(Err(err.into())),
                TransportEvent::Closed => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Response;

    fn request_adu() -> RequestAdu {
        RequestAdu {
            hdr: Header { slave: Slave(0x11) },
            request: Request::ReadHoldingRegisters(0x006B, 3),
        }
    }

    #[test]
    fn client_codec_encodes_known_frame() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(request_adu(), &mut buf).unwrap();
        assert_eq!(
            &buf[..],
            &[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x87]
        );
    }

    #[test]
    fn server_codec_decodes_known_frame() {
        let mut codec = ServerCodec::default();
        let mut buf = BytesMut::from(
            &[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x87][..],
        );
        let adu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(adu, request_adu());
        assert!(buf.is_empty());
    }

    #[test]
    fn server_codec_waits_for_more_bytes() {
        let mut codec = ServerCodec::default();
        let mut buf = BytesMut::from(&[0x11, 0x03, 0x00, 0x6B][..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn client_codec_resyncs_past_garbage_prefix() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(&[0xFF, 0xFF][..]);
        buf.extend_from_slice(&[0x11, 0x03, 0x06, 0xAE, 0x41, 0x56, 0x52, 0x43, 0x40, 0x49, 0xAD]);
        let adu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(adu.hdr.slave, Slave(0x11));
        assert_eq!(
            adu.payload.unwrap(),
            Response::ReadHoldingRegisters(vec![0xAE41, 0x5652, 0x4340])
        );
    }

    #[test]
    fn silence_duration_floors_at_high_baud() {
        let kind = crate::transport::TransportKind::Serial { baud_rate: 115_200 };
        assert_eq!(silence_duration(kind, None), Duration::from_micros(1750));
    }

    #[tokio::test]
    async fn server_framer_emits_after_silence() {
        let (client, mut peer) = tokio::io::duplex(64);
        let mut transport = crate::transport::IoTransport::net(client);
        let mut framer = ServerFramer::new(Duration::from_millis(20));

        tokio::io::AsyncWriteExt::write_all(
            &mut peer,
            &[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x87],
        )
        .await
        .unwrap();

        let (adu, _reply) = framer
            .next_request(&mut transport)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(adu, request_adu());
    }
}
