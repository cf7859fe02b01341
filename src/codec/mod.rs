// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-variant wire codecs built on [`tokio_util::codec`]. The pieces shared
//! by RTU and ASCII framing — working out how many bytes a PDU needs before
//! it can be decoded — live here; each variant's module then only adds its
//! own header and checksum handling.

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "ascii")]
pub mod ascii;

#[cfg(feature = "tcp")]
pub mod tcp;

use crate::error::{Error, Result};

/// Given the bytes of a request PDU seen so far (starting at the function
/// code byte), return the total PDU length once it is known, or `None` if
/// more bytes are needed to find out (e.g. a byte-count field hasn't arrived
/// yet).
pub(crate) fn request_pdu_len(buf: &[u8]) -> Result<Option<usize>> {
    let Some(&fn_code) = buf.first() else {
        return Ok(None);
    };
    let len = match fn_code {
        0x01..=0x06 => Some(5),
        0x0F | 0x10 => {
            if buf.len() < 6 {
                None
            } else {
                Some(6 + buf[5] as usize)
            }
        }
        0x11 => Some(1),
        0x16 => Some(7),
        0x17 => {
            if buf.len() < 10 {
                None
            } else {
                Some(10 + buf[9] as usize)
            }
        }
        0x2B => Some(4),
        code => {
            return Err(Error::invalid_response(format!(
                "function code 0x{code:02X} has no fixed framing and cannot be \
                 carried over a self-delimiting RTU/ASCII link"
            )))
        }
    };
    Ok(len)
}

/// Same as [`request_pdu_len`] but for a response PDU, including exception
/// responses (high bit of the function code set).
pub(crate) fn response_pdu_len(buf: &[u8]) -> Result<Option<usize>> {
    let Some(&fn_code) = buf.first() else {
        return Ok(None);
    };
    if fn_code & 0x80 != 0 {
        return Ok(if buf.len() >= 2 { Some(2) } else { None });
    }
    let len = match fn_code {
        0x01 | 0x02 | 0x03 | 0x04 | 0x11 | 0x17 => {
            if buf.len() < 2 {
                None
            } else {
                Some(2 + buf[1] as usize)
            }
        }
        0x05 | 0x06 | 0x0F | 0x10 => Some(5),
        0x16 => Some(7),
        0x2B => {
            if buf.len() < 7 {
                None
            } else {
                let count = buf[6] as usize;
                let mut pos = 7;
                let mut complete = true;
                for _ in 0..count {
                    if buf.len() < pos + 2 {
                        complete = false;
                        break;
                    }
                    let len = buf[pos + 1] as usize;
                    pos += 2 + len;
                    if buf.len() < pos {
                        complete = false;
                        break;
                    }
                }
                complete.then_some(pos)
            }
        }
        code => {
            return Err(Error::invalid_response(format!(
                "function code 0x{code:02X} has no fixed framing and cannot be \
                 carried over a self-delimiting RTU/ASCII link"
            )))
        }
    };
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_pdu_len_waits_for_byte_count() {
        assert_eq!(request_pdu_len(&[0x0F, 0x00, 0x01, 0x00, 0x04]).unwrap(), None);
        assert_eq!(
            request_pdu_len(&[0x0F, 0x00, 0x01, 0x00, 0x04, 0x01, 0xAB]).unwrap(),
            Some(7)
        );
    }

    #[test]
    fn request_pdu_len_fixed_shapes() {
        assert_eq!(request_pdu_len(&[0x03, 0, 0, 0, 1]).unwrap(), Some(5));
        assert_eq!(request_pdu_len(&[0x11]).unwrap(), Some(1));
        assert_eq!(request_pdu_len(&[0x16, 0, 0, 0, 0, 0, 0]).unwrap(), Some(7));
    }

    #[test]
    fn response_pdu_len_mask_write_register() {
        assert_eq!(response_pdu_len(&[0x16, 0, 0, 0, 0, 0]).unwrap(), None);
        assert_eq!(
            response_pdu_len(&[0x16, 0, 0, 0, 0, 0, 0]).unwrap(),
            Some(7)
        );
    }

    #[test]
    fn response_pdu_len_exception() {
        assert_eq!(response_pdu_len(&[0x83]).unwrap(), None);
        assert_eq!(response_pdu_len(&[0x83, 0x02]).unwrap(), Some(2));
    }

    #[test]
    fn response_pdu_len_device_identification() {
        let buf = [0x2B, 0x0E, 0x01, 0x81, 0x00, 0x00, 0x02, 0x00, 0x01, b'x', 0x01, 0x01, b'y'];
        assert_eq!(response_pdu_len(&buf).unwrap(), Some(buf.len()));
        assert_eq!(response_pdu_len(&buf[..buf.len() - 1]).unwrap(), None);
    }
}
