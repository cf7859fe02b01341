// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The ASCII application data unit. Same shape as RTU's (unit address, no
//! transaction id) — the two variants differ only in wire encoding and
//! checksum (CRC-16 for RTU, LRC for ASCII), not in ADU structure.

use super::{Request, ResponsePayload, SerialHeader};

pub type Header = SerialHeader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestAdu {
    pub hdr: Header,
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseAdu {
    pub hdr: Header,
    pub payload: ResponsePayload,
}
