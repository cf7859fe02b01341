// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The RTU application data unit: a [`SerialHeader`] (unit address only,
//! no transaction id) plus a PDU, framed on the wire with a CRC-16 trailer.

use super::{Request, ResponsePayload, SerialHeader};

/// [`SerialHeader`] re-exported under the name used throughout the RTU
/// codec and client/server modules.
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
