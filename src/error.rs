// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The crate-wide error and result types.

use crate::frame::ExceptionResponse;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while running the protocol engine.
///
/// Transport errors and timeouts are always returned to the immediate
/// caller; a server never lets a handler error escape to the transport,
/// it is instead mapped to an [`ExceptionResponse`] (see [`crate::server`]).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying transport failed to open, write, or was closed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The peer replied with a Modbus exception response.
    #[error(transparent)]
    Exception(#[from] ExceptionResponse),

    /// No response arrived before the client's per-request timeout elapsed.
    #[error("request timed out")]
    Timeout,

    /// A decoded frame failed a pre-check predicate (wrong unit/function
    /// code, wrong length, echoed bytes that don't match the request).
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The wire checksum (CRC-16 for RTU, LRC for ASCII) did not match.
    #[error("checksum mismatch")]
    ChecksumMismatch,
}

impl Error {
    pub(crate) fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }
}
