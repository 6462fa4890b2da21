// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Library error type

use std::io;

use crate::frame::ExceptionResponse;

/// A specialized [`Result`](std::result::Result) type for Modbus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Modbus master errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A request constructor was given an out-of-range field.
    #[error("invalid request options: {0}")]
    InvalidOptions(String),

    /// A PDU decoder ran out of bytes before the message was complete.
    #[error("incomplete PDU: need at least {expected} bytes, got {actual}")]
    IncompletePdu {
        /// Minimum number of bytes the decoder needed.
        expected: usize,
        /// Number of bytes actually available.
        actual: usize,
    },

    /// A transport frame ended before it could be parsed.
    #[error("incomplete response frame")]
    IncompleteResponseFrame,

    /// The CRC-16 trailer of an RTU/tunnel frame did not match.
    #[error("invalid checksum: expected 0x{expected:04X}, actual 0x{actual:04X}")]
    InvalidChecksum {
        /// CRC carried by the frame.
        expected: u16,
        /// CRC computed over the frame contents.
        actual: u16,
    },

    /// A header or unit mismatch, or a malformed payload.
    #[error("invalid response data: {0}")]
    InvalidResponseData(String),

    /// A function code that is not in the catalog, or a response code that
    /// matches neither the request nor an exception.
    #[error("invalid function code: 0x{0:02X}")]
    InvalidFunctionCode(u8),

    /// A well-formed Modbus exception response.
    #[error(transparent)]
    Exception(#[from] ExceptionResponse),

    /// No response arrived within the per-attempt window.
    #[error("request timed out")]
    Timeout,

    /// The underlying connection went down.
    #[error("connection closed")]
    ConnectionClosed,

    /// The transport's concurrency ceiling was exceeded.
    #[error("too many concurrent requests")]
    TooManyRequests,

    /// The transaction was cancelled before it completed.
    #[error("transaction cancelled")]
    Cancelled,

    /// An I/O error while writing to the connection.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether a failed attempt with this error may be re-issued.
    ///
    /// Exceptions are a policy decision (`retry_on_exception`) and are not
    /// classified here.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::IncompletePdu { .. }
                | Self::IncompleteResponseFrame
                | Self::InvalidChecksum { .. }
                | Self::InvalidResponseData(_)
                | Self::InvalidFunctionCode(_)
                | Self::Timeout
        )
    }

    /// A shallow copy for fan-out to the master error channel.
    ///
    /// `io::Error` is not `Clone`; its kind and message are preserved.
    pub(crate) fn clone_shallow(&self) -> Self {
        match self {
            Self::InvalidOptions(msg) => Self::InvalidOptions(msg.clone()),
            Self::IncompletePdu { expected, actual } => Self::IncompletePdu {
                expected: *expected,
                actual: *actual,
            },
            Self::IncompleteResponseFrame => Self::IncompleteResponseFrame,
            Self::InvalidChecksum { expected, actual } => Self::InvalidChecksum {
                expected: *expected,
                actual: *actual,
            },
            Self::InvalidResponseData(msg) => Self::InvalidResponseData(msg.clone()),
            Self::InvalidFunctionCode(code) => Self::InvalidFunctionCode(*code),
            Self::Exception(rsp) => Self::Exception(*rsp),
            Self::Timeout => Self::Timeout,
            Self::ConnectionClosed => Self::ConnectionClosed,
            Self::TooManyRequests => Self::TooManyRequests,
            Self::Cancelled => Self::Cancelled,
            Self::Io(err) => Self::Io(io::Error::new(err.kind(), err.to_string())),
        }
    }
}
