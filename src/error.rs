//! Error types for the WebSocket engine.

use std::io;

use thiserror::Error;

use crate::close::{CloseCode, CloseInfo};
use crate::state::ConnectionStatus;

/// A violation of RFC 6455 by the peer. Always fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// RSV1-3 set without a negotiated extension.
    #[error("reserved bits are not zero: {0:#05b}")]
    ReservedBitsNotZero(u8),

    /// Opcode in 0x3-0x7 or 0xB-0xF.
    #[error("invalid opcode {0:#x}")]
    InvalidOpCode(u8),

    /// Close, Ping or Pong with FIN cleared.
    #[error("control frame must not be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload longer than 125 bytes.
    #[error("control frame payload too large ({0} bytes, max 125)")]
    ControlFrameTooLarge(u64),

    /// 64-bit payload length with the most significant bit set.
    #[error("invalid payload length")]
    InvalidPayloadLength,

    /// Server frames must not be masked.
    #[error("server sent a masked frame")]
    MaskedFrame,

    /// Continuation frame with no fragmented message in progress.
    #[error("unexpected continuation frame")]
    UnexpectedContinuation,

    /// Text or Binary frame while a fragmented message is in progress.
    #[error("new data frame while a fragmented message is in progress")]
    InterleavedDataFrame,

    /// Close frame with a one byte payload.
    #[error("invalid close frame payload")]
    InvalidClosePayload,

    /// Text message or close reason that is not UTF-8.
    #[error("invalid UTF-8 payload")]
    InvalidUtf8,

    /// Message larger than the configured limit.
    #[error("message too big ({size} bytes, max {max})")]
    MessageTooBig { size: u64, max: usize },
}

impl ProtocolError {
    /// Close code reported for this violation.
    pub fn close_code(&self) -> CloseCode {
        match self {
            ProtocolError::InvalidUtf8 => CloseCode::InvalidPayload,
            ProtocolError::MessageTooBig { .. } => CloseCode::MessageTooBig,
            _ => CloseCode::ProtocolError,
        }
    }
}

/// A write the caller should not have made. The connection is unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("control frame payload too large ({0} bytes, max 125)")]
    ControlPayloadTooLarge(usize),

    #[error("close code {0} cannot be sent")]
    InvalidCloseCode(u16),

    #[error("close reason too long ({0} bytes, max 123)")]
    CloseReasonTooLong(usize),

    #[error("cannot write in state {0:?}")]
    InvalidState(ConnectionStatus),
}

/// Why a connection ended without a completed close handshake.
#[derive(Debug, Error)]
pub enum Error {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("transport closed unexpectedly")]
    TransportClosed,

    #[error("close handshake timed out")]
    CloseTimeout,

    #[error("connection failed locally with close code {}", u16::from(.0.code))]
    Failed(CloseInfo),

    #[error("connection aborted")]
    Aborted,
}

impl Error {
    /// Close code reported to the delegate for this failure.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Error::Protocol(err) => err.close_code(),
            Error::Failed(info) => info.code,
            _ => CloseCode::Abnormal,
        }
    }
}
