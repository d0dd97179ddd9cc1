//! Close codes and close frame payloads (RFC 6455 Section 7.4)

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Status code carried by a Close frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000: the purpose of the connection has been fulfilled.
    Normal,
    /// 1001: endpoint going away (server shutdown, page navigation).
    GoingAway,
    /// 1002: protocol violation.
    ProtocolError,
    /// 1003: received a data type the endpoint cannot accept.
    UnsupportedData,
    /// 1005: a Close frame without a status code. Never sent on the wire.
    NoStatusReceived,
    /// 1006: connection dropped without a Close frame. Never sent on the wire.
    Abnormal,
    /// 1007: payload inconsistent with the message type (e.g. invalid UTF-8).
    InvalidPayload,
    /// 1008: generic policy violation.
    PolicyViolation,
    /// 1009: message too big to process.
    MessageTooBig,
    /// 1010: client expected an extension the server did not negotiate.
    MandatoryExtension,
    /// 1011: unexpected condition on the server.
    InternalError,
    /// 1004, 1012..=2999: reserved for future protocol revisions.
    Reserved(u16),
    /// 3000..=4999: libraries, frameworks and applications.
    Application(u16),
    /// Anything outside the ranges above.
    Invalid(u16),
}

impl CloseCode {
    /// Whether this code may appear in a Close frame on the wire.
    pub fn is_sendable(self) -> bool {
        !matches!(
            self,
            CloseCode::NoStatusReceived
                | CloseCode::Abnormal
                | CloseCode::Reserved(_)
                | CloseCode::Invalid(_)
        )
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1005 => CloseCode::NoStatusReceived,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            1004 | 1012..=2999 => CloseCode::Reserved(code),
            3000..=4999 => CloseCode::Application(code),
            _ => CloseCode::Invalid(code),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::NoStatusReceived => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::Reserved(code) | CloseCode::Application(code) | CloseCode::Invalid(code) => code,
        }
    }
}

/// Code and reason exchanged during the close handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: CloseCode,
    pub reason: String,
}

impl CloseInfo {
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Parse the payload of a received Close frame.
    ///
    /// An empty payload means the peer sent no status (1005). A single byte is
    /// malformed, and the reason must be valid UTF-8.
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        match payload.len() {
            0 => Ok(Self::new(CloseCode::NoStatusReceived, "")),
            1 => Err(ProtocolError::InvalidClosePayload),
            _ => {
                let code = u16::from_be_bytes([payload[0], payload[1]]);
                let reason = std::str::from_utf8(&payload[2..])
                    .map_err(|_| ProtocolError::InvalidUtf8)?;
                Ok(Self::new(CloseCode::from(code), reason))
            }
        }
    }

    /// Serialize into a Close frame payload: 2-byte big-endian code, then the reason.
    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.reason.len());
        buf.put_u16(self.code.into());
        buf.put_slice(self.reason.as_bytes());
        buf.freeze()
    }

    /// The CloseInfo to send back when answering a peer-initiated close.
    /// Codes that must not appear on the wire are answered with Normal.
    pub fn echo(&self) -> Self {
        if self.code.is_sendable() {
            self.clone()
        } else {
            Self::new(CloseCode::Normal, "")
        }
    }
}

impl Default for CloseInfo {
    fn default() -> Self {
        Self::new(CloseCode::Normal, "")
    }
}
