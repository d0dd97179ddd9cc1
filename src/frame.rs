//! WebSocket frame codec (RFC 6455 Section 5.2).
//!
//! Pure encoding and decoding of wire frames. There is no I/O here and no state
//! beyond the caller's buffer: [`decode_frame`] either returns a complete frame
//! and the number of bytes it occupied, or `None` when more bytes are needed.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                               |   Masking-key, if MASK set    |
//! +-------------------------------+-------------------------------+
//! :                     Payload Data continued ...                :
//! +---------------------------------------------------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::close::CloseInfo;
use crate::error::ProtocolError;

pub const FIN_MASK: u8 = 0x80;
pub const RSV_MASK: u8 = 0x70;
pub const OPCODE_MASK: u8 = 0x0F;
pub const MASK_MASK: u8 = 0x80;
pub const PAYLOAD_LEN_MASK: u8 = 0x7F;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Largest possible frame header: 2 + 8 byte length + 4 byte mask.
pub const MAX_HEAD_SIZE: usize = 14;

/// Frame opcode. 0x3-0x7 and 0xB-0xF are reserved and rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Control frames have the high bit of the opcode set.
    pub fn is_control(self) -> bool {
        u8::from(self) & 0x8 != 0
    }
}

impl TryFrom<u8> for OpCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            _ => Err(ProtocolError::InvalidOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(opcode: OpCode) -> u8 {
        match opcode {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// A parsed frame header, available before the payload has arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
    /// Header size including extended length and mask key.
    pub header_len: usize,
}

impl FrameHeader {
    /// Parse a frame header from the start of `data`.
    ///
    /// Returns `Ok(None)` until the whole header (including any extended
    /// length and mask key) is available.
    pub fn parse(data: &[u8]) -> Result<Option<Self>, ProtocolError> {
        if data.len() < 2 {
            return Ok(None);
        }

        let rsv = (data[0] & RSV_MASK) >> 4;
        if rsv != 0 {
            return Err(ProtocolError::ReservedBitsNotZero(rsv));
        }
        let fin = data[0] & FIN_MASK != 0;
        let opcode = OpCode::try_from(data[0] & OPCODE_MASK)?;
        let masked = data[1] & MASK_MASK != 0;
        let len_field = data[1] & PAYLOAD_LEN_MASK;

        let extra = match len_field {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        let header_len = 2 + extra + if masked { 4 } else { 0 };
        if data.len() < header_len {
            return Ok(None);
        }

        let payload_len = match extra {
            2 => u16::from_be_bytes([data[2], data[3]]) as u64,
            8 => {
                let mut len_bytes = [0u8; 8];
                len_bytes.copy_from_slice(&data[2..10]);
                u64::from_be_bytes(len_bytes)
            }
            _ => len_field as u64,
        };
        if payload_len & (1 << 63) != 0 {
            return Err(ProtocolError::InvalidPayloadLength);
        }

        if opcode.is_control() {
            if !fin {
                return Err(ProtocolError::FragmentedControlFrame);
            }
            if payload_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(ProtocolError::ControlFrameTooLarge(payload_len));
            }
        }

        let mask = if masked {
            let at = 2 + extra;
            Some([data[at], data[at + 1], data[at + 2], data[at + 3]])
        } else {
            None
        };

        Ok(Some(Self {
            fin,
            opcode,
            mask,
            payload_len,
            header_len,
        }))
    }

    /// Total frame size, or `None` if it does not fit in memory.
    pub fn frame_len(&self) -> Option<usize> {
        usize::try_from(self.payload_len)
            .ok()
            .and_then(|len| len.checked_add(self.header_len))
    }
}

/// A single wire-level frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    /// RSV1-3. Always zero unless an extension is negotiated, which this crate never does.
    pub rsv: u8,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    /// Unmasked payload.
    pub payload: Bytes,
}

impl Frame {
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            rsv: 0,
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, payload)
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, payload)
    }

    pub fn continuation(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Continuation, payload)
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, payload)
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, payload)
    }

    pub fn close(info: &CloseInfo) -> Self {
        Self::new(true, OpCode::Close, info.to_payload())
    }

    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    pub fn with_mask(mut self, mask: [u8; 4]) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Serialize the frame onto `dst`, masking the payload if a key is set.
    pub fn encode(&self, dst: &mut BytesMut) {
        let len = self.payload.len();
        dst.reserve(MAX_HEAD_SIZE + len);

        let fin_bit = if self.fin { FIN_MASK } else { 0 };
        dst.put_u8(fin_bit | ((self.rsv << 4) & RSV_MASK) | u8::from(self.opcode));

        let mask_bit = if self.mask.is_some() { MASK_MASK } else { 0 };
        if len <= MAX_CONTROL_PAYLOAD {
            dst.put_u8(mask_bit | len as u8);
        } else if len <= u16::MAX as usize {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(len as u16);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(len as u64);
        }

        match self.mask {
            Some(mask) => {
                dst.put_slice(&mask);
                let start = dst.len();
                dst.put_slice(&self.payload);
                apply_mask(&mut dst[start..], mask);
            }
            None => dst.put_slice(&self.payload),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// XOR `buf` with the mask key. Applying it twice restores the input.
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// Split a data message into frames of at most `max_frame_size` payload bytes.
///
/// The first frame carries `opcode`, the rest are Continuation frames, and only
/// the last has FIN set. A `max_frame_size` of zero disables splitting.
pub fn fragment(opcode: OpCode, payload: Bytes, max_frame_size: usize) -> Vec<Frame> {
    if max_frame_size == 0 || payload.len() <= max_frame_size {
        return vec![Frame::new(true, opcode, payload)];
    }

    let count = payload.len().div_ceil(max_frame_size);
    let mut frames = Vec::with_capacity(count);
    let mut offset = 0;
    while offset < payload.len() {
        let end = (offset + max_frame_size).min(payload.len());
        let kind = if offset == 0 { opcode } else { OpCode::Continuation };
        frames.push(Frame::new(end == payload.len(), kind, payload.slice(offset..end)));
        offset = end;
    }
    frames
}

/// Decode one frame from the start of `data`.
///
/// Returns the frame with its payload unmasked and the number of bytes
/// consumed, or `Ok(None)` if `data` does not yet hold a complete frame.
pub fn decode_frame(data: &[u8]) -> Result<Option<(Frame, usize)>, ProtocolError> {
    let header = match FrameHeader::parse(data)? {
        Some(h) => h,
        None => return Ok(None),
    };
    let total = header.frame_len().ok_or(ProtocolError::MessageTooBig {
        size: header.payload_len,
        max: usize::MAX,
    })?;
    if data.len() < total {
        return Ok(None);
    }

    let mut payload = BytesMut::from(&data[header.header_len..total]);
    if let Some(mask) = header.mask {
        apply_mask(&mut payload, mask);
    }

    let frame = Frame {
        fin: header.fin,
        rsv: 0,
        opcode: header.opcode,
        mask: header.mask,
        payload: payload.freeze(),
    };
    Ok(Some((frame, total)))
}

/// Decode every complete frame in `data`.
///
/// Returns the frames and the number of bytes they occupied; a trailing
/// partial frame is left for the next call.
///
/// An invalid frame fails the whole call, discarding the frames decoded
/// before it. Callers that must act on those (as a connection does, since
/// they precede the violation on the wire) step through with [`decode_frame`].
pub fn decode(data: &[u8]) -> Result<(Vec<Frame>, usize), ProtocolError> {
    let mut frames = Vec::new();
    let mut consumed = 0;
    while let Some((frame, len)) = decode_frame(&data[consumed..])? {
        frames.push(frame);
        consumed += len;
    }
    Ok((frames, consumed))
}
