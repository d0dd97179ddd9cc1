//! Read engine: turns inbound bytes into messages and control events.
//!
//! Feed bytes with [`ReadEngine::process`] as they arrive. Frames are decoded
//! as soon as they are complete, fragmented messages are reassembled, pings
//! are answered and the peer's side of the close handshake is handled through
//! the shared [`WriteEngine`] and [`ConnectionState`].

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};

use crate::close::CloseInfo;
use crate::error::ProtocolError;
use crate::frame::{self, Frame, FrameHeader, OpCode};
use crate::state::{ConnectionState, ConnectionStatus};
use crate::write::{CloseReply, WriteEngine};

/// A complete application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
}

/// Events produced by [`ReadEngine::process`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    Message(Message),
    /// A Pong echoing this payload has been queued if the connection is
    /// still `Open`; none is sent once closing has begun.
    Ping(Bytes),
    Pong(Bytes),
    /// Both Close frames have been exchanged; the transport can be torn down.
    Closed {
        peer: CloseInfo,
        initiated_locally: bool,
    },
    /// The peer broke the protocol. A Close frame with the matching code has
    /// been queued; the connection must be torn down.
    ProtocolError(ProtocolError),
}

#[derive(Debug)]
struct Reassembly {
    opcode: OpCode,
    data: BytesMut,
}

#[derive(Debug)]
pub struct ReadEngine {
    /// Bytes received but not yet decoded.
    buffer: BytesMut,
    /// Fragmented message in progress.
    reassembly: Option<Reassembly>,
    state: Arc<ConnectionState>,
    writer: WriteEngine,
    max_message_size: usize,
}

impl ReadEngine {
    pub fn new(state: Arc<ConnectionState>, writer: WriteEngine, max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            reassembly: None,
            state,
            writer,
            max_message_size,
        }
    }

    /// Append `data` and decode every complete frame.
    ///
    /// Bytes received before the connection is open are held until it is.
    /// Processing stops after a close or a protocol error.
    pub fn process(&mut self, data: &[u8]) -> Vec<ReadEvent> {
        let status = self.state.status();
        if status == ConnectionStatus::Closed {
            tracing::trace!(len = data.len(), "dropping bytes received after close");
            return Vec::new();
        }
        self.buffer.extend_from_slice(data);
        if status < ConnectionStatus::Open {
            return Vec::new();
        }

        let mut events = Vec::new();
        loop {
            let frame = match self.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    events.push(self.fail(err));
                    break;
                }
            };
            match self.handle_frame(frame) {
                Ok(Some(event @ ReadEvent::Closed { .. })) => {
                    events.push(event);
                    break;
                }
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(err) => {
                    events.push(self.fail(err));
                    break;
                }
            }
        }
        events
    }

    /// Forget buffered bytes and any partial message.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.reassembly = None;
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_reassembling(&self) -> bool {
        self.reassembly.is_some()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        let header = match FrameHeader::parse(&self.buffer)? {
            Some(h) => h,
            None => return Ok(None),
        };
        if header.mask.is_some() {
            return Err(ProtocolError::MaskedFrame);
        }
        // Reject oversized messages before their payload is buffered.
        if !header.opcode.is_control() {
            let buffered = self.reassembly.as_ref().map_or(0, |r| r.data.len()) as u64;
            let size = buffered.saturating_add(header.payload_len);
            if size > self.max_message_size as u64 {
                return Err(ProtocolError::MessageTooBig {
                    size,
                    max: self.max_message_size,
                });
            }
        }

        match frame::decode_frame(&self.buffer)? {
            Some((frame, consumed)) => {
                self.buffer.advance(consumed);
                tracing::trace!(opcode = ?frame.opcode, fin = frame.fin, len = frame.payload.len(), "decoded frame");
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<Option<ReadEvent>, ProtocolError> {
        match frame.opcode {
            OpCode::Text | OpCode::Binary => {
                if self.reassembly.is_some() {
                    return Err(ProtocolError::InterleavedDataFrame);
                }
                if frame.fin {
                    let message = into_message(frame.opcode, frame.payload)?;
                    return Ok(Some(ReadEvent::Message(message)));
                }
                self.reassembly = Some(Reassembly {
                    opcode: frame.opcode,
                    data: BytesMut::from(&frame.payload[..]),
                });
                Ok(None)
            }
            OpCode::Continuation => {
                let reassembly = self
                    .reassembly
                    .as_mut()
                    .ok_or(ProtocolError::UnexpectedContinuation)?;
                reassembly.data.extend_from_slice(&frame.payload);
                if !frame.fin {
                    return Ok(None);
                }
                match self.reassembly.take() {
                    Some(done) => {
                        let message = into_message(done.opcode, done.data.freeze())?;
                        Ok(Some(ReadEvent::Message(message)))
                    }
                    None => Ok(None),
                }
            }
            OpCode::Ping => {
                self.writer.send_pong(frame.payload.clone());
                Ok(Some(ReadEvent::Ping(frame.payload)))
            }
            OpCode::Pong => Ok(Some(ReadEvent::Pong(frame.payload))),
            OpCode::Close => self.handle_close(&frame.payload),
        }
    }

    fn handle_close(&mut self, payload: &[u8]) -> Result<Option<ReadEvent>, ProtocolError> {
        let peer = CloseInfo::parse(payload)?;
        match self.writer.receive_close(&peer) {
            Some(CloseReply::Echoed) => {
                tracing::debug!(code = u16::from(peer.code), reason = %peer.reason, "peer initiated close");
                Ok(Some(ReadEvent::Closed {
                    peer,
                    initiated_locally: false,
                }))
            }
            Some(CloseReply::Acknowledged) => {
                tracing::debug!(code = u16::from(peer.code), "peer acknowledged close");
                Ok(Some(ReadEvent::Closed {
                    peer,
                    initiated_locally: true,
                }))
            }
            None => {
                tracing::trace!(status = ?self.state.status(), "ignoring close frame");
                Ok(None)
            }
        }
    }

    fn fail(&mut self, err: ProtocolError) -> ReadEvent {
        let code = err.close_code();
        tracing::warn!(error = %err, code = u16::from(code), "protocol error");
        self.reset();
        self.writer.enqueue_close(CloseInfo::new(code, ""));
        ReadEvent::ProtocolError(err)
    }
}

fn into_message(opcode: OpCode, payload: Bytes) -> Result<Message, ProtocolError> {
    match opcode {
        OpCode::Text => String::from_utf8(payload.to_vec())
            .map(Message::Text)
            .map_err(|_| ProtocolError::InvalidUtf8),
        _ => Ok(Message::Binary(payload)),
    }
}
