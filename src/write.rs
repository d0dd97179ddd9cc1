//! Write engine: frames, masks and queues outbound data.
//!
//! [`WriteEngine`] is a cheap clonable handle. Any thread may enqueue through
//! it; the I/O context drains the queue with [`WriteEngine::flush`] whenever
//! the transport is writable. Producers never wait for the drain.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::close::{CloseCode, CloseInfo};
use crate::config::WebSocketConfig;
use crate::error::WriteError;
use crate::frame::{self, Frame, OpCode, MAX_CONTROL_PAYLOAD};
use crate::read::Message;
use crate::state::{ConnectionState, ConnectionStatus};
use crate::transport::{Transport, WriteStatus};

/// Outcome of [`WriteEngine::flush`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// Everything queued has been handed to the transport.
    Drained,
    /// The transport blocked; call again once it is writable.
    Pending,
}

/// How [`WriteEngine::receive_close`] resolved a peer's Close frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseReply {
    /// The peer started the close; our echo is queued.
    Echoed,
    /// The peer answered our Close.
    Acknowledged,
}

#[derive(Debug)]
struct Outbound {
    /// Serialized frames (or raw chunks) in send order.
    queue: VecDeque<Bytes>,
    /// Bytes of the front entry already accepted by the transport.
    written: usize,
    rng: StdRng,
    /// Close frame we sent, if any.
    sent_close: Option<CloseInfo>,
}

#[derive(Debug)]
struct Shared {
    state: Arc<ConnectionState>,
    max_frame_size: usize,
    outbound: Mutex<Outbound>,
}

#[derive(Debug, Clone)]
pub struct WriteEngine {
    shared: Arc<Shared>,
}

impl WriteEngine {
    pub fn new(state: Arc<ConnectionState>, config: &WebSocketConfig) -> Self {
        Self::with_rng(state, config, StdRng::from_entropy())
    }

    /// Use `rng` for mask keys. Seed it for reproducible output in tests.
    pub fn with_rng(state: Arc<ConnectionState>, config: &WebSocketConfig, rng: StdRng) -> Self {
        Self {
            shared: Arc::new(Shared {
                state,
                max_frame_size: config.max_frame_size,
                outbound: Mutex::new(Outbound {
                    queue: VecDeque::new(),
                    written: 0,
                    rng,
                    sent_close: None,
                }),
            }),
        }
    }

    pub fn write_message(&self, message: Message) -> Result<(), WriteError> {
        match message {
            Message::Text(text) => self.write_data(OpCode::Text, Bytes::from(text)),
            Message::Binary(data) => self.write_data(OpCode::Binary, data),
        }
    }

    pub fn write_text(&self, text: impl Into<String>) -> Result<(), WriteError> {
        self.write_data(OpCode::Text, Bytes::from(text.into()))
    }

    pub fn write_binary(&self, data: impl Into<Bytes>) -> Result<(), WriteError> {
        self.write_data(OpCode::Binary, data.into())
    }

    pub fn write_ping(&self, payload: impl Into<Bytes>) -> Result<(), WriteError> {
        self.write_control(Frame::ping(payload))
    }

    pub fn write_pong(&self, payload: impl Into<Bytes>) -> Result<(), WriteError> {
        self.write_control(Frame::pong(payload))
    }

    /// Start the close handshake: moves `Open → ClosingHandshakeInitiated` and
    /// queues the Close frame.
    pub fn write_close(&self, code: CloseCode, reason: &str) -> Result<(), WriteError> {
        validate_close(code, reason)?;
        let info = CloseInfo::new(code, reason);

        // Transition and enqueue under one lock: a peer Close handled in
        // between would otherwise look like an acknowledgment.
        let mut outbound = self.shared.outbound.lock();
        self.ensure_open(&outbound)?;
        self.shared
            .state
            .advance(ConnectionStatus::Open, ConnectionStatus::ClosingHandshakeInitiated)
            .map_err(WriteError::InvalidState)?;
        tracing::debug!(code = u16::from(code), reason, "sending close frame");
        Self::push_close(&mut outbound, info);
        Ok(())
    }

    /// Queue bytes without framing. Only valid before the handshake completes,
    /// e.g. for the HTTP Upgrade request.
    pub fn write_raw(&self, data: impl Into<Bytes>) -> Result<(), WriteError> {
        match self.shared.state.status() {
            ConnectionStatus::New | ConnectionStatus::Opening => {
                let data = data.into();
                tracing::trace!(len = data.len(), "queued raw bytes");
                self.shared.outbound.lock().queue.push_back(data);
                Ok(())
            }
            status => Err(WriteError::InvalidState(status)),
        }
    }

    /// Drain the queue into `transport` in FIFO order.
    ///
    /// Partial writes are remembered, so the next call resumes mid-frame.
    pub fn flush<T: Transport + ?Sized>(&self, transport: &mut T) -> io::Result<Flush> {
        let mut outbound = self.shared.outbound.lock();
        while let Some(front) = outbound.queue.front() {
            let remaining = front.len() - outbound.written;
            match transport.write(&front[outbound.written..])? {
                WriteStatus::Accepted(n) if n >= remaining => {
                    outbound.queue.pop_front();
                    outbound.written = 0;
                }
                WriteStatus::Accepted(n) if n > 0 => outbound.written += n,
                WriteStatus::Accepted(_) | WriteStatus::Blocked => return Ok(Flush::Pending),
            }
        }
        Ok(Flush::Drained)
    }

    /// Drop everything still queued.
    pub fn discard(&self) {
        let mut outbound = self.shared.outbound.lock();
        if !outbound.queue.is_empty() {
            tracing::trace!(frames = outbound.queue.len(), "discarding queued frames");
        }
        outbound.queue.clear();
        outbound.written = 0;
    }

    /// Bytes waiting to be written.
    pub fn pending_bytes(&self) -> usize {
        let outbound = self.shared.outbound.lock();
        outbound.queue.iter().map(Bytes::len).sum::<usize>() - outbound.written
    }

    pub fn is_empty(&self) -> bool {
        self.shared.outbound.lock().queue.is_empty()
    }

    /// The Close frame this side sent, if any.
    pub fn sent_close(&self) -> Option<CloseInfo> {
        self.shared.outbound.lock().sent_close.clone()
    }

    /// Queue a Pong answering a received Ping. Skipped once closing has begun.
    pub(crate) fn send_pong(&self, payload: Bytes) {
        let mut outbound = self.shared.outbound.lock();
        if self.ensure_open(&outbound).is_ok() {
            Self::push_frames(&mut outbound, &[Frame::pong(payload)]);
        }
    }

    /// Queue a Close frame unless one was already sent. Does not touch the status.
    pub(crate) fn enqueue_close(&self, info: CloseInfo) -> bool {
        let mut outbound = self.shared.outbound.lock();
        Self::push_close(&mut outbound, info)
    }

    /// Run the peer's side of the close handshake.
    ///
    /// The status moves under the queue lock, so a concurrent
    /// [`WriteEngine::write_close`] is either fully before or fully after.
    pub(crate) fn receive_close(&self, peer: &CloseInfo) -> Option<CloseReply> {
        let mut outbound = self.shared.outbound.lock();
        let state = &self.shared.state;
        if state
            .advance(ConnectionStatus::Open, ConnectionStatus::ClosingHandshakeInitiated)
            .is_ok()
        {
            Self::push_close(&mut outbound, peer.echo());
            return state
                .advance(
                    ConnectionStatus::ClosingHandshakeInitiated,
                    ConnectionStatus::ClosingHandshakeComplete,
                )
                .ok()
                .map(|()| CloseReply::Echoed);
        }
        state
            .advance(
                ConnectionStatus::ClosingHandshakeInitiated,
                ConnectionStatus::ClosingHandshakeComplete,
            )
            .ok()
            .map(|()| CloseReply::Acknowledged)
    }

    fn write_data(&self, opcode: OpCode, payload: Bytes) -> Result<(), WriteError> {
        let frames = frame::fragment(opcode, payload, self.shared.max_frame_size);
        self.enqueue(&frames)
    }

    fn write_control(&self, frame: Frame) -> Result<(), WriteError> {
        if frame.payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(WriteError::ControlPayloadTooLarge(frame.payload.len()));
        }
        self.enqueue(&[frame])
    }

    /// Nothing may follow our Close frame, even while the status is still `Open`.
    fn ensure_open(&self, outbound: &Outbound) -> Result<(), WriteError> {
        match self.shared.state.status() {
            ConnectionStatus::Open if outbound.sent_close.is_none() => Ok(()),
            status => Err(WriteError::InvalidState(status)),
        }
    }

    /// All frames go in under one lock so fragments of a message stay
    /// contiguous. The status is checked under the same lock.
    fn enqueue(&self, frames: &[Frame]) -> Result<(), WriteError> {
        let mut outbound = self.shared.outbound.lock();
        self.ensure_open(&outbound)?;
        Self::push_frames(&mut outbound, frames);
        Ok(())
    }

    fn push_close(outbound: &mut Outbound, info: CloseInfo) -> bool {
        if outbound.sent_close.is_some() {
            return false;
        }
        let frame = Frame::close(&info);
        outbound.sent_close = Some(info);
        Self::push_frames(outbound, &[frame]);
        true
    }

    fn push_frames(outbound: &mut Outbound, frames: &[Frame]) {
        for frame in frames {
            let mut mask = [0u8; 4];
            outbound.rng.fill_bytes(&mut mask);
            let mut buf = BytesMut::new();
            frame.clone().with_mask(mask).encode(&mut buf);
            tracing::trace!(opcode = ?frame.opcode, fin = frame.fin, len = frame.payload.len(), "queued frame");
            outbound.queue.push_back(buf.freeze());
        }
    }
}

/// Check that `code` and `reason` fit in a Close frame we may send.
pub(crate) fn validate_close(code: CloseCode, reason: &str) -> Result<(), WriteError> {
    if !code.is_sendable() {
        return Err(WriteError::InvalidCloseCode(code.into()));
    }
    if reason.len() > MAX_CONTROL_PAYLOAD - 2 {
        return Err(WriteError::CloseReasonTooLong(reason.len()));
    }
    Ok(())
}
