//! Connection: owns the transport and drives both engines through the lifecycle.
//!
//! The connection performs no I/O of its own accord. The caller's event loop
//! feeds it inbound bytes ([`Connection::receive`]), writability
//! ([`Connection::on_writable`]), transport failures and the clock
//! ([`Connection::handle_timeout`]); every call that can raise an event takes
//! the [`WebSocketHandler`] to raise it on.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::rngs::StdRng;

use crate::close::{CloseCode, CloseInfo};
use crate::config::WebSocketConfig;
use crate::error::{Error, WriteError};
use crate::handler::WebSocketHandler;
use crate::read::{Message, ReadEngine, ReadEvent};
use crate::state::{CloseTimer, ConnectionState, ConnectionStatus, StatusHandle};
use crate::transport::Transport;
use crate::write::{self, Flush, WriteEngine};

#[derive(Debug)]
pub struct Connection<T> {
    transport: T,
    state: Arc<ConnectionState>,
    reader: ReadEngine,
    writer: WriteEngine,
    timer: CloseTimer,
    config: WebSocketConfig,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T, config: WebSocketConfig) -> Self {
        let state = Arc::new(ConnectionState::new());
        let writer = WriteEngine::new(Arc::clone(&state), &config);
        Self::from_parts(transport, config, state, writer)
    }

    /// Like [`Connection::new`], drawing mask keys from `rng`.
    pub fn with_rng(transport: T, config: WebSocketConfig, rng: StdRng) -> Self {
        let state = Arc::new(ConnectionState::new());
        let writer = WriteEngine::with_rng(Arc::clone(&state), &config, rng);
        Self::from_parts(transport, config, state, writer)
    }

    fn from_parts(
        transport: T,
        config: WebSocketConfig,
        state: Arc<ConnectionState>,
        writer: WriteEngine,
    ) -> Self {
        let reader = ReadEngine::new(Arc::clone(&state), writer.clone(), config.max_message_size);
        Self {
            transport,
            state,
            reader,
            writer,
            timer: CloseTimer::default(),
            config,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status()
    }

    /// Read-only status view, for observers on other threads.
    pub fn status_handle(&self) -> StatusHandle {
        StatusHandle::new(Arc::clone(&self.state))
    }

    /// A write handle usable from any thread. Queued frames go out on the next
    /// [`Connection::on_writable`].
    pub fn writer(&self) -> WriteEngine {
        self.writer.clone()
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// `New → Opening`: send the HTTP Upgrade request unframed.
    pub fn start_handshake<H>(&mut self, request: impl Into<Bytes>, handler: &mut H) -> Result<(), WriteError>
    where
        H: WebSocketHandler + ?Sized,
    {
        self.state
            .advance(ConnectionStatus::New, ConnectionStatus::Opening)
            .map_err(WriteError::InvalidState)?;
        self.writer.write_raw(request)?;
        self.on_writable(handler);
        Ok(())
    }

    /// `Opening → Open`, once the handshake collaborator has validated the
    /// server's response. Bytes that arrived after the response are decoded now.
    ///
    /// The response itself must not go through [`Connection::receive`]: its
    /// header bytes would decode as a malformed frame.
    ///
    /// Returns `false` if the connection was not opening.
    pub fn upgrade_complete<H>(&mut self, handler: &mut H) -> bool
    where
        H: WebSocketHandler + ?Sized,
    {
        if let Err(status) = self
            .state
            .advance(ConnectionStatus::Opening, ConnectionStatus::Open)
        {
            tracing::warn!(?status, "upgrade completed outside of opening state");
            return false;
        }
        handler.on_connected();
        self.receive(&[], handler);
        true
    }

    /// Bytes read from the transport.
    ///
    /// While `Opening`, pass only what follows the end of the HTTP response
    /// headers (`\r\n\r\n`); those bytes are held until
    /// [`Connection::upgrade_complete`].
    pub fn receive<H>(&mut self, data: &[u8], handler: &mut H)
    where
        H: WebSocketHandler + ?Sized,
    {
        for event in self.reader.process(data) {
            match event {
                ReadEvent::Message(Message::Text(text)) => handler.on_message(text),
                ReadEvent::Message(Message::Binary(data)) => handler.on_binary(data),
                ReadEvent::Ping(payload) => handler.on_ping(payload),
                ReadEvent::Pong(payload) => handler.on_pong(payload),
                ReadEvent::Closed {
                    peer,
                    initiated_locally,
                } => {
                    self.timer.cancel();
                    self.flush_best_effort();
                    let info = if initiated_locally {
                        self.writer.sent_close().unwrap_or(peer)
                    } else {
                        peer
                    };
                    self.teardown(Ok(info), handler);
                }
                ReadEvent::ProtocolError(err) => {
                    self.flush_best_effort();
                    self.teardown(Err(err.into()), handler);
                }
            }
        }
        self.on_writable(handler);
    }

    /// The transport can take more bytes. Also call after queueing through a
    /// [`WriteEngine`] handle.
    pub fn on_writable<H>(&mut self, handler: &mut H) -> Flush
    where
        H: WebSocketHandler + ?Sized,
    {
        if self.state.status() == ConnectionStatus::Closed {
            return Flush::Drained;
        }
        match self.writer.flush(&mut self.transport) {
            Ok(flush) => flush,
            Err(err) => {
                self.transport_error(err, handler);
                Flush::Drained
            }
        }
    }

    pub fn send_text<H>(&mut self, text: impl Into<String>, handler: &mut H) -> Result<(), WriteError>
    where
        H: WebSocketHandler + ?Sized,
    {
        self.writer.write_text(text)?;
        self.on_writable(handler);
        Ok(())
    }

    pub fn send_binary<H>(&mut self, data: impl Into<Bytes>, handler: &mut H) -> Result<(), WriteError>
    where
        H: WebSocketHandler + ?Sized,
    {
        self.writer.write_binary(data)?;
        self.on_writable(handler);
        Ok(())
    }

    pub fn send_ping<H>(&mut self, payload: impl Into<Bytes>, handler: &mut H) -> Result<(), WriteError>
    where
        H: WebSocketHandler + ?Sized,
    {
        self.writer.write_ping(payload)?;
        self.on_writable(handler);
        Ok(())
    }

    /// Start the close handshake and arm the close timer.
    ///
    /// If the peer's Close does not arrive within `timeout` (the configured
    /// default when `None`), [`Connection::handle_timeout`] forces `Closed`.
    /// A timeout too large to add to `now` waits indefinitely.
    pub fn initiate_close<H>(
        &mut self,
        code: CloseCode,
        reason: &str,
        timeout: Option<Duration>,
        now: Instant,
        handler: &mut H,
    ) -> Result<(), WriteError>
    where
        H: WebSocketHandler + ?Sized,
    {
        self.writer.write_close(code, reason)?;
        self.timer.arm(now, timeout.unwrap_or(self.config.close_timeout));
        self.on_writable(handler);
        Ok(())
    }

    /// When the event loop should next call [`Connection::handle_timeout`].
    pub fn poll_timeout(&self) -> Option<Instant> {
        match self.state.status() {
            ConnectionStatus::ClosingHandshakeInitiated => self.timer.deadline(),
            _ => None,
        }
    }

    /// Drive the close timer.
    ///
    /// A close started through a [`WriteEngine`] handle has no timer yet; the
    /// first call after it arms one with the configured timeout.
    pub fn handle_timeout<H>(&mut self, now: Instant, handler: &mut H)
    where
        H: WebSocketHandler + ?Sized,
    {
        if self.state.status() != ConnectionStatus::ClosingHandshakeInitiated {
            return;
        }
        if !self.timer.is_armed() {
            self.timer.arm(now, self.config.close_timeout);
            return;
        }
        if !self.timer.expired(now) {
            return;
        }
        if self
            .state
            .advance(ConnectionStatus::ClosingHandshakeInitiated, ConnectionStatus::Closed)
            .is_ok()
        {
            tracing::warn!("close handshake timed out");
            self.shutdown(Err(Error::CloseTimeout), handler);
        }
    }

    /// The peer closed the stream.
    pub fn transport_closed<H>(&mut self, handler: &mut H)
    where
        H: WebSocketHandler + ?Sized,
    {
        self.teardown(Err(Error::TransportClosed), handler);
    }

    /// Reading from or writing to the stream failed.
    pub fn transport_error<H>(&mut self, err: io::Error, handler: &mut H)
    where
        H: WebSocketHandler + ?Sized,
    {
        self.teardown(Err(Error::Transport(err)), handler);
    }

    /// Fail the connection with `code`: queue a Close frame carrying it, flush
    /// what the transport takes and tear down without waiting for the peer.
    ///
    /// No Close frame is sent before the connection opened, or if one was
    /// already sent.
    pub fn fail<H>(&mut self, code: CloseCode, reason: &str, handler: &mut H) -> Result<(), WriteError>
    where
        H: WebSocketHandler + ?Sized,
    {
        write::validate_close(code, reason)?;
        let status = self.state.status();
        if status == ConnectionStatus::Closed {
            return Err(WriteError::InvalidState(status));
        }
        let info = CloseInfo::new(code, reason);
        if status >= ConnectionStatus::Open {
            self.writer.enqueue_close(info.clone());
            self.flush_best_effort();
        }
        tracing::warn!(code = u16::from(code), reason, "failing connection");
        self.teardown(Err(Error::Failed(info)), handler);
        Ok(())
    }

    /// Abort without a close handshake. A no-op once closed.
    pub fn disconnect<H>(&mut self, handler: &mut H)
    where
        H: WebSocketHandler + ?Sized,
    {
        self.teardown(Err(Error::Aborted), handler);
    }

    fn flush_best_effort(&mut self) {
        if let Err(err) = self.writer.flush(&mut self.transport) {
            tracing::debug!(error = %err, "flush before teardown failed");
        }
    }

    fn teardown<H>(&mut self, result: Result<CloseInfo, Error>, handler: &mut H)
    where
        H: WebSocketHandler + ?Sized,
    {
        if self.state.close().is_some() {
            self.shutdown(result, handler);
        }
    }

    /// Runs once, by whichever path moved the status to `Closed`.
    fn shutdown<H>(&mut self, result: Result<CloseInfo, Error>, handler: &mut H)
    where
        H: WebSocketHandler + ?Sized,
    {
        self.timer.cancel();
        self.reader.reset();
        self.writer.discard();
        self.transport.shutdown();
        match &result {
            Ok(info) => tracing::debug!(code = u16::from(info.code), reason = %info.reason, "disconnected"),
            Err(err) => tracing::warn!(error = %err, "disconnected"),
        }
        handler.on_disconnected(result);
    }
}
