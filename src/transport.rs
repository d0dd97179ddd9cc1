//! The byte-stream capability the engine writes to.
//!
//! Sockets, TLS and readiness polling stay with the caller. Inbound bytes are
//! handed to [`Connection::receive`](crate::Connection::receive); outbound
//! bytes go through this trait.

use std::io::{self, Write};

/// Result of offering bytes to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// This many bytes were taken (possibly fewer than offered).
    Accepted(usize),
    /// Nothing can be written until the transport reports writability.
    Blocked,
}

pub trait Transport {
    /// Non-blocking write of `buf`.
    fn write(&mut self, buf: &[u8]) -> io::Result<WriteStatus>;

    /// Tear the stream down. Called once, when the connection reaches `Closed`.
    fn shutdown(&mut self);
}

/// Adapts a non-blocking [`std::io::Write`] (e.g. a `mio` TCP stream) into a
/// [`Transport`]. `WouldBlock` and zero-length writes report `Blocked`.
#[derive(Debug)]
pub struct IoTransport<W> {
    inner: W,
}

impl<W: Write> IoTransport<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Transport for IoTransport<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<WriteStatus> {
        loop {
            return match self.inner.write(buf) {
                Ok(0) if !buf.is_empty() => Ok(WriteStatus::Blocked),
                Ok(n) => Ok(WriteStatus::Accepted(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(WriteStatus::Blocked),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(e),
            };
        }
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.inner.flush() {
            tracing::debug!(error = %e, "flush on shutdown failed");
        }
    }
}
