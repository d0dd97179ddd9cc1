//! Connection lifecycle state shared by the read and write engines.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle of a connection. Ordered: transitions only move forward, except
/// that `Closed` can be entered from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionStatus {
    New = 0,
    /// Transport is up, HTTP Upgrade in flight.
    Opening = 1,
    Open = 2,
    /// One side has sent a Close frame.
    ClosingHandshakeInitiated = 3,
    /// Both sides have exchanged Close frames; the transport may be torn down.
    ClosingHandshakeComplete = 4,
    Closed = 5,
}

impl ConnectionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionStatus::New,
            1 => ConnectionStatus::Opening,
            2 => ConnectionStatus::Open,
            3 => ConnectionStatus::ClosingHandshakeInitiated,
            4 => ConnectionStatus::ClosingHandshakeComplete,
            _ => ConnectionStatus::Closed,
        }
    }
}

/// The connection status cell.
///
/// Every transition is a compare-and-swap, so when two paths race for the same
/// transition (close timer against the peer's acknowledgment, say) exactly
/// one of them wins.
#[derive(Debug)]
pub struct ConnectionState {
    status: AtomicU8,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(ConnectionStatus::New as u8),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`. Fails with the current status if it is not
    /// `from` or if `to` would move backwards.
    pub fn advance(&self, from: ConnectionStatus, to: ConnectionStatus) -> Result<(), ConnectionStatus> {
        if to <= from {
            return Err(self.status());
        }
        match self
            .status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                tracing::debug!(?from, ?to, "connection status changed");
                Ok(())
            }
            Err(current) => Err(ConnectionStatus::from_u8(current)),
        }
    }

    /// Enter `Closed` from any state.
    ///
    /// Returns the previous status, or `None` if the connection was already
    /// closed. Only the caller that gets `Some` performs teardown.
    pub fn close(&self) -> Option<ConnectionStatus> {
        let previous = ConnectionStatus::from_u8(
            self.status.swap(ConnectionStatus::Closed as u8, Ordering::AcqRel),
        );
        if previous == ConnectionStatus::Closed {
            None
        } else {
            tracing::debug!(from = ?previous, "connection closed");
            Some(previous)
        }
    }
}

/// Read-only view of a connection's status, safe to hand to observers.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    state: Arc<ConnectionState>,
}

impl StatusHandle {
    pub(crate) fn new(state: Arc<ConnectionState>) -> Self {
        Self { state }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status()
    }
}

/// Single-shot close handshake timer.
///
/// This only tracks the deadline; the owner's event loop drives it through
/// [`CloseTimer::expired`]. Firing is resolved against the status with a
/// compare-and-swap, so a late expiry after the acknowledgment is harmless.
#[derive(Debug, Default)]
pub struct CloseTimer {
    deadline: Option<Instant>,
    armed: bool,
}

impl CloseTimer {
    /// Arm for `now + timeout`. A timeout too large to represent never fires.
    pub fn arm(&mut self, now: Instant, timeout: Duration) {
        self.deadline = now.checked_add(timeout);
        self.armed = true;
        if self.deadline.is_none() {
            tracing::debug!(?timeout, "close timeout out of range, waiting indefinitely");
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
        self.armed = false;
    }

    /// Armed, whether or not a deadline is set.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Disarm and return `true` if the deadline has passed.
    pub fn expired(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
