//! Delegate notified of connection events.

use bytes::Bytes;

use crate::close::CloseInfo;
use crate::error::Error;

/// Receives connection events. Passed by reference to each
/// [`Connection`](crate::Connection) call that can raise one; the connection
/// never holds on to it.
pub trait WebSocketHandler {
    /// The upgrade completed and the connection is open.
    fn on_connected(&mut self) {}

    /// The connection reached `Closed`. Called exactly once per connection.
    ///
    /// `Ok` carries the close code and reason of a completed handshake (the
    /// locally sent ones if this side initiated the close). `Err` is an abrupt
    /// end: protocol violation, transport failure or handshake timeout.
    fn on_disconnected(&mut self, result: Result<CloseInfo, Error>);

    fn on_message(&mut self, text: String);

    fn on_binary(&mut self, data: Bytes);

    /// While the connection is `Open` the matching Pong has already been
    /// queued. During the close handshake no Pong is sent.
    fn on_ping(&mut self, _payload: Bytes) {}

    fn on_pong(&mut self, _payload: Bytes) {}
}
