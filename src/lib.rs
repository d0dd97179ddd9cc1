//! ws-sans-io: A minimal, sans-I/O client-side WebSocket protocol engine
//!
//! This crate implements the client half of RFC 6455 on top of a byte stream
//! you provide. It frames and masks outgoing messages, decodes and reassembles
//! incoming ones, answers pings and drives the close handshake.
//!
//! # Features
//!
//! - **Sans-I/O Design**: No async runtime, no sockets; you feed bytes in and
//!   hand a [`Transport`] for bytes out
//! - **RFC 6455 Framing**: 7/16/64-bit lengths, client masking, fragmentation
//! - **Strict Validation**: RSV bits, opcodes, control frame limits, UTF-8,
//!   message size, reported with the matching close code
//! - **Close Handshake**: Five-state lifecycle with a close timeout
//! - **Thread-safe Writes**: [`WriteEngine`] handles can enqueue from any thread
//!
//! # Quick Start
//!
//! ```rust
//! use bytes::Bytes;
//! use ws_sans_io::{CloseInfo, Connection, Error, IoTransport, WebSocketConfig, WebSocketHandler};
//!
//! struct Printer;
//!
//! impl WebSocketHandler for Printer {
//!     fn on_disconnected(&mut self, result: Result<CloseInfo, Error>) {
//!         println!("disconnected: {:?}", result);
//!     }
//!     fn on_message(&mut self, text: String) {
//!         println!("text: {}", text);
//!     }
//!     fn on_binary(&mut self, data: Bytes) {
//!         println!("binary: {} bytes", data.len());
//!     }
//! }
//!
//! let mut conn = Connection::new(IoTransport::new(Vec::new()), WebSocketConfig::default());
//! let mut handler = Printer;
//!
//! // HTTP Upgrade request, built by the caller
//! conn.start_handshake(&b"GET /chat HTTP/1.1\r\n\r\n"[..], &mut handler).unwrap();
//! // ...server answered 101 Switching Protocols
//! conn.upgrade_complete(&mut handler);
//!
//! // Unmasked server text frame "hello"
//! conn.receive(&[0x81, 0x05, b'h', b'e', b'l', b'l', b'o'], &mut handler);
//! conn.send_text("hi there", &mut handler).unwrap();
//! ```
//!
//! # Architecture
//!
//! - [`frame`]: frame codec (bytes ↔ frames)
//! - [`read`]: read engine (frames → messages, ping/close handling)
//! - [`write`]: write engine (messages → masked frames, FIFO queue)
//! - [`state`]: connection status and close timer
//! - [`Connection`]: ties them to a transport and a [`WebSocketHandler`]
//!
//! It does NOT provide:
//! - TCP/TLS (you provide the stream)
//! - The HTTP Upgrade request or response parsing
//! - Server-side framing
//! - Reconnection

pub mod close;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod handler;
pub mod read;
pub mod state;
pub mod transport;
pub mod write;

pub use close::{CloseCode, CloseInfo};
pub use config::WebSocketConfig;
pub use connection::Connection;
pub use error::{Error, ProtocolError, WriteError};
pub use frame::{Frame, FrameHeader, OpCode};
pub use handler::WebSocketHandler;
pub use read::{Message, ReadEngine, ReadEvent};
pub use state::{ConnectionState, ConnectionStatus, StatusHandle};
pub use transport::{IoTransport, Transport, WriteStatus};
pub use write::{Flush, WriteEngine};
