//! Lightweight, blocking WebSockets for Rust.
//!
//! An implementation of the WebSocket protocol (RFC 6455) for both the
//! client and the server role: the HTTP upgrade handshake, the frame codec
//! with masking and fragmentation, the connection state machine with the
//! closing handshake, and a [`Session`] handle that a reading and a writing
//! task can share.
//!
//! The simplest entry points are [`connect`] for clients and [`accept`] (or
//! [`Server`](server::Server)) for servers:
//!
//! ```no_run
//! use wscore::{connect, Message};
//!
//! let (mut socket, _response) = connect("ws://localhost:3012/echo".parse().unwrap()).unwrap();
//! socket.send(Message::text("Hello")).unwrap();
//! let echoed = socket.read().unwrap();
//! assert_eq!(echoed, Message::text("Hello"));
//! socket.close(None).unwrap();
//! ```
#![deny(
    missing_docs,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_must_use,
    unused_mut,
    unused_imports,
    unused_import_braces
)]

pub mod client;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod server;
pub mod session;
pub mod stream;

pub use crate::{
    client::{client, connect, open},
    error::{Error, Result},
    protocol::{frame::Utf8Bytes, CloseFrame, Message, Role, WebSocket, WebSocketConfig},
    server::{accept, accept_hdr, Server},
    session::Session,
};

/// `bytes::Bytes` is used for binary payloads throughout the public API.
pub use bytes::Bytes;
