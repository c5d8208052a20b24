//! Live stream upload over a Socket.IO channel
//!
//! `StreamUploadClient` runs the `stream:start` / `stream:chunk` /
//! `stream:end` request-acknowledgement exchanges over a `SocketChannel`.
//! Heartbeats and reconnection are left to the Socket.IO client library.

pub mod channel;
mod client;
pub mod messages;

pub use channel::SocketChannel;
pub use client::StreamUploadClient;
pub use messages::{Location, StreamIdentity};
