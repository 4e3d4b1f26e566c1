//! NDJSON transport over TCP
//!
//! A client writes one request line; the server answers with one frame per
//! line. Chat requests stream thinking and response frames and end with a
//! `done` or `error` frame. A connection may carry several requests in turn.

pub mod client;
pub mod listener;
pub mod messages;

pub use client::ChatClient;
pub use listener::{bind, handle_connection, serve};
pub use messages::{Frame, Request};

/// Largest request line the server reads, newline included
pub const MAX_REQUEST_SIZE: usize = 64 * 1024;
