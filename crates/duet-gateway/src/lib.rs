//! Realtime side of the server: conversation rooms and the per-socket
//! connection loop.

pub mod connection;
pub mod dispatcher;
