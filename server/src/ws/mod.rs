//! WebSocket transport: admission, the per-connection pumps and the wire codec.

pub mod actor;
pub mod handler;
pub mod protocol;
