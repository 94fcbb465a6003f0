//! JSON-RPC over stdio
//!
//! Client side of a newline-delimited JSON-RPC 2.0 conversation with a
//! target process.

pub mod channel;
pub mod codec;
pub mod types;

pub use channel::MessageChannel;
pub use types::*;
