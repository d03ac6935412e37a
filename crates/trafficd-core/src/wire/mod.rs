//! Local datagram wire format.
//!
//! Callers on the same host send one fixed-size binary frame per request to
//! the server's Unix datagram socket. There is no reply on this channel;
//! results travel over the message bus.
//!
//! - **Frame**: the 275-byte schema and its codec
//! - **Client**: a bound datagram socket that sends frames to a server

pub mod client;
pub mod frame;

pub use client::DispatchClient;
pub use frame::{decode, encode_error_notice, DecodeError, MessageKind, RequestFrame};
