//! The event protocol between the chat client and the assistant backend.
//!
//! This crate establishes the protocol the client uses to talk to the
//! backend: the events both sides exchange, and the contract a transport
//! has to fulfill to carry them. Types in this crate don't define any
//! behavior, instead they are the constraints that the implementors
//! should adhere to.
//!
//! Field names on the wire are part of the protocol and must not change;
//! the serde attributes on the payload types pin them down.

#![deny(missing_docs)]

mod error;
mod event;
mod transport;

pub use error::*;
pub use event::*;
pub use transport::*;
