//! An out-of-the-box chat client for the assistant backend.
//!
//! The crate includes a CLI tool for chatting from the terminal. And
//! you can also use it as a library to wire the session into your own
//! host apps: bring your own [`core::transcript::TranscriptSink`] and
//! subscribe to the session hooks.

#![deny(missing_docs)]

#[allow(unused_imports)]
#[macro_use]
extern crate tracing;

mod http;
mod session;
mod sink;

pub use http::{ControlClient, ControlError};
pub use session::{Session, SessionBuilder};
pub use sink::TermSink;

/// Re-exports of [`intercom_core`] crate.
pub mod core {
    pub use intercom_core::*;
}
