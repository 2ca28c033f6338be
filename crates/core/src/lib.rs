//! Core logic of the chat client: chunked uploads, transcript
//! reconciliation, and the reconnecting transport link.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod client;
mod session;
pub mod transcript;
pub mod upload;

pub use client::{LinkClient, LinkError, LinkSender, LinkStatus};
pub use session::SessionState;
