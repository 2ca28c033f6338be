use std::error::Error;
use std::pin::Pin;
use std::task::{self, Poll};

use crate::error::ErrorKind;
use crate::event::{ClientEvent, ServerEvent};

/// The error type for a transport.
pub trait TransportError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;
}

/// A factory for connections to the backend.
///
/// One `connect` call corresponds to one connection attempt; the retry
/// policy belongs to the caller. Once created, a transport should behave
/// like a stateless object: it can keep internal state, but callers
/// should not rely on it, and the transport should be prepared for
/// being dropped anytime.
pub trait Transport: Send + Sync {
    /// The error type that may be returned by this transport.
    type Error: TransportError;

    /// The outbound half of an established connection.
    type Sender: EventSender<Error = Self::Error>;

    /// The inbound half of an established connection.
    type Events: EventSource<Error = Self::Error>;

    /// Establishes a new connection to the backend.
    fn connect(
        &self,
    ) -> impl Future<Output = Result<(Self::Sender, Self::Events), Self::Error>>
    + Send
    + 'static;
}

/// The outbound half of a connection.
///
/// Senders are cheap to clone so that independent tasks (for example
/// the chunk readers of one upload) can emit events concurrently.
/// Events accepted by clones of one sender are delivered in the order
/// they were accepted.
pub trait EventSender: Clone + Send + Sync + 'static {
    /// The error type that may be returned by this sender.
    type Error: TransportError;

    /// Sends one event over the connection.
    ///
    /// An error means the event was not delivered; this layer never
    /// queues events for a later retry.
    fn send(
        &self,
        event: ClientEvent,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'static;
}

/// The inbound half of a connection.
pub trait EventSource: Send + 'static {
    /// The error type that may be returned by this source.
    type Error: TransportError;

    /// Attempts to pull out the next event from the connection.
    ///
    /// # Return value
    ///
    /// There are several possible return values, each indicating a
    /// distinct connection state:
    ///
    /// - `Poll::Pending` means no event is available yet.
    ///   Implementations will ensure that the current task is notified
    ///   when the next event may be ready.
    /// - `Poll::Ready(Ok(Some(event)))` means an event arrived, and
    ///   more may follow on subsequent calls.
    /// - `Poll::Ready(Ok(None))` means the connection closed normally.
    /// - `Poll::Ready(Err(error))` means the connection failed.
    ///
    /// Calling this method after completion should always return
    /// `None`.
    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<ServerEvent>, Self::Error>>;
}
