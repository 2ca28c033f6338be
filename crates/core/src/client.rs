use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::future::poll_fn;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use intercom_wire::{
    ClientEvent, ErrorKind, EventSender, EventSource, ServerEvent, Transport,
    TransportError,
};
use pin_project_lite::pin_project;
use tokio::sync::watch;
use tokio::time::sleep;

/// Upper bound for the delay between reconnect attempts.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(5);

type BoxedSendFuture =
    Pin<Box<dyn Future<Output = Result<(), LinkError>> + Send>>;
type SendFn = Arc<dyn Fn(ClientEvent) -> BoxedSendFuture + Send + Sync>;
type BoxedEvents = Pin<Box<dyn DynEventSource>>;
type ConnectResult = Result<(LinkSender, BoxedEvents), LinkError>;
type BoxedConnectFuture = Pin<Box<dyn Future<Output = ConnectResult> + Send>>;
type ConnectFn = Arc<dyn Fn() -> BoxedConnectFuture + Send + Sync>;

/// Error produced by the transport link.
#[derive(Debug)]
pub struct LinkError {
    inner: Option<Box<dyn TransportError>>,
}

impl LinkError {
    fn transport<E: TransportError>(err: E) -> Self {
        Self {
            inner: Some(Box::new(err)),
        }
    }

    fn down() -> Self {
        Self { inner: None }
    }
}

impl Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(err) => Display::fmt(err, f),
            None => write!(f, "the link is down"),
        }
    }
}

impl StdError for LinkError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .as_deref()
            .map(|err| err as &(dyn StdError + 'static))
    }
}

impl TransportError for LinkError {
    #[inline]
    fn kind(&self) -> ErrorKind {
        match &self.inner {
            Some(err) => err.kind(),
            None => ErrorKind::ConnectionLost,
        }
    }
}

/// Connection status reported by [`LinkClient::run`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    /// The connection is established.
    Connected,
    /// An established connection was lost.
    Disconnected,
    /// A reconnection attempt is about to start.
    Reconnecting {
        /// 1-based attempt counter since the last established
        /// connection.
        attempt: u32,
    },
}

/// A cloneable handle for sending events over the current connection.
///
/// While the link is down, every send fails immediately with
/// [`ErrorKind::ConnectionLost`]; nothing is queued for a later retry,
/// matching the loss semantics of the connection itself.
#[derive(Clone)]
pub struct LinkSender {
    send_fn: SendFn,
}

impl LinkSender {
    fn down() -> Self {
        let send_fn: SendFn = Arc::new(|_| {
            Box::pin(async { Err(LinkError::down()) }) as BoxedSendFuture
        });
        Self { send_fn }
    }
}

impl EventSender for LinkSender {
    type Error = LinkError;

    #[inline]
    fn send(
        &self,
        event: ClientEvent,
    ) -> impl Future<Output = Result<(), LinkError>> + Send + 'static {
        (self.send_fn)(event)
    }
}

/// Helper trait for polling type-erased event sources.
trait DynEventSource: Send {
    fn poll_next_event_boxed(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ServerEvent>, LinkError>>;
}

pin_project! {
    struct ErasedSource<S> {
        #[pin]
        inner: S,
    }
}

impl<S: EventSource> DynEventSource for ErasedSource<S> {
    fn poll_next_event_boxed(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ServerEvent>, LinkError>> {
        let this = self.project();
        this.inner.poll_next_event(cx).map_err(LinkError::transport)
    }
}

/// A type-erased handle to the transport link.
///
/// Wraps a transport without exposing its concrete types, and drives
/// the reconnecting connection pump: unlimited retries with capped,
/// jittered delays. There is no buffering across a disconnect; events
/// in flight when the connection drops are lost.
pub struct LinkClient {
    connect_fn: ConnectFn,
    current: Arc<watch::Sender<LinkSender>>,
}

impl Clone for LinkClient {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            connect_fn: Arc::clone(&self.connect_fn),
            current: Arc::clone(&self.current),
        }
    }
}

impl LinkClient {
    /// Creates a new `LinkClient` over the given transport.
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        // We have to erase the type `T`, since `LinkClient` doesn't
        // have a generic parameter and we don't want it either.
        let connect_fn: ConnectFn = Arc::new(move || {
            let fut = transport.connect();
            Box::pin(async move {
                let (sender, events) =
                    fut.await.map_err(LinkError::transport)?;
                let send_fn: SendFn = Arc::new(move |event| {
                    let fut = sender.send(event);
                    Box::pin(async move {
                        fut.await.map_err(LinkError::transport)
                    }) as BoxedSendFuture
                });
                let events: BoxedEvents =
                    Box::pin(ErasedSource { inner: events });
                Ok((LinkSender { send_fn }, events))
            })
        });
        let (current, _) = watch::channel(LinkSender::down());
        Self {
            connect_fn,
            current: Arc::new(current),
        }
    }

    /// Returns a sender for the current connection.
    ///
    /// The handle is a snapshot: it keeps pointing at the connection
    /// that was current when it was taken. Take a fresh one per
    /// submission rather than holding on to it.
    #[inline]
    pub fn sender(&self) -> LinkSender {
        self.current.borrow().clone()
    }

    /// Drives the connection pump forever.
    ///
    /// Inbound events are delivered to `on_event` in arrival order;
    /// connection transitions go to `on_status`. When a connection
    /// fails, the pump retries indefinitely with capped, randomized
    /// delays. This method never returns; run it on its own task and
    /// drop the task to shut the link down.
    pub async fn run(
        &self,
        mut on_event: impl FnMut(ServerEvent) + Send,
        mut on_status: impl FnMut(LinkStatus) + Send,
    ) {
        let mut backoff = reconnect_backoff();
        let mut attempt: u32 = 0;
        loop {
            match (self.connect_fn)().await {
                Ok((sender, mut events)) => {
                    attempt = 0;
                    backoff.reset();
                    self.current.send_replace(sender);
                    on_status(LinkStatus::Connected);

                    loop {
                        let next = poll_fn(|cx| {
                            events.as_mut().poll_next_event_boxed(cx)
                        })
                        .await;
                        match next {
                            Ok(Some(event)) => {
                                trace!("inbound event: {event:?}");
                                on_event(event);
                            }
                            Ok(None) => {
                                debug!("backend closed the connection");
                                break;
                            }
                            Err(err) => {
                                warn!("connection lost: {err}");
                                break;
                            }
                        }
                    }

                    self.current.send_replace(LinkSender::down());
                    on_status(LinkStatus::Disconnected);
                }
                Err(err) => {
                    warn!("connect attempt failed: {err}");
                }
            }

            attempt += 1;
            on_status(LinkStatus::Reconnecting { attempt });
            let delay = backoff.next_backoff().unwrap_or(MAX_RECONNECT_DELAY);
            sleep(delay).await;
        }
    }
}

fn reconnect_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_secs(1),
        max_interval: MAX_RECONNECT_DELAY,
        // Retry forever; the backend owns session lifetime, not us.
        max_elapsed_time: None,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use intercom_test_transport::{
        PresetConnection, PresetSession, PresetStep, TestTransport,
    };
    use intercom_wire::{ChatEvent, FileChunk};
    use tokio::sync::mpsc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_pump() {
        let mut transport = TestTransport::default();
        transport.add_connection(PresetConnection::Established(
            PresetSession::with_steps([
                PresetStep::Event(ServerEvent::UpdateChat(ChatEvent::new(
                    "You: hi",
                ))),
                PresetStep::Drop,
            ]),
        ));
        transport.add_connection(PresetConnection::Refused);
        transport
            .add_connection(PresetConnection::Established(Default::default()));

        let client = LinkClient::new(transport);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (status_tx, mut status_rx) = mpsc::unbounded_channel();

        let runner = client.clone();
        let pump = tokio::spawn(async move {
            runner
                .run(
                    move |event| {
                        event_tx.send(event).ok();
                    },
                    move |status| {
                        status_tx.send(status).ok();
                    },
                )
                .await;
        });

        assert_eq!(status_rx.recv().await.unwrap(), LinkStatus::Connected);
        assert_eq!(
            event_rx.recv().await.unwrap(),
            ServerEvent::UpdateChat(ChatEvent::new("You: hi"))
        );
        assert_eq!(status_rx.recv().await.unwrap(), LinkStatus::Disconnected);
        assert_eq!(
            status_rx.recv().await.unwrap(),
            LinkStatus::Reconnecting { attempt: 1 }
        );
        assert_eq!(
            status_rx.recv().await.unwrap(),
            LinkStatus::Reconnecting { attempt: 2 }
        );
        assert_eq!(status_rx.recv().await.unwrap(), LinkStatus::Connected);

        pump.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_through_link() {
        let mut transport = TestTransport::default();
        transport
            .add_connection(PresetConnection::Established(Default::default()));

        let client = LinkClient::new(transport.clone());
        let (status_tx, mut status_rx) = mpsc::unbounded_channel();
        let runner = client.clone();
        let pump = tokio::spawn(async move {
            runner
                .run(
                    |_| {},
                    move |status| {
                        status_tx.send(status).ok();
                    },
                )
                .await;
        });

        assert_eq!(status_rx.recv().await.unwrap(), LinkStatus::Connected);
        client
            .sender()
            .send(ClientEvent::FileChunk(FileChunk {
                prompt: "hello".to_owned(),
                ..Default::default()
            }))
            .await
            .unwrap();
        assert_eq!(transport.sent_events().len(), 1);

        pump.abort();
    }

    #[tokio::test]
    async fn test_sends_fail_while_down() {
        let client = LinkClient::new(TestTransport::default());
        let err = client
            .sender()
            .send(ClientEvent::FileChunk(FileChunk::default()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionLost);
    }
}
