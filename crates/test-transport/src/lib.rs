//! A local fake transport for testing purpose.

mod preset;

use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use intercom_wire::{
    ClientEvent, ErrorKind, EventSender, EventSource, ServerEvent, Transport,
    TransportError,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

/// Error type for the scripted transport.
#[derive(Debug)]
pub struct Error {
    #[allow(dead_code)]
    message: &'static str,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

impl StdError for Error {}

impl TransportError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

#[derive(Default, Debug)]
struct Shared {
    connections: usize,
    sent: Vec<ClientEvent>,
    sends_remaining: Option<usize>,
}

/// A scripted in-memory transport for testing purpose.
///
/// Before connecting, set up the connection script: one
/// [`PresetConnection`] per expected connect attempt, consumed in
/// order. Attempts beyond the script fail with a connection error.
/// Every event accepted by any connection's sender is recorded and can
/// be inspected with [`TestTransport::sent_events`].
///
/// # Note
///
/// This type is not optimized for production use, there are heavy
/// memory copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestTransport {
    script: Vec<PresetConnection>,
    shared: Arc<Mutex<Shared>>,
    delay: Option<Duration>,
}

impl TestTransport {
    /// Appends the script for the next connection attempt.
    #[inline]
    pub fn add_connection(&mut self, preset: PresetConnection) {
        self.script.push(preset);
    }

    /// Sets the pacing delay between inbound steps.
    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Makes senders reject events after `n` have been accepted.
    #[inline]
    pub fn fail_sends_after(&mut self, n: usize) {
        self.shared().sends_remaining = Some(n);
    }

    /// Events accepted so far, across all connections.
    #[inline]
    pub fn sent_events(&self) -> Vec<ClientEvent> {
        self.shared().sent.clone()
    }

    /// Number of connection attempts made so far.
    #[inline]
    pub fn connection_count(&self) -> usize {
        self.shared().connections
    }

    fn shared(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().expect("shared state is poisoned")
    }
}

impl Transport for TestTransport {
    type Error = Error;
    type Sender = TestSender;
    type Events = TestEvents;

    fn connect(
        &self,
    ) -> impl Future<Output = Result<(TestSender, TestEvents), Error>>
    + Send
    + 'static {
        let index = {
            let mut shared = self.shared();
            let index = shared.connections;
            shared.connections += 1;
            index
        };

        let result = match self.script.get(index) {
            None => Err(Error {
                message: "no scripted connection left",
                kind: ErrorKind::ConnectionLost,
            }),
            Some(PresetConnection::Refused) => Err(Error {
                message: "connection refused by script",
                kind: ErrorKind::ConnectionLost,
            }),
            Some(PresetConnection::Established(session)) => {
                let sender = TestSender {
                    shared: Arc::clone(&self.shared),
                };
                let events = TestEvents {
                    steps: session.steps.clone(),
                    step_idx: 0,
                    delay: self.delay,
                    sleep: None,
                };
                Ok((sender, events))
            }
        };
        ready(result)
    }
}

/// The outbound half of a scripted connection.
///
/// Records every accepted event in the owning transport.
#[derive(Clone, Debug)]
pub struct TestSender {
    shared: Arc<Mutex<Shared>>,
}

impl TestSender {
    fn record(shared: &Mutex<Shared>, event: ClientEvent) -> Result<(), Error> {
        let mut shared = shared.lock().expect("shared state is poisoned");
        if let Some(remaining) = &mut shared.sends_remaining {
            if *remaining == 0 {
                return Err(Error {
                    message: "send rejected by script",
                    kind: ErrorKind::ConnectionLost,
                });
            }
            *remaining -= 1;
        }
        shared.sent.push(event);
        Ok(())
    }
}

impl EventSender for TestSender {
    type Error = Error;

    fn send(
        &self,
        event: ClientEvent,
    ) -> impl Future<Output = Result<(), Error>> + Send + 'static {
        ready(Self::record(&self.shared, event))
    }
}

/// The inbound half of a scripted connection.
#[derive(Debug)]
pub struct TestEvents {
    steps: Vec<PresetStep>,
    step_idx: usize,
    delay: Option<Duration>,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl EventSource for TestEvents {
    type Error = Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ServerEvent>, Error>> {
        let this = self.get_mut();

        if let Some(sleep) = &mut this.sleep {
            ready!(sleep.as_mut().poll(cx));
            this.sleep = None;

            if this.step_idx >= this.steps.len() {
                return Poll::Ready(Ok(None));
            }
            let step = this.steps[this.step_idx].clone();
            this.step_idx += 1;
            return match step {
                PresetStep::Event(event) => Poll::Ready(Ok(Some(event))),
                PresetStep::Drop => Poll::Ready(Err(Error {
                    message: "connection dropped by script",
                    kind: ErrorKind::ConnectionLost,
                })),
            };
        }
        this.sleep = Some(Box::pin(sleep(
            this.delay.unwrap_or(Duration::from_millis(1)),
        )));
        Pin::new(this).poll_next_event(cx)
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use intercom_wire::{ChatEvent, FileChunk, Status};

    use super::*;

    #[tokio::test]
    async fn test_scripted_session() {
        let mut transport = TestTransport::default();
        transport.add_connection(PresetConnection::Established(
            PresetSession::with_steps([
                PresetStep::Event(ServerEvent::ChatbotReady(Status::ready())),
                PresetStep::Event(ServerEvent::UpdateChat(ChatEvent::new(
                    "You: hi",
                ))),
            ]),
        ));

        let (sender, events) = transport.connect().await.unwrap();
        let mut events = pin!(events);

        let event = poll_fn(|cx| events.as_mut().poll_next_event(cx))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, ServerEvent::ChatbotReady(Status::ready()));
        let event = poll_fn(|cx| events.as_mut().poll_next_event(cx))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, ServerEvent::UpdateChat(ChatEvent::new("You: hi")));
        let event = poll_fn(|cx| events.as_mut().poll_next_event(cx))
            .await
            .unwrap();
        assert_eq!(event, None);

        sender
            .send(ClientEvent::FileChunk(FileChunk {
                prompt: "hello".to_owned(),
                ..Default::default()
            }))
            .await
            .unwrap();
        assert_eq!(transport.sent_events().len(), 1);
        assert_eq!(transport.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let mut transport = TestTransport::default();
        transport.add_connection(PresetConnection::Refused);

        let err = transport.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionLost);
        // The script is consumed; further attempts fail too.
        let err = transport.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionLost);
        assert_eq!(transport.connection_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_sends() {
        let mut transport = TestTransport::default();
        transport
            .add_connection(PresetConnection::Established(Default::default()));
        transport.fail_sends_after(1);

        let (sender, _events) = transport.connect().await.unwrap();
        let chunk = ClientEvent::FileChunk(FileChunk::default());
        sender.send(chunk.clone()).await.unwrap();
        let err = sender.send(chunk).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionLost);
        assert_eq!(transport.sent_events().len(), 1);
    }
}
