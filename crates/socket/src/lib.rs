//! A WebSocket transport for the assistant backend.
//!
//! Events travel as JSON text frames with an `event`/`data` envelope.
//! Outbound frames funnel through a writer task so that senders stay
//! cheap to clone; inbound frames are decoded tolerantly and anything
//! the client does not understand is dropped.

#[macro_use]
extern crate tracing;

mod proto;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt as _, Stream as _, StreamExt as _};
use intercom_wire::{
    ClientEvent, ErrorKind, EventSender, EventSource, ServerEvent, Transport,
    TransportError,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type SendCommand = (Message, oneshot::Sender<Result<(), Error>>);

/// Error type for [`SocketTransport`].
#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for Error {}

impl TransportError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Configuration for [`SocketTransport`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SocketConfig {
    url: String,
}

impl SocketConfig {
    /// Creates a configuration pointing at the backend's socket
    /// endpoint, e.g. `ws://jarvis.local:5000/events`.
    #[inline]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// The endpoint URL.
    #[inline]
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// WebSocket transport for the assistant backend.
#[derive(Clone, Debug)]
pub struct SocketTransport {
    config: Arc<SocketConfig>,
}

impl SocketTransport {
    /// Creates a new `SocketTransport` with the given configuration.
    #[inline]
    pub fn new(config: SocketConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl Transport for SocketTransport {
    type Error = Error;
    type Sender = SocketSender;
    type Events = SocketEvents;

    fn connect(
        &self,
    ) -> impl Future<Output = Result<(SocketSender, SocketEvents), Error>>
    + Send
    + 'static {
        let config = Arc::clone(&self.config);
        async move {
            debug!(url = config.url(), "connecting");
            let (stream, _) =
                connect_async(config.url()).await.map_err(|err| {
                    Error::new(format!("{err}"), ErrorKind::ConnectionLost)
                })?;

            let (sink, stream) = stream.split();
            let (command_tx, command_rx) = mpsc::unbounded_channel();
            tokio::spawn(run_writer(sink, command_rx));

            Ok((SocketSender { command_tx }, SocketEvents { stream }))
        }
    }
}

/// Forwards queued frames to the socket.
///
/// Runs until every sender clone is gone or a send fails; either way
/// dropping the receiver wakes the remaining callers with an error.
async fn run_writer(
    mut sink: WsSink,
    mut command_rx: mpsc::UnboundedReceiver<SendCommand>,
) {
    while let Some((message, ack)) = command_rx.recv().await {
        let result = sink.send(message).await.map_err(|err| {
            Error::new(format!("{err}"), ErrorKind::ConnectionLost)
        });
        let failed = result.is_err();
        ack.send(result).ok();
        if failed {
            break;
        }
    }
    debug!("writer finished");
}

/// The outbound half of a socket connection.
#[derive(Clone)]
pub struct SocketSender {
    command_tx: mpsc::UnboundedSender<SendCommand>,
}

impl EventSender for SocketSender {
    type Error = Error;

    fn send(
        &self,
        event: ClientEvent,
    ) -> impl Future<Output = Result<(), Error>> + Send + 'static {
        let command_tx = self.command_tx.clone();
        let frame = proto::encode(&event);
        async move {
            let (ack_tx, ack_rx) = oneshot::channel();
            command_tx
                .send((Message::Text(frame.into()), ack_tx))
                .map_err(|_| {
                    Error::new(
                        "the connection is closed",
                        ErrorKind::ConnectionLost,
                    )
                })?;
            match ack_rx.await {
                Ok(result) => result,
                Err(_) => Err(Error::new(
                    "the connection closed before the event was sent",
                    ErrorKind::ConnectionLost,
                )),
            }
        }
    }
}

/// The inbound half of a socket connection.
pub struct SocketEvents {
    stream: WsStream,
}

impl EventSource for SocketEvents {
    type Error = Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ServerEvent>, Error>> {
        let this = self.get_mut();
        loop {
            let message = ready!(Pin::new(&mut this.stream).poll_next(cx));
            match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = proto::decode(text.as_str()) {
                        return Poll::Ready(Ok(Some(event)));
                    }
                    // Unknown frame; keep reading.
                }
                Some(Ok(Message::Close(_))) => {
                    return Poll::Ready(Ok(None));
                }
                Some(Ok(_)) => {
                    // Ping/pong is handled by the protocol layer and
                    // binary frames are not part of this protocol.
                }
                Some(Err(err)) => {
                    return Poll::Ready(Err(Error::new(
                        format!("{err}"),
                        ErrorKind::ConnectionLost,
                    )));
                }
                None => return Poll::Ready(Ok(None)),
            }
        }
    }
}
