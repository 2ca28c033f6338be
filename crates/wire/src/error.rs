/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The connection to the backend was lost, or could not be
    /// established.
    ConnectionLost,
    /// The peer sent data that doesn't follow the protocol.
    Protocol,
    /// The backend refused the event.
    Rejected,
    /// Any other errors.
    Other,
}
