use intercom_wire::ServerEvent;

/// The script for one connection attempt.
#[derive(Clone, Debug)]
pub enum PresetConnection {
    /// The connection attempt fails outright.
    Refused,
    /// The connection is established and plays out a session.
    Established(PresetSession),
}

/// The inbound steps an established connection delivers, in order.
///
/// Once the steps run out, the connection closes normally.
#[derive(Clone, Default, Debug)]
pub struct PresetSession {
    /// Steps in this session.
    pub steps: Vec<PresetStep>,
}

impl PresetSession {
    /// Creates a `PresetSession` with the specified steps.
    #[inline]
    pub fn with_steps(steps: impl Into<Vec<PresetStep>>) -> Self {
        Self {
            steps: steps.into(),
        }
    }
}

/// One scripted inbound step.
#[derive(Clone, Debug)]
pub enum PresetStep {
    /// Deliver a server event.
    Event(ServerEvent),
    /// Fail the connection.
    Drop,
}
