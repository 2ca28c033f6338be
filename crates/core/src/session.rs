/// Mutable state of one chat session.
///
/// Everything the UI reflects about the backend lives here, and all
/// mutation happens on the session task through the methods below; no
/// other component keeps its own copy.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionState {
    assistant_name: String,
    radio_playing: bool,
    vad_threshold: f64,
}

impl SessionState {
    /// Creates the state for a session talking to `assistant_name`.
    pub fn new<S: Into<String>>(assistant_name: S, vad_threshold: f64) -> Self {
        Self {
            assistant_name: assistant_name.into(),
            radio_playing: false,
            vad_threshold,
        }
    }

    /// Display name of the active assistant.
    #[inline]
    pub fn assistant_name(&self) -> &str {
        &self.assistant_name
    }

    /// Replaces the active assistant.
    #[inline]
    pub fn set_assistant<S: Into<String>>(&mut self, name: S) {
        self.assistant_name = name.into();
    }

    /// Whether out-of-band radio playback is active.
    #[inline]
    pub fn radio_playing(&self) -> bool {
        self.radio_playing
    }

    /// Records a radio playback change.
    #[inline]
    pub fn set_radio_playing(&mut self, playing: bool) {
        self.radio_playing = playing;
    }

    /// The current voice-activity threshold.
    #[inline]
    pub fn vad_threshold(&self) -> f64 {
        self.vad_threshold
    }

    /// Records a persisted voice-activity threshold.
    #[inline]
    pub fn set_vad_threshold(&mut self, value: f64) {
        self.vad_threshold = value;
    }
}
