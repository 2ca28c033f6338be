use serde::{Deserialize, Serialize};

/// A unit of transcript content.
///
/// Both sides of a conversation produce these: the user-echo path
/// (`"You: ..."`), the assistant path (`"<name>: ..."`), and
/// continuation fragments carrying neither marker. The client renders
/// them on arrival and does not retain them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    /// The text fragment. Events with an empty message are dropped by
    /// the renderer.
    #[serde(default)]
    pub message: String,
}

impl ChatEvent {
    /// Creates a chat event from a message.
    #[inline]
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Payload of a `file_chunk` event.
///
/// A prompt without an attachment is a single chunk whose `file_id` is
/// `None` and whose other optional fields are omitted. Chunks of an
/// actual upload all share one `file_id` and carry their index and the
/// total, so the receiver can reassemble them regardless of arrival
/// order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    /// Correlates the chunks of one upload. `None` means the event
    /// carries only a prompt.
    #[serde(rename = "fileId", default)]
    pub file_id: Option<String>,
    /// The prompt text accompanying the upload.
    #[serde(default)]
    pub prompt: String,
    /// Zero-based position of this chunk within the upload.
    #[serde(
        rename = "chunkIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub chunk_index: Option<u32>,
    /// Number of chunks the whole upload consists of.
    #[serde(
        rename = "totalChunks",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub total_chunks: Option<u32>,
    /// Base64-encoded chunk bytes.
    #[serde(
        rename = "chunkData",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub chunk_data: Option<String>,
    /// Name of the uploaded file as picked by the user.
    #[serde(
        rename = "fileName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub file_name: Option<String>,
}

impl FileChunk {
    /// Whether this is the final chunk of its upload.
    #[inline]
    pub fn is_last(&self) -> bool {
        match (self.chunk_index, self.total_chunks) {
            (Some(index), Some(total)) => index + 1 == total,
            _ => false,
        }
    }
}

/// An event sent by the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// One piece of a chunked upload, or a bare prompt.
    FileChunk(FileChunk),
    /// Asks the backend to switch the active assistant.
    ChangeAssistant {
        /// Key of the assistant to activate.
        assistant: String,
    },
    /// Asks the backend to persist a new voice-activity threshold.
    ChangeVadThreshold {
        /// The new threshold.
        vad_threshold: f64,
    },
}

/// Payload of lifecycle signals that carry only a status tag.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// The status tag; the backend emits `"ready"`.
    #[serde(default)]
    pub status: String,
}

impl Status {
    /// A `"ready"` status.
    #[inline]
    pub fn ready() -> Self {
        Self {
            status: "ready".to_owned(),
        }
    }

    /// Whether the status tag is the ready marker.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.status == "ready"
    }
}

/// An event received from the backend.
///
/// `update_chat` carries transcript content; everything else is a
/// lifecycle signal describing backend state with no payload beyond a
/// tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A transcript fragment to reconcile into the chat log.
    UpdateChat(ChatEvent),
    /// The backend is idle and listening for its wake word again.
    ChatbotReady(Status),
    /// Legacy spelling of [`ServerEvent::ChatbotReady`], still emitted
    /// by older backends.
    JarvisReady(Status),
    /// The backend accepted a prompt and started generating.
    PromptReceived(Status),
    /// The first part of the response is about to be delivered.
    ChatResponseReady(Status),
    /// The wake word was detected.
    Awake(Status),
    /// The backend is recording the spoken prompt.
    ListeningForPrompt(Status),
    /// Out-of-band radio playback started or stopped.
    MusicActive(Status),
    /// The active assistant changed.
    AssistantChanged {
        /// Key of the now-active assistant, or `None` when the switch
        /// was refused.
        assistant: Option<String>,
    },
    /// The voice-activity threshold changed.
    VadThresholdChanged {
        /// The persisted threshold, or `None` when the change was
        /// refused.
        vad_threshold: Option<f64>,
    },
    /// Ambient audio level report.
    ProcessingAudio {
        /// `"ready"` while sampling, `"done"` when a level is attached.
        #[serde(default)]
        status: String,
        /// Mean absolute sample level.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audio_level: Option<f64>,
    },
}
