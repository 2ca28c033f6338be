use std::path::PathBuf;
use std::sync::Arc;

use intercom_core::transcript::{Reconciler, TranscriptEntry, TranscriptSink};
use intercom_core::upload::{Attachment, UploadProgress, Uploader};
use intercom_core::{LinkClient, LinkStatus, SessionState};
use intercom_wire::{
    ChatEvent, ClientEvent, EventSender as _, ServerEvent, Transport,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type StatusFn = Arc<dyn Fn(&str, bool) + Send + Sync>;
type BoolFn = Arc<dyn Fn(bool) + Send + Sync>;
type LevelFn = Arc<dyn Fn(f64) + Send + Sync>;
type NameFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Default threshold until the backend reports the persisted one.
const DEFAULT_VAD_THRESHOLD: f64 = 300.0;

/// [`Session`] builder.
pub struct SessionBuilder {
    client: LinkClient,
    assistant_name: String,
    vad_threshold: f64,
    sink: Box<dyn TranscriptSink + Send>,
    on_status: Option<StatusFn>,
    on_input_enabled: Option<BoolFn>,
    on_audio_level: Option<LevelFn>,
    on_assistant_changed: Option<NameFn>,
    on_radio: Option<BoolFn>,
    on_upload_progress: Option<Arc<dyn Fn(UploadProgress) + Send + Sync>>,
}

impl SessionBuilder {
    /// Creates a session builder over the specified transport.
    pub fn with_transport<T: Transport + 'static>(transport: T) -> Self {
        Self {
            client: LinkClient::new(transport),
            assistant_name: "Jarvis".to_owned(),
            vad_threshold: DEFAULT_VAD_THRESHOLD,
            sink: Box::new(NullSink),
            on_status: None,
            on_input_enabled: None,
            on_audio_level: None,
            on_assistant_changed: None,
            on_radio: None,
            on_upload_progress: None,
        }
    }

    /// Sets the display name of the assistant, used to recognize its
    /// transcript marker.
    #[inline]
    pub fn with_assistant<S: Into<String>>(mut self, name: S) -> Self {
        self.assistant_name = name.into();
        self
    }

    /// Sets the initial voice-activity threshold.
    #[inline]
    pub fn with_vad_threshold(mut self, value: f64) -> Self {
        self.vad_threshold = value;
        self
    }

    /// Sets the transcript rendering sink.
    #[inline]
    pub fn with_sink(
        mut self,
        sink: impl TranscriptSink + Send + 'static,
    ) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Attaches a callback for status-line changes. The flag marks
    /// error messages.
    #[inline]
    pub fn on_status(
        mut self,
        on_status: impl Fn(&str, bool) + Send + Sync + 'static,
    ) -> Self {
        self.on_status = Some(Arc::new(on_status));
        self
    }

    /// Attaches a callback invoked when the prompt input should be
    /// enabled or disabled.
    #[inline]
    pub fn on_input_enabled(
        mut self,
        on_input_enabled: impl Fn(bool) + Send + Sync + 'static,
    ) -> Self {
        self.on_input_enabled = Some(Arc::new(on_input_enabled));
        self
    }

    /// Attaches a callback for ambient audio level reports.
    #[inline]
    pub fn on_audio_level(
        mut self,
        on_audio_level: impl Fn(f64) + Send + Sync + 'static,
    ) -> Self {
        self.on_audio_level = Some(Arc::new(on_audio_level));
        self
    }

    /// Attaches a callback invoked when the active assistant changed.
    #[inline]
    pub fn on_assistant_changed(
        mut self,
        on_assistant_changed: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.on_assistant_changed = Some(Arc::new(on_assistant_changed));
        self
    }

    /// Attaches a callback invoked when radio playback toggles.
    #[inline]
    pub fn on_radio(
        mut self,
        on_radio: impl Fn(bool) + Send + Sync + 'static,
    ) -> Self {
        self.on_radio = Some(Arc::new(on_radio));
        self
    }

    /// Attaches a callback invoked after every emitted upload chunk.
    #[inline]
    pub fn on_upload_progress(
        mut self,
        on_upload_progress: impl Fn(UploadProgress) + Send + Sync + 'static,
    ) -> Self {
        self.on_upload_progress = Some(Arc::new(on_upload_progress));
        self
    }

    /// Builds the session and starts its tasks.
    pub fn build(self) -> Session {
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        let pump = {
            let client = self.client.clone();
            let event_tx = input_tx.clone();
            let status_tx = input_tx.clone();
            tokio::spawn(async move {
                client
                    .run(
                        move |event| {
                            event_tx.send(Input::Server(event)).ok();
                        },
                        move |status| {
                            status_tx.send(Input::Link(status)).ok();
                        },
                    )
                    .await;
            })
        };

        let uploader = match self.on_upload_progress {
            Some(on_progress) => Uploader::new()
                .on_progress(move |progress| on_progress(progress)),
            None => Uploader::new(),
        };

        let worker = SessionWorker {
            client: self.client,
            state: SessionState::new(&self.assistant_name, self.vad_threshold),
            reconciler: Reconciler::new(&self.assistant_name),
            sink: self.sink,
            uploader: Arc::new(uploader),
            input_tx: input_tx.clone(),
            was_connected: false,
            on_status: self.on_status,
            on_input_enabled: self.on_input_enabled,
            on_audio_level: self.on_audio_level,
            on_assistant_changed: self.on_assistant_changed,
            on_radio: self.on_radio,
        };
        let worker = tokio::spawn(worker.run(input_rx));

        Session {
            input_tx,
            pump,
            worker,
        }
    }
}

/// A live chat session wired to a backend.
///
/// Owns the transport pump and the single worker task on which all
/// transcript and session state is mutated. Dropping the session shuts
/// both down.
pub struct Session {
    input_tx: mpsc::UnboundedSender<Input>,
    pump: JoinHandle<()>,
    worker: JoinHandle<()>,
}

impl Session {
    /// Submits a prompt, optionally with an attached image.
    ///
    /// An empty submission only produces a local status message; no
    /// event leaves the client.
    pub fn submit<S: Into<String>>(
        &self,
        prompt: S,
        attachment: Option<PathBuf>,
    ) {
        self.input_tx
            .send(Input::Submit {
                prompt: prompt.into(),
                attachment,
            })
            .ok();
    }

    /// Asks the backend to switch the active assistant.
    pub fn change_assistant<S: Into<String>>(&self, name: S) {
        self.input_tx
            .send(Input::ChangeAssistant(name.into()))
            .ok();
    }

    /// Asks the backend to persist a new voice-activity threshold.
    pub fn change_vad_threshold(&self, value: f64) {
        self.input_tx.send(Input::ChangeVadThreshold(value)).ok();
    }

    /// Clears the transcript and replays a full history.
    pub fn replay_history(&self, events: Vec<ChatEvent>) {
        self.input_tx.send(Input::Replay(events)).ok();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.pump.abort();
        self.worker.abort();
    }
}

enum Input {
    Server(ServerEvent),
    Link(LinkStatus),
    Submit {
        prompt: String,
        attachment: Option<PathBuf>,
    },
    ChangeAssistant(String),
    ChangeVadThreshold(f64),
    Replay(Vec<ChatEvent>),
    Failure(String),
}

struct SessionWorker {
    client: LinkClient,
    state: SessionState,
    reconciler: Reconciler,
    sink: Box<dyn TranscriptSink + Send>,
    uploader: Arc<Uploader>,
    input_tx: mpsc::UnboundedSender<Input>,
    was_connected: bool,
    on_status: Option<StatusFn>,
    on_input_enabled: Option<BoolFn>,
    on_audio_level: Option<LevelFn>,
    on_assistant_changed: Option<NameFn>,
    on_radio: Option<BoolFn>,
}

impl SessionWorker {
    async fn run(mut self, mut input_rx: mpsc::UnboundedReceiver<Input>) {
        while let Some(input) = input_rx.recv().await {
            match input {
                Input::Server(event) => self.handle_server_event(event),
                Input::Link(status) => self.handle_link_status(status),
                Input::Submit { prompt, attachment } => {
                    self.handle_submit(prompt, attachment);
                }
                Input::ChangeAssistant(name) => {
                    self.send_event(ClientEvent::ChangeAssistant {
                        assistant: name,
                    });
                }
                Input::ChangeVadThreshold(value) => {
                    self.send_event(ClientEvent::ChangeVadThreshold {
                        vad_threshold: value,
                    });
                }
                Input::Replay(events) => {
                    self.reconciler.replay(&events, self.sink.as_mut());
                }
                Input::Failure(message) => self.status(&message, true),
            }
        }
    }

    fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::UpdateChat(event) => {
                self.reconciler.reconcile(&event, self.sink.as_mut());
            }
            ServerEvent::ChatbotReady(status)
            | ServerEvent::JarvisReady(status) => {
                if status.is_ready() {
                    self.set_input_enabled(true);
                    self.status("Listening for wake word...", false);
                }
            }
            ServerEvent::PromptReceived(status) => {
                if status.is_ready() {
                    self.set_input_enabled(false);
                    self.status("Generating response...", false);
                }
            }
            ServerEvent::ChatResponseReady(status) => {
                if status.is_ready() {
                    self.status("Responding...", false);
                }
            }
            ServerEvent::Awake(_) => {
                self.status("Wake word detected.", false);
            }
            ServerEvent::ListeningForPrompt(_) => {
                self.status("Listening...", false);
            }
            ServerEvent::MusicActive(status) => {
                let playing = status.is_ready();
                if playing != self.state.radio_playing() {
                    self.state.set_radio_playing(playing);
                    if let Some(on_radio) = &self.on_radio {
                        on_radio(playing);
                    }
                    self.status(
                        if playing { "Radio playing." } else { "Radio stopped." },
                        false,
                    );
                }
            }
            ServerEvent::AssistantChanged { assistant } => match assistant {
                Some(key) => {
                    // The backend broadcasts assistant keys; markers in
                    // the transcript use the capitalized display name.
                    let name = display_name(&key);
                    self.state.set_assistant(&name);
                    self.reconciler.set_assistant(&name);
                    if let Some(on_assistant_changed) =
                        &self.on_assistant_changed
                    {
                        on_assistant_changed(&name);
                    }
                    self.status(
                        &format!("Assistant changed to {name}."),
                        false,
                    );
                }
                None => self.status("Assistant not found.", true),
            },
            ServerEvent::VadThresholdChanged { vad_threshold } => {
                match vad_threshold {
                    Some(value) => {
                        self.state.set_vad_threshold(value);
                        self.status(
                            &format!("VAD threshold set to {value}."),
                            false,
                        );
                    }
                    None => self.status("VAD threshold unchanged.", true),
                }
            }
            ServerEvent::ProcessingAudio { audio_level, .. } => {
                if let (Some(level), Some(on_audio_level)) =
                    (audio_level, &self.on_audio_level)
                {
                    on_audio_level(level);
                }
            }
        }
    }

    fn handle_link_status(&mut self, status: LinkStatus) {
        match status {
            LinkStatus::Connected => {
                self.set_input_enabled(true);
                if self.was_connected {
                    self.status("Reconnected.", false);
                } else {
                    self.was_connected = true;
                    self.status("Listening for wake word...", false);
                }
            }
            LinkStatus::Disconnected => self.status("Disconnected.", true),
            LinkStatus::Reconnecting { .. } => {
                self.status("Reconnecting...", false);
            }
        }
    }

    fn handle_submit(&mut self, prompt: String, attachment: Option<PathBuf>) {
        if prompt.is_empty() && attachment.is_none() {
            self.status("Please enter a prompt or attach an image!", true);
            return;
        }

        let sender = self.client.sender();
        let uploader = Arc::clone(&self.uploader);
        let input_tx = self.input_tx.clone();
        tokio::spawn(async move {
            let attachment = match attachment {
                Some(path) => match Attachment::from_path(&path).await {
                    Ok(attachment) => Some(attachment),
                    Err(err) => {
                        input_tx
                            .send(Input::Failure(format!(
                                "Could not read attachment: {err}"
                            )))
                            .ok();
                        return;
                    }
                },
                None => None,
            };
            if let Err(err) = uploader.upload(&sender, &prompt, attachment).await
            {
                input_tx
                    .send(Input::Failure(format!("Upload failed: {err}")))
                    .ok();
            }
        });
    }

    fn send_event(&self, event: ClientEvent) {
        let sender = self.client.sender();
        let input_tx = self.input_tx.clone();
        tokio::spawn(async move {
            if let Err(err) = sender.send(event).await {
                input_tx
                    .send(Input::Failure(format!("Not delivered: {err}")))
                    .ok();
            }
        });
    }

    fn status(&self, message: &str, error: bool) {
        if let Some(on_status) = &self.on_status {
            on_status(message, error);
        }
    }

    fn set_input_enabled(&self, enabled: bool) {
        if let Some(on_input_enabled) = &self.on_input_enabled {
            on_input_enabled(enabled);
        }
    }
}

struct NullSink;

impl TranscriptSink for NullSink {
    fn append_entry(&mut self, _entry: TranscriptEntry) {}

    fn amend_last(&mut self, _entry: &TranscriptEntry) {}

    fn clear(&mut self) {}

    fn reveal_latest(&mut self) {}
}

fn display_name(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
