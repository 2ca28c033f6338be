//! Incremental transcript reconciliation.
//!
//! Assistant responses stream in as multiple partial messages rather
//! than one atomic message, so every inbound chat event has to be
//! classified: does it start a new transcript entry, or does it
//! continue the one before it? The [`Reconciler`] makes that call per
//! event and applies the result to a [`TranscriptSink`], the rendering
//! surface it stays agnostic about.

use std::sync::OnceLock;

use intercom_wire::ChatEvent;
use regex::Regex;

/// Marker that opens a user turn.
const USER_MARKER: &str = "You:";

/// Which speaker a transcript entry belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Speaker {
    /// Untagged content.
    #[default]
    Plain,
    /// A user turn.
    User,
    /// An assistant turn.
    Assistant,
}

/// An inline media preview extracted from a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaLink {
    /// Link target of the preview.
    pub href: String,
    /// Source of the inline preview image.
    pub preview_src: String,
}

/// One paragraph-level unit of rendered chat history.
///
/// An entry may be assembled from several streamed events; it is
/// mutated in place while it is the most recent one and never touched
/// again afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TranscriptEntry {
    /// Accumulated text of the entry.
    pub text: String,
    /// Speaker tag used for styling.
    pub speaker: Speaker,
    /// Inline preview attached to the entry.
    pub media: Option<MediaLink>,
}

/// Rendering surface the reconciler writes into.
///
/// Implementations that fetch remote media before revealing must bound
/// the wait (the stock sink uses 5 seconds) and reveal even when the
/// media fails to load.
pub trait TranscriptSink {
    /// Appends a new entry after the current ones.
    fn append_entry(&mut self, entry: TranscriptEntry);

    /// Rewrites the entry that was appended most recently.
    fn amend_last(&mut self, entry: &TranscriptEntry);

    /// Removes every entry.
    fn clear(&mut self);

    /// Brings the newest content into view.
    fn reveal_latest(&mut self);
}

/// Continuation state of the transcript.
///
/// Transitions are driven solely by event classification; no entry is
/// ever re-opened once a different entry has become current.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    /// Nothing has been rendered yet.
    NoEntry,
    /// A user entry is open for continuation.
    OpenUser,
    /// An assistant entry is open for continuation.
    OpenAssistant,
    /// An untagged entry is open for continuation.
    OpenPlain,
}

/// Folds streamed chat events into transcript entries.
///
/// At most one entry is open for continuation at any time: the one
/// appended most recently. An event bearing a speaker marker always
/// closes the open entry and starts a new one; any other event is
/// merged into the open entry.
pub struct Reconciler {
    assistant_marker: String,
    open: Option<TranscriptEntry>,
}

impl Reconciler {
    /// Creates a reconciler recognizing `assistant_name` turn markers.
    pub fn new(assistant_name: &str) -> Self {
        Self {
            assistant_marker: format!("{assistant_name}:"),
            open: None,
        }
    }

    /// Swaps the recognized assistant marker.
    ///
    /// The open entry is left alone; the next marker-bearing event
    /// closes it as usual.
    pub fn set_assistant(&mut self, assistant_name: &str) {
        self.assistant_marker = format!("{assistant_name}:");
    }

    /// The current continuation state.
    pub fn state(&self) -> EntryState {
        match &self.open {
            None => EntryState::NoEntry,
            Some(entry) => match entry.speaker {
                Speaker::User => EntryState::OpenUser,
                Speaker::Assistant => EntryState::OpenAssistant,
                Speaker::Plain => EntryState::OpenPlain,
            },
        }
    }

    /// Applies one chat event to `sink`.
    ///
    /// Events with an empty message are dropped without touching the
    /// sink. Continuation fragments are concatenated verbatim, since
    /// streamed responses can split mid-word. After any mutation the
    /// sink is asked to reveal the newest content.
    pub fn reconcile(&mut self, event: &ChatEvent, sink: &mut dyn TranscriptSink) {
        let message = event.message.trim();
        if message.is_empty() {
            return;
        }

        let speaker = self.classify(message);
        let (text, media) = extract_media(message);

        match speaker {
            Speaker::User | Speaker::Assistant => {
                let entry = TranscriptEntry {
                    text,
                    speaker,
                    media,
                };
                self.open = Some(entry.clone());
                sink.append_entry(entry);
            }
            Speaker::Plain => match &mut self.open {
                Some(entry) => {
                    entry.text.push_str(&text);
                    if media.is_some() {
                        entry.media = media;
                    }
                    sink.amend_last(entry);
                }
                None => {
                    // The very first event of a session can arrive
                    // without a marker; render it untagged.
                    let entry = TranscriptEntry {
                        text,
                        speaker: Speaker::Plain,
                        media,
                    };
                    self.open = Some(entry.clone());
                    sink.append_entry(entry);
                }
            },
        }

        sink.reveal_latest();
    }

    /// Clears the sink and replays a full history.
    pub fn replay(&mut self, events: &[ChatEvent], sink: &mut dyn TranscriptSink) {
        sink.clear();
        self.open = None;
        for event in events {
            self.reconcile(event, sink);
        }
    }

    fn classify(&self, message: &str) -> Speaker {
        if message.starts_with(USER_MARKER) {
            Speaker::User
        } else if message.starts_with(&self.assistant_marker) {
            Speaker::Assistant
        } else {
            Speaker::Plain
        }
    }
}

fn media_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)https?://\S+\.(jpg|jpeg|png|gif)")
            .expect("media url pattern is valid")
    })
}

/// Extracts the first embedded media URL from a message.
///
/// Returns the remaining text, whitespace-normalized, and the preview
/// link. Only the first match is excised; anything after it stays in
/// the text.
fn extract_media(message: &str) -> (String, Option<MediaLink>) {
    let Some(found) = media_url_pattern().find(message) else {
        return (message.to_owned(), None);
    };
    let url = found.as_str().to_owned();
    let remainder =
        format!("{} {}", &message[..found.start()], &message[found.end()..]);
    let text = remainder.split_whitespace().collect::<Vec<_>>().join(" ");
    let media = MediaLink {
        href: url.clone(),
        preview_src: url,
    };
    (text, Some(media))
}
