use std::io::{self, Write as _};
use std::time::Duration;

use intercom_core::transcript::{Speaker, TranscriptEntry, TranscriptSink};
use owo_colors::OwoColorize as _;
use tokio::time::timeout;

/// How long to wait for an inline preview before revealing without it.
const PREVIEW_TIMEOUT: Duration = Duration::from_secs(5);

/// Renders transcript entries to the terminal.
///
/// A continuation rewrites the open entry's line in place, so streamed
/// responses grow on one line instead of spawning a paragraph per
/// fragment. Inline media is prefetched in the background with a
/// bounded wait; a failed or slow preview never blocks rendering.
pub struct TermSink {
    http: reqwest::Client,
    open_line: bool,
    fetched_preview: Option<String>,
}

impl TermSink {
    /// Creates a sink writing to stdout.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            open_line: false,
            fetched_preview: None,
        }
    }

    fn render(entry: &TranscriptEntry) -> String {
        let mut line = match entry.speaker {
            Speaker::Plain => entry.text.clone(),
            Speaker::User | Speaker::Assistant => {
                match entry.text.split_once(':') {
                    Some((tag, rest)) => {
                        let tag = format!("{tag}:");
                        let tag = if entry.speaker == Speaker::User {
                            tag.bright_green().bold().to_string()
                        } else {
                            tag.bright_cyan().bold().to_string()
                        };
                        format!("{tag}{rest}")
                    }
                    None => entry.text.clone(),
                }
            }
        };
        if let Some(media) = &entry.media {
            let preview = format!("[image: {}]", media.href);
            line.push(' ');
            line.push_str(&preview.dimmed().to_string());
        }
        line
    }

    fn prefetch_preview(&mut self, entry: &TranscriptEntry) {
        let Some(media) = &entry.media else {
            return;
        };
        if self.fetched_preview.as_deref() == Some(media.preview_src.as_str())
        {
            return;
        }
        self.fetched_preview = Some(media.preview_src.clone());

        let http = self.http.clone();
        let url = media.preview_src.clone();
        tokio::spawn(async move {
            match timeout(PREVIEW_TIMEOUT, http.get(&url).send()).await {
                Ok(Ok(_)) => debug!(url = url.as_str(), "preview ready"),
                // Reveal happens regardless; a broken preview only
                // loses its warm-up.
                Ok(Err(err)) => debug!("preview failed: {err}"),
                Err(_) => debug!(url = url.as_str(), "preview timed out"),
            }
        });
    }
}

impl Default for TermSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptSink for TermSink {
    fn append_entry(&mut self, entry: TranscriptEntry) {
        if self.open_line {
            println!();
        }
        print!("{}", Self::render(&entry));
        self.open_line = true;
        self.prefetch_preview(&entry);
    }

    fn amend_last(&mut self, entry: &TranscriptEntry) {
        // Erase and rewrite the open line; entries are single-line
        // after whitespace normalization.
        print!("\r\x1b[2K{}", Self::render(entry));
        self.open_line = true;
        self.prefetch_preview(entry);
    }

    fn clear(&mut self) {
        if self.open_line {
            println!();
            self.open_line = false;
        }
        print!("\x1b[2J\x1b[H");
    }

    fn reveal_latest(&mut self) {
        io::stdout().flush().ok();
    }
}
