use std::error::Error as StdError;
use std::fmt::{self, Display};

use intercom_wire::ChatEvent;
use reqwest::Client;

/// Error produced by [`ControlClient`] calls.
///
/// Control calls are best-effort; callers turn these into a status
/// message, never into a session failure.
#[derive(Debug)]
pub struct ControlError {
    message: String,
}

impl ControlError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for ControlError {}

/// Client for the backend's plain-HTTP side: chat history, settings
/// persistence, and radio control.
#[derive(Clone, Debug)]
pub struct ControlClient {
    http: Client,
    base_url: String,
}

impl ControlClient {
    /// Creates a client for the backend at `base_url`, e.g.
    /// `http://jarvis.local:5000`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    /// Fetches the chat log for a date (`YYYY-MM-DD`), as an ordered
    /// event sequence ready to be replayed into the transcript.
    pub async fn chatlog(
        &self,
        date: &str,
    ) -> Result<Vec<ChatEvent>, ControlError> {
        let url = format!("{}/chatlog/{date}", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| {
                ControlError::new(format!("fetching {url} failed: {err}"))
            })?;
        response.json().await.map_err(|err| {
            ControlError::new(format!("chat log is malformed: {err}"))
        })
    }

    /// Persists configuration values on the backend.
    pub async fn save_settings(
        &self,
        values: &[(&str, &str)],
    ) -> Result<(), ControlError> {
        self.http
            .post(format!("{}/settings", self.base_url))
            .form(values)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| {
                ControlError::new(format!("saving settings failed: {err}"))
            })?;
        Ok(())
    }

    /// Starts out-of-band radio playback.
    pub async fn play_radio(&self) -> Result<(), ControlError> {
        self.post_empty("play_radio").await
    }

    /// Stops out-of-band radio playback.
    pub async fn stop_radio(&self) -> Result<(), ControlError> {
        self.post_empty("stop_radio").await
    }

    async fn post_empty(&self, route: &str) -> Result<(), ControlError> {
        self.http
            .post(format!("{}/{route}", self.base_url))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| {
                ControlError::new(format!("{route} failed: {err}"))
            })?;
        Ok(())
    }
}
