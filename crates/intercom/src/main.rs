//! A terminal front end for the assistant backend.

#[macro_use]
extern crate tracing;

use std::env;
use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use intercom::{ControlClient, SessionBuilder, TermSink};
use intercom_socket::{SocketConfig, SocketTransport};
use owo_colors::OwoColorize as _;
use tokio::io::{self, AsyncBufReadExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::sleep;

enum UiEvent {
    Status(String, bool),
    InputEnabled(bool),
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Ok(socket_url) = env::var("INTERCOM_URL") else {
        eprintln!("INTERCOM_URL environment variable is not set");
        return;
    };
    let http_url = env::var("INTERCOM_HTTP_URL")
        .unwrap_or_else(|_| derive_http_url(&socket_url));
    let assistant = env::var("INTERCOM_ASSISTANT")
        .unwrap_or_else(|_| "Jarvis".to_owned());

    let transport = SocketTransport::new(SocketConfig::new(socket_url));
    let control = ControlClient::new(http_url);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let session = SessionBuilder::with_transport(transport)
        .with_assistant(&assistant)
        .with_sink(TermSink::new())
        .on_status({
            let event_tx = event_tx.clone();
            move |message, error| {
                event_tx
                    .send(UiEvent::Status(message.to_owned(), error))
                    .ok();
            }
        })
        .on_input_enabled({
            let event_tx = event_tx.clone();
            move |enabled| {
                event_tx.send(UiEvent::InputEnabled(enabled)).ok();
            }
        })
        .on_upload_progress({
            let event_tx = event_tx.clone();
            move |progress| {
                event_tx
                    .send(UiEvent::Status(
                        format!(
                            "Uploading chunk {}/{}...",
                            progress.sent_chunks, progress.total_chunks
                        ),
                        false,
                    ))
                    .ok();
            }
        })
        .build();

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .unwrap()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

    'outer: loop {
        // Show whatever piled up while the prompt was idle.
        while let Ok(event) = event_rx.try_recv() {
            if let UiEvent::Status(message, error) = event {
                print_status(&message, error);
            }
        }

        print!("> ");
        std::io::stdout().flush().unwrap();

        let Some(line) = read_line().await else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_command(line) {
            Command::Quit => break,
            Command::History(date) => {
                match control.chatlog(&date).await {
                    Ok(events) => session.replay_history(events),
                    Err(err) => print_status(&format!("{err}"), true),
                }
                continue;
            }
            Command::Assistant(name) => {
                session.change_assistant(name);
                continue;
            }
            Command::VadThreshold(value) => {
                session.change_vad_threshold(value);
                continue;
            }
            Command::Radio(on) => {
                let result = if on {
                    control.play_radio().await
                } else {
                    control.stop_radio().await
                };
                if let Err(err) = result {
                    print_status(&format!("{err}"), true);
                }
                continue;
            }
            Command::Usage(usage) => {
                eprintln!("{usage}");
                continue;
            }
            Command::Submit { prompt, attachment } => {
                session.submit(prompt, attachment);
            }
        }

        // Drain session events until the backend is ready for the next
        // prompt.
        let mut progress_bar: Option<ProgressBar> = None;
        loop {
            progress_bar
                .get_or_insert_with(|| {
                    let progress_bar = ProgressBar::new_spinner();
                    progress_bar.set_style(progress_style.clone());
                    progress_bar.set_message("Waiting...");
                    progress_bar
                })
                .inc(1);

            let tick = sleep(Duration::from_millis(100));
            let event = select! {
                event = event_rx.recv() => {
                    let Some(event) = event else {
                        break 'outer;
                    };
                    event
                },
                _ = tick => {
                    continue;
                }
            };

            if let Some(progress_bar) = &progress_bar {
                progress_bar.finish_and_clear();
            }
            progress_bar = None;

            match event {
                UiEvent::Status(message, error) => {
                    print_status(&message, error);
                    if error {
                        // Failed submissions never re-enable the input;
                        // hand the prompt back instead of spinning.
                        break;
                    }
                }
                UiEvent::InputEnabled(true) => break,
                UiEvent::InputEnabled(false) => {}
            }
        }
    }
}

enum Command {
    Submit {
        prompt: String,
        attachment: Option<PathBuf>,
    },
    History(String),
    Assistant(String),
    VadThreshold(f64),
    Radio(bool),
    Usage(&'static str),
    Quit,
}

fn parse_command(line: &str) -> Command {
    if let Some(rest) = line.strip_prefix("/attach ") {
        let rest = rest.trim();
        let Some((path, prompt)) = rest.split_once(char::is_whitespace) else {
            return Command::Submit {
                prompt: String::new(),
                attachment: Some(PathBuf::from(rest)),
            };
        };
        Command::Submit {
            prompt: prompt.trim().to_owned(),
            attachment: Some(PathBuf::from(path)),
        }
    } else if let Some(date) = line.strip_prefix("/history") {
        let date = date.trim();
        if date.is_empty() {
            Command::Usage("usage: /history <YYYY-MM-DD>")
        } else {
            Command::History(date.to_owned())
        }
    } else if let Some(name) = line.strip_prefix("/assistant ") {
        Command::Assistant(name.trim().to_owned())
    } else if let Some(value) = line.strip_prefix("/vad ") {
        match value.trim().parse() {
            Ok(value) => Command::VadThreshold(value),
            Err(_) => Command::Usage("usage: /vad <number>"),
        }
    } else if line == "/radio on" {
        Command::Radio(true)
    } else if line == "/radio off" {
        Command::Radio(false)
    } else if line == "/quit" {
        Command::Quit
    } else {
        Command::Submit {
            prompt: line.to_owned(),
            attachment: None,
        }
    }
}

fn print_status(message: &str, error: bool) {
    if error {
        eprintln!("{}", message.bright_red());
    } else {
        println!("{}", message.dimmed());
    }
}

fn derive_http_url(socket_url: &str) -> String {
    if let Some(rest) = socket_url.strip_prefix("wss://") {
        format!("https://{}", authority(rest))
    } else if let Some(rest) = socket_url.strip_prefix("ws://") {
        format!("http://{}", authority(rest))
    } else {
        socket_url.to_owned()
    }
}

fn authority(rest: &str) -> &str {
    rest.split('/').next().unwrap_or(rest)
}

async fn read_line() -> Option<String> {
    let mut stdin = io::BufReader::new(io::stdin());
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(count) => {
            if count == 0 {
                return None;
            }
            Some(line)
        }
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_http_url() {
        assert_eq!(
            derive_http_url("ws://jarvis.local:5000/events"),
            "http://jarvis.local:5000"
        );
        assert_eq!(
            derive_http_url("wss://jarvis.example.com/events"),
            "https://jarvis.example.com"
        );
        assert_eq!(
            derive_http_url("http://jarvis.local:5000"),
            "http://jarvis.local:5000"
        );
    }

    #[test]
    fn test_parse_attach_command() {
        let Command::Submit { prompt, attachment } =
            parse_command("/attach /tmp/cat.png what is this")
        else {
            panic!("expected a submission");
        };
        assert_eq!(prompt, "what is this");
        assert_eq!(attachment, Some(PathBuf::from("/tmp/cat.png")));
    }
}
