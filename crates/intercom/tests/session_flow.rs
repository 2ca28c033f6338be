use std::io::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use intercom::SessionBuilder;
use intercom::core::transcript::{Speaker, TranscriptEntry, TranscriptSink};
use intercom_test_transport::{
    PresetConnection, PresetSession, PresetStep, TestTransport,
};
use intercom_wire::{ChatEvent, ClientEvent, ServerEvent};
use tokio::time::sleep;

/// 1.2 MiB, which splits into 3 chunks of 512 KiB.
const THREE_CHUNK_SIZE: usize = 1_258_291;

#[derive(Clone, Default)]
struct SharedSink {
    entries: Arc<Mutex<Vec<TranscriptEntry>>>,
}

impl SharedSink {
    fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl TranscriptSink for SharedSink {
    fn append_entry(&mut self, entry: TranscriptEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    fn amend_last(&mut self, entry: &TranscriptEntry) {
        let mut entries = self.entries.lock().unwrap();
        *entries.last_mut().expect("no entry to amend") = entry.clone();
    }

    fn clear(&mut self) {
        self.entries.lock().unwrap().clear();
    }

    fn reveal_latest(&mut self) {}
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition was not met in time");
}

struct ReadyFlag(Arc<Mutex<bool>>);

fn builder_with_ready_flag(
    transport: &TestTransport,
) -> (SessionBuilder, ReadyFlag) {
    let ready = Arc::new(Mutex::new(false));
    let builder = SessionBuilder::with_transport(transport.clone())
        .with_assistant("Jarvis")
        .on_input_enabled({
            let ready = Arc::clone(&ready);
            move |enabled| *ready.lock().unwrap() = enabled
        });
    (builder, ReadyFlag(ready))
}

impl ReadyFlag {
    async fn wait(&self) {
        let flag = Arc::clone(&self.0);
        wait_for(move || *flag.lock().unwrap()).await;
    }
}

#[tokio::test]
async fn test_bare_prompt_emits_single_chunk() {
    let mut transport = TestTransport::default();
    transport.add_connection(PresetConnection::Established(
        PresetSession::default(),
    ));
    // Keep the idle connection open for the duration of the test.
    transport.set_delay(Duration::from_secs(60));

    let (builder, ready) = builder_with_ready_flag(&transport);
    let session = builder.build();
    ready.wait().await;

    session.submit("turn on the lights", None);
    wait_for(|| transport.sent_events().len() == 1).await;

    let events = transport.sent_events();
    let ClientEvent::FileChunk(chunk) = &events[0] else {
        panic!("expected a file_chunk event");
    };
    assert_eq!(chunk.file_id, None);
    assert_eq!(chunk.prompt, "turn on the lights");
    assert_eq!(chunk.chunk_index, None);
    assert_eq!(chunk.total_chunks, None);
}

#[tokio::test]
async fn test_attachment_uploads_in_three_chunks() {
    let mut transport = TestTransport::default();
    transport.add_connection(PresetConnection::Established(
        PresetSession::default(),
    ));
    // Keep the idle connection open for the duration of the test.
    transport.set_delay(Duration::from_secs(60));

    let mut file = tempfile::Builder::new()
        .suffix(".png")
        .tempfile()
        .unwrap();
    file.write_all(&vec![3u8; THREE_CHUNK_SIZE]).unwrap();

    let (builder, ready) = builder_with_ready_flag(&transport);
    let session = builder.build();
    ready.wait().await;

    session.submit("what is this", Some(file.path().to_path_buf()));
    wait_for(|| transport.sent_events().len() == 3).await;

    let mut ids = Vec::new();
    let mut indices = Vec::new();
    for event in transport.sent_events() {
        let ClientEvent::FileChunk(chunk) = event else {
            panic!("expected a file_chunk event");
        };
        ids.push(chunk.file_id.expect("chunk without file id"));
        indices.push(chunk.chunk_index.expect("chunk without index"));
        assert_eq!(chunk.total_chunks, Some(3));
        assert_eq!(chunk.prompt, "what is this");
    }
    ids.dedup();
    assert_eq!(ids.len(), 1, "all chunks share one upload id");
    indices.sort_unstable();
    assert_eq!(indices, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_streamed_response_renders_merged_entries() {
    let mut transport = TestTransport::default();
    transport.add_connection(PresetConnection::Established(
        PresetSession::with_steps([
            PresetStep::Event(ServerEvent::UpdateChat(ChatEvent::new(
                "You: hi",
            ))),
            PresetStep::Event(ServerEvent::UpdateChat(ChatEvent::new(
                "Jarvis: hel",
            ))),
            PresetStep::Event(ServerEvent::UpdateChat(ChatEvent::new(
                "lo there",
            ))),
        ]),
    ));

    let sink = SharedSink::default();
    let _session = SessionBuilder::with_transport(transport)
        .with_assistant("Jarvis")
        .with_sink(sink.clone())
        .build();

    wait_for(|| {
        let entries = sink.snapshot();
        entries.len() == 2 && entries[1].text == "Jarvis: hello there"
    })
    .await;

    let entries = sink.snapshot();
    assert_eq!(entries[0].text, "You: hi");
    assert_eq!(entries[0].speaker, Speaker::User);
    assert_eq!(entries[1].speaker, Speaker::Assistant);
}

#[tokio::test]
async fn test_empty_submission_is_rejected_locally() {
    let mut transport = TestTransport::default();
    transport.add_connection(PresetConnection::Established(
        PresetSession::default(),
    ));

    let statuses = Arc::new(Mutex::new(Vec::new()));
    let (builder, ready) = builder_with_ready_flag(&transport);
    let session = builder
        .on_status({
            let statuses = Arc::clone(&statuses);
            move |message, error| {
                statuses.lock().unwrap().push((message.to_owned(), error));
            }
        })
        .build();
    ready.wait().await;

    session.submit("", None);
    wait_for(|| {
        statuses
            .lock()
            .unwrap()
            .iter()
            .any(|(message, error)| *error && message.contains("enter a prompt"))
    })
    .await;

    assert!(transport.sent_events().is_empty());
}

#[tokio::test]
async fn test_history_replay_rebuilds_transcript() {
    let mut transport = TestTransport::default();
    transport.add_connection(PresetConnection::Established(
        PresetSession::with_steps([PresetStep::Event(
            ServerEvent::UpdateChat(ChatEvent::new("You: live message")),
        )]),
    ));

    let sink = SharedSink::default();
    let session = SessionBuilder::with_transport(transport)
        .with_assistant("Jarvis")
        .with_sink(sink.clone())
        .build();

    wait_for(|| sink.snapshot().len() == 1).await;

    session.replay_history(vec![
        ChatEvent::new("You: yesterday"),
        ChatEvent::new("Jarvis: indeed."),
    ]);
    wait_for(|| {
        let entries = sink.snapshot();
        entries.len() == 2 && entries[0].text == "You: yesterday"
    })
    .await;
}
