//! Chunked attachment uploads.
//!
//! The backend accepts arbitrarily large attachments, but the transport
//! does not: single events at or above 1 MiB corrupt the framing. An
//! attachment is therefore split into bounded chunks that share a
//! correlation id, and every chunk carries its index and the total so
//! the receiver can reassemble the file no matter in which order the
//! chunks arrive.

use std::collections::HashSet;
use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::io;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use intercom_wire::{ClientEvent, EventSender, FileChunk, TransportError};
use tokio::sync::mpsc;

/// Size of one upload chunk.
///
/// Fixed at build time, not tunable: the transport framing breaks once
/// a single event reaches 1 MiB, so chunks stay at half of that.
pub const CHUNK_SIZE: usize = 512 * 1024;

/// An attachment staged for upload.
#[derive(Clone, Debug)]
pub struct Attachment {
    file_name: String,
    data: Bytes,
}

impl Attachment {
    /// Creates an attachment from in-memory bytes.
    pub fn from_bytes<S, B>(file_name: S, data: B) -> Self
    where
        S: Into<String>,
        B: Into<Bytes>,
    {
        Self {
            file_name: file_name.into(),
            data: data.into(),
        }
    }

    /// Reads an attachment from disk.
    pub async fn from_path(path: &Path) -> io::Result<Self> {
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_owned());
        Ok(Self {
            file_name,
            data: Bytes::from(data),
        })
    }

    /// Name of the attached file.
    #[inline]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Size of the attachment in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the attachment has no content.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The fixed fragmentation of one attachment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadPlan {
    upload_id: String,
    file_name: String,
    size: usize,
    total_chunks: u32,
}

impl UploadPlan {
    /// Plans the fragmentation of a `size`-byte attachment.
    ///
    /// The upload id concatenates the file name and the wall clock in
    /// milliseconds, which lets the receiver multiplex concurrent
    /// uploads from one session. A collision would need two uploads of
    /// the same file within one millisecond; that probability is
    /// accepted, not eliminated.
    pub fn new(file_name: &str, size: usize) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        Self {
            upload_id: format!("{file_name}-{millis}"),
            file_name: file_name.to_owned(),
            size,
            total_chunks: size.div_ceil(CHUNK_SIZE) as u32,
        }
    }

    /// Correlation id shared by every chunk of this upload.
    #[inline]
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Number of chunks the attachment splits into.
    #[inline]
    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Byte range of chunk `index`.
    #[inline]
    pub fn chunk_range(&self, index: u32) -> Range<usize> {
        let start = index as usize * CHUNK_SIZE;
        let end = (start + CHUNK_SIZE).min(self.size);
        start..end
    }

    /// Whether `index` is the final chunk of this upload.
    #[inline]
    pub fn is_last(&self, index: u32) -> bool {
        index + 1 == self.total_chunks
    }
}

/// Progress report for one upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadProgress {
    /// Correlation id of the upload.
    pub upload_id: String,
    /// Chunks emitted so far.
    pub sent_chunks: u32,
    /// Chunks planned in total.
    pub total_chunks: u32,
}

impl UploadProgress {
    /// Whether every chunk has been emitted.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.sent_chunks == self.total_chunks
    }
}

/// Error produced when the transport rejects part of an upload.
#[derive(Debug)]
pub struct UploadError {
    upload_id: Option<String>,
    chunk_index: Option<u32>,
    source: Box<dyn StdError + Send + Sync>,
}

impl UploadError {
    fn send<E: TransportError>(
        upload_id: Option<String>,
        chunk_index: Option<u32>,
        source: E,
    ) -> Self {
        Self {
            upload_id,
            chunk_index,
            source: Box::new(source),
        }
    }

    /// Correlation id of the failed upload, if an attachment was
    /// involved.
    #[inline]
    pub fn upload_id(&self) -> Option<&str> {
        self.upload_id.as_deref()
    }

    /// Index of the chunk that failed.
    #[inline]
    pub fn chunk_index(&self) -> Option<u32> {
        self.chunk_index
    }
}

impl Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.upload_id, self.chunk_index) {
            (Some(id), Some(index)) => write!(
                f,
                "chunk {index} of upload {id} was not accepted: {}",
                self.source
            ),
            _ => write!(f, "prompt event was not accepted: {}", self.source),
        }
    }
}

impl StdError for UploadError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref() as &(dyn StdError + 'static))
    }
}

type ProgressFn = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// Splits attachments into bounded chunk events and emits them.
///
/// A prompt without an attachment is emitted as a single `file_chunk`
/// event with a null file id.
#[derive(Default)]
pub struct Uploader {
    on_progress: Option<ProgressFn>,
}

impl Uploader {
    /// Creates an uploader with no observer attached.
    #[inline]
    pub fn new() -> Self {
        Self { on_progress: None }
    }

    /// Attaches a callback invoked after every emitted chunk.
    #[inline]
    pub fn on_progress(
        mut self,
        on_progress: impl Fn(UploadProgress) + Send + Sync + 'static,
    ) -> Self {
        self.on_progress = Some(Arc::new(on_progress));
        self
    }

    /// Emits `prompt` and an optional attachment as a finite sequence
    /// of chunk events over `sender`.
    ///
    /// Chunks are encoded and sent by independent tasks, so they may be
    /// accepted in any order; the carried index and total let the
    /// receiver reassemble them. Completion here means local emission
    /// only, there is no server-side acknowledgement. The first chunk
    /// the transport rejects fails the whole upload and chunks still in
    /// flight are abandoned, not retried.
    ///
    /// Starting another upload before this one finished interleaves the
    /// two chunk sequences under their distinct upload ids; nothing
    /// cancels or serializes them.
    pub async fn upload<S: EventSender>(
        &self,
        sender: &S,
        prompt: &str,
        attachment: Option<Attachment>,
    ) -> Result<Option<UploadPlan>, UploadError> {
        let Some(attachment) = attachment else {
            let chunk = FileChunk {
                file_id: None,
                prompt: prompt.to_owned(),
                ..Default::default()
            };
            sender
                .send(ClientEvent::FileChunk(chunk))
                .await
                .map_err(|err| UploadError::send(None, None, err))?;
            return Ok(None);
        };

        let plan = UploadPlan::new(attachment.file_name(), attachment.len());
        debug!(
            upload_id = plan.upload_id(),
            total_chunks = plan.total_chunks(),
            "starting upload"
        );

        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        for index in 0..plan.total_chunks() {
            let sender = sender.clone();
            let plan = plan.clone();
            let prompt = prompt.to_owned();
            let data = attachment.data.slice(plan.chunk_range(index));
            let done_tx = done_tx.clone();
            tokio::spawn(async move {
                let result =
                    send_chunk(&sender, &plan, &prompt, index, data).await;
                done_tx.send((index, result)).ok();
            });
        }
        drop(done_tx);

        // Completion is tracked per index, not by arrival order.
        let mut done = HashSet::new();
        while done.len() < plan.total_chunks() as usize {
            let Some((index, result)) = done_rx.recv().await else {
                break;
            };
            result?;
            done.insert(index);
            if let Some(on_progress) = &self.on_progress {
                on_progress(UploadProgress {
                    upload_id: plan.upload_id().to_owned(),
                    sent_chunks: done.len() as u32,
                    total_chunks: plan.total_chunks(),
                });
            }
        }

        debug!(upload_id = plan.upload_id(), "upload complete");
        Ok(Some(plan))
    }
}

async fn send_chunk<S: EventSender>(
    sender: &S,
    plan: &UploadPlan,
    prompt: &str,
    index: u32,
    data: Bytes,
) -> Result<(), UploadError> {
    let chunk = FileChunk {
        file_id: Some(plan.upload_id().to_owned()),
        prompt: prompt.to_owned(),
        chunk_index: Some(index),
        total_chunks: Some(plan.total_chunks()),
        chunk_data: Some(BASE64.encode(&data)),
        file_name: Some(plan.file_name.clone()),
    };
    sender.send(ClientEvent::FileChunk(chunk)).await.map_err(|err| {
        UploadError::send(Some(plan.upload_id().to_owned()), Some(index), err)
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::sync::Mutex;

    use base64::Engine as _;
    use intercom_test_transport::{PresetConnection, TestTransport};
    use intercom_wire::Transport as _;

    use super::*;

    /// 1.2 MiB, which splits into 3 chunks of 512 KiB.
    const THREE_CHUNK_SIZE: usize = 1_258_291;

    async fn connected_sender(
        transport: &TestTransport,
    ) -> intercom_test_transport::TestSender {
        let (sender, _events) = transport.connect().await.unwrap();
        sender
    }

    fn scripted_transport() -> TestTransport {
        let mut transport = TestTransport::default();
        transport
            .add_connection(PresetConnection::Established(Default::default()));
        transport
    }

    fn sent_chunks(transport: &TestTransport) -> Vec<FileChunk> {
        transport
            .sent_events()
            .into_iter()
            .map(|event| match event {
                ClientEvent::FileChunk(chunk) => chunk,
                other => panic!("unexpected event: {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_plan_properties() {
        for size in [1, CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1, 3 * CHUNK_SIZE]
        {
            let plan = UploadPlan::new("photo.png", size);
            assert_eq!(
                plan.total_chunks() as usize,
                size.div_ceil(CHUNK_SIZE),
                "size {size}"
            );

            // Ranges tile the file exactly, in index order, each at
            // most one chunk long.
            let mut covered = 0;
            for index in 0..plan.total_chunks() {
                let range = plan.chunk_range(index);
                assert_eq!(range.start, covered);
                assert!(range.len() <= CHUNK_SIZE);
                assert!(!range.is_empty());
                covered = range.end;
            }
            assert_eq!(covered, size);

            // Exactly the final index is marked last.
            let last: Vec<u32> = (0..plan.total_chunks())
                .filter(|&index| plan.is_last(index))
                .collect();
            assert_eq!(last, vec![plan.total_chunks() - 1]);
        }
    }

    #[test]
    fn test_plan_id_format() {
        let plan = UploadPlan::new("cat.png", 42);
        assert!(plan.upload_id().starts_with("cat.png-"));
    }

    #[tokio::test]
    async fn test_bare_prompt() {
        let transport = scripted_transport();
        let sender = connected_sender(&transport).await;

        let plan = Uploader::new()
            .upload(&sender, "hello there", None)
            .await
            .unwrap();
        assert!(plan.is_none());

        let chunks = sent_chunks(&transport);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].file_id, None);
        assert_eq!(chunks[0].prompt, "hello there");
        assert_eq!(chunks[0].chunk_index, None);
        assert_eq!(chunks[0].chunk_data, None);
    }

    #[tokio::test]
    async fn test_chunked_attachment() {
        let transport = scripted_transport();
        let sender = connected_sender(&transport).await;

        let data = vec![7u8; THREE_CHUNK_SIZE];
        let attachment = Attachment::from_bytes("photo.png", data);
        let plan = Uploader::new()
            .upload(&sender, "what is this", Some(attachment))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(plan.total_chunks(), 3);

        let mut chunks = sent_chunks(&transport);
        assert_eq!(chunks.len(), 3);
        // Chunk tasks finish in no particular order.
        chunks.sort_by_key(|chunk| chunk.chunk_index);

        let mut decoded_total = 0;
        for (expected_index, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.file_id.as_deref(), Some(plan.upload_id()));
            assert_eq!(chunk.chunk_index, Some(expected_index as u32));
            assert_eq!(chunk.total_chunks, Some(3));
            assert_eq!(chunk.file_name.as_deref(), Some("photo.png"));
            assert_eq!(chunk.prompt, "what is this");
            assert_eq!(chunk.is_last(), expected_index == 2);
            let decoded = BASE64
                .decode(chunk.chunk_data.as_deref().unwrap())
                .unwrap();
            assert!(decoded.len() <= CHUNK_SIZE);
            decoded_total += decoded.len();
        }
        assert_eq!(decoded_total, THREE_CHUNK_SIZE);
    }

    #[tokio::test]
    async fn test_progress_reports() {
        let transport = scripted_transport();
        let sender = connected_sender(&transport).await;

        let reports = Arc::new(Mutex::new(Vec::new()));
        let uploader = Uploader::new().on_progress({
            let reports = Arc::clone(&reports);
            move |progress| reports.lock().unwrap().push(progress)
        });

        let attachment =
            Attachment::from_bytes("photo.png", vec![0u8; THREE_CHUNK_SIZE]);
        uploader
            .upload(&sender, "", Some(attachment))
            .await
            .unwrap();

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 3);
        let counts: Vec<u32> =
            reports.iter().map(|report| report.sent_chunks).collect();
        assert_eq!(counts, vec![1, 2, 3]);
        assert!(reports.last().unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_rejected_chunk_fails_upload() {
        let mut transport = scripted_transport();
        transport.fail_sends_after(1);
        let sender = connected_sender(&transport).await;

        let attachment =
            Attachment::from_bytes("photo.png", vec![0u8; CHUNK_SIZE * 2]);
        let err = Uploader::new()
            .upload(&sender, "", Some(attachment))
            .await
            .unwrap_err();
        assert!(err.upload_id().is_some());
        assert!(err.chunk_index().is_some());
    }

    #[tokio::test]
    async fn test_empty_attachment_emits_nothing() {
        let transport = scripted_transport();
        let sender = connected_sender(&transport).await;

        let attachment = Attachment::from_bytes("empty.png", Vec::new());
        let plan = Uploader::new()
            .upload(&sender, "", Some(attachment))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(plan.total_chunks(), 0);
        assert!(transport.sent_events().is_empty());
    }

    #[tokio::test]
    async fn test_attachment_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not really a png").unwrap();

        let attachment = Attachment::from_path(file.path()).await.unwrap();
        assert_eq!(attachment.len(), 16);
        assert!(!attachment.is_empty());
        assert_eq!(
            attachment.file_name(),
            file.path().file_name().unwrap().to_str().unwrap()
        );
    }
}
