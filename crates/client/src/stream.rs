//! Incremental decoder for streaming chat replies.
//!
//! The body is UTF-8 text made of records separated by a blank line. Only
//! `data: ` lines carry payload, each a JSON [`StreamFrame`]:
//!
//! ```text
//! data: {"type":"content","chunk":"Hel"}
//!
//! data: {"type":"done","message_id":"m1"}
//! ```
//!
//! Chunks may split a record or a multi-byte character anywhere; the
//! dispatched frames do not depend on where the splits fall.

use futures_util::StreamExt as _;
use labdesk_types::{ByteStream, LabError, StreamFrame};

const RECORD_SEPARATOR: &str = "\n\n";
const DATA_PREFIX: &str = "data: ";

/// Caller callbacks for one streamed reply, invoked in arrival order.
pub trait StreamHandler: Send {
    /// A piece of the reply text.
    fn on_content(&mut self, chunk: &str);
    /// The reply finished normally.
    fn on_done(&mut self, message_id: &str);
    /// The reply failed; called at most once per stream.
    fn on_error(&mut self, message: &str);
    /// The backend acknowledged the user's message.
    fn on_user_message(&mut self, message_id: Option<&str>) {
        tracing::debug!(?message_id, "user message acknowledged");
    }
}

/// How a stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// A `done` frame arrived.
    Completed { message_id: String },
    /// An `error` frame arrived or the transport failed.
    Failed { message: String },
    /// The transport closed without a terminal frame.
    Ended,
}

/// Turns body chunks into frames.
///
/// Holds the bytes of an unfinished UTF-8 sequence and the text of an
/// unfinished record between calls to [`FrameDecoder::push`].
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
    buf: String,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns the frames of every record it completes.
    ///
    /// Records with malformed JSON are logged and skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamFrame> {
        self.decode(chunk);
        let mut frames = Vec::new();
        while let Some(end) = self.buf.find(RECORD_SEPARATOR) {
            let record: String = self.buf.drain(..end + RECORD_SEPARATOR.len()).collect();
            parse_record(&record[..end], &mut frames);
        }
        frames
    }

    /// Text buffered after the last complete record.
    #[must_use]
    pub fn remainder(&self) -> &str {
        &self.buf
    }

    fn decode(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    self.buf.push_str(text);
                    self.pending.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    self.buf
                        .push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Incomplete sequence at the end: wait for the next chunk.
                        None => {
                            self.pending.drain(..valid);
                            return;
                        }
                        Some(len) => {
                            self.buf.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }
}

fn parse_record(record: &str, frames: &mut Vec<StreamFrame>) {
    for line in record.lines() {
        let Some(data) = line.strip_prefix(DATA_PREFIX) else {
            continue;
        };
        match serde_json::from_str::<StreamFrame>(data) {
            Ok(frame) => frames.push(frame),
            Err(e) => {
                let err = LabError::StreamRecordParse(e.to_string());
                tracing::warn!(error = %err, record = data, "skipping stream record");
            }
        }
    }
}

/// Reads `body` to its end, dispatching each frame to `handler`.
///
/// Stops after a `done` or `error` frame, or on the first transport error,
/// which is reported through [`StreamHandler::on_error`].
pub async fn consume<H>(mut body: ByteStream, handler: &mut H) -> StreamOutcome
where
    H: StreamHandler + ?Sized,
{
    let mut decoder = FrameDecoder::new();
    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                let message = format!("stream interrupted: {e}");
                handler.on_error(&message);
                return StreamOutcome::Failed { message };
            }
        };
        for frame in decoder.push(&bytes) {
            match frame {
                StreamFrame::Content { chunk } => handler.on_content(&chunk),
                StreamFrame::Done { message_id } => {
                    handler.on_done(&message_id);
                    return StreamOutcome::Completed { message_id };
                }
                StreamFrame::Error { message } => {
                    handler.on_error(&message);
                    return StreamOutcome::Failed { message };
                }
                StreamFrame::UserMessage { message_id } => {
                    handler.on_user_message(message_id.as_deref());
                }
            }
        }
    }
    if !decoder.remainder().trim().is_empty() {
        tracing::debug!(
            bytes = decoder.remainder().len(),
            "discarding incomplete trailing record"
        );
    }
    StreamOutcome::Ended
}

/// Wraps a reqwest body as a [`ByteStream`].
#[must_use]
pub fn byte_stream(resp: reqwest::Response) -> ByteStream {
    Box::pin(resp.bytes_stream().map(|r| r.map_err(LabError::from)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[derive(Debug, Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl StreamHandler for Recorder {
        fn on_content(&mut self, chunk: &str) {
            self.events.push(format!("content:{chunk}"));
        }
        fn on_done(&mut self, message_id: &str) {
            self.events.push(format!("done:{message_id}"));
        }
        fn on_error(&mut self, message: &str) {
            self.events.push(format!("error:{message}"));
        }
        fn on_user_message(&mut self, message_id: Option<&str>) {
            self.events
                .push(format!("user:{}", message_id.unwrap_or_default()));
        }
    }

    fn body(chunks: Vec<&[u8]>) -> ByteStream {
        let items: Vec<labdesk_types::traits::Result<Bytes>> = chunks
            .into_iter()
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Box::pin(futures_util::stream::iter(items))
    }

    async fn run_bytes(chunks: Vec<&[u8]>) -> (Vec<String>, StreamOutcome) {
        let mut rec = Recorder::default();
        let outcome = consume(body(chunks), &mut rec).await;
        (rec.events, outcome)
    }

    async fn run(chunks: &[&str]) -> (Vec<String>, StreamOutcome) {
        run_bytes(chunks.iter().map(|c| c.as_bytes()).collect()).await
    }

    const FULL: &str = concat!(
        "data: {\"type\":\"user_message\",\"message_id\":\"u1\"}\n\n",
        "data: {\"type\":\"content\",\"chunk\":\"Grüße, \"}\n\n",
        "data: {\"type\":\"content\",\"chunk\":\"wörld ✓\"}\n\n",
        "data: {\"type\":\"done\",\"message_id\":\"m7\"}\n\n",
    );

    #[tokio::test]
    async fn test_split_content_record() {
        let (events, outcome) = run(&[
            "data: {\"type\":\"content\",\"chunk\":\"Hel",
            "lo\"}\n\n",
            "data: {\"type\":\"done\",\"message_id\":\"m1\"}\n\n",
        ])
        .await;
        assert_eq!(events, vec!["content:Hello", "done:m1"]);
        assert_eq!(
            outcome,
            StreamOutcome::Completed {
                message_id: "m1".into()
            }
        );
    }

    #[tokio::test]
    async fn test_every_split_point_gives_same_events() {
        let bytes = FULL.as_bytes();
        let (expected, _) = run_bytes(vec![bytes]).await;
        assert_eq!(
            expected,
            vec!["user:u1", "content:Grüße, ", "content:wörld ✓", "done:m7"]
        );
        for split in 1..bytes.len() {
            let (events, _) = run_bytes(vec![&bytes[..split], &bytes[split..]]).await;
            assert_eq!(events, expected, "split at byte {split}");
        }
    }

    #[tokio::test]
    async fn test_byte_by_byte_delivery() {
        let bytes = FULL.as_bytes();
        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        let (events, _) = run_bytes(chunks).await;
        assert_eq!(
            events,
            vec!["user:u1", "content:Grüße, ", "content:wörld ✓", "done:m7"]
        );
    }

    #[tokio::test]
    async fn test_malformed_record_skipped() {
        let (events, _) = run(&[
            "data: {\"type\":\"content\",\"chunk\":\"a\"}\n\n",
            "data: {not json}\n\n",
            "data: {\"type\":\"content\",\"chunk\":\"b\"}\n\n",
        ])
        .await;
        assert_eq!(events, vec!["content:a", "content:b"]);
    }

    #[tokio::test]
    async fn test_nothing_after_done() {
        let (events, _) = run(&[
            "data: {\"type\":\"done\",\"message_id\":\"m1\"}\n\ndata: {\"type\":\"content\",\"chunk\":\"late\"}\n\n",
            "data: {\"type\":\"content\",\"chunk\":\"later\"}\n\n",
        ])
        .await;
        assert_eq!(events, vec!["done:m1"]);
    }

    #[tokio::test]
    async fn test_error_frame_terminates() {
        let (events, outcome) = run(&[
            "data: {\"type\":\"content\",\"chunk\":\"x\"}\n\n",
            "data: {\"type\":\"error\",\"message\":\"model overloaded\"}\n\n",
            "data: {\"type\":\"content\",\"chunk\":\"y\"}\n\n",
        ])
        .await;
        assert_eq!(events, vec!["content:x", "error:model overloaded"]);
        assert_eq!(
            outcome,
            StreamOutcome::Failed {
                message: "model overloaded".into()
            }
        );
    }

    #[tokio::test]
    async fn test_transport_error_reported_once() {
        let items: Vec<labdesk_types::traits::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: {\"type\":\"content\",\"chunk\":\"x\"}\n\n")),
            Err(LabError::Http("connection reset".into())),
            Ok(Bytes::from_static(b"data: {\"type\":\"content\",\"chunk\":\"y\"}\n\n")),
        ];
        let mut rec = Recorder::default();
        let outcome = consume(Box::pin(futures_util::stream::iter(items)), &mut rec).await;
        assert_eq!(rec.events.len(), 2);
        assert!(rec.events[1].starts_with("error:stream interrupted"));
        assert!(matches!(outcome, StreamOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_end_without_done() {
        let (events, outcome) = run(&[
            "data: {\"type\":\"content\",\"chunk\":\"x\"}\n\n",
            "data: {\"type\":\"content\",\"chunk\":\"trunc",
        ])
        .await;
        assert_eq!(events, vec!["content:x"]);
        assert_eq!(outcome, StreamOutcome::Ended);
    }

    #[test]
    fn test_non_data_lines_ignored() {
        let mut d = FrameDecoder::new();
        let frames = d.push(b"event: message\nid: 3\ndata: {\"type\":\"content\",\"chunk\":\"z\"}\n\n");
        assert_eq!(frames, vec![StreamFrame::Content { chunk: "z".into() }]);
        assert!(d.remainder().is_empty());
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        let mut d = FrameDecoder::new();
        let mut chunk = b"data: {\"type\":\"content\",\"chunk\":\"a".to_vec();
        chunk.push(0xFF);
        chunk.extend_from_slice(b"b\"}\n\n");
        let frames = d.push(&chunk);
        assert_eq!(
            frames,
            vec![StreamFrame::Content {
                chunk: "a\u{FFFD}b".into()
            }]
        );
    }
}
