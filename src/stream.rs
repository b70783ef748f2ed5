//! Server-sent event reader for streamed chat completions.
//!
//! The body is consumed one newline-terminated line at a time. Lines that do
//! not start with `data: ` are keep-alives or comments and are skipped, up to
//! a configured number per read. `data: [DONE]` ends the stream; any other
//! data line is decoded as a [`ChatCompletionStreamResponse`].
//!
//! Reads are driven entirely by the caller. Nothing reads ahead in the
//! background, and no cancellation check happens between lines: dropping a
//! pending [`ChatCompletionStream::recv`] future, or the stream itself, is
//! the only way to abandon a read.

use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, Fuse, Stream, StreamExt};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use tracing::{debug, trace};

use crate::error::{ChatError, Result};
use crate::models::ChatCompletionStreamResponse;

const DATA_PREFIX: &[u8] = b"data: ";
const DONE_MARKER: &[u8] = b"[DONE]";

pub(crate) type ByteStream =
    Pin<Box<dyn Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send>>;

/// Buffers body chunks and hands them out one line at a time.
pub(crate) struct LineReader {
    body: Fuse<ByteStream>,
    pending: BytesMut,
}

impl LineReader {
    pub(crate) fn new(body: ByteStream) -> Self {
        Self {
            body: body.fuse(),
            pending: BytesMut::new(),
        }
    }

    /// Next line including its trailing `\n`.
    ///
    /// A body that ends before the next newline yields
    /// [`ChatError::UnexpectedEof`] and the partial line is dropped.
    pub(crate) async fn read_line(&mut self) -> Result<Bytes> {
        loop {
            if let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
                return Ok(self.pending.split_to(pos + 1).freeze());
            }

            match self.body.next().await {
                Some(Ok(chunk)) => self.pending.extend_from_slice(&chunk),
                Some(Err(err)) => return Err(ChatError::Transport(err)),
                None => return Err(ChatError::UnexpectedEof),
            }
        }
    }
}

enum StreamState {
    Open(LineReader),
    Finished,
    Closed,
}

/// Pull-based reader over one streamed chat completion.
///
/// Owns the response body exclusively. The body is released as soon as the
/// `[DONE]` marker is seen, on [`close`](Self::close), or on drop.
pub struct ChatCompletionStream {
    state: StreamState,
    empty_messages_limit: usize,
    status: StatusCode,
    headers: HeaderMap,
}

impl ChatCompletionStream {
    pub(crate) fn new(
        body: ByteStream,
        empty_messages_limit: usize,
        status: StatusCode,
        headers: HeaderMap,
    ) -> Self {
        Self {
            state: StreamState::Open(LineReader::new(body)),
            empty_messages_limit,
            status,
            headers,
        }
    }

    /// Receive the next event.
    ///
    /// Returns `Ok(None)` once `data: [DONE]` has been read, and on every
    /// call after that. Errors leave the stream open, but a decode error or
    /// [`ChatError::TooManyEmptyStreamMessages`] means the session is no
    /// longer usable and a new stream should be started.
    pub async fn recv(&mut self) -> Result<Option<ChatCompletionStreamResponse>> {
        let limit = self.empty_messages_limit;
        let reader = match &mut self.state {
            StreamState::Open(reader) => reader,
            StreamState::Finished => return Ok(None),
            StreamState::Closed => return Err(ChatError::StreamClosed),
        };

        let mut empty_messages = 0usize;
        let payload = loop {
            let line = reader.read_line().await?;
            let trimmed = line.trim_ascii();

            if let Some(payload) = trimmed.strip_prefix(DATA_PREFIX) {
                break line.slice_ref(payload);
            }

            empty_messages += 1;
            if empty_messages > limit {
                return Err(ChatError::TooManyEmptyStreamMessages);
            }
            trace!(empty_messages, "skipping non-data stream line");
        };

        if payload.as_ref() == DONE_MARKER {
            debug!("chat completion stream finished");
            // drops the reader and with it the body
            self.state = StreamState::Finished;
            return Ok(None);
        }

        serde_json::from_slice(&payload)
            .map(Some)
            .map_err(ChatError::Decode)
    }

    /// Release the response body. Safe to call more than once.
    ///
    /// A stream that already reached `[DONE]` stays finished; otherwise later
    /// [`recv`](Self::recv) calls fail with [`ChatError::StreamClosed`].
    pub fn close(&mut self) {
        if let StreamState::Open(_) = self.state {
            debug!("closing chat completion stream before [DONE]");
            self.state = StreamState::Closed;
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, StreamState::Finished)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Adapt into a [`Stream`] of events.
    ///
    /// The stream ends after `[DONE]`, and also right after yielding its
    /// first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<ChatCompletionStreamResponse>> + Send {
        stream::unfold(Some(self), |state| async move {
            let mut chat_stream = state?;
            match chat_stream.recv().await {
                Ok(Some(event)) => Some((Ok(event), Some(chat_stream))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_from(chunks: &[&str]) -> ByteStream {
        let chunks: Vec<std::result::Result<Bytes, reqwest::Error>> = chunks
            .iter()
            .map(|chunk| Ok(Bytes::from(chunk.to_string())))
            .collect();
        Box::pin(stream::iter(chunks))
    }

    fn stream_from(chunks: &[&str], limit: usize) -> ChatCompletionStream {
        ChatCompletionStream::new(body_from(chunks), limit, StatusCode::OK, HeaderMap::new())
    }

    fn event(id: &str, content: &str) -> String {
        format!(
            "data: {{\"id\":\"{id}\",\"object\":\"chat.completion.chunk\",\"created\":1,\
             \"model\":\"gpt-3.5-turbo\",\"choices\":[{{\"index\":0,\
             \"delta\":{{\"content\":\"{content}\"}},\"finish_reason\":null}}]}}\n"
        )
    }

    #[tokio::test]
    async fn line_reader_joins_split_chunks() {
        let mut reader = LineReader::new(body_from(&["da", "ta: a\nda", "ta: b\n"]));
        assert_eq!(reader.read_line().await.unwrap(), Bytes::from("data: a\n"));
        assert_eq!(reader.read_line().await.unwrap(), Bytes::from("data: b\n"));
        assert!(matches!(reader.read_line().await, Err(ChatError::UnexpectedEof)));
    }

    #[tokio::test]
    async fn line_reader_drops_unterminated_tail() {
        let mut reader = LineReader::new(body_from(&["data: a\ndata: partial"]));
        assert_eq!(reader.read_line().await.unwrap(), Bytes::from("data: a\n"));
        assert!(matches!(reader.read_line().await, Err(ChatError::UnexpectedEof)));
        // polling a drained body again is fine
        assert!(matches!(reader.read_line().await, Err(ChatError::UnexpectedEof)));
    }

    #[tokio::test]
    async fn yields_each_event_then_done() {
        let body = [event("1", "Hel"), event("2", "lo"), "data: [DONE]\n".to_string()].concat();
        let mut chat_stream = stream_from(&[body.as_str()], 10);

        let first = chat_stream.recv().await.unwrap().unwrap();
        assert_eq!(first.id, "1");
        assert_eq!(first.content(), Some("Hel"));

        let second = chat_stream.recv().await.unwrap().unwrap();
        assert_eq!(second.id, "2");
        assert_eq!(second.content(), Some("lo"));

        assert!(chat_stream.recv().await.unwrap().is_none());
        assert!(chat_stream.is_finished());

        // the marker is sticky
        assert!(chat_stream.recv().await.unwrap().is_none());
        assert!(chat_stream.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn skips_keep_alive_lines_within_limit() {
        let body = [
            ": ping\n".to_string(),
            "\n".to_string(),
            "event: message\n".to_string(),
            event("1", "hi"),
            "data: [DONE]\n".to_string(),
        ]
        .concat();
        let mut chat_stream = stream_from(&[body.as_str()], 3);

        let first = chat_stream.recv().await.unwrap().unwrap();
        assert_eq!(first.content(), Some("hi"));
        assert!(chat_stream.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fails_when_keep_alive_lines_exceed_limit() {
        let body = [": ping\n: ping\n: ping\n: ping\n".to_string(), event("1", "hi")].concat();
        let mut chat_stream = stream_from(&[body.as_str()], 3);

        assert!(matches!(
            chat_stream.recv().await,
            Err(ChatError::TooManyEmptyStreamMessages)
        ));
        assert!(!chat_stream.is_finished());
    }

    #[tokio::test]
    async fn empty_message_count_resets_per_call() {
        let body = [
            "\n\n".to_string(),
            event("1", "a"),
            "\n\n".to_string(),
            event("2", "b"),
            "data: [DONE]\n".to_string(),
        ]
        .concat();
        let mut chat_stream = stream_from(&[body.as_str()], 2);

        assert_eq!(chat_stream.recv().await.unwrap().unwrap().id, "1");
        assert_eq!(chat_stream.recv().await.unwrap().unwrap().id, "2");
        assert!(chat_stream.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn zero_limit_rejects_any_keep_alive() {
        let body = ["\n".to_string(), event("1", "a")].concat();
        let mut chat_stream = stream_from(&[body.as_str()], 0);

        assert!(matches!(
            chat_stream.recv().await,
            Err(ChatError::TooManyEmptyStreamMessages)
        ));
    }

    #[tokio::test]
    async fn surrounding_whitespace_and_crlf_are_trimmed() {
        let body = "  data: [DONE]  \r\n";
        let mut chat_stream = stream_from(&[body], 0);
        assert!(chat_stream.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_frame_is_a_decode_error() {
        let body = ["data: {not json}\n".to_string(), event("1", "a")].concat();
        let mut chat_stream = stream_from(&[body.as_str()], 0);

        assert!(matches!(chat_stream.recv().await, Err(ChatError::Decode(_))));
        assert!(!chat_stream.is_finished());
    }

    #[tokio::test]
    async fn body_ending_without_marker_is_unexpected_eof() {
        let body = event("1", "a");
        let mut chat_stream = stream_from(&[body.as_str()], 0);

        assert!(chat_stream.recv().await.unwrap().is_some());
        assert!(matches!(chat_stream.recv().await, Err(ChatError::UnexpectedEof)));
        assert!(!chat_stream.is_finished());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let body = [event("1", "a"), "data: [DONE]\n".to_string()].concat();
        let mut chat_stream = stream_from(&[body.as_str()], 0);

        chat_stream.close();
        chat_stream.close();
        assert!(matches!(chat_stream.recv().await, Err(ChatError::StreamClosed)));
    }

    #[tokio::test]
    async fn close_after_done_stays_finished() {
        let mut chat_stream = stream_from(&["data: [DONE]\n"], 0);
        assert!(chat_stream.recv().await.unwrap().is_none());

        chat_stream.close();
        assert!(chat_stream.is_finished());
        assert!(chat_stream.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn into_stream_collects_events() {
        let body = [event("1", "a"), event("2", "b"), "data: [DONE]\n".to_string()].concat();
        let events: Vec<_> = stream_from(&[body.as_str()], 0).into_stream().collect().await;

        assert_eq!(events.len(), 2);
        let text: String = events
            .iter()
            .map(|e| e.as_ref().unwrap().content().unwrap_or_default().to_string())
            .collect();
        assert_eq!(text, "ab");
    }

    #[tokio::test]
    async fn into_stream_stops_after_first_error() {
        let body = [event("1", "a"), "data: oops\n".to_string(), event("2", "b")].concat();
        let events: Vec<_> = stream_from(&[body.as_str()], 0).into_stream().collect().await;

        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(ChatError::Decode(_))));
    }
}
