use crate::error::ChatError;
use crate::events::{Exchange, StreamEvent, StreamToken, TaggedEvent};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Duration;

/// Payload that marks the end of a reply stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// Incremental decoder for `text/event-stream` bodies.
///
/// Feed raw network chunks with [`SseDecoder::push`]; it returns the `data` of
/// every event completed by that chunk, in order. Chunks may split lines, and
/// lines may end in LF, CRLF or CR.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    data: Option<String>,
    pending_cr: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        let mut events = Vec::new();
        for ch in chunk.chars() {
            if self.pending_cr {
                self.pending_cr = false;
                if ch == '\n' {
                    continue;
                }
            }
            match ch {
                '\r' => {
                    self.pending_cr = true;
                    self.end_line(&mut events);
                }
                '\n' => self.end_line(&mut events),
                _ => self.buffer.push(ch),
            }
        }
        events
    }

    /// Flush a trailing event that was never terminated by a blank line
    pub fn finish(&mut self) -> Option<String> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            self.end_line(&mut events);
        }
        self.end_line(&mut events);
        events.pop()
    }

    fn end_line(&mut self, events: &mut Vec<String>) {
        let line = std::mem::take(&mut self.buffer);
        if line.is_empty() {
            if let Some(data) = self.data.take() {
                events.push(data);
            }
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_str(), ""),
        };

        if field == "data" {
            match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            }
        }
    }
}

/// Owns one open reply stream. Closing or dropping the handle aborts the
/// connection task, so no further events are produced for its token.
#[derive(Debug)]
pub struct StreamHandle {
    token: StreamToken,
    abort: AbortHandle,
}

impl StreamHandle {
    pub fn new(token: StreamToken, abort: AbortHandle) -> Self {
        Self { token, abort }
    }

    pub fn token(&self) -> StreamToken {
        self.token
    }

    pub fn close(&self) {
        self.abort.abort();
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

/// Client for the backend `/chat` SSE endpoint
#[derive(Clone)]
pub struct StreamClient {
    backend_url: String,
    client: reqwest::Client,
}

impl StreamClient {
    pub fn new(backend_url: impl Into<String>) -> crate::error::Result<Self> {
        // no total timeout: a reply may stream for as long as the model talks
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            backend_url: backend_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn backend_url(&self) -> &str {
        &self.backend_url
    }

    /// Open a stream for `exchange`. Events are tagged with the exchange token
    /// and sent to `sink` in arrival order. Must be called inside a tokio runtime.
    pub fn open(&self, exchange: &Exchange, sink: mpsc::UnboundedSender<TaggedEvent>) -> StreamHandle {
        let client = self.client.clone();
        let url = format!("{}/chat", self.backend_url);
        let token = exchange.token;
        let conversation_id = exchange.conversation_id.clone();
        let message = exchange.text.clone();

        tracing::debug!(%token, conversation_id = %conversation_id, "opening reply stream");

        let task = tokio::spawn(async move {
            let outcome = Self::stream_reply(client, url, &conversation_id, &message, token, &sink).await;
            let closing = match outcome {
                Ok(()) => StreamEvent::Done,
                Err(e) => {
                    tracing::warn!(%token, error = %e, "reply stream failed");
                    StreamEvent::Failed(e.to_string())
                }
            };
            let _ = sink.send(TaggedEvent::new(token, closing));
        });

        StreamHandle::new(token, task.abort_handle())
    }

    /// Forward fragments until `[DONE]`. Ending without the sentinel is an error.
    async fn stream_reply(
        client: reqwest::Client,
        url: String,
        conversation_id: &str,
        message: &str,
        token: StreamToken,
        sink: &mpsc::UnboundedSender<TaggedEvent>,
    ) -> Result<(), ChatError> {
        let response = client
            .get(&url)
            .query(&[("conversation_id", conversation_id), ("message", message)])
            .header("Accept", "text/event-stream")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Transport(format!("backend returned {}: {}", status, body)));
        }

        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();
        let mut pending = Vec::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            pending.extend_from_slice(&chunk);
            let text = take_utf8_prefix(&mut pending);

            for data in decoder.push(&text) {
                if data == DONE_SENTINEL {
                    return Ok(());
                }
                if sink.send(TaggedEvent::new(token, StreamEvent::Fragment(data))).is_err() {
                    // nobody is listening anymore
                    return Ok(());
                }
            }
        }

        if decoder.finish().as_deref() == Some(DONE_SENTINEL) {
            return Ok(());
        }

        Err(ChatError::Transport("stream ended before [DONE]".to_string()))
    }
}

/// Split off the longest valid UTF-8 prefix of `bytes`, leaving an incomplete
/// trailing sequence in place for the next chunk.
pub(crate) fn take_utf8_prefix(bytes: &mut Vec<u8>) -> String {
    let valid = match std::str::from_utf8(bytes) {
        Ok(_) => bytes.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            bytes.clear();
            return text;
        }
    };
    let rest = bytes.split_off(valid);
    let text = String::from_utf8_lossy(bytes).into_owned();
    *bytes = rest;
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_events_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push("data: Hel").is_empty());
        assert_eq!(decoder.push("\n\ndata: lo\n"), vec!["Hel"]);
        assert_eq!(decoder.push("\ndata: [DONE]\n\n"), vec!["lo", "[DONE]"]);
    }

    #[test]
    fn keeps_token_whitespace_after_the_single_separator_space() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push("data:  world\n\ndata:no-space\n\n");
        assert_eq!(events, vec![" world", "no-space"]);
    }

    #[test]
    fn joins_multiple_data_lines_with_newline() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push("data: first\ndata: second\n\n");
        assert_eq!(events, vec!["first\nsecond"]);
    }

    #[test]
    fn accepts_crlf_and_ignores_comments_and_other_fields() {
        let mut decoder = SseDecoder::new();
        let mut events = decoder.push(": keep-alive\r\n\r\nevent: token\r");
        events.extend(decoder.push("\ndata: hi\r\n\r\n"));
        assert_eq!(events, vec!["hi"]);
    }

    #[test]
    fn empty_data_is_still_an_event() {
        let mut decoder = SseDecoder::new();
        assert_eq!(decoder.push("data: \n\n"), vec![""]);
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push("data: [DONE]").is_empty());
        assert_eq!(decoder.finish().as_deref(), Some("[DONE]"));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn utf8_prefix_waits_for_split_code_points() {
        let mut bytes = "hé".as_bytes().to_vec();
        let tail = bytes.pop().unwrap();
        assert_eq!(take_utf8_prefix(&mut bytes), "h");
        bytes.push(tail);
        assert_eq!(take_utf8_prefix(&mut bytes), "é");
        assert!(bytes.is_empty());
    }
}
