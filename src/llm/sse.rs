//! Server-Sent Events decoding for streamed chat completions.
//!
//! Byte chunks from the HTTP body are split into lines; an empty line ends
//! an event. `data: [DONE]` terminates the completion stream.

use bytes::Bytes;
use futures_util::{future, Stream, StreamExt};
use tokio::io::{AsyncBufReadExt, Lines};
use tokio_util::io::StreamReader;

use super::ChatChunk;
use crate::error::ModelError;

/// A single SSE event parsed from the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

struct EventParser<S> {
    lines: Lines<StreamReader<S, Bytes>>,
    event: Option<String>,
    data: String,
    finished: bool,
}

impl<S> EventParser<S> {
    fn take_event(&mut self) -> SseEvent {
        SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data),
        }
    }
}

/// Parse SSE events out of a byte stream.
pub fn sse_events<S>(bytes: S) -> impl Stream<Item = Result<SseEvent, ModelError>> + Send
where
    S: Stream<Item = std::io::Result<Bytes>> + Send + Unpin + 'static,
{
    let parser = EventParser {
        lines: StreamReader::new(bytes).lines(),
        event: None,
        data: String::new(),
        finished: false,
    };

    futures_util::stream::unfold(parser, |mut parser| async move {
        if parser.finished {
            return None;
        }
        loop {
            match parser.lines.next_line().await {
                Ok(Some(line)) => {
                    if line.is_empty() {
                        if !parser.data.is_empty() {
                            let event = parser.take_event();
                            return Some((Ok(event), parser));
                        }
                        parser.event = None;
                        continue;
                    }
                    if let Some(kind) = line.strip_prefix("event:") {
                        parser.event = Some(kind.trim_start().to_string());
                    } else if let Some(data) = line.strip_prefix("data:") {
                        if !parser.data.is_empty() {
                            parser.data.push('\n');
                        }
                        parser.data.push_str(data.strip_prefix(' ').unwrap_or(data));
                    }
                    // id:, retry: and comment lines are ignored
                }
                Ok(None) => {
                    parser.finished = true;
                    if parser.data.is_empty() {
                        return None;
                    }
                    let event = parser.take_event();
                    return Some((Ok(event), parser));
                }
                Err(err) => {
                    parser.finished = true;
                    return Some((Err(ModelError::Network(err.to_string())), parser));
                }
            }
        }
    })
}

/// Decode a streamed completion body into chunks, stopping at `[DONE]`.
pub fn chat_chunks<S>(bytes: S) -> impl Stream<Item = Result<ChatChunk, ModelError>> + Send
where
    S: Stream<Item = std::io::Result<Bytes>> + Send + Unpin + 'static,
{
    sse_events(bytes)
        .take_while(|event| {
            future::ready(!matches!(event, Ok(e) if e.data.trim() == "[DONE]"))
        })
        .map(|event| {
            event.and_then(|e| {
                serde_json::from_str::<ChatChunk>(&e.data)
                    .map_err(|err| ModelError::Parse(err.to_string()))
                    .and_then(ChatChunk::into_result)
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn body(parts: &[&'static str]) -> impl Stream<Item = std::io::Result<Bytes>> + Send + Unpin {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn events_split_across_chunks() {
        let events: Vec<_> = sse_events(body(&["event: ping\nda", "ta: {\"a\":1}\n\ndata: x\n", "\n"]))
            .collect()
            .await;
        let events: Vec<SseEvent> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.as_deref(), Some("ping"));
        assert_eq!(events[0].data, "{\"a\":1}");
        assert_eq!(events[1].event, None);
        assert_eq!(events[1].data, "x");
    }

    #[tokio::test]
    async fn multi_line_data_is_joined() {
        let events: Vec<_> = sse_events(body(&["data: one\r\ndata: two\r\n\r\n"])).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().data, "one\ntwo");
    }

    #[tokio::test]
    async fn trailing_event_without_blank_line_is_flushed() {
        let events: Vec<_> = sse_events(body(&[": keep-alive\n\ndata: tail"])).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().data, "tail");
    }

    #[tokio::test]
    async fn chunks_stop_at_done() {
        let chunks: Vec<_> = chat_chunks(body(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Xin \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"chào\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        ]))
        .collect()
        .await;
        let text: String = chunks
            .into_iter()
            .map(|c| c.unwrap().delta().and_then(|d| d.content.clone()).unwrap_or_default())
            .collect();
        assert_eq!(text, "Xin chào");
    }

    #[tokio::test]
    async fn error_event_mid_stream_is_surfaced() {
        let chunks: Vec<_> = chat_chunks(body(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Partial \"}}]}\n\n",
            "data: {\"error\":{\"message\":\"upstream overloaded\",\"code\":529}}\n\n",
        ]))
        .collect()
        .await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].is_ok());
        assert!(matches!(chunks[1], Err(ModelError::Api { status: 529, .. })));
    }

    #[tokio::test]
    async fn malformed_chunk_is_a_parse_error() {
        let chunks: Vec<_> = chat_chunks(body(&["data: {not json}\n\n"])).collect().await;
        assert!(matches!(chunks[0], Err(ModelError::Parse(_))));
    }
}
