//! Minimal server-sent-events framing over a byte stream.

use crate::error::{LlmError, Result};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    /// `event:` field; `"message"` when absent.
    pub event: String,
    pub data: String,
}

pub(crate) fn decode_sse<S>(provider: &'static str, bytes_stream: S) -> impl Stream<Item = Result<SseEvent>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + 'static,
{
    futures_util::stream::unfold(
        (Box::pin(bytes_stream), String::new(), false),
        move |(mut stream, mut buffer, done)| async move {
            loop {
                if let Some((raw, rest)) = split_frame(&buffer) {
                    buffer = rest;
                    match parse_frame(&raw) {
                        Some(event) => return Some((Ok(event), (stream, buffer, done))),
                        None => continue,
                    }
                }
                if done {
                    return None;
                }

                match stream.next().await {
                    Some(Ok(chunk)) => buffer.push_str(&String::from_utf8_lossy(&chunk)),
                    Some(Err(e)) => {
                        return Some((Err(LlmError::http(provider, e)), (stream, buffer, true)));
                    }
                    None => {
                        // Flush a trailing frame that lacks the blank-line terminator.
                        let raw = std::mem::take(&mut buffer);
                        return parse_frame(&raw).map(|event| (Ok(event), (stream, buffer, true)));
                    }
                }
            }
        },
    )
}

fn split_frame(buffer: &str) -> Option<(String, String)> {
    let (idx, sep) = [
        buffer.find("\n\n").map(|i| (i, 2)),
        buffer.find("\r\n\r\n").map(|i| (i, 4)),
    ]
    .into_iter()
    .flatten()
    .min_by_key(|(i, _)| *i)?;
    Some((buffer[..idx].to_string(), buffer[idx + sep..].to_string()))
}

fn parse_frame(raw: &str) -> Option<SseEvent> {
    let mut event = String::new();
    let mut data_lines = Vec::new();
    for line in raw.lines() {
        let line = line.trim_end();
        if let Some(rest) = line.strip_prefix("event:") {
            event = rest.trim_start().to_string();
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start().to_string());
        }
    }
    if event.is_empty() && data_lines.is_empty() {
        return None;
    }
    if event.is_empty() {
        event = "message".to_string();
    }
    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
    })
}
