use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use super::types::{StreamChunk, StreamEvent};

const DONE_SENTINEL: &str = "[DONE]";

enum LineOutcome {
    Continue,
    Finished,
    ReceiverGone,
}

/// Incrementally parse a streamed completion body into [`StreamEvent`]s.
///
/// Bytes are decoded as UTF-8 without assuming chunk boundaries align with
/// character boundaries, and lines are buffered across chunks, so the
/// resulting token sequence is identical for every chunking of the same
/// body. Only `data:` lines matter; everything else is dropped silently.
pub async fn parse_sse_stream<S, E>(mut stream: S, tx: mpsc::Sender<StreamEvent>)
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut byte_buf: Vec<u8> = Vec::new();
    let mut buffer = String::new();

    while let Some(chunk_result) = stream.next().await {
        let bytes = match chunk_result {
            Ok(b) => b,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error(format!("stream error: {}", e)))
                    .await;
                return;
            }
        };

        byte_buf.extend_from_slice(&bytes);

        // Decode as much valid UTF-8 as possible, keeping any trailing
        // partial multi-byte sequence for the next read.
        let decoded = match std::str::from_utf8(&byte_buf) {
            Ok(s) => {
                let decoded = s.to_string();
                byte_buf.clear();
                decoded
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                if valid_up_to == 0 {
                    continue;
                }
                let decoded = std::str::from_utf8(&byte_buf[..valid_up_to])
                    .unwrap()
                    .to_string();
                byte_buf.drain(..valid_up_to);
                decoded
            }
        };

        buffer.push_str(&decoded);

        while let Some(newline) = buffer.find('\n') {
            let line = buffer[..newline].trim_end_matches('\r').to_string();
            buffer.drain(..=newline);

            match process_line(&line, &tx).await {
                LineOutcome::Continue => {}
                LineOutcome::Finished => {
                    let _ = tx.send(StreamEvent::Done).await;
                    return;
                }
                LineOutcome::ReceiverGone => return,
            }
        }
    }

    // The body ended without a trailing newline or [DONE]; flush whatever
    // is left and treat end-of-data as a normal finish.
    if !buffer.is_empty() {
        if let LineOutcome::ReceiverGone = process_line(buffer.trim_end_matches('\r'), &tx).await {
            return;
        }
    }
    let _ = tx.send(StreamEvent::Done).await;
}

async fn process_line(line: &str, tx: &mpsc::Sender<StreamEvent>) -> LineOutcome {
    let payload = if let Some(p) = line.strip_prefix("data: ") {
        p
    } else if let Some(p) = line.strip_prefix("data:") {
        p
    } else {
        return LineOutcome::Continue;
    };

    if payload.trim() == DONE_SENTINEL {
        return LineOutcome::Finished;
    }

    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => {
            if let Some(token) = chunk
                .choices
                .first()
                .and_then(|c| c.delta.content.as_deref())
            {
                // An absent or empty delta has no side effect.
                if !token.is_empty()
                    && tx
                        .send(StreamEvent::Token(token.to_string()))
                        .await
                        .is_err()
                {
                    return LineOutcome::ReceiverGone;
                }
            }
            LineOutcome::Continue
        }
        Err(e) => {
            // A payload that does not even look like a JSON object means
            // the server is done talking; a malformed frame that does is
            // skipped and parsing continues.
            if payload.trim_start().starts_with('{') {
                tracing::warn!("skipping malformed stream frame: {}", e);
                LineOutcome::Continue
            } else {
                tracing::debug!("non-JSON payload, treating stream as ended: {:?}", payload);
                LineOutcome::Finished
            }
        }
    }
}
