//! Decoding of the inference service's newline-delimited JSON chat stream.
//!
//! Network reads do not line up with JSON objects: one read may carry several
//! lines, and a line (or a multi-byte character) may be split across reads.
//! [`LineBuffer`] owns the raw bytes and only hands out complete lines;
//! [`ChatStreamDecoder`] turns those lines into content fragments.

use futures::{ pin_mut, Stream, StreamExt };
use log::{ debug, warn };
use serde::Deserialize;
use std::fmt::Display;
use tokio::sync::mpsc;

use super::ChatEvent;
use crate::error::ChatError;

#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    // bytes already known to hold no newline
    scanned: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pops the next complete line, without its terminator.
    pub fn next_line(&mut self) -> Option<String> {
        let Some(offset) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') else {
            self.scanned = self.buf.len();
            return None;
        };
        let pos = self.scanned + offset;
        self.scanned = 0;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Drains whatever is left once the input has ended.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        self.scanned = 0;
        Some(String::from_utf8_lossy(&rest).into_owned())
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[derive(Deserialize)]
struct StreamLine {
    #[serde(default)]
    message: Option<StreamLineMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct StreamLineMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default)]
pub struct ChatStreamDecoder {
    lines: LineBuffer,
    accumulated: String,
    done: bool,
}

impl ChatStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one network read and returns the fragments it completed.
    /// Input arriving after the `done` object is ignored.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<String>, ChatError> {
        if self.done {
            return Ok(Vec::new());
        }
        self.lines.push(bytes);

        let mut fragments = Vec::new();
        while let Some(line) = self.lines.next_line() {
            if let Some(fragment) = self.decode_line(&line)? {
                fragments.push(fragment);
            }
            if self.done {
                break;
            }
        }
        Ok(fragments)
    }

    /// Signals end of input: a trailing unterminated line is decoded as the
    /// final line.
    pub fn flush(&mut self) -> Result<Vec<String>, ChatError> {
        if self.done {
            return Ok(Vec::new());
        }
        match self.lines.take_remainder() {
            Some(line) => Ok(self.decode_line(&line)?.into_iter().collect()),
            None => Ok(Vec::new()),
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// The full response. Without a `done` object the accumulated text still
    /// counts as a response, as long as there is some.
    pub fn into_response(self) -> Result<String, ChatError> {
        if self.done || !self.accumulated.is_empty() {
            Ok(self.accumulated)
        } else {
            Err(ChatError::Gateway("stream ended without a response".to_string()))
        }
    }

    fn decode_line(&mut self, line: &str) -> Result<Option<String>, ChatError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let parsed = match serde_json::from_str::<StreamLine>(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Skipping malformed stream line: {} ({})", line, e);
                return Ok(None);
            }
        };

        if let Some(error) = parsed.error {
            return Err(ChatError::Gateway(error));
        }

        let fragment = parsed.message
            .and_then(|m| m.content)
            .filter(|content| !content.is_empty());
        if let Some(ref content) = fragment {
            self.accumulated.push_str(content);
        }
        if parsed.done {
            debug!("Stream reported done after {} bytes", self.accumulated.len());
            self.done = true;
        }
        Ok(fragment)
    }
}

/// Drives `bytes` through a [`ChatStreamDecoder`], sending each fragment and
/// then the completed response (or the first error) to `tx`.
pub async fn relay_chat_stream<S, B, E>(
    bytes: S,
    tx: mpsc::Sender<Result<ChatEvent, ChatError>>
)
    where S: Stream<Item = Result<B, E>>, B: AsRef<[u8]>, E: Display
{
    pin_mut!(bytes);
    let mut decoder = ChatStreamDecoder::new();

    while let Some(chunk) = bytes.next().await {
        let fragments = match chunk {
            Ok(buf) => decoder.feed(buf.as_ref()),
            Err(e) => Err(ChatError::Gateway(format!("transport error: {}", e))),
        };
        match fragments {
            Ok(fragments) => {
                for fragment in fragments {
                    if tx.send(Ok(ChatEvent::Fragment(fragment))).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
        if decoder.is_done() {
            break;
        }
    }

    match decoder.flush() {
        Ok(fragments) => {
            for fragment in fragments {
                if tx.send(Ok(ChatEvent::Fragment(fragment))).await.is_err() {
                    return;
                }
            }
        }
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            return;
        }
    }

    let _ = tx.send(decoder.into_response().map(ChatEvent::Completed)).await;
}
