use async_trait::async_trait;
use futures::stream;
use std::sync::Mutex;

use super::ndjson::relay_chat_stream;
use super::{ create_streaming_response, ChatClient, ChatEventStream, ChatTurn, HealthReport, ModelDescriptor };
use crate::error::ChatError;

/// A [`ChatClient`] that replays canned network reads through the real
/// stream decoder. Every call to `chat` records the history it was given.
pub struct ScriptedChatClient {
    reads: Vec<Result<String, String>>,
    unreachable: bool,
    models: Vec<ModelDescriptor>,
    model: String,
    received: Mutex<Vec<Vec<ChatTurn>>>,
}

impl ScriptedChatClient {
    /// Replays `reads` as raw body chunks.
    pub fn with_reads(reads: Vec<&str>) -> Self {
        Self::scripted(reads.into_iter().map(|r| Ok(r.to_string())).collect())
    }

    /// Streams one NDJSON line per fragment, then a `done` line.
    pub fn with_fragments(fragments: &[&str]) -> Self {
        let mut reads: Vec<String> = fragments.iter().map(|f| fragment_line(f, false)).collect();
        reads.push(fragment_line("", true));
        Self::scripted(reads.into_iter().map(Ok).collect())
    }

    /// Streams `fragments`, then fails the transport.
    pub fn failing_after(fragments: &[&str]) -> Self {
        let mut reads: Vec<Result<String, String>> = fragments
            .iter()
            .map(|f| Ok(fragment_line(f, false)))
            .collect();
        reads.push(Err("connection reset by peer".to_string()));
        Self::scripted(reads)
    }

    /// Fails every call before any output, like a service that is down.
    pub fn unreachable() -> Self {
        let mut client = Self::scripted(Vec::new());
        client.unreachable = true;
        client
    }

    pub fn with_models(mut self, models: Vec<ModelDescriptor>) -> Self {
        self.models = models;
        self
    }

    /// Histories passed to `chat`, one entry per call.
    pub fn received(&self) -> Vec<Vec<ChatTurn>> {
        self.received.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn scripted(reads: Vec<Result<String, String>>) -> Self {
        Self {
            reads,
            unreachable: false,
            models: Vec::new(),
            model: "scripted".to_string(),
            received: Mutex::new(Vec::new()),
        }
    }
}

fn fragment_line(content: &str, done: bool) -> String {
    let line = serde_json::json!({
        "model": "scripted",
        "message": { "role": "assistant", "content": content },
        "done": done,
    });
    format!("{}\n", line)
}

#[async_trait]
impl ChatClient for ScriptedChatClient {
    async fn chat(&self, messages: Vec<ChatTurn>) -> Result<ChatEventStream, ChatError> {
        if let Ok(mut received) = self.received.lock() {
            received.push(messages);
        }
        if self.unreachable {
            return Err(ChatError::Gateway("connection refused".to_string()));
        }
        let reads = stream::iter(self.reads.clone());
        Ok(create_streaming_response(move |tx| relay_chat_stream(reads, tx)))
    }

    async fn list_models(&self) -> Vec<ModelDescriptor> {
        if self.unreachable { Vec::new() } else { self.models.clone() }
    }

    async fn health_check(&self) -> HealthReport {
        if self.unreachable {
            HealthReport::Unhealthy { error: "connection refused".to_string() }
        } else {
            HealthReport::Healthy { models: self.models.clone() }
        }
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }

    fn get_base_url(&self) -> Option<String> {
        None
    }
}
