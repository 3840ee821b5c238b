pub mod mock;
pub mod ndjson;
pub mod ollama;

use async_trait::async_trait;
use futures::{ Future, Stream };
use serde::{ Deserialize, Serialize };
use serde_json::Value as JsonValue;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use self::ollama::OllamaClient;
use super::LlmConfig;
use crate::error::ChatError;
use crate::models::chat::{ ChatMessage, Role };

pub const STREAM_CHANNEL_CAPACITY: usize = 32;

/// A message as sent to the inference service: role and content only.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl From<&ChatMessage> for ChatTurn {
    fn from(message: &ChatMessage) -> Self {
        Self { role: message.role, content: message.content.clone() }
    }
}

/// Output of one chat call. Zero or more `Fragment`s are followed by exactly
/// one `Completed` carrying their concatenation, unless the stream fails.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Fragment(String),
    Completed(String),
}

pub type ChatEventStream = Pin<Box<dyn Stream<Item = Result<ChatEvent, ChatError>> + Send>>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum HealthReport {
    Healthy {
        models: Vec<ModelDescriptor>,
    },
    Unhealthy {
        error: String,
    },
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthReport::Healthy { .. })
    }
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Streams the assistant reply to `messages`, the full history in order.
    async fn chat(&self, messages: Vec<ChatTurn>) -> Result<ChatEventStream, ChatError>;

    /// Best effort: failures yield an empty list.
    async fn list_models(&self) -> Vec<ModelDescriptor>;

    /// Never fails; errors are captured in [`HealthReport::Unhealthy`].
    async fn health_check(&self) -> HealthReport;

    fn get_model(&self) -> String;
    fn get_base_url(&self) -> Option<String>;
}

pub fn create_streaming_response<F, Fut>(response_fn: F) -> ChatEventStream
where
    F: FnOnce(mpsc::Sender<Result<ChatEvent, ChatError>>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        response_fn(tx).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

pub fn new_client(config: &LlmConfig) -> Arc<dyn ChatClient> {
    Arc::new(OllamaClient::from_config(config))
}
