use crate::error::ChatError;
use crate::history::ConversationStore;
use crate::llm::chat::{ ChatClient, ChatEvent, ChatTurn, HealthReport, ModelDescriptor };
use crate::models::chat::{ ChatMessage, Conversation, ConversationSummary };
use crate::models::stream::StreamEvent;

use futures::StreamExt;
use log::{ info, warn, error };
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const EVENT_CHANNEL_CAPACITY: usize = 32;
const FAILED_MESSAGE: &str = "Failed to process message";

/// Conversation lifecycle plus the send-message exchange: persist the user
/// turn, stream the model reply to the caller, persist the assistant turn.
#[derive(Clone)]
pub struct ChatAgent {
    chat_client: Arc<dyn ChatClient>,
    store: Arc<dyn ConversationStore>,
    default_model: String,
}

impl ChatAgent {
    pub fn new(chat_client: Arc<dyn ChatClient>, store: Arc<dyn ConversationStore>) -> Self {
        let default_model = chat_client.get_model();
        Self { chat_client, store, default_model }
    }

    pub async fn create_conversation(&self, title: Option<&str>) -> Result<Conversation, ChatError> {
        let conversation = Conversation::new(title, &self.default_model);
        self.store.create(&conversation).await?;
        info!("Created conversation {} ({})", conversation.id, conversation.title);
        Ok(conversation)
    }

    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ChatError> {
        self.store.list().await
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, ChatError> {
        self.store
            .get(conversation_id).await?
            .ok_or_else(|| ChatError::NotFound(conversation_id.to_string()))
    }

    pub async fn rename_conversation(
        &self,
        conversation_id: &str,
        title: Option<&str>
    ) -> Result<Conversation, ChatError> {
        let title = title
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ChatError::Validation("Title is required".to_string()))?;
        self.store
            .update_title(conversation_id, title).await?
            .ok_or_else(|| ChatError::NotFound(conversation_id.to_string()))
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<(), ChatError> {
        if self.store.delete(conversation_id).await? {
            info!("Deleted conversation {}", conversation_id);
            Ok(())
        } else {
            Err(ChatError::NotFound(conversation_id.to_string()))
        }
    }

    pub async fn list_models(&self) -> Vec<ModelDescriptor> {
        self.chat_client.list_models().await
    }

    pub async fn health_check(&self) -> HealthReport {
        self.chat_client.health_check().await
    }

    /// Validates the input and persists the user turn, then hands the rest of
    /// the exchange to a background task and returns its event stream.
    ///
    /// Errors returned here happen before anything is streamed. Failures
    /// after that point arrive as the stream's terminal [`StreamEvent::Error`].
    pub async fn send_message(
        &self,
        conversation_id: &str,
        user_text: &str
    ) -> Result<ReceiverStream<StreamEvent>, ChatError> {
        if user_text.trim().is_empty() {
            return Err(ChatError::Validation("Message is required".to_string()));
        }
        let mut conversation = self.get_conversation(conversation_id).await?;

        let user_message = ChatMessage::user(user_text);
        self.store.append_message(&conversation.id, &user_message).await?;
        conversation.push_message(user_message);

        let turns: Vec<ChatTurn> = conversation.messages.iter().map(ChatTurn::from).collect();
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let agent = self.clone();
        // Detached so that a client hanging up does not cut the exchange short.
        tokio::spawn(async move {
            agent.relay_exchange(conversation.id, turns, tx).await;
        });

        Ok(ReceiverStream::new(rx))
    }

    async fn relay_exchange(
        &self,
        conversation_id: String,
        turns: Vec<ChatTurn>,
        tx: mpsc::Sender<StreamEvent>
    ) {
        let terminal = match self.exchange(&conversation_id, turns, &tx).await {
            Ok(()) => StreamEvent::done(conversation_id.as_str()),
            Err(e) => {
                error!("Error sending message to conversation {}: {}", conversation_id, e);
                StreamEvent::error(FAILED_MESSAGE)
            }
        };
        if tx.send(terminal).await.is_err() {
            warn!("Client left conversation {} before the exchange finished", conversation_id);
        }
    }

    async fn exchange(
        &self,
        conversation_id: &str,
        turns: Vec<ChatTurn>,
        tx: &mpsc::Sender<StreamEvent>
    ) -> Result<(), ChatError> {
        let mut events = self.chat_client.chat(turns).await?;
        let mut client_connected = true;

        let response = loop {
            match events.next().await {
                Some(Ok(ChatEvent::Fragment(text))) => {
                    if client_connected && tx.send(StreamEvent::chunk(text)).await.is_err() {
                        client_connected = false;
                    }
                }
                Some(Ok(ChatEvent::Completed(text))) => {
                    break text;
                }
                Some(Err(e)) => {
                    return Err(e);
                }
                None => {
                    return Err(ChatError::Gateway("stream closed before completion".to_string()));
                }
            }
        };

        self.store.append_message(conversation_id, &ChatMessage::assistant(response)).await?;
        Ok(())
    }
}
