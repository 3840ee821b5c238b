use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{ sort_newest_first, ConversationStore };
use crate::error::ChatError;
use crate::models::chat::{ ChatMessage, Conversation, ConversationSummary };

/// In-process store. Contents are lost when the process exits.
#[derive(Default)]
pub struct MemoryConversationStore {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn create(&self, conversation: &Conversation) -> Result<(), ChatError> {
        self.conversations.write().await.insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>, ChatError> {
        let mut summaries: Vec<ConversationSummary> = self.conversations
            .read().await
            .values()
            .map(Conversation::summary)
            .collect();
        sort_newest_first(&mut summaries);
        Ok(summaries)
    }

    async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>, ChatError> {
        Ok(self.conversations.read().await.get(conversation_id).cloned())
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        message: &ChatMessage
    ) -> Result<(), ChatError> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .get_mut(conversation_id)
            .ok_or_else(|| ChatError::NotFound(conversation_id.to_string()))?;
        conversation.push_message(message.clone());
        Ok(())
    }

    async fn update_title(
        &self,
        conversation_id: &str,
        title: &str
    ) -> Result<Option<Conversation>, ChatError> {
        let mut conversations = self.conversations.write().await;
        Ok(
            conversations.get_mut(conversation_id).map(|conversation| {
                conversation.rename(title);
                conversation.clone()
            })
        )
    }

    async fn delete(&self, conversation_id: &str) -> Result<bool, ChatError> {
        Ok(self.conversations.write().await.remove(conversation_id).is_some())
    }
}
