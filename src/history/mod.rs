mod memory;
mod redis;

pub use memory::MemoryConversationStore;
pub use self::redis::RedisConversationStore;

use async_trait::async_trait;
use log::info;
use std::sync::Arc;
use crate::cli::Args;
use crate::error::ChatError;
use crate::models::chat::{ ChatMessage, Conversation, ConversationSummary };

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create(&self, conversation: &Conversation) -> Result<(), ChatError>;

    /// Summaries, most recently updated first.
    async fn list(&self) -> Result<Vec<ConversationSummary>, ChatError>;

    async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>, ChatError>;

    /// Appends atomically and refreshes `updated_at`. Fails with
    /// [`ChatError::NotFound`] if the conversation does not exist.
    async fn append_message(
        &self,
        conversation_id: &str,
        message: &ChatMessage
    ) -> Result<(), ChatError>;

    async fn update_title(
        &self,
        conversation_id: &str,
        title: &str
    ) -> Result<Option<Conversation>, ChatError>;

    /// Returns whether a conversation was removed.
    async fn delete(&self, conversation_id: &str) -> Result<bool, ChatError>;
}

pub fn create_conversation_store(
    args: &Args
) -> Result<Arc<dyn ConversationStore>, ChatError> {
    match args.store_type.to_lowercase().as_str() {
        "redis" => {
            let store = RedisConversationStore::new(
                &args.store_url,
                &args.store_redis_prefix,
                args.store_redis_scan_count
            )?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(MemoryConversationStore::new())),
        other =>
            Err(ChatError::Validation(format!("Unsupported conversation store type: {}", other))),
    }
}

pub fn initialize_conversation_store(
    args: &Args
) -> Result<Arc<dyn ConversationStore>, ChatError> {
    info!("Conversations will be stored in: {} at {}", args.store_type, args.store_url);
    create_conversation_store(args)
}

fn sort_newest_first(summaries: &mut [ConversationSummary]) {
    summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}
