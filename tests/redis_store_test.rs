//! Runs against a live Redis: `REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`

use std::sync::Arc;

use ollama_chat::error::ChatError;
use ollama_chat::history::{ ConversationStore, RedisConversationStore };
use ollama_chat::models::chat::{ ChatMessage, Conversation };

/// A store under a fresh key prefix, or `None` when no Redis is configured.
fn redis_store() -> Option<RedisConversationStore> {
    let url = std::env::var("REDIS_URL").ok()?;
    let prefix = format!("test:{}:", uuid::Uuid::new_v4());
    Some(RedisConversationStore::new(&url, &prefix, 50).unwrap())
}

async fn created(store: &RedisConversationStore, title: &str) -> Conversation {
    let conversation = Conversation::new(Some(title), "llama3.2");
    store.create(&conversation).await.unwrap();
    conversation
}

#[tokio::test]
#[ignore]
async fn append_keeps_order_and_list_sees_the_conversation() {
    let Some(store) = redis_store() else {
        return;
    };
    let conversation = created(&store, "Ordered").await;

    store.append_message(&conversation.id, &ChatMessage::user("first")).await.unwrap();
    store.append_message(&conversation.id, &ChatMessage::assistant("second")).await.unwrap();

    let stored = store.get(&conversation.id).await.unwrap().unwrap();
    let contents: Vec<&str> = stored.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["first", "second"]);
    assert_eq!(stored.title, "Ordered");
    assert!(stored.updated_at >= conversation.updated_at);

    let summaries = store.list().await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].id, conversation.id);

    store.delete(&conversation.id).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn delete_removes_conversation_and_later_appends_are_not_found() {
    let Some(store) = redis_store() else {
        return;
    };
    let conversation = created(&store, "Doomed").await;
    store.append_message(&conversation.id, &ChatMessage::user("hi")).await.unwrap();

    assert!(store.delete(&conversation.id).await.unwrap());
    assert!(!store.delete(&conversation.id).await.unwrap());
    assert!(store.get(&conversation.id).await.unwrap().is_none());

    let late = store.append_message(&conversation.id, &ChatMessage::assistant("too late")).await;
    assert!(matches!(late, Err(ChatError::NotFound(_))));
    assert!(store.get(&conversation.id).await.unwrap().is_none());
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn message_list_key_is_not_addressable_as_a_conversation() {
    let Some(store) = redis_store() else {
        return;
    };
    let conversation = created(&store, "Kept").await;
    store.append_message(&conversation.id, &ChatMessage::user("keep me")).await.unwrap();
    let crafted = format!("{}:messages", conversation.id);

    assert!(store.get(&crafted).await.unwrap().is_none());
    assert!(!store.delete(&crafted).await.unwrap());

    let stored = store.get(&conversation.id).await.unwrap().unwrap();
    assert_eq!(stored.messages.len(), 1);

    store.delete(&conversation.id).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn renames_survive_concurrent_appends() {
    let Some(store) = redis_store() else {
        return;
    };
    let store = Arc::new(store);
    let conversation = created(&store, "Old").await;

    let mut tasks = Vec::new();
    for i in 0..20 {
        let store = store.clone();
        let id = conversation.id.clone();
        tasks.push(
            tokio::spawn(async move {
                store.append_message(&id, &ChatMessage::user(format!("m{}", i))).await.unwrap();
            })
        );
    }
    let renamed = store.update_title(&conversation.id, "New").await.unwrap().unwrap();
    assert_eq!(renamed.title, "New");
    for task in tasks {
        task.await.unwrap();
    }

    let stored = store.get(&conversation.id).await.unwrap().unwrap();
    assert_eq!(stored.title, "New");
    assert_eq!(stored.messages.len(), 20);

    store.delete(&conversation.id).await.unwrap();
}
