use async_trait::async_trait;
use chrono::{ DateTime, Utc };
use log::error;
use redis::{ AsyncCommands, Client, Script };
use std::collections::HashMap;

use super::{ sort_newest_first, ConversationStore };
use crate::error::ChatError;
use crate::models::chat::{ ChatMessage, Conversation, ConversationSummary };

const DOCUMENT_NAMESPACE: &str = "doc:";
const MESSAGES_NAMESPACE: &str = "msgs:";

// KEYS: document, messages. ARGV: message json, updated_at.
const APPEND_SCRIPT: &str =
    r"
if redis.call('EXISTS', KEYS[1]) == 0 then return 0 end
redis.call('RPUSH', KEYS[2], ARGV[1])
redis.call('HSET', KEYS[1], 'updated_at', ARGV[2])
return 1
";

// KEYS: document. ARGV: title, updated_at.
const RENAME_SCRIPT: &str =
    r"
if redis.call('EXISTS', KEYS[1]) == 0 then return 0 end
redis.call('HSET', KEYS[1], 'title', ARGV[1], 'updated_at', ARGV[2])
return 1
";

// KEYS: document, messages.
const DELETE_SCRIPT: &str =
    r"
local removed = redis.call('DEL', KEYS[1])
redis.call('DEL', KEYS[2])
return removed
";

/// The conversation document minus its messages. Stored as a hash so that
/// appends and renames touch only the fields they change.
#[derive(Debug, Clone, PartialEq)]
struct StoredConversation {
    id: String,
    title: String,
    model: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StoredConversation {
    fn from_conversation(conversation: &Conversation) -> Self {
        Self {
            id: conversation.id.clone(),
            title: conversation.title.clone(),
            model: conversation.model.clone(),
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        }
    }

    fn into_conversation(self, messages: Vec<ChatMessage>) -> Conversation {
        Conversation {
            id: self.id,
            title: self.title,
            messages,
            model: self.model,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("id", self.id.clone()),
            ("title", self.title.clone()),
            ("model", self.model.clone()),
            ("created_at", self.created_at.to_rfc3339()),
            ("updated_at", self.updated_at.to_rfc3339())
        ]
    }

    fn from_fields(mut fields: HashMap<String, String>) -> Result<Self, String> {
        let mut take = |name: &str| fields.remove(name).ok_or_else(|| format!("missing field {}", name));
        Ok(Self {
            id: take("id")?,
            title: take("title")?,
            model: take("model")?,
            created_at: parse_timestamp(&take("created_at")?)?,
            updated_at: parse_timestamp(&take("updated_at")?)?,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {}: {}", raw, e))
}

pub struct RedisConversationStore {
    client: Client,
    key_prefix: String,
    scan_count: usize,
    append_script: Script,
    rename_script: Script,
    delete_script: Script,
}

impl RedisConversationStore {
    pub fn new(url: &str, key_prefix: &str, scan_count: usize) -> Result<Self, ChatError> {
        Ok(Self {
            client: Client::open(url)?,
            key_prefix: key_prefix.to_string(),
            scan_count: scan_count.max(1),
            append_script: Script::new(APPEND_SCRIPT),
            rename_script: Script::new(RENAME_SCRIPT),
            delete_script: Script::new(DELETE_SCRIPT),
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn document_key(&self, conversation_id: &str) -> String {
        format!("{}{}{}", self.key_prefix, DOCUMENT_NAMESPACE, conversation_id)
    }

    fn messages_key(&self, conversation_id: &str) -> String {
        format!("{}{}{}", self.key_prefix, MESSAGES_NAMESPACE, conversation_id)
    }

    fn document_pattern(&self) -> String {
        format!("{}{}*", self.key_prefix, DOCUMENT_NAMESPACE)
    }

    async fn load_document(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        key: &str
    ) -> Result<Option<StoredConversation>, ChatError> {
        let fields: HashMap<String, String> = conn.hgetall(key).await?;
        decode_document(key, fields)
    }

    async fn scan_document_keys(
        &self,
        conn: &mut redis::aio::MultiplexedConnection
    ) -> Result<Vec<String>, ChatError> {
        let pattern = self.document_pattern();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis
                ::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(self.scan_count)
                .query_async(conn).await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }
}

fn decode_document(
    key: &str,
    fields: HashMap<String, String>
) -> Result<Option<StoredConversation>, ChatError> {
    if fields.is_empty() {
        return Ok(None);
    }
    StoredConversation::from_fields(fields)
        .map(Some)
        .map_err(|e| ChatError::Persistence(format!("corrupt document {}: {}", key, e)))
}

fn to_json(message: &ChatMessage) -> Result<String, ChatError> {
    serde_json::to_string(message).map_err(|e| ChatError::Persistence(e.to_string()))
}

#[async_trait]
impl ConversationStore for RedisConversationStore {
    async fn create(&self, conversation: &Conversation) -> Result<(), ChatError> {
        let mut conn = self.get_connection().await?;
        let fields = StoredConversation::from_conversation(conversation).to_fields();
        let mut pipe = redis::pipe();
        pipe.atomic().hset_multiple(self.document_key(&conversation.id), &fields).ignore();
        for message in &conversation.messages {
            pipe.rpush(self.messages_key(&conversation.id), to_json(message)?).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>, ChatError> {
        let mut conn = self.get_connection().await?;
        let keys = self.scan_document_keys(&mut conn).await?;

        let mut summaries = Vec::with_capacity(keys.len());
        for key in &keys {
            match self.load_document(&mut conn, key).await {
                Ok(Some(doc)) => summaries.push(doc.into_conversation(Vec::new()).summary()),
                Ok(None) => {}
                Err(e) => error!("Error reading conversation {}: {}", key, e),
            }
        }
        sort_newest_first(&mut summaries);
        Ok(summaries)
    }

    async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>, ChatError> {
        let mut conn = self.get_connection().await?;
        let key = self.document_key(conversation_id);
        let (fields, json_entries): (HashMap<String, String>, Vec<String>) = redis
            ::pipe()
            .atomic()
            .hgetall(&key)
            .lrange(self.messages_key(conversation_id), 0, -1)
            .query_async(&mut conn).await?;
        let Some(doc) = decode_document(&key, fields)? else {
            return Ok(None);
        };

        let mut messages = Vec::with_capacity(json_entries.len());
        for json_entry in &json_entries {
            match serde_json::from_str::<ChatMessage>(json_entry) {
                Ok(msg) => messages.push(msg),
                Err(e) => error!("Error parsing message of {}: {}", conversation_id, e),
            }
        }

        Ok(Some(doc.into_conversation(messages)))
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        message: &ChatMessage
    ) -> Result<(), ChatError> {
        let mut conn = self.get_connection().await?;
        let appended: i64 = self.append_script
            .key(self.document_key(conversation_id))
            .key(self.messages_key(conversation_id))
            .arg(to_json(message)?)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn).await?;
        if appended == 0 {
            return Err(ChatError::NotFound(conversation_id.to_string()));
        }
        Ok(())
    }

    async fn update_title(
        &self,
        conversation_id: &str,
        title: &str
    ) -> Result<Option<Conversation>, ChatError> {
        {
            let mut conn = self.get_connection().await?;
            let renamed: i64 = self.rename_script
                .key(self.document_key(conversation_id))
                .arg(title)
                .arg(Utc::now().to_rfc3339())
                .invoke_async(&mut conn).await?;
            if renamed == 0 {
                return Ok(None);
            }
        }
        self.get(conversation_id).await
    }

    async fn delete(&self, conversation_id: &str) -> Result<bool, ChatError> {
        let mut conn = self.get_connection().await?;
        let removed: i64 = self.delete_script
            .key(self.document_key(conversation_id))
            .key(self.messages_key(conversation_id))
            .invoke_async(&mut conn).await?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RedisConversationStore {
        RedisConversationStore::new("redis://127.0.0.1:6379", "conversation:", 100).unwrap()
    }

    #[test]
    fn documents_and_message_lists_live_in_separate_namespaces() {
        let store = store();
        assert_eq!(store.document_key("abc"), "conversation:doc:abc");
        assert_eq!(store.messages_key("abc"), "conversation:msgs:abc");
        assert_eq!(store.document_pattern(), "conversation:doc:*");
    }

    #[test]
    fn crafted_ids_cannot_reach_another_conversations_messages() {
        let store = store();
        for crafted in ["abc:messages", "../msgs:abc", "msgs:abc"] {
            assert_ne!(store.document_key(crafted), store.messages_key("abc"));
        }
        assert!(!store.messages_key("abc").starts_with("conversation:doc:"));
    }

    #[test]
    fn document_fields_round_trip() {
        let conversation = Conversation::new(Some("Notes"), "llama3.2");
        let doc = StoredConversation::from_conversation(&conversation);
        let fields: HashMap<String, String> = doc
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let back = StoredConversation::from_fields(fields).unwrap();
        assert_eq!(back.into_conversation(Vec::new()), conversation);
    }

    #[test]
    fn empty_hash_is_a_missing_document() {
        assert_eq!(decode_document("conversation:doc:x", HashMap::new()).unwrap(), None);

        let partial = HashMap::from([("id".to_string(), "x".to_string())]);
        assert!(matches!(decode_document("conversation:doc:x", partial), Err(ChatError::Persistence(_))));
    }
}
