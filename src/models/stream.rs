use serde::{ Serialize, Deserialize };

/// One event on the send-message event stream.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum StreamEvent {
    Chunk {
        chunk: String,
    },
    Done {
        done: bool,
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    Error {
        error: String,
    },
}

impl StreamEvent {
    pub fn chunk(text: impl Into<String>) -> Self {
        StreamEvent::Chunk { chunk: text.into() }
    }

    pub fn done(conversation_id: impl Into<String>) -> Self {
        StreamEvent::Done { done: true, conversation_id: conversation_id.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error { error: message.into() }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Chunk { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shapes() {
        assert_eq!(serde_json::to_string(&StreamEvent::chunk("He")).unwrap(), r#"{"chunk":"He"}"#);
        assert_eq!(
            serde_json::to_string(&StreamEvent::done("abc")).unwrap(),
            r#"{"done":true,"conversationId":"abc"}"#
        );
        assert_eq!(
            serde_json::to_string(&StreamEvent::error("boom")).unwrap(),
            r#"{"error":"boom"}"#
        );
    }

    #[test]
    fn parses_back_into_the_right_variant() {
        let done: StreamEvent = serde_json::from_str(r#"{"done":true,"conversationId":"c1"}"#).unwrap();
        assert_eq!(done, StreamEvent::done("c1"));
        assert!(done.is_terminal());
        assert!(!StreamEvent::chunk("x").is_terminal());
    }
}
