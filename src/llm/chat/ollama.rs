use async_trait::async_trait;
use log::{ error, info };
use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };

use super::ndjson::relay_chat_stream;
use super::{ create_streaming_response, ChatClient, ChatEventStream, ChatTurn, HealthReport, ModelDescriptor };
use crate::error::ChatError;
use crate::llm::{ LlmConfig, DEFAULT_BASE_URL, DEFAULT_MODEL };

#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: HttpClient,
    base_url: String,
    completion_model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    stream: bool,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelDescriptor>,
}

impl OllamaClient {
    pub fn new(base_url: Option<String>, completion_model: Option<String>) -> Self {
        let model = completion_model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.into());

        Self {
            http: HttpClient::new(),
            base_url: url.trim_end_matches('/').to_string(),
            completion_model: model,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(config.base_url.clone(), config.completion_model.clone())
    }

    fn endpoint(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }

    async fn fetch_tags(&self) -> Result<Vec<ModelDescriptor>, ChatError> {
        let resp = self.http.get(self.endpoint("/api/tags")).send().await?.error_for_status()?;
        let data = resp.json::<TagsResponse>().await?;
        Ok(data.models)
    }
}

#[async_trait]
impl ChatClient for OllamaClient {
    async fn chat(&self, messages: Vec<ChatTurn>) -> Result<ChatEventStream, ChatError> {
        let url = self.endpoint("/api/chat");
        let req = ChatRequest {
            model: &self.completion_model,
            messages: &messages,
            stream: true,
        };
        info!("Sending {} messages to {} (model {})", messages.len(), url, self.completion_model);

        let response = self.http
            .post(&url)
            .json(&req)
            .send().await
            .map_err(|e| ChatError::Gateway(format!("failed to reach {}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(ChatError::Gateway(format!("HTTP error: {}", response.status())));
        }

        let bytes = response.bytes_stream();
        Ok(create_streaming_response(move |tx| relay_chat_stream(bytes, tx)))
    }

    async fn list_models(&self) -> Vec<ModelDescriptor> {
        match self.fetch_tags().await {
            Ok(models) => models,
            Err(e) => {
                error!("Error listing models: {}", e);
                Vec::new()
            }
        }
    }

    async fn health_check(&self) -> HealthReport {
        match self.fetch_tags().await {
            Ok(models) => HealthReport::Healthy { models },
            Err(e) => HealthReport::Unhealthy { error: e.to_string() },
        }
    }

    fn get_model(&self) -> String {
        self.completion_model.clone()
    }

    fn get_base_url(&self) -> Option<String> {
        Some(self.base_url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unconfigured() {
        let client = OllamaClient::from_config(&LlmConfig::default());
        assert_eq!(client.get_model(), DEFAULT_MODEL);
        assert_eq!(client.get_base_url().as_deref(), Some(DEFAULT_BASE_URL));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = OllamaClient::new(Some("http://gpu-box:11434/".into()), Some("qwen2.5".into()));
        assert_eq!(client.endpoint("/api/chat"), "http://gpu-box:11434/api/chat");
        assert_eq!(client.get_model(), "qwen2.5");
    }

    #[test]
    fn chat_request_body_shape() {
        let messages = vec![ChatTurn { role: crate::models::chat::Role::User, content: "hi".into() }];
        let body = serde_json::to_value(ChatRequest { model: "llama3.2", messages: &messages, stream: true }).unwrap();
        assert_eq!(body, serde_json::json!({
            "model": "llama3.2",
            "messages": [{ "role": "user", "content": "hi" }],
            "stream": true
        }));
    }
}
