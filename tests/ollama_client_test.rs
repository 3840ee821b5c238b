use std::sync::{ Arc, Mutex };

use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{ IntoResponse, Response };
use axum::routing::{ get, post };
use axum::{ Json, Router };
use futures::StreamExt;
use serde_json::{ json, Value };

use ollama_chat::error::ChatError;
use ollama_chat::llm::chat::ollama::OllamaClient;
use ollama_chat::llm::chat::{ ChatClient, ChatEvent, ChatTurn, HealthReport };
use ollama_chat::models::chat::Role;

#[derive(Clone, Default)]
struct FakeOllama {
    chat_reads: Vec<String>,
    chat_status: Option<StatusCode>,
    requests: Arc<Mutex<Vec<Value>>>,
}

async fn chat_handler(State(fake): State<FakeOllama>, Json(body): Json<Value>) -> Response {
    fake.requests.lock().unwrap().push(body);
    if let Some(status) = fake.chat_status {
        return (status, "model not loaded").into_response();
    }
    let reads = fake.chat_reads.clone().into_iter().map(Ok::<_, std::io::Error>);
    Body::from_stream(futures::stream::iter(reads)).into_response()
}

async fn tags_handler() -> Json<Value> {
    Json(json!({
        "models": [
            { "name": "llama3.2:latest", "model": "llama3.2:latest", "size": 2019393189, "digest": "a80c4f17acd5" },
            { "name": "qwen2.5:7b" }
        ]
    }))
}

/// Serves `fake` on an ephemeral port and returns its base URL.
async fn spawn_fake_ollama(fake: FakeOllama) -> String {
    let app = Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/tags", get(tags_handler))
        .with_state(fake);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// A base URL nothing is listening on.
async fn dead_base_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

fn history() -> Vec<ChatTurn> {
    vec![
        ChatTurn { role: Role::User, content: "hi".into() },
        ChatTurn { role: Role::Assistant, content: "hello".into() },
        ChatTurn { role: Role::User, content: "how are you?".into() },
    ]
}

async fn collect_events(client: &OllamaClient) -> Vec<Result<ChatEvent, String>> {
    client
        .chat(history()).await
        .unwrap()
        .map(|r| r.map_err(|e| e.to_string()))
        .collect().await
}

#[tokio::test]
async fn chat_posts_history_with_fixed_model_and_stream_flag() {
    let fake = FakeOllama {
        chat_reads: vec![
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Fine\"},\"done\":false}\n".into(),
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n".into()
        ],
        ..Default::default()
    };
    let requests = fake.requests.clone();
    let base_url = spawn_fake_ollama(fake).await;
    let client = OllamaClient::new(Some(base_url), Some("llama3.2".into()));

    let events = collect_events(&client).await;

    assert_eq!(events, vec![Ok(ChatEvent::Fragment("Fine".into())), Ok(ChatEvent::Completed("Fine".into()))]);
    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0], json!({
        "model": "llama3.2",
        "messages": [
            { "role": "user", "content": "hi" },
            { "role": "assistant", "content": "hello" },
            { "role": "user", "content": "how are you?" }
        ],
        "stream": true
    }));
}

#[tokio::test]
async fn chat_reassembles_lines_split_across_reads_and_skips_garbage() {
    let fake = FakeOllama {
        chat_reads: vec![
            "{\"message\":{\"content\":\"I am\"},\"do".into(),
            "ne\":false}\n{garbage}\n{\"message\":{\"content\":\" well\"},\"done\":false}\n".into(),
            "{\"message\":{\"content\":\"\"},\"done\":true}\n{\"message\":{\"content\":\"ignored\"}}\n".into()
        ],
        ..Default::default()
    };
    let client = OllamaClient::new(Some(spawn_fake_ollama(fake).await), None);

    let events = collect_events(&client).await;

    assert_eq!(events, vec![
        Ok(ChatEvent::Fragment("I am".into())),
        Ok(ChatEvent::Fragment(" well".into())),
        Ok(ChatEvent::Completed("I am well".into())),
    ]);
}

#[tokio::test]
async fn chat_without_done_completes_with_what_was_streamed() {
    let fake = FakeOllama {
        chat_reads: vec!["{\"message\":{\"content\":\"cut short\"},\"done\":false}\n".into()],
        ..Default::default()
    };
    let client = OllamaClient::new(Some(spawn_fake_ollama(fake).await), None);

    let events = collect_events(&client).await;

    assert_eq!(events.last(), Some(&Ok(ChatEvent::Completed("cut short".into()))));
}

#[tokio::test]
async fn chat_fails_on_error_status() {
    let fake = FakeOllama { chat_status: Some(StatusCode::NOT_FOUND), ..Default::default() };
    let client = OllamaClient::new(Some(spawn_fake_ollama(fake).await), None);

    let result = client.chat(history()).await;

    assert!(matches!(result, Err(ChatError::Gateway(msg)) if msg.contains("404")));
}

#[tokio::test]
async fn chat_fails_when_service_is_down() {
    let client = OllamaClient::new(Some(dead_base_url().await), None);

    let result = client.chat(history()).await;

    assert!(matches!(result, Err(ChatError::Gateway(_))));
}

#[tokio::test]
async fn list_models_and_health_report_available_models() {
    let client = OllamaClient::new(Some(spawn_fake_ollama(FakeOllama::default()).await), None);

    let models = client.list_models().await;
    assert_eq!(models.len(), 2);
    assert_eq!(models[0].name, "llama3.2:latest");
    assert_eq!(models[0].size, Some(2019393189));
    assert_eq!(models[1].digest, None);

    match client.health_check().await {
        HealthReport::Healthy { models } => assert_eq!(models.len(), 2),
        other => panic!("expected healthy, got {:?}", other),
    }
}

#[tokio::test]
async fn list_models_and_health_degrade_when_service_is_down() {
    let client = OllamaClient::new(Some(dead_base_url().await), None);

    assert!(client.list_models().await.is_empty());
    let report = client.health_check().await;
    assert!(!report.is_healthy());
    assert!(matches!(report, HealthReport::Unhealthy { .. }));
}
