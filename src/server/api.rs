use crate::agent::ChatAgent;
use crate::error::ChatError;
use crate::llm::chat::HealthReport;

use std::error::Error;
use axum::{
    body::Bytes,
    extract::{ Path, State },
    http::{ header, HeaderValue, Method, StatusCode },
    response::{ sse::{ Event, KeepAlive, Sse }, IntoResponse, Response },
    routing::{ get, patch, post },
    Json,
    Router,
};
use chrono::Utc;
use futures::StreamExt;
use serde::{ de::DeserializeOwned, Deserialize, Serialize };
use tower_http::cors::CorsLayer;
use log::{ info, warn, error };

#[derive(Deserialize, Default)]
pub struct CreateConversationRequest {
    pub title: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct SendMessageRequest {
    pub message: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct UpdateTitleRequest {
    pub title: Option<String>,
}

#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Serialize)]
struct ApiErrorResponse {
    success: bool,
    error: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    services: HealthServices,
}

#[derive(Serialize)]
struct HealthServices {
    ollama: HealthReport,
}

#[derive(Clone)]
struct AppState {
    agent: ChatAgent,
}

fn success_response<T: Serialize>(status: StatusCode, data: T) -> Response {
    (status, Json(ApiResponse { success: true, data: Some(data), message: None })).into_response()
}

fn fail(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(ApiErrorResponse { success: false, error: error.into() })).into_response()
}

/// Maps a [`ChatError`] to its status code. `context` is the message shown
/// for server-side failures, whose detail only goes to the log.
fn error_response(e: ChatError, context: &str) -> Response {
    match e {
        ChatError::Validation(msg) => fail(StatusCode::BAD_REQUEST, msg),
        ChatError::NotFound(_) => fail(StatusCode::NOT_FOUND, "Conversation not found"),
        other => {
            error!("{}: {}", context, other);
            fail(StatusCode::INTERNAL_SERVER_ERROR, context)
        }
    }
}

/// Decodes a JSON request body regardless of its content type. An empty body
/// is the default request; anything unparseable is a 400 in the error envelope.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json
        ::from_slice::<T>(body)
        .map_err(|e| fail(StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e)))
}

pub fn cors_layer(origin: &str) -> Result<CorsLayer, Box<dyn Error + Send + Sync>> {
    let origin = HeaderValue::from_str(origin)
        .map_err(|e| format!("Invalid CORS origin '{}': {}", origin, e))?;
    Ok(
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE])
            .allow_credentials(true)
    )
}

pub fn create_router(agent: ChatAgent, cors: CorsLayer) -> Router {
    let api = Router::new()
        .route("/conversations", post(create_conversation_handler).get(list_conversations_handler))
        .route(
            "/conversations/{id}",
            get(get_conversation_handler).delete(delete_conversation_handler)
        )
        .route("/conversations/{id}/messages", post(send_message_handler))
        .route("/conversations/{id}/title", patch(update_title_handler))
        .route("/health", get(health_handler))
        .route("/models", get(models_handler));

    Router::new()
        .nest("/api", api)
        .layer(cors)
        .with_state(AppState { agent })
}

async fn create_conversation_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let req = match parse_body::<CreateConversationRequest>(&body) {
        Ok(req) => req,
        Err(rejection) => {
            return rejection;
        }
    };

    match state.agent.create_conversation(req.title.as_deref()).await {
        Ok(conversation) => success_response(StatusCode::CREATED, conversation),
        Err(e) => error_response(e, "Failed to create conversation"),
    }
}

async fn list_conversations_handler(State(state): State<AppState>) -> Response {
    match state.agent.list_conversations().await {
        Ok(summaries) => success_response(StatusCode::OK, summaries),
        Err(e) => error_response(e, "Failed to fetch conversations"),
    }
}

async fn get_conversation_handler(
    State(state): State<AppState>,
    Path(id): Path<String>
) -> Response {
    match state.agent.get_conversation(&id).await {
        Ok(conversation) => success_response(StatusCode::OK, conversation),
        Err(e) => error_response(e, "Failed to fetch conversation"),
    }
}

async fn send_message_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes
) -> Response {
    let req = match parse_body::<SendMessageRequest>(&body) {
        Ok(req) => req,
        Err(rejection) => {
            return rejection;
        }
    };
    let message = req.message.unwrap_or_default();
    info!("Message received for conversation {} ({} bytes)", id, message.len());

    match state.agent.send_message(&id, &message).await {
        Ok(events) => {
            let sse_stream = events.map(|event| Event::default().json_data(event));
            Sse::new(sse_stream).keep_alive(KeepAlive::default()).into_response()
        }
        Err(e) => error_response(e, "Failed to process message"),
    }
}

async fn delete_conversation_handler(
    State(state): State<AppState>,
    Path(id): Path<String>
) -> Response {
    match state.agent.delete_conversation(&id).await {
        Ok(()) =>
            (
                StatusCode::OK,
                Json(ApiResponse::<()> {
                    success: true,
                    data: None,
                    message: Some("Conversation deleted successfully".into()),
                }),
            ).into_response(),
        Err(e) => error_response(e, "Failed to delete conversation"),
    }
}

async fn update_title_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes
) -> Response {
    let req = match parse_body::<UpdateTitleRequest>(&body) {
        Ok(req) => req,
        Err(rejection) => {
            return rejection;
        }
    };
    match state.agent.rename_conversation(&id, req.title.as_deref()).await {
        Ok(conversation) => success_response(StatusCode::OK, conversation),
        Err(e) => error_response(e, "Failed to update conversation"),
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let ollama = state.agent.health_check().await;
    if !ollama.is_healthy() {
        warn!("Inference service is unhealthy: {:?}", ollama);
    }
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339(),
        services: HealthServices { ollama },
    })
}

async fn models_handler(State(state): State<AppState>) -> Response {
    let models = state.agent.list_models().await;
    success_response(StatusCode::OK, models)
}
