use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{ header, Method, StatusCode },
    response::{ IntoResponse, Response },
    routing::post,
    Json,
    Router,
};
use log::{ debug, error, warn };
use serde_json::Value as JsonValue;
use tower::ServiceBuilder;
use tower_http::cors::{ Any, CorsLayer };

use crate::config::prompt::PromptConfig;
use crate::error::ChatError;
use crate::llm::chat::{ ChatClient, NO_RESPONSE };
use crate::llm::compose::{ compose, GenerationSettings };
use crate::models::chat::Message;
use crate::models::proxy::{ ProxyMessage, ProxyResponse };

pub const MISSING_KEY_MESSAGE: &str =
    "GEMINI_API_KEY not set. Add it to the server environment or its .env file.";

#[derive(Clone)]
pub struct AppState {
    pub client: Option<Arc<dyn ChatClient>>,
    pub prompts: Arc<PromptConfig>,
    pub generation: GenerationSettings,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route(
            "/api/chat",
            post(chat_handler).options(preflight_handler).fallback(method_not_allowed)
        )
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(state)
}

fn reply(status: StatusCode, body: ProxyResponse) -> Response {
    (status, Json(body)).into_response()
}

fn reject(status: StatusCode, message: impl Into<String>) -> Response {
    reply(status, ProxyResponse::Error { error: message.into() })
}

async fn preflight_handler() -> StatusCode {
    StatusCode::OK
}

async fn method_not_allowed() -> Response {
    reject(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

/// Splits the posted list into history and the new user turn.
fn parse_messages(body: &[u8]) -> Result<Vec<ProxyMessage>, Response> {
    let value: JsonValue = serde_json::from_slice(body)
        .map_err(|_| reject(StatusCode::BAD_REQUEST, "Invalid JSON body"))?;

    let items = match value.get("messages").and_then(JsonValue::as_array) {
        Some(items) if !items.is_empty() => items,
        _ => {
            return Err(reject(StatusCode::BAD_REQUEST, "Invalid request: messages array required"));
        }
    };

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let content = item.get("content").and_then(JsonValue::as_str).ok_or_else(|| {
                reject(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid request: message {} must have string content", i)
                )
            })?;
            let role = item.get("role").and_then(JsonValue::as_str).unwrap_or("user");
            Ok(ProxyMessage { role: role.to_string(), content: content.to_string() })
        })
        .collect()
}

fn to_history(messages: &[ProxyMessage]) -> Vec<Message> {
    messages
        .iter()
        .map(|m| {
            if m.role == "user" { Message::user(m.content.clone()) } else { Message::assistant(m.content.clone()) }
        })
        .collect()
}

fn error_response(err: ChatError) -> Response {
    match err {
        ChatError::Api { status, message } => {
            let status = StatusCode::from_u16(status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            reject(status, message)
        }
        ChatError::NoModelAvailable => reject(StatusCode::NOT_FOUND, err.to_string()),
        ChatError::Network { reason } => {
            reject(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to reach Gemini API: {}", reason))
        }
        ChatError::Validation(message) => reject(StatusCode::BAD_REQUEST, message),
        other => reject(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

async fn chat_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let client = match &state.client {
        Some(client) => client,
        None => {
            error!("Rejecting /api/chat: GEMINI_API_KEY is not configured");
            return reject(StatusCode::INTERNAL_SERVER_ERROR, MISSING_KEY_MESSAGE);
        }
    };

    let messages = match parse_messages(&body) {
        Ok(messages) => messages,
        Err(response) => {
            warn!("Rejected malformed /api/chat request");
            return response;
        }
    };

    let (last, prior) = match messages.split_last() {
        Some(split) => split,
        None => {
            return reject(StatusCode::BAD_REQUEST, "Invalid request: messages array required");
        }
    };
    debug!("Proxying chat with {} prior message(s)", prior.len());

    let request = compose(
        &state.generation,
        &state.prompts.system_prompt,
        &state.prompts.primer_reply,
        &to_history(prior),
        &last.content
    );

    match client.complete(&request).await {
        Ok(content) => {
            let content = if content.trim().is_empty() { NO_RESPONSE.to_string() } else { content };
            reply(StatusCode::OK, ProxyResponse::Content { content })
        }
        Err(e) => {
            error!("Upstream completion failed: {:?}", e);
            error_response(e)
        }
    }
}
