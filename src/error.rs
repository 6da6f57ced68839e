use thiserror::Error;

use crate::history::StoreError;

/// Failure classes for everything between the send button and the provider.
///
/// `Display` yields the text a user sees in a failed assistant bubble.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChatError {
    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    Validation(String),

    /// The provider host could not be reached. `reason` is kept for logs and the proxy.
    #[error("Network error: Could not reach the Gemini API. Check your internet connection.")]
    Network {
        reason: String,
    },

    #[error("API connection failed (HTTP {status}): {message}")]
    Api {
        status: u16,
        message: String,
    },

    #[error(
        "API connection failed (HTTP 404): No available Gemini model found. Please verify your API key is valid at https://aistudio.google.com/apikey"
    )]
    NoModelAvailable,

    #[error("Chat session '{0}' not found")]
    NotFound(String),

    #[error("Failed to persist chats: {0}")]
    Storage(String),
}

impl ChatError {
    pub fn missing_api_key() -> Self {
        ChatError::Configuration(
            "API connection failed. Please add your Gemini API key (GEMINI_API_KEY) to enable chat functionality.".to_string()
        )
    }
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        ChatError::Storage(err.to_string())
    }
}
