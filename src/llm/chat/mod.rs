pub mod gemini;

use async_trait::async_trait;
use std::sync::Arc;

use self::gemini::GeminiChatClient;
use super::LlmConfig;
use crate::error::ChatError;
use crate::models::gemini::GenerateContentRequest;

/// Returned instead of an error when the provider refuses on safety grounds.
pub const SAFETY_DECLINED: &str =
    "I apologize, but I cannot provide a response to that request due to safety guidelines.";

/// Substituted for a well-formed but empty completion.
pub const NO_RESPONSE: &str = "No response received.";

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Sends the composed body and returns the completion text.
    async fn complete(&self, request: &GenerateContentRequest) -> Result<String, ChatError>;

    fn models(&self) -> &[String];
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, ChatError> {
    let client = GeminiChatClient::from_config(config)?;
    Ok(Arc::new(client))
}
