use async_trait::async_trait;
use log::{ debug, error, info, warn };
use reqwest::{ Client as HttpClient, StatusCode };

use super::{ ChatClient, SAFETY_DECLINED };
use crate::error::ChatError;
use crate::llm::LlmConfig;
use crate::models::gemini::{
    extract_error_message,
    CompletionOutcome,
    GenerateContentRequest,
    GenerateContentResponse,
};

/// `generateContent` client that walks an ordered list of fallback models.
pub struct GeminiChatClient {
    http: HttpClient,
    api_key: String,
    base_url: String,
    models: Vec<String>,
}

impl GeminiChatClient {
    pub fn new(
        api_key: String,
        base_url: String,
        models: Vec<String>,
        timeout: std::time::Duration
    ) -> Result<Self, ChatError> {
        if api_key.trim().is_empty() {
            return Err(ChatError::missing_api_key());
        }
        if models.is_empty() {
            return Err(ChatError::Configuration("At least one Gemini model must be configured".into()));
        }

        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key: api_key.trim().to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            models,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, ChatError> {
        let api_key = config.api_key.clone().ok_or_else(ChatError::missing_api_key)?;
        Self::new(api_key, config.base_url.clone(), config.models.clone(), config.timeout)
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/{}:generateContent", self.base_url, model)
    }
}

#[async_trait]
impl ChatClient for GeminiChatClient {
    async fn complete(&self, request: &GenerateContentRequest) -> Result<String, ChatError> {
        for model in &self.models {
            debug!("GeminiChatClient::complete() → model={} base_url={}", model, self.base_url);

            let response = self.http
                .post(self.endpoint(model))
                .query(&[("key", self.api_key.as_str())])
                .json(request)
                .send().await
                .map_err(|e| {
                    let e = e.without_url();
                    error!("Gemini request to model {} failed: {}", model, e);
                    ChatError::Network { reason: e.to_string() }
                })?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                warn!("Model {} not found (404), trying next...", model);
                continue;
            }

            let body = response
                .text().await
                .map_err(|e| ChatError::Network { reason: e.without_url().to_string() })?;

            if !status.is_success() {
                let message = extract_error_message(&body);
                error!("Gemini model {} returned HTTP {}: {}", model, status.as_u16(), message);
                return Err(ChatError::Api { status: status.as_u16(), message });
            }

            // A 2xx that is not JSON came from something in between, not the model.
            let parsed: GenerateContentResponse = serde_json::from_str(&body).map_err(|e| {
                error!("Model {} answered HTTP {} with an unreadable body: {}", model, status.as_u16(), e);
                ChatError::Network {
                    reason: format!("invalid response from model {}: {}", model, e),
                }
            })?;

            match parsed.outcome() {
                CompletionOutcome::Text(text) => {
                    info!("Using model {}", model);
                    return Ok(text);
                }
                CompletionOutcome::Blocked => {
                    warn!("Model {} declined on safety grounds", model);
                    return Ok(SAFETY_DECLINED.to_string());
                }
                CompletionOutcome::Empty => {
                    warn!("Model {} returned no content, trying next...", model);
                }
            }
        }

        error!("No Gemini model in {:?} produced a response", self.models);
        Err(ChatError::NoModelAvailable)
    }

    fn models(&self) -> &[String] {
        &self.models
    }
}
