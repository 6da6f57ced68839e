pub mod chat;
pub mod compose;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub const DEFAULT_MODELS: [&str; 4] = [
    "gemini-2.5-flash",
    "gemini-2.0-flash",
    "gemini-1.5-flash",
    "gemini-pro",
];

/// How the system prompt reaches the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemPromptStyle {
    /// Dedicated `system_instruction` field.
    Instruction,
    /// A leading user turn with the prompt and a canned model acknowledgement.
    Primed,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseSystemPromptStyleError {
    message: String,
}

impl fmt::Display for ParseSystemPromptStyleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseSystemPromptStyleError {}

impl FromStr for SystemPromptStyle {
    type Err = ParseSystemPromptStyleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "instruction" => Ok(SystemPromptStyle::Instruction),
            "primed" => Ok(SystemPromptStyle::Primed),
            _ =>
                Err(ParseSystemPromptStyleError {
                    message: format!("Invalid system prompt style: '{}'", s),
                }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub models: Vec<String>,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
            timeout: Duration::from_secs(60),
        }
    }
}
