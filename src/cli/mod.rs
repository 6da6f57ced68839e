pub mod repl;

use clap::{ Parser, Subcommand };
use std::time::Duration;

use crate::error::ChatError;
use crate::llm::compose::GenerationSettings;
use crate::llm::{ LlmConfig, SystemPromptStyle, DEFAULT_BASE_URL, DEFAULT_MODELS };

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP chat proxy (default)
    Serve,
    /// Chat in the terminal against the local conversation store
    Chat,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    // --- Gemini Provider Args ---
    /// Google AI Studio API key. Never logged.
    #[arg(long, env = "GEMINI_API_KEY", default_value = "", hide_env_values = true)]
    pub gemini_api_key: String,

    /// Base URL of the generateContent API, up to and including `/models`
    #[arg(long, env = "GEMINI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub gemini_base_url: String,

    /// Comma separated fallback model list, tried in order (defaults to the built-in tiers)
    #[arg(long, env = "GEMINI_MODELS", value_delimiter = ',')]
    pub models: Vec<String>,

    /// Output token cap sent with every request (8192, or 2048 for faster replies)
    #[arg(long, env = "MAX_OUTPUT_TOKENS", default_value = "8192")]
    pub max_output_tokens: u32,

    /// Per-request timeout in seconds for provider calls
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "60")]
    pub request_timeout_secs: u64,

    /// Attach harassment and hate speech safety settings to requests
    #[arg(long, env = "SAFETY_SETTINGS", default_value = "false")]
    pub safety_settings: bool,

    /// How the system prompt is sent (instruction, primed)
    #[arg(long, env = "SYSTEM_PROMPT_STYLE", default_value = "instruction")]
    pub system_prompt_style: String,

    // --- Prompt Args ---
    /// Optional JSON file overriding the system prompt and identity answers.
    #[arg(long, env = "PROMPTS_PATH")]
    pub prompts_path: Option<String>,

    /// Delay before a local identity answer is shown, in milliseconds
    #[arg(long, env = "IDENTITY_DELAY_MS", default_value = "500")]
    pub identity_delay_ms: u64,

    // --- Local State Args ---
    /// Chat state store type (file, memory)
    #[arg(long, env = "STATE_TYPE", default_value = "file")]
    pub state_type: String,

    /// Path of the JSON state file used by the file store
    #[arg(long, env = "STATE_PATH", default_value = "aperonix-state.json")]
    pub state_path: String,

    // --- Server Args ---
    /// Host address and port for the proxy to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:3000")]
    pub server_addr: String,
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    pub fn api_key(&self) -> Option<String> {
        let key = self.gemini_api_key.trim();
        if key.is_empty() { None } else { Some(key.to_string()) }
    }

    pub fn llm_config(&self) -> Result<LlmConfig, ChatError> {
        let mut models: Vec<String> = self.models
            .iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if models.is_empty() {
            models = DEFAULT_MODELS.iter().map(|m| m.to_string()).collect();
        }
        if self.request_timeout_secs == 0 {
            return Err(ChatError::Validation("REQUEST_TIMEOUT_SECS must be greater than zero".into()));
        }

        Ok(LlmConfig {
            api_key: self.api_key(),
            base_url: self.gemini_base_url.clone(),
            models,
            timeout: Duration::from_secs(self.request_timeout_secs),
        })
    }

    pub fn generation_settings(&self) -> Result<GenerationSettings, ChatError> {
        let style = self.system_prompt_style
            .parse::<SystemPromptStyle>()
            .map_err(|e| ChatError::Validation(e.to_string()))?;
        if self.max_output_tokens == 0 {
            return Err(ChatError::Validation("MAX_OUTPUT_TOKENS must be greater than zero".into()));
        }

        Ok(GenerationSettings {
            style,
            max_output_tokens: self.max_output_tokens,
            safety_settings: self.safety_settings,
        })
    }
}
