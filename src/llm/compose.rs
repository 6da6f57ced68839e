//! Turns a session transcript into a `generateContent` request body.

use crate::models::chat::{ Message, Role };
use crate::models::gemini::{
    Content,
    GenerateContentRequest,
    GenerationConfig,
    Part,
    SafetySetting,
    SystemInstruction,
    TurnRole,
};

use super::SystemPromptStyle;

pub const TEMPERATURE: f32 = 0.8;
pub const TOP_K: u32 = 40;
pub const TOP_P: f32 = 0.95;
pub const MAX_OUTPUT_TOKENS: u32 = 8192;
/// Lower cap for latency-sensitive deployments.
pub const MAX_OUTPUT_TOKENS_FAST: u32 = 2048;

const SAFETY_CATEGORIES: [&str; 2] = ["HARM_CATEGORY_HARASSMENT", "HARM_CATEGORY_HATE_SPEECH"];
const SAFETY_THRESHOLD: &str = "BLOCK_MEDIUM_AND_ABOVE";

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub style: SystemPromptStyle,
    pub max_output_tokens: u32,
    pub safety_settings: bool,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            style: SystemPromptStyle::Instruction,
            max_output_tokens: MAX_OUTPUT_TOKENS,
            safety_settings: false,
        }
    }
}

fn turn_role(role: Role) -> TurnRole {
    match role {
        Role::User => TurnRole::User,
        Role::Assistant => TurnRole::Model,
    }
}

/// Builds the request for `new_user_text` following `prior`.
///
/// Failed turns (`error` set) are dropped from the history whatever their content.
/// `primer_reply` is only used by [`SystemPromptStyle::Primed`].
pub fn compose(
    settings: &GenerationSettings,
    system_prompt: &str,
    primer_reply: &str,
    prior: &[Message],
    new_user_text: &str
) -> GenerateContentRequest {
    let mut contents = Vec::with_capacity(prior.len() + 3);

    let system_instruction = match settings.style {
        SystemPromptStyle::Instruction =>
            Some(SystemInstruction {
                parts: vec![Part { text: system_prompt.to_string() }],
            }),
        SystemPromptStyle::Primed => {
            contents.push(Content::text(TurnRole::User, system_prompt));
            contents.push(Content::text(TurnRole::Model, primer_reply));
            None
        }
    };

    contents.extend(
        prior
            .iter()
            .filter(|m| !m.is_error())
            .map(|m| Content::text(turn_role(m.role), m.content.clone()))
    );
    contents.push(Content::text(TurnRole::User, new_user_text));

    let safety_settings = if settings.safety_settings {
        SAFETY_CATEGORIES.iter()
            .map(|category| SafetySetting {
                category: category.to_string(),
                threshold: SAFETY_THRESHOLD.to_string(),
            })
            .collect()
    } else {
        Vec::new()
    };

    GenerateContentRequest {
        system_instruction,
        contents,
        generation_config: GenerationConfig {
            temperature: TEMPERATURE,
            top_k: TOP_K,
            top_p: TOP_P,
            max_output_tokens: settings.max_output_tokens,
        },
        safety_settings,
    }
}
