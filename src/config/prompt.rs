use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::sync::Arc;
use log::{ info, warn };

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Aperonix AI, a highly intelligent, helpful, and friendly AI assistant powered by Google Gemini. Provide accurate, detailed, well-structured responses. Use Markdown formatting (headers, bullet points, bold, code blocks) where appropriate. Be concise yet thorough.";

pub const DEFAULT_PRIMER_REPLY: &str = "Understood! I am Aperonix AI, ready to help you.";

const OWNER_RESPONSE: &str = "I am Aperonix, created and owned by Mohammad Khan.";
const NAME_RESPONSE: &str = "My name is Aperonix. I am an AI assistant created and owned by Mohammad Khan.";
const ABOUT_RESPONSE: &str = "I am Aperonix, an AI assistant created and owned by Mohammad Khan. I'm here to help you with conversations and questions of all kinds.";

#[derive(Debug)]
pub enum PromptError {
    InvalidPattern(String),
    ResponseNotFound(String),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::InvalidPattern(msg) => write!(f, "Invalid identity pattern: {}", msg),
            PromptError::ResponseNotFound(key) => write!(f, "Identity response '{}' not found", key),
            PromptError::IoError(e) => write!(f, "Prompt file IO error: {}", e),
            PromptError::JsonError(e) => write!(f, "Prompt JSON parsing error: {}", e),
        }
    }
}

impl Error for PromptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PromptError::IoError(e) => Some(e),
            PromptError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PromptError {
    fn from(err: std::io::Error) -> Self {
        PromptError::IoError(err)
    }
}

impl From<serde_json::Error> for PromptError {
    fn from(err: serde_json::Error) -> Self {
        PromptError::JsonError(err)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct IdentityRule {
    pub pattern: String,
    pub response: String,
}

/// On-disk shape; every field is optional and falls back to the built-in value.
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct PromptFile {
    system_prompt: Option<String>,
    primer_reply: Option<String>,
    identity_rules: Option<Vec<IdentityRule>>,
    identity_responses: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone)]
pub struct PromptConfig {
    pub system_prompt: String,
    pub primer_reply: String,
    identity: Vec<(Regex, String)>,
}

fn default_rules() -> Vec<IdentityRule> {
    let rule = |pattern: &str, response: &str| IdentityRule {
        pattern: pattern.to_string(),
        response: response.to_string(),
    };
    vec![
        rule(r"what('s|’s|\s+is)\s+your\s+name", "your_name"),
        rule(r"who\s+(made|created|built|developed|owns?|is\s+your\s+(owner|creator))", "owner"),
        rule(r"who('s|’s|\s+is)\s+your\s+(owner|creator|developer|maker)", "owner"),
        rule(r"your\s+(owner|creator|developer|maker)", "owner"),
        rule(r"who\s+do\s+you\s+belong\s+to", "owner"),
        rule(r"who\s+are\s+you", "about_you"),
        rule(r"tell\s+me\s+about\s+(yourself|you)\b", "about_you"),
        rule(r"what\s+are\s+you\b", "about_you")
    ]
}

fn default_responses() -> HashMap<String, String> {
    HashMap::from([
        ("owner".to_string(), OWNER_RESPONSE.to_string()),
        ("your_name".to_string(), NAME_RESPONSE.to_string()),
        ("about_you".to_string(), ABOUT_RESPONSE.to_string()),
    ])
}

impl PromptConfig {
    pub fn new(
        system_prompt: String,
        primer_reply: String,
        rules: &[IdentityRule],
        responses: &HashMap<String, String>
    ) -> Result<Self, PromptError> {
        let mut identity = Vec::with_capacity(rules.len());
        for rule in rules {
            let regex = Regex::new(&format!("(?i){}", rule.pattern)).map_err(|e|
                PromptError::InvalidPattern(format!("'{}': {}", rule.pattern, e))
            )?;
            let response = responses
                .get(&rule.response)
                .ok_or_else(|| PromptError::ResponseNotFound(rule.response.clone()))?;
            identity.push((regex, response.clone()));
        }
        Ok(Self { system_prompt, primer_reply, identity })
    }

    /// Fixed local answer when `message` asks who the assistant is or who owns it.
    pub fn identity_response(&self, message: &str) -> Option<&str> {
        self.identity
            .iter()
            .find(|(regex, _)| regex.is_match(message))
            .map(|(_, response)| response.as_str())
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        let mut identity = Vec::new();
        let responses = default_responses();
        for rule in default_rules() {
            match (Regex::new(&format!("(?i){}", rule.pattern)), responses.get(&rule.response)) {
                (Ok(regex), Some(response)) => identity.push((regex, response.clone())),
                _ => warn!("Skipping built-in identity rule '{}'", rule.pattern),
            }
        }
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            primer_reply: DEFAULT_PRIMER_REPLY.to_string(),
            identity,
        }
    }
}

pub fn load_prompts_from_str(json: &str) -> Result<PromptConfig, PromptError> {
    let file: PromptFile = serde_json::from_str(json)?;
    let mut responses = default_responses();
    if let Some(extra) = file.identity_responses {
        responses.extend(extra);
    }
    let rules = file.identity_rules.unwrap_or_else(default_rules);
    PromptConfig::new(
        file.system_prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        file.primer_reply.unwrap_or_else(|| DEFAULT_PRIMER_REPLY.to_string()),
        &rules,
        &responses
    )
}

/// Built-in prompts, or the overrides in `path` when one is given.
pub fn load_prompts(path: Option<&str>) -> Result<Arc<PromptConfig>, PromptError> {
    match path {
        Some(path) => {
            let file_content = fs::read_to_string(path)?;
            let config = load_prompts_from_str(&file_content)?;
            info!("Loaded prompt configuration from '{}'", path);
            Ok(Arc::new(config))
        }
        None => Ok(Arc::new(PromptConfig::default())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_questions_match_case_insensitively() {
        let config = PromptConfig::default();
        assert_eq!(config.identity_response("who made you"), Some(OWNER_RESPONSE));
        assert_eq!(config.identity_response("WHO CREATED YOU?"), Some(OWNER_RESPONSE));
        assert_eq!(config.identity_response("Who do you belong to"), Some(OWNER_RESPONSE));
        assert_eq!(config.identity_response("What is your name?"), Some(NAME_RESPONSE));
        assert_eq!(config.identity_response("what's your name"), Some(NAME_RESPONSE));
        assert_eq!(config.identity_response("Tell me about yourself"), Some(ABOUT_RESPONSE));
    }

    #[test]
    fn ordinary_questions_do_not_match() {
        let config = PromptConfig::default();
        assert_eq!(config.identity_response("How do I sort a Vec in Rust?"), None);
        assert_eq!(config.identity_response("What are your thoughts on tabs?"), None);
        assert_eq!(config.identity_response("what is the name of this river"), None);
    }

    #[test]
    fn file_overrides_merge_with_defaults() {
        let json = r#"{
            "system_prompt": "Be brief.",
            "identity_rules": [{"pattern": "are\\s+you\\s+a\\s+bot", "response": "bot"}],
            "identity_responses": {"bot": "I am a language model assistant."}
        }"#;
        let config = load_prompts_from_str(json).unwrap();
        assert_eq!(config.system_prompt, "Be brief.");
        assert_eq!(config.primer_reply, DEFAULT_PRIMER_REPLY);
        assert_eq!(config.identity_response("Are you a bot?"), Some("I am a language model assistant."));
        assert_eq!(config.identity_response("who made you"), None);
    }

    #[test]
    fn bad_rules_are_reported() {
        let json = r#"{"identity_rules": [{"pattern": "(unclosed", "response": "owner"}]}"#;
        assert!(matches!(load_prompts_from_str(json), Err(PromptError::InvalidPattern(_))));

        let json = r#"{"identity_rules": [{"pattern": "hi", "response": "missing"}]}"#;
        assert!(matches!(load_prompts_from_str(json), Err(PromptError::ResponseNotFound(_))));
    }

    #[test]
    fn prompts_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.json");
        fs::write(&path, r#"{"primer_reply": "Ready."}"#).unwrap();

        let config = load_prompts(path.to_str()).unwrap();
        assert_eq!(config.primer_reply, "Ready.");
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert!(load_prompts(None).unwrap().identity_response("who are you").is_some());
    }
}
