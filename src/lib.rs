pub mod agent;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod error;
pub mod history;
pub mod llm;
pub mod markdown;
pub mod models;
pub mod server;

use agent::SessionController;
use cli::{ Args, Command };
use log::{ info, warn };
use server::api::AppState;
use server::Server;
use std::error::Error;
use std::sync::Arc;

fn log_configuration(args: &Args) {
    info!("--- Core Configuration ---");
    info!("Command: {:?}", args.command());
    info!("Gemini API Key: {}", if args.api_key().is_some() { "set" } else { "NOT SET" });
    info!("Gemini Base URL: {}", args.gemini_base_url);
    if args.models.is_empty() {
        info!("Gemini Models: built-in defaults");
    } else {
        info!("Gemini Models: {}", args.models.join(", "));
    }
    info!("Max Output Tokens: {}", args.max_output_tokens);
    info!("Request Timeout: {}s", args.request_timeout_secs);
    info!("Safety Settings: {}", args.safety_settings);
    info!("System Prompt Style: {}", args.system_prompt_style);
    info!("Prompts Path: {}", args.prompts_path.as_deref().unwrap_or("built-in"));
    if args.command() == Command::Chat {
        info!("State Store Type: {}", args.state_type);
        info!("State Path: {}", args.state_path);
        info!("Identity Delay: {}ms", args.identity_delay_ms);
    } else {
        info!("Server Address: {}", args.server_addr);
    }
    info!("-------------------------");
}

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    log_configuration(&args);

    match args.command() {
        Command::Serve => {
            let prompts = config::prompt::load_prompts(args.prompts_path.as_deref())?;
            let client = match llm::chat::new_client(&args.llm_config()?) {
                Ok(client) => Some(client),
                Err(e) => {
                    warn!("{}; /api/chat will answer 500 until it is set", e);
                    None
                }
            };
            let state = AppState {
                client,
                prompts,
                generation: args.generation_settings()?,
            };
            info!("Starting server on: {}", args.server_addr);
            let server = Server::new(args.server_addr.clone(), state);
            server.run().await?;
        }
        Command::Chat => {
            let controller = Arc::new(SessionController::from_args(&args)?);
            cli::repl::run_repl(controller).await?;
        }
    }

    Ok(())
}
