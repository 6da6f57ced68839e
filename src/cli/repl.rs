//! Line-oriented terminal front end over [`SessionController`].

use std::error::Error;
use std::sync::Arc;

use log::{ error, warn };
use tokio::io::{ AsyncBufReadExt, BufReader };
use tokio::sync::broadcast::error::RecvError;

use crate::agent::{ SendOutcome, SessionController, SessionEvent };
use crate::conversation::{ Recency, THEMES };
use crate::markdown;
use crate::models::chat::{ Message, Role };

const HELP: &str = "\
Commands:
  /new            start a new chat
  /list           list chats
  /switch N       switch to chat N from /list
  /rename TITLE   rename the current chat
  /dup            duplicate the current chat
  /delete         delete the current chat
  /theme [ID]     show or set the theme
  /html           print the last reply as HTML
  /help           show this help
  /quit           exit
Anything else is sent as a message.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Say(String),
    New,
    List,
    Switch(usize),
    Rename(String),
    Duplicate,
    Delete,
    Theme(Option<String>),
    Html,
    Help,
    Quit,
    Invalid(String),
}

pub fn parse_command(line: &str) -> ReplCommand {
    let line = line.trim();
    if !line.starts_with('/') {
        return ReplCommand::Say(line.to_string());
    }

    let (name, rest) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };

    match name {
        "/new" => ReplCommand::New,
        "/list" | "/ls" => ReplCommand::List,
        "/switch" =>
            match rest.parse::<usize>() {
                Ok(n) if n > 0 => ReplCommand::Switch(n),
                _ => ReplCommand::Invalid("Usage: /switch N (see /list)".into()),
            }
        "/rename" if !rest.is_empty() => ReplCommand::Rename(rest.to_string()),
        "/rename" => ReplCommand::Invalid("Usage: /rename TITLE".into()),
        "/dup" | "/duplicate" => ReplCommand::Duplicate,
        "/delete" => ReplCommand::Delete,
        "/theme" if rest.is_empty() => ReplCommand::Theme(None),
        "/theme" => ReplCommand::Theme(Some(rest.to_string())),
        "/html" => ReplCommand::Html,
        "/help" | "/?" => ReplCommand::Help,
        "/quit" | "/exit" => ReplCommand::Quit,
        other => ReplCommand::Invalid(format!("Unknown command {}. Try /help", other)),
    }
}

fn print_message(message: &Message) {
    let speaker = match message.role {
        Role::User => "you",
        Role::Assistant => "aperonix",
    };
    match &message.error {
        Some(error) => println!("{}> [error] {}", speaker, error),
        None => println!("{}> {}", speaker, message.content),
    }
}

async fn print_transcript(controller: &SessionController) {
    let store = controller.store();
    let store = store.lock().await;
    if let Some(session) = store.active_session() {
        println!("== {} ==", session.title);
        for message in &session.messages {
            print_message(message);
        }
    }
}

async fn print_list(controller: &SessionController) {
    let store = controller.store();
    let summaries = store.lock().await.summaries();
    let mut heading = None;
    for (i, summary) in summaries.iter().enumerate() {
        if heading != Some(summary.recency) {
            heading = Some(summary.recency);
            println!(
                "{}",
                match summary.recency {
                    Recency::Today => "Today",
                    Recency::Previous => "Previous",
                }
            );
        }
        let marker = if summary.active { "*" } else { " " };
        println!("{} {:>2}. {} ({} messages)", marker, i + 1, summary.title, summary.message_count);
    }
}

async fn active_id(controller: &SessionController) -> Option<String> {
    let store = controller.store();
    let store = store.lock().await;
    store.active_id().map(str::to_string)
}

/// Runs one command. Returns `false` when the loop should stop.
async fn dispatch(controller: &SessionController, command: ReplCommand) -> bool {
    let result = match command {
        ReplCommand::Say(text) =>
            match controller.send(&text).await {
                Ok(SendOutcome::Replied(reply)) => {
                    print_message(&reply);
                    Ok(())
                }
                Ok(SendOutcome::Busy) => {
                    println!("Still waiting on the previous reply.");
                    Ok(())
                }
                Ok(SendOutcome::Orphaned(_)) => {
                    println!("That chat was deleted before the reply arrived.");
                    Ok(())
                }
                Ok(SendOutcome::Ignored) => Ok(()),
                Err(e) => Err(e),
            }
        ReplCommand::New => controller.new_session().await.map(|_| println!("Started a new chat.")),
        ReplCommand::List => {
            print_list(controller).await;
            Ok(())
        }
        ReplCommand::Switch(n) => {
            let target = {
                let store = controller.store();
                let store = store.lock().await;
                store.sessions().get(n - 1).map(|s| s.id.clone())
            };
            match target {
                Some(id) => {
                    let result = controller.select(&id).await;
                    if result.is_ok() {
                        print_transcript(controller).await;
                    }
                    result
                }
                None => {
                    println!("No chat number {}.", n);
                    Ok(())
                }
            }
        }
        ReplCommand::Rename(title) =>
            match active_id(controller).await {
                Some(id) => controller.rename(&id, &title).await.map(|_| println!("Renamed.")),
                None => Ok(()),
            }
        ReplCommand::Duplicate =>
            match active_id(controller).await {
                Some(id) => controller.duplicate(&id).await.map(|_| println!("Duplicated; now on the copy.")),
                None => Ok(()),
            }
        ReplCommand::Delete =>
            match active_id(controller).await {
                Some(id) => {
                    let result = controller.delete(&id).await;
                    if result.is_ok() {
                        println!("Deleted.");
                        print_transcript(controller).await;
                    }
                    result
                }
                None => Ok(()),
            }
        ReplCommand::Theme(None) => {
            let store = controller.store();
            let current = store.lock().await.theme().to_string();
            println!("Theme: {} (available: {})", current, THEMES.join(", "));
            Ok(())
        }
        ReplCommand::Theme(Some(theme)) =>
            controller.set_theme(&theme).await.map(|_| println!("Theme set to {}.", theme)),
        ReplCommand::Html => {
            let store = controller.store();
            let store = store.lock().await;
            let last = store
                .active_session()
                .and_then(|s| s.messages.iter().rev().find(|m| m.role == Role::Assistant && !m.is_error()));
            match last {
                Some(message) => println!("{}", markdown::render(&message.content)),
                None => println!("No assistant reply yet."),
            }
            Ok(())
        }
        ReplCommand::Help => {
            println!("{}", HELP);
            Ok(())
        }
        ReplCommand::Invalid(message) => {
            println!("{}", message);
            Ok(())
        }
        ReplCommand::Quit => {
            return false;
        }
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        println!("Error: {}", e);
    }
    true
}

pub async fn run_repl(controller: Arc<SessionController>) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut events = controller.subscribe();
    let indicator = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Pending { pending: true, .. }) => println!("aperonix is thinking…"),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("Terminal missed {} session events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("Aperonix chat. Type /help for commands.");
    print_transcript(&controller).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if !dispatch(&controller, parse_command(&line)).await {
            break;
        }
    }

    indicator.abort();
    Ok(())
}
