use std::collections::HashSet;
use std::error::Error;
use std::sync::{ Arc, Mutex as StdMutex };
use std::time::Duration;

use log::{ debug, error, info, warn };
use tokio::sync::{ broadcast, Mutex };

use crate::cli::Args;
use crate::config::prompt::{ self, PromptConfig };
use crate::conversation::ConversationStore;
use crate::error::ChatError;
use crate::history::initialize_state_store;
use crate::llm::chat::{ new_client as new_chat_client, ChatClient, NO_RESPONSE };
use crate::llm::compose::{ compose, GenerationSettings };
use crate::models::chat::Message;

const EVENT_CAPACITY: usize = 64;

/// Notifications for whatever renders the conversation list and transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SessionsChanged,
    ActiveChanged {
        session_id: String,
    },
    MessageAppended {
        session_id: String,
        message: Message,
    },
    Pending {
        session_id: String,
        pending: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Input was blank.
    Ignored,
    /// The session already has a request in flight.
    Busy,
    /// The assistant message that settled the exchange, successful or failed.
    Replied(Message),
    /// The session was deleted while the request was in flight; the reply was not stored.
    Orphaned(Message),
}

/// Removes the session from the in-flight set when dropped.
struct InFlightGuard<'a> {
    in_flight: &'a StdMutex<HashSet<String>>,
    session_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| {
            warn!("In-flight set lock poisoned, recovering");
            e.into_inner()
        });
        set.remove(&self.session_id);
    }
}

pub struct SessionController {
    store: Arc<Mutex<ConversationStore>>,
    client: Option<Arc<dyn ChatClient>>,
    prompts: Arc<PromptConfig>,
    generation: GenerationSettings,
    identity_delay: Duration,
    in_flight: StdMutex<HashSet<String>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    pub fn new(
        store: ConversationStore,
        client: Option<Arc<dyn ChatClient>>,
        prompts: Arc<PromptConfig>,
        generation: GenerationSettings,
        identity_delay: Duration
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store: Arc::new(Mutex::new(store)),
            client,
            prompts,
            generation,
            identity_delay,
            in_flight: StdMutex::new(HashSet::new()),
            events,
        }
    }

    pub fn from_args(args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let prompts = prompt::load_prompts(args.prompts_path.as_deref())?;
        let backend = initialize_state_store(args)?;
        let store = ConversationStore::init(backend)?;

        let client = match new_chat_client(&args.llm_config()?) {
            Ok(client) => {
                info!("Chat client configured with models {:?}", client.models());
                Some(client)
            }
            Err(e) => {
                warn!("Chat client unavailable: {}", e);
                None
            }
        };

        Ok(
            Self::new(
                store,
                client,
                prompts,
                args.generation_settings()?,
                Duration::from_millis(args.identity_delay_ms)
            )
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> Arc<Mutex<ConversationStore>> {
        Arc::clone(&self.store)
    }

    pub fn is_pending(&self, session_id: &str) -> bool {
        self.lock_in_flight().contains(session_id)
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.in_flight.lock().unwrap_or_else(|e| {
            warn!("In-flight set lock poisoned, recovering");
            e.into_inner()
        })
    }

    fn try_begin(&self, session_id: &str) -> Option<InFlightGuard<'_>> {
        let mut set = self.lock_in_flight();
        if !set.insert(session_id.to_string()) {
            return None;
        }
        Some(InFlightGuard { in_flight: &self.in_flight, session_id: session_id.to_string() })
    }

    /// Sends `text` on the active session and waits for the reply.
    ///
    /// Provider failures come back as a failed assistant message. Only local
    /// persistence errors are returned as `Err`.
    pub async fn send(&self, text: &str) -> Result<SendOutcome, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SendOutcome::Ignored);
        }

        let session_id = {
            let mut store = self.store.lock().await;
            store.ensure_active()?;
            store
                .active_id()
                .map(str::to_string)
                .ok_or_else(|| ChatError::Configuration("No active chat session".into()))?
        };

        let _guard = match self.try_begin(&session_id) {
            Some(guard) => guard,
            None => {
                debug!("Session {} is busy, ignoring send", session_id);
                return Ok(SendOutcome::Busy);
            }
        };

        let (prior, user_message) = {
            let mut store = self.store.lock().await;
            let prior = store
                .session(&session_id)
                .map(|s| s.messages.clone())
                .ok_or_else(|| ChatError::NotFound(session_id.clone()))?;
            let user_message = store.append_message(&session_id, Message::user(text))?;
            (prior, user_message)
        };
        self.emit(SessionEvent::MessageAppended {
            session_id: session_id.clone(),
            message: user_message,
        });
        self.emit(SessionEvent::SessionsChanged);
        self.emit(SessionEvent::Pending { session_id: session_id.clone(), pending: true });

        let reply = self.reply_to(&prior, text).await;

        let appended = {
            let mut store = self.store.lock().await;
            store.append_message(&session_id, reply.clone())
        };
        drop(_guard);
        self.emit(SessionEvent::Pending { session_id: session_id.clone(), pending: false });

        let reply = match appended {
            Ok(reply) => reply,
            Err(ChatError::NotFound(_)) => {
                warn!("Session {} was deleted before its reply arrived, dropping the reply", session_id);
                return Ok(SendOutcome::Orphaned(reply));
            }
            Err(e) => {
                return Err(e);
            }
        };
        self.emit(SessionEvent::MessageAppended {
            session_id: session_id.clone(),
            message: reply.clone(),
        });
        self.emit(SessionEvent::SessionsChanged);
        Ok(SendOutcome::Replied(reply))
    }

    async fn reply_to(&self, prior: &[Message], text: &str) -> Message {
        if let Some(response) = self.prompts.identity_response(text) {
            debug!("Answering identity question locally");
            tokio::time::sleep(self.identity_delay).await;
            return Message::assistant(response);
        }

        let client = match &self.client {
            Some(client) => client,
            None => {
                return Message::failed(ChatError::missing_api_key().to_string());
            }
        };

        let request = compose(
            &self.generation,
            &self.prompts.system_prompt,
            &self.prompts.primer_reply,
            prior,
            text
        );

        match client.complete(&request).await {
            Ok(content) if content.trim().is_empty() => Message::assistant(NO_RESPONSE),
            Ok(content) => Message::assistant(content),
            Err(e) => {
                error!("Completion failed: {:?}", e);
                Message::failed(e.to_string())
            }
        }
    }

    pub async fn new_session(&self) -> Result<String, ChatError> {
        let session = self.store.lock().await.create_session()?;
        self.emit(SessionEvent::SessionsChanged);
        self.emit(SessionEvent::ActiveChanged { session_id: session.id.clone() });
        Ok(session.id)
    }

    pub async fn select(&self, id: &str) -> Result<(), ChatError> {
        self.store.lock().await.select_session(id)?;
        self.emit(SessionEvent::ActiveChanged { session_id: id.to_string() });
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<(), ChatError> {
        let active = {
            let mut store = self.store.lock().await;
            store.delete_session(id)?;
            store.active_id().map(str::to_string)
        };
        self.emit(SessionEvent::SessionsChanged);
        if let Some(session_id) = active {
            self.emit(SessionEvent::ActiveChanged { session_id });
        }
        Ok(())
    }

    pub async fn duplicate(&self, id: &str) -> Result<String, ChatError> {
        let copy = self.store.lock().await.duplicate_session(id)?;
        self.emit(SessionEvent::SessionsChanged);
        self.emit(SessionEvent::ActiveChanged { session_id: copy.id.clone() });
        Ok(copy.id)
    }

    pub async fn rename(&self, id: &str, title: &str) -> Result<bool, ChatError> {
        let renamed = self.store.lock().await.rename_session(id, title)?;
        if renamed {
            self.emit(SessionEvent::SessionsChanged);
        }
        Ok(renamed)
    }

    pub async fn set_theme(&self, theme: &str) -> Result<(), ChatError> {
        self.store.lock().await.set_theme(theme)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryStore;
    use crate::llm::chat::testing::ScriptedClient;
    use crate::models::chat::Role;
    use crate::models::gemini::TurnRole;
    use tokio::sync::Notify;

    fn controller(client: Option<Arc<dyn ChatClient>>) -> SessionController {
        let store = ConversationStore::init(Arc::new(MemoryStore::new())).unwrap();
        SessionController::new(
            store,
            client,
            Arc::new(PromptConfig::default()),
            GenerationSettings::default(),
            Duration::from_millis(1)
        )
    }

    async fn active_messages(controller: &SessionController) -> Vec<Message> {
        let store = controller.store();
        let store = store.lock().await;
        store.active_session().unwrap().messages.clone()
    }

    #[tokio::test]
    async fn successful_exchange_appends_both_turns() {
        let client = Arc::new(ScriptedClient::new(vec![Ok("Hello there".into())]));
        let controller = controller(Some(client.clone()));

        let outcome = controller.send("  Hi  ").await.unwrap();
        let reply = match outcome {
            SendOutcome::Replied(reply) => reply,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(reply.content, "Hello there");

        let messages = active_messages(&controller).await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "Hi");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn identity_questions_never_reach_the_client() {
        let client = Arc::new(ScriptedClient::new(vec![]));
        let controller = controller(Some(client.clone()));

        let outcome = controller.send("Who made you?").await.unwrap();
        match outcome {
            SendOutcome::Replied(reply) => assert!(reply.content.contains("Mohammad Khan")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn identity_questions_are_answered_without_a_key() {
        let controller = controller(None);
        match controller.send("what is your name").await.unwrap() {
            SendOutcome::Replied(reply) => {
                assert!(!reply.is_error());
                assert!(reply.content.starts_with("My name is Aperonix"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_client_yields_a_configuration_message() {
        let controller = controller(None);
        match controller.send("Explain lifetimes").await.unwrap() {
            SendOutcome::Replied(reply) => {
                assert!(reply.is_error());
                assert!(reply.content.is_empty());
                assert!(reply.error.unwrap().contains("GEMINI_API_KEY"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn failures_are_kept_but_left_out_of_later_history() {
        let client = Arc::new(
            ScriptedClient::new(
                vec![
                    Err(ChatError::Api { status: 500, message: "backend exploded".into() }),
                    Ok("second answer".into())
                ]
            )
        );
        let controller = controller(Some(client.clone()));

        match controller.send("first").await.unwrap() {
            SendOutcome::Replied(reply) => {
                assert_eq!(
                    reply.error.as_deref(),
                    Some("API connection failed (HTTP 500): backend exploded")
                );
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        controller.send("second").await.unwrap();

        let requests = client.requests.lock().unwrap();
        let second = &requests[1];
        let turns: Vec<(TurnRole, &str)> = second.contents
            .iter()
            .map(|c| (c.role, c.parts[0].text.as_str()))
            .collect();
        assert_eq!(turns, vec![(TurnRole::User, "first"), (TurnRole::User, "second")]);
        drop(requests);

        assert_eq!(active_messages(&controller).await.len(), 4);
    }

    #[tokio::test]
    async fn empty_completion_is_replaced() {
        let client = Arc::new(ScriptedClient::new(vec![Ok("   ".into())]));
        let controller = controller(Some(client));
        match controller.send("hello").await.unwrap() {
            SendOutcome::Replied(reply) => assert_eq!(reply.content, NO_RESPONSE),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let client = Arc::new(ScriptedClient::new(vec![]));
        let controller = controller(Some(client.clone()));
        assert_eq!(controller.send(" \n\t ").await.unwrap(), SendOutcome::Ignored);
        assert!(active_messages(&controller).await.is_empty());
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn second_send_while_pending_is_rejected() {
        let gate = Arc::new(Notify::new());
        let client = Arc::new(ScriptedClient::gated(vec![Ok("done".into())], gate.clone()));
        let controller = Arc::new(controller(Some(client.clone())));
        let mut events = controller.subscribe();

        let first = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.send("one").await })
        };

        loop {
            if let SessionEvent::Pending { pending: true, .. } = events.recv().await.unwrap() {
                break;
            }
        }

        assert_eq!(controller.send("two").await.unwrap(), SendOutcome::Busy);
        let session_id = controller.store().lock().await.active_id().unwrap().to_string();
        assert!(controller.is_pending(&session_id));

        // The client may not have registered its waiter yet; `notify_one` stores a permit.
        gate.notify_one();
        let outcome = first.await.unwrap().unwrap();
        assert!(matches!(outcome, SendOutcome::Replied(_)));
        assert!(!controller.is_pending(&session_id));
        assert_eq!(active_messages(&controller).await.len(), 2);
    }

    #[tokio::test]
    async fn reply_for_a_deleted_session_is_orphaned() {
        let gate = Arc::new(Notify::new());
        let client = Arc::new(ScriptedClient::gated(vec![Ok("late answer".into())], gate.clone()));
        let controller = Arc::new(controller(Some(client)));
        let mut events = controller.subscribe();

        let first = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.send("one").await })
        };
        loop {
            if let SessionEvent::Pending { pending: true, .. } = events.recv().await.unwrap() {
                break;
            }
        }

        let doomed = controller.store().lock().await.active_id().unwrap().to_string();
        controller.delete(&doomed).await.unwrap();
        gate.notify_one();

        match first.await.unwrap().unwrap() {
            SendOutcome::Orphaned(reply) => assert_eq!(reply.content, "late answer"),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!controller.is_pending(&doomed));
        let store = controller.store();
        let store = store.lock().await;
        assert!(store.session(&doomed).is_none());
        assert!(store.active_session().unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn session_wrappers_emit_events() {
        let controller = controller(None);
        let mut events = controller.subscribe();

        let id = controller.new_session().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), SessionEvent::SessionsChanged);
        assert_eq!(events.recv().await.unwrap(), SessionEvent::ActiveChanged { session_id: id.clone() });

        assert!(controller.rename(&id, "Renamed").await.unwrap());
        assert_eq!(events.recv().await.unwrap(), SessionEvent::SessionsChanged);

        let copy = controller.duplicate(&id).await.unwrap();
        assert_ne!(copy, id);
        assert!(matches!(controller.select("missing").await, Err(ChatError::NotFound(_))));
        assert!(matches!(controller.set_theme("neon").await, Err(ChatError::Validation(_))));
    }
}
