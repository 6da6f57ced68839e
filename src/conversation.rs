//! Local chat sessions and their persistence.
//!
//! [`ConversationStore`] owns the ordered session list (most recent first) and the
//! active session id. Every mutation writes a full snapshot through the
//! [`KeyValueStore`] it was built with; nothing else performs I/O.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{ Local, TimeZone };
use log::{ info, warn };

use crate::error::ChatError;
use crate::history::KeyValueStore;
use crate::models::chat::{ derive_title, now_millis, ChatSession, Message, Role };

pub const CHATS_KEY: &str = "aperonix-chats";
pub const ACTIVE_KEY: &str = "aperonix-active";
pub const THEME_KEY: &str = "aperonix-theme";

pub const THEMES: [&str; 4] = ["midnight", "purple", "emerald", "light"];
pub const DEFAULT_THEME: &str = "midnight";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recency {
    Today,
    Previous,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub message_count: usize,
    pub updated_at: i64,
    pub recency: Recency,
    pub active: bool,
}

pub struct ConversationStore {
    backend: Arc<dyn KeyValueStore>,
    sessions: Vec<ChatSession>,
    active_id: Option<String>,
    theme: String,
}

impl ConversationStore {
    /// An empty, unloaded store. Most callers want [`ConversationStore::init`].
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            sessions: Vec::new(),
            active_id: None,
            theme: DEFAULT_THEME.to_string(),
        }
    }

    /// Loads persisted state and guarantees an active session exists.
    pub fn init(backend: Arc<dyn KeyValueStore>) -> Result<Self, ChatError> {
        let mut store = Self::new(backend);
        store.load()?;
        store.ensure_active()?;
        info!(
            "Loaded {} chat session(s), active: {}",
            store.sessions.len(),
            store.active_id.as_deref().unwrap_or("none")
        );
        Ok(store)
    }

    /// Replaces in-memory state with the persisted records. Absent or malformed
    /// records fall back to empty defaults.
    pub fn load(&mut self) -> Result<(), ChatError> {
        self.sessions = match self.backend.get(CHATS_KEY)? {
            Some(raw) => parse_sessions(&raw),
            None => Vec::new(),
        };
        for session in self.sessions.iter_mut() {
            if session.has_placeholder_title() {
                if let Some(first) = session.messages.iter().find(|m| m.role == Role::User) {
                    session.title = derive_title(&first.content);
                }
            }
        }

        self.active_id = self.backend
            .get(ACTIVE_KEY)?
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        self.theme = self.backend
            .get(THEME_KEY)?
            .filter(|t| THEMES.contains(&t.as_str()))
            .unwrap_or_else(|| DEFAULT_THEME.to_string());

        Ok(())
    }

    /// Writes sessions and the active id as one snapshot.
    pub fn save(&self) -> Result<(), ChatError> {
        let chats = serde_json::to_string(&self.sessions).map_err(|e| ChatError::Storage(e.to_string()))?;
        let mut entries = vec![(CHATS_KEY, chats)];
        if let Some(active) = &self.active_id {
            entries.push((ACTIVE_KEY, active.clone()));
        }
        self.backend.set_many(&entries)?;
        Ok(())
    }

    /// Repairs a missing or stale active id: first remaining session, or a fresh one.
    pub fn ensure_active(&mut self) -> Result<(), ChatError> {
        let valid = self.active_id.as_deref().map(|id| self.index_of(id).is_some()).unwrap_or(false);
        if valid {
            return Ok(());
        }
        match self.sessions.first() {
            Some(first) => {
                self.active_id = Some(first.id.clone());
                self.save()
            }
            None => self.create_session().map(|_| ()),
        }
    }

    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    pub fn session(&self, id: &str) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn active_session(&self) -> Option<&ChatSession> {
        self.active_id.as_deref().and_then(|id| self.session(id))
    }

    pub fn theme(&self) -> &str {
        &self.theme
    }

    pub fn create_session(&mut self) -> Result<ChatSession, ChatError> {
        let session = ChatSession::new();
        self.sessions.insert(0, session.clone());
        self.active_id = Some(session.id.clone());
        self.save()?;
        Ok(session)
    }

    pub fn select_session(&mut self, id: &str) -> Result<(), ChatError> {
        self.require(id)?;
        self.active_id = Some(id.to_string());
        self.save()
    }

    pub fn delete_session(&mut self, id: &str) -> Result<(), ChatError> {
        let idx = self.require(id)?;
        self.sessions.remove(idx);

        if self.active_id.as_deref() == Some(id) {
            self.active_id = None;
            if let Some(first) = self.sessions.first() {
                self.active_id = Some(first.id.clone());
            } else {
                info!("Deleted the last chat session, starting a fresh one");
                return self.create_session().map(|_| ());
            }
        }
        self.save()
    }

    pub fn duplicate_session(&mut self, id: &str) -> Result<ChatSession, ChatError> {
        let idx = self.require(id)?;
        let source = &self.sessions[idx];
        let now = now_millis();
        let copy = ChatSession {
            id: crate::models::chat::new_id(),
            title: format!("{} (copy)", source.title),
            custom_title: source.custom_title,
            messages: source.messages.clone(),
            created_at: now,
            updated_at: now,
        };
        self.sessions.insert(idx + 1, copy.clone());
        self.active_id = Some(copy.id.clone());
        self.save()?;
        Ok(copy)
    }

    /// Returns `false` when the new title is blank and nothing changed.
    pub fn rename_session(&mut self, id: &str, title: &str) -> Result<bool, ChatError> {
        let idx = self.require(id)?;
        let title = title.trim();
        if title.is_empty() {
            return Ok(false);
        }
        let session = &mut self.sessions[idx];
        session.title = title.to_string();
        session.custom_title = true;
        self.save()?;
        Ok(true)
    }

    /// Appends in call order; timestamps are clamped so they never go backwards.
    pub fn append_message(&mut self, session_id: &str, mut message: Message) -> Result<Message, ChatError> {
        let idx = self.require(session_id)?;
        let session = &mut self.sessions[idx];

        if let Some(last) = session.messages.last() {
            message.timestamp = message.timestamp.max(last.timestamp);
        }
        if session.messages.is_empty() && session.has_placeholder_title() {
            session.title = derive_title(&message.content);
        }
        session.updated_at = now_millis().max(session.updated_at).max(message.timestamp);
        session.messages.push(message.clone());

        self.save()?;
        Ok(message)
    }

    pub fn set_theme(&mut self, theme: &str) -> Result<(), ChatError> {
        if !THEMES.contains(&theme) {
            return Err(ChatError::Validation(format!("Unknown theme '{}'", theme)));
        }
        self.theme = theme.to_string();
        self.backend.set(THEME_KEY, theme)?;
        Ok(())
    }

    /// List-view rows in display order, bucketed by local calendar day.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let today = Local::now().date_naive();
        self.sessions
            .iter()
            .map(|s| {
                let day = Local.timestamp_millis_opt(s.updated_at).single().map(|t| t.date_naive());
                SessionSummary {
                    id: s.id.clone(),
                    title: s.title.clone(),
                    message_count: s.messages.len(),
                    updated_at: s.updated_at,
                    recency: if day == Some(today) { Recency::Today } else { Recency::Previous },
                    active: self.active_id.as_deref() == Some(s.id.as_str()),
                }
            })
            .collect()
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.sessions.iter().position(|s| s.id == id)
    }

    fn require(&self, id: &str) -> Result<usize, ChatError> {
        self.index_of(id).ok_or_else(|| ChatError::NotFound(id.to_string()))
    }
}

/// Accepts the current list shape and the older id-keyed object shape.
fn parse_sessions(raw: &str) -> Vec<ChatSession> {
    if let Ok(list) = serde_json::from_str::<Vec<ChatSession>>(raw) {
        return list;
    }
    match serde_json::from_str::<HashMap<String, ChatSession>>(raw) {
        Ok(map) => {
            let mut list: Vec<ChatSession> = map.into_values().collect();
            list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
            list
        }
        Err(e) => {
            warn!("Stored chats are malformed, starting with an empty list: {}", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryStore;
    use crate::models::chat::DEFAULT_TITLE;

    fn fresh() -> (Arc<MemoryStore>, ConversationStore) {
        let backend = Arc::new(MemoryStore::new());
        let store = ConversationStore::init(backend.clone()).unwrap();
        (backend, store)
    }

    fn persisted_sessions(backend: &MemoryStore) -> Vec<ChatSession> {
        let raw = backend.get(CHATS_KEY).unwrap().unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn init_creates_one_active_session() {
        let (backend, store) = fresh();
        assert_eq!(store.sessions().len(), 1);
        let active = store.active_session().unwrap();
        assert_eq!(active.title, DEFAULT_TITLE);
        assert!(active.messages.is_empty());
        assert_eq!(backend.get(ACTIVE_KEY).unwrap().as_deref(), Some(active.id.as_str()));
    }

    #[test]
    fn new_sessions_go_to_the_front_and_become_active() {
        let (_, mut store) = fresh();
        let first = store.sessions()[0].id.clone();
        let created = store.create_session().unwrap();
        assert_eq!(store.sessions()[0].id, created.id);
        assert_eq!(store.sessions()[1].id, first);
        assert_eq!(store.active_id(), Some(created.id.as_str()));
    }

    #[test]
    fn selecting_unknown_session_fails() {
        let (_, mut store) = fresh();
        let before = store.active_id().map(str::to_string);
        assert_eq!(store.select_session("nope"), Err(ChatError::NotFound("nope".into())));
        assert_eq!(store.active_id().map(str::to_string), before);
    }

    #[test]
    fn deleting_the_only_session_leaves_a_fresh_one() {
        let (backend, mut store) = fresh();
        let only = store.sessions()[0].id.clone();
        store.append_message(&only, Message::user("hello")).unwrap();

        store.delete_session(&only).unwrap();

        assert_eq!(store.sessions().len(), 1);
        let replacement = &store.sessions()[0];
        assert_ne!(replacement.id, only);
        assert!(replacement.messages.is_empty());
        assert_eq!(store.active_id(), Some(replacement.id.as_str()));
        assert_eq!(persisted_sessions(&backend).len(), 1);
    }

    #[test]
    fn deleting_the_active_session_activates_the_most_recent() {
        let (_, mut store) = fresh();
        let oldest = store.sessions()[0].id.clone();
        let middle = store.create_session().unwrap().id;
        let newest = store.create_session().unwrap().id;

        store.select_session(&middle).unwrap();
        store.delete_session(&middle).unwrap();
        assert_eq!(store.active_id(), Some(newest.as_str()));

        store.delete_session(&oldest).unwrap();
        assert_eq!(store.active_id(), Some(newest.as_str()));
        assert_eq!(store.sessions().len(), 1);
    }

    #[test]
    fn duplicate_is_a_deep_copy_placed_after_the_source() {
        let (_, mut store) = fresh();
        let source = store.sessions()[0].id.clone();
        store.append_message(&source, Message::user("first question")).unwrap();
        store.append_message(&source, Message::assistant("answer")).unwrap();
        let other = store.create_session().unwrap().id;

        let copy = store.duplicate_session(&source).unwrap();

        let order: Vec<&str> = store.sessions().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(order, vec![other.as_str(), source.as_str(), copy.id.as_str()]);
        assert_eq!(copy.title, "first question (copy)");
        assert_eq!(store.active_id(), Some(copy.id.as_str()));

        store.append_message(&copy.id, Message::user("only in the copy")).unwrap();
        assert_eq!(store.session(&source).unwrap().messages.len(), 2);
        assert_eq!(store.session(&copy.id).unwrap().messages.len(), 3);
    }

    #[test]
    fn duplicate_of_unknown_session_fails() {
        let (_, mut store) = fresh();
        assert!(matches!(store.duplicate_session("ghost"), Err(ChatError::NotFound(_))));
    }

    #[test]
    fn blank_rename_is_a_no_op() {
        let (_, mut store) = fresh();
        let id = store.sessions()[0].id.clone();
        assert!(!store.rename_session(&id, "   ").unwrap());
        assert_eq!(store.session(&id).unwrap().title, DEFAULT_TITLE);

        assert!(store.rename_session(&id, "  Trip plans ").unwrap());
        assert_eq!(store.session(&id).unwrap().title, "Trip plans");
    }

    #[test]
    fn append_preserves_order_and_refreshes_updated_at() {
        let (_, mut store) = fresh();
        let id = store.sessions()[0].id.clone();
        let mut last_updated = store.session(&id).unwrap().updated_at;

        for i in 0..5 {
            let msg = if i % 2 == 0 {
                Message::user(format!("q{}", i))
            } else {
                Message::assistant(format!("a{}", i))
            };
            store.append_message(&id, msg).unwrap();
            let updated = store.session(&id).unwrap().updated_at;
            assert!(updated >= last_updated);
            last_updated = updated;
        }

        let session = store.session(&id).unwrap();
        let contents: Vec<&str> = session.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q0", "a1", "q2", "a3", "q4"]);
        assert!(session.messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn backwards_clock_is_clamped() {
        let (_, mut store) = fresh();
        let id = store.sessions()[0].id.clone();
        let first = store.append_message(&id, Message::user("now")).unwrap();
        let mut stale = Message::assistant("from the past");
        stale.timestamp = first.timestamp - 10_000;
        let stored = store.append_message(&id, stale).unwrap();
        assert_eq!(stored.timestamp, first.timestamp);
    }

    #[test]
    fn first_message_sets_title_once() {
        let (_, mut store) = fresh();
        let id = store.sessions()[0].id.clone();
        let long = "Explain how borrow checking works in a language with ownership semantics";
        store.append_message(&id, Message::user(long)).unwrap();
        store.append_message(&id, Message::user("and lifetimes?")).unwrap();

        let title = &store.session(&id).unwrap().title;
        assert!(title.ends_with('…'));
        assert!(long.starts_with(title.trim_end_matches('…')));
    }

    #[test]
    fn user_title_is_never_overwritten() {
        let (_, mut store) = fresh();
        let id = store.sessions()[0].id.clone();
        store.rename_session(&id, "New Chat").unwrap();
        store.append_message(&id, Message::user("should not become the title")).unwrap();
        assert_eq!(store.session(&id).unwrap().title, "New Chat");
    }

    #[test]
    fn state_reloads_from_backend() {
        let (backend, mut store) = fresh();
        let id = store.sessions()[0].id.clone();
        store.append_message(&id, Message::user("persist me")).unwrap();
        store.append_message(&id, Message::failed("boom")).unwrap();
        let second = store.create_session().unwrap().id;

        let reloaded = ConversationStore::init(backend).unwrap();
        assert_eq!(reloaded.active_id(), Some(second.as_str()));
        let restored = reloaded.session(&id).unwrap();
        assert_eq!(restored.messages.len(), 2);
        assert_eq!(restored.messages[1].error.as_deref(), Some("boom"));
    }

    #[test]
    fn malformed_records_fall_back_to_defaults() {
        let backend = Arc::new(MemoryStore::new());
        backend.set(CHATS_KEY, "][ definitely not json").unwrap();
        backend.set(ACTIVE_KEY, "missing-id").unwrap();
        backend.set(THEME_KEY, "neon-pink").unwrap();

        let store = ConversationStore::init(backend).unwrap();
        assert_eq!(store.sessions().len(), 1);
        assert_eq!(store.active_id(), Some(store.sessions()[0].id.as_str()));
        assert_eq!(store.theme(), DEFAULT_THEME);
    }

    #[test]
    fn stale_active_id_falls_back_to_first_session() {
        let backend = Arc::new(MemoryStore::new());
        let a = ChatSession::new();
        let b = ChatSession::new();
        backend.set(CHATS_KEY, &serde_json::to_string(&vec![a.clone(), b]).unwrap()).unwrap();
        backend.set(ACTIVE_KEY, "deleted-elsewhere").unwrap();

        let store = ConversationStore::init(backend).unwrap();
        assert_eq!(store.sessions().len(), 2);
        assert_eq!(store.active_id(), Some(a.id.as_str()));
    }

    #[test]
    fn keyed_object_records_are_ordered_by_recency() {
        let backend = Arc::new(MemoryStore::new());
        let raw = r#"{
            "old": {"id":"old","messages":[{"role":"user","content":"older chat","timestamp":1}],"createdAt":1,"updatedAt":10},
            "new": {"id":"new","messages":[],"createdAt":2,"updatedAt":20}
        }"#;
        backend.set(CHATS_KEY, raw).unwrap();

        let store = ConversationStore::init(backend).unwrap();
        let ids: Vec<&str> = store.sessions().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(store.session("old").unwrap().title, "older chat");
        assert_eq!(store.active_id(), Some("new"));
    }

    #[test]
    fn theme_is_validated_and_persisted() {
        let (backend, mut store) = fresh();
        assert!(matches!(store.set_theme("sepia"), Err(ChatError::Validation(_))));
        store.set_theme("emerald").unwrap();
        assert_eq!(backend.get(THEME_KEY).unwrap().as_deref(), Some("emerald"));

        let reloaded = ConversationStore::init(backend).unwrap();
        assert_eq!(reloaded.theme(), "emerald");
    }

    #[test]
    fn summaries_follow_display_order() {
        let (_, mut store) = fresh();
        let id = store.sessions()[0].id.clone();
        store.append_message(&id, Message::user("hello there")).unwrap();
        store.create_session().unwrap();

        let rows = store.summaries();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].active);
        assert_eq!(rows[1].title, "hello there");
        assert_eq!(rows[1].message_count, 1);
        assert_eq!(rows[1].recency, Recency::Today);
    }
}
