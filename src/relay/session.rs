//! Per-session conversation state.
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use uuid::Uuid;

use crate::ollama::Message;

/// The ordered turns of one conversation, oldest first. Only ever
/// appended to.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct History(Vec<Message>);

impl History {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn new_with_messages(messages: Vec<Message>) -> Self {
        Self(messages)
    }

    pub fn messages(&self) -> &[Message] {
        &self.0
    }

    pub fn push(&mut self, msg: Message) {
        self.0.push(msg)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.0.iter()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub turns: usize,
}

/// Maps a session ID to its history.
///
/// Cloning is cheap and every clone shares the same map. The lock is
/// only held for the duration of a single get or set, so callers get
/// a copy of the history to work on and write it back in full.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, History>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new session with an empty history and returns its ID.
    pub fn start(&self) -> String {
        let session_id = Uuid::new_v4().to_string();
        self.start_with_id(&session_id);
        session_id
    }

    /// Starts the session `session_id`, discarding any history it
    /// already had.
    pub fn start_with_id(&self, session_id: &str) {
        self.sessions
            .write()
            .expect("Unable to write sessions")
            .insert(session_id.to_string(), History::new());
    }

    pub fn get(&self, session_id: &str) -> Option<History> {
        self.sessions
            .read()
            .expect("Unable to read sessions")
            .get(session_id)
            .cloned()
    }

    pub fn set(&self, session_id: &str, history: History) {
        self.sessions
            .write()
            .expect("Unable to write sessions")
            .insert(session_id.to_string(), history);
    }

    /// Ends the session and returns the history it had.
    pub fn end(&self, session_id: &str) -> Option<History> {
        self.sessions
            .write()
            .expect("Unable to write sessions")
            .remove(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().expect("Unable to read sessions").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A page of sessions ordered by ID.
    pub fn list(&self, limit: usize, offset: usize) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().expect("Unable to read sessions");
        let mut summaries = sessions
            .iter()
            .map(|(id, history)| SessionSummary {
                id: id.clone(),
                turns: history.len(),
            })
            .collect::<Vec<_>>();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries.into_iter().skip(offset).take(limit).collect()
    }
}
