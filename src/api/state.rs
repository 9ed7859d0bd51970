use std::sync::Arc;

use crate::core::AppConfig;
use crate::ollama::OllamaClient;
use crate::relay::{Relay, SessionStore};

pub struct AppState {
    pub relay: Relay,
    // Conversation history for every open chat session
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(config: &AppConfig) -> Self {
        let client = OllamaClient::from_config(config);
        Self::new_with_relay(Relay::new(config.mode, Arc::new(client)))
    }

    pub fn new_with_relay(relay: Relay) -> Self {
        Self {
            relay,
            sessions: SessionStore::new(),
        }
    }
}
