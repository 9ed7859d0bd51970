//! Public types for the chat API
use serde::{Deserialize, Serialize};

use crate::ollama::Message;
use crate::relay::SessionSummary;

#[derive(Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
}

#[derive(Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: String,
}

impl ChatResponse {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One event of a streamed reply
#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(untagged)]
pub enum StreamChunk {
    Content { content: String },
    Error { error: String },
}

#[derive(Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: String,
}

#[derive(Deserialize)]
pub struct ChatSessionsQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct ChatSessionsResponse {
    pub sessions: Vec<SessionSummary>,
    pub page: usize,
    pub limit: usize,
    pub total_sessions: usize,
    pub total_pages: usize,
}

#[derive(Serialize)]
pub struct ChatTranscriptResponse {
    pub transcript: Vec<Message>,
}
