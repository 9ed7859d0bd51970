use std::sync::Arc;

use anyhow::{Error, Result};
use async_trait::async_trait;
use clap::ValueEnum;
use tokio::sync::mpsc;

use super::session::{History, SessionStore};
use crate::ollama::{Message, Role};

/// Prefix added to every reply in echo mode
pub const ECHO_LABEL: &str = "Echo:\n";

/// How the relay answers a message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum RelayMode {
    /// Repeat the user's message back
    Echo,
    /// Send only the current message to the model
    SingleTurn,
    /// Send the whole conversation to the model
    #[default]
    History,
}

/// Something that can generate the next reply in a conversation.
#[async_trait]
pub trait Inference: Send + Sync {
    async fn invoke(&self, messages: &[Message]) -> Result<String, Error>;

    /// Same as `invoke` but forwards fragments of the reply to `tx`
    /// as they are generated. By default the whole reply is sent as a
    /// single fragment.
    async fn invoke_stream(
        &self,
        messages: &[Message],
        tx: mpsc::UnboundedSender<String>,
    ) -> Result<String, Error> {
        let reply = self.invoke(messages).await?;
        let _ = tx.send(reply.clone());
        Ok(reply)
    }
}

pub type SharedInference = Arc<dyn Inference + 'static>;

/// Relays messages from a chat front-end to the model.
///
/// The relay doesn't own any conversation state. Each call borrows
/// the `SessionStore` it should read from and write back to.
#[derive(Clone)]
pub struct Relay {
    mode: RelayMode,
    inference: SharedInference,
}

impl Relay {
    pub fn new(mode: RelayMode, inference: SharedInference) -> Self {
        Self { mode, inference }
    }

    pub fn mode(&self) -> RelayMode {
        self.mode
    }

    /// Starts a new conversation with an empty history.
    pub fn on_chat_start(&self, sessions: &SessionStore) -> String {
        let session_id = sessions.start();
        tracing::debug!("Started chat session {}", session_id);
        session_id
    }

    /// Ends a conversation and discards its history.
    pub fn on_chat_end(&self, sessions: &SessionStore, session_id: &str) -> Option<History> {
        tracing::debug!("Ending chat session {}", session_id);
        sessions.end(session_id)
    }

    /// Handles one user message and returns the reply.
    ///
    /// On error the session's history is left as it was before the
    /// call.
    pub async fn on_message(
        &self,
        sessions: &SessionStore,
        session_id: &str,
        text: &str,
    ) -> Result<String, Error> {
        self.handle(sessions, session_id, text, None).await
    }

    /// Handles one user message, forwarding fragments of the reply to
    /// `tx` as they arrive. The history is only updated once the full
    /// reply has been received.
    pub async fn on_message_stream(
        &self,
        sessions: &SessionStore,
        session_id: &str,
        text: &str,
        tx: mpsc::UnboundedSender<String>,
    ) -> Result<String, Error> {
        self.handle(sessions, session_id, text, Some(tx)).await
    }

    async fn handle(
        &self,
        sessions: &SessionStore,
        session_id: &str,
        text: &str,
        tx: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<String, Error> {
        match self.mode {
            RelayMode::Echo => {
                let reply = format!("{}{}", ECHO_LABEL, text);
                if let Some(tx) = tx {
                    let _ = tx.send(reply.clone());
                }
                Ok(reply)
            }
            RelayMode::SingleTurn => {
                let messages = vec![Message::new(Role::User, text)];
                self.next_reply(&messages, tx).await
            }
            RelayMode::History => {
                let mut history = sessions.get(session_id).unwrap_or_default();
                history.push(Message::new(Role::User, text));
                tracing::debug!("Messages: {:?}", history.messages());

                let reply = self.next_reply(history.messages(), tx).await?;

                history.push(Message::new(Role::Assistant, &reply));
                sessions.set(session_id, history);
                Ok(reply)
            }
        }
    }

    async fn next_reply(
        &self,
        messages: &[Message],
        tx: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<String, Error> {
        match tx {
            Some(tx) => self.inference.invoke_stream(messages, tx).await,
            None => self.inference.invoke(messages).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Mutex;

    use crate::ollama::OllamaClient;

    // Replies with "reply N" and records every request it receives
    #[derive(Default)]
    struct MockInference {
        calls: Mutex<Vec<Vec<Message>>>,
        fail: bool,
    }

    impl MockInference {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<Vec<Message>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Inference for MockInference {
        async fn invoke(&self, messages: &[Message]) -> Result<String, Error> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(messages.to_vec());
            if self.fail {
                return Err(anyhow!("connection refused"));
            }
            Ok(format!("reply {}", calls.len()))
        }
    }

    fn relay(mode: RelayMode) -> (Relay, Arc<MockInference>) {
        let inference = Arc::new(MockInference::default());
        (Relay::new(mode, inference.clone()), inference)
    }

    #[test]
    fn test_mode_parses_from_cli_value() {
        assert_eq!(
            RelayMode::from_str("single-turn", true).unwrap(),
            RelayMode::SingleTurn
        );
        assert_eq!(RelayMode::from_str("echo", true).unwrap(), RelayMode::Echo);
        assert_eq!(RelayMode::default(), RelayMode::History);
    }

    #[tokio::test]
    async fn test_echo_prefixes_label() {
        let (relay, inference) = relay(RelayMode::Echo);
        let sessions = SessionStore::new();

        for text in ["hi", "", "multi\nline"] {
            let reply = relay.on_message(&sessions, "s", text).await.unwrap();
            assert_eq!(reply, format!("Echo:\n{}", text));
        }

        assert!(inference.calls().is_empty());
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn test_single_turn_sends_only_current_message() {
        let (relay, inference) = relay(RelayMode::SingleTurn);
        let sessions = SessionStore::new();
        let session_id = relay.on_chat_start(&sessions);

        relay.on_message(&sessions, &session_id, "hi").await.unwrap();
        let reply = relay
            .on_message(&sessions, &session_id, "how are you")
            .await
            .unwrap();

        assert_eq!(reply, "reply 2");
        assert_eq!(
            inference.calls()[1],
            vec![Message::new(Role::User, "how are you")]
        );
        assert!(sessions.get(&session_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_records_turns_in_order() {
        let (relay, inference) = relay(RelayMode::History);
        let sessions = SessionStore::new();
        let session_id = relay.on_chat_start(&sessions);

        relay.on_message(&sessions, &session_id, "hi").await.unwrap();
        relay
            .on_message(&sessions, &session_id, "how are you")
            .await
            .unwrap();

        let history = sessions.get(&session_id).unwrap();
        assert_eq!(
            history.messages(),
            &[
                Message::new(Role::User, "hi"),
                Message::new(Role::Assistant, "reply 1"),
                Message::new(Role::User, "how are you"),
                Message::new(Role::Assistant, "reply 2"),
            ]
        );

        // The second request carries the whole conversation so far
        assert_eq!(inference.calls()[1].len(), 3);
        assert_eq!(inference.calls()[1][2].content, "how are you");
    }

    #[tokio::test]
    async fn test_history_grows_by_two_per_turn() {
        let (relay, _inference) = relay(RelayMode::History);
        let sessions = SessionStore::new();
        let session_id = relay.on_chat_start(&sessions);

        for n in 1..=5 {
            relay
                .on_message(&sessions, &session_id, &format!("turn {}", n))
                .await
                .unwrap();
            let history = sessions.get(&session_id).unwrap();
            assert_eq!(history.len(), 2 * n);
        }

        let history = sessions.get(&session_id).unwrap();
        for (i, msg) in history.iter().enumerate() {
            let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
            assert_eq!(msg.role, expected);
        }
    }

    #[tokio::test]
    async fn test_history_defaults_to_empty_for_unknown_session() {
        let (relay, inference) = relay(RelayMode::History);
        let sessions = SessionStore::new();

        relay.on_message(&sessions, "unknown", "hi").await.unwrap();

        assert_eq!(inference.calls()[0].len(), 1);
        assert_eq!(sessions.get("unknown").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_chat_start_resets_history() {
        let (relay, _inference) = relay(RelayMode::History);
        let sessions = SessionStore::new();
        let first = relay.on_chat_start(&sessions);
        relay.on_message(&sessions, &first, "hi").await.unwrap();

        let second = relay.on_chat_start(&sessions);

        assert!(sessions.get(&second).unwrap().is_empty());
        assert_eq!(sessions.get(&first).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_chat_end_discards_history() {
        let (relay, _inference) = relay(RelayMode::History);
        let sessions = SessionStore::new();
        let session_id = relay.on_chat_start(&sessions);
        relay.on_message(&sessions, &session_id, "hi").await.unwrap();

        let history = relay.on_chat_end(&sessions, &session_id).unwrap();

        assert_eq!(history.len(), 2);
        assert!(sessions.get(&session_id).is_none());
    }

    #[tokio::test]
    async fn test_failure_leaves_history_unchanged() {
        let inference = Arc::new(MockInference::failing());
        let relay = Relay::new(RelayMode::History, inference.clone());
        let sessions = SessionStore::new();
        let session_id = relay.on_chat_start(&sessions);
        let before = History::new_with_messages(vec![
            Message::new(Role::User, "hi"),
            Message::new(Role::Assistant, "hello"),
        ]);
        sessions.set(&session_id, before.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = relay
            .on_message_stream(&sessions, &session_id, "how are you", tx)
            .await;

        assert!(result.is_err());
        assert!(rx.try_recv().is_err());
        assert_eq!(sessions.get(&session_id).unwrap(), before);
        assert_eq!(inference.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_stream_forwards_reply() {
        let (relay, _inference) = relay(RelayMode::History);
        let sessions = SessionStore::new();
        let session_id = relay.on_chat_start(&sessions);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let reply = relay
            .on_message_stream(&sessions, &session_id, "hi", tx)
            .await
            .unwrap();

        assert_eq!(reply, "reply 1");
        assert_eq!(rx.try_recv().unwrap(), "reply 1");
        assert_eq!(sessions.get(&session_id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_echo_stream_sends_single_fragment() {
        let (relay, _inference) = relay(RelayMode::Echo);
        let sessions = SessionStore::new();

        let (tx, mut rx) = mpsc::unbounded_channel();
        relay
            .on_message_stream(&sessions, "s", "hi", tx)
            .await
            .unwrap();

        assert_eq!(rx.try_recv().unwrap(), "Echo:\nhi");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_history_sends_full_conversation_to_ollama() {
        let mut server = mockito::Server::new_async().await;

        let first = server
            .mock("POST", "/api/chat")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "model": "llama3",
                "messages": [{"role": "user", "content": "hi"}],
                "stream": false
            })))
            .with_status(200)
            .with_body(r#"{"message":{"role":"assistant","content":"Hello!"},"done":true}"#)
            .create_async()
            .await;

        let second = server
            .mock("POST", "/api/chat")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "model": "llama3",
                "messages": [
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": "Hello!"},
                    {"role": "user", "content": "how are you"}
                ],
                "stream": false
            })))
            .with_status(200)
            .with_body(r#"{"message":{"role":"assistant","content":"Great."},"done":true}"#)
            .create_async()
            .await;

        let client = OllamaClient::new(&server.url(), "llama3");
        let relay = Relay::new(RelayMode::History, Arc::new(client));
        let sessions = SessionStore::new();
        let session_id = relay.on_chat_start(&sessions);

        let reply = relay.on_message(&sessions, &session_id, "hi").await.unwrap();
        assert_eq!(reply, "Hello!");
        let reply = relay
            .on_message(&sessions, &session_id, "how are you")
            .await
            .unwrap();
        assert_eq!(reply, "Great.");

        first.assert_async().await;
        second.assert_async().await;
        assert_eq!(sessions.get(&session_id).unwrap().len(), 4);
    }
}
