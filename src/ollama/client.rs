use anyhow::{Error, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::core::{Message, completion, completion_stream};
use crate::core::AppConfig;
use crate::relay::Inference;

/// Client for a chat model served by Ollama.
#[derive(Clone, Debug)]
pub struct OllamaClient {
    api_hostname: String,
    model: String,
}

impl OllamaClient {
    pub fn new(api_hostname: &str, model: &str) -> Self {
        Self {
            api_hostname: api_hostname.to_string(),
            model: model.to_string(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.ollama_url, &config.model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Inference for OllamaClient {
    async fn invoke(&self, messages: &[Message]) -> Result<String, Error> {
        completion(messages, &self.api_hostname, &self.model).await
    }

    async fn invoke_stream(
        &self,
        messages: &[Message],
        tx: mpsc::UnboundedSender<String>,
    ) -> Result<String, Error> {
        completion_stream(tx, messages, &self.api_hostname, &self.model).await
    }
}
