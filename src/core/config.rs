use std::env;

use crate::relay::RelayMode;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.2:3b-instruct-fp16";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub ollama_url: String,
    pub model: String,
    pub mode: RelayMode,
}

impl AppConfig {
    pub fn new(ollama_url: &str, model: &str, mode: RelayMode) -> Self {
        Self {
            ollama_url: ollama_url.to_string(),
            model: model.to_string(),
            mode,
        }
    }

    pub fn with_mode(mut self, mode: RelayMode) -> Self {
        self.mode = mode;
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        // An empty value is treated the same as unset
        let ollama_url = env::var("OLLAMA_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        let model = env::var("OLLAMA_MODEL")
            .ok()
            .filter(|model| !model.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        Self {
            ollama_url,
            model,
            mode: RelayMode::default(),
        }
    }
}
