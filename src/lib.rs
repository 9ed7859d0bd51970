pub mod api;
pub mod cli;
pub mod core;
pub mod ollama;
pub mod relay;
