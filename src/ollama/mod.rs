mod client;
mod core;

pub use client::OllamaClient;
pub use self::core::{Message, Role, completion, completion_stream};
