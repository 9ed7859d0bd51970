mod core;
mod session;

pub use self::core::{ECHO_LABEL, Inference, Relay, RelayMode, SharedInference};
pub use session::{History, SessionStore, SessionSummary};
