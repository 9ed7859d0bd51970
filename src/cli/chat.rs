use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::core::AppConfig;
use crate::ollama::OllamaClient;
use crate::relay::{Relay, RelayMode, SessionStore};

async fn stream_reply(
    relay: &Relay,
    sessions: &SessionStore,
    session_id: &str,
    line: &str,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Print fragments as they arrive. The loop ends once the relay
    // is done and drops the transmitter.
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(chunk) = rx.recv().await {
            print!("{}", chunk);
            let _ = stdout.flush();
        }
    });

    let result = relay.on_message_stream(sessions, session_id, line, tx).await;
    let _ = printer.await;
    println!();

    result.map(|_| ())
}

pub async fn run(mode: RelayMode, stream: bool) -> Result<()> {
    // Logs go to stderr so they don't interleave with replies
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let mut rl = DefaultEditor::new()?;

    let config = AppConfig::default().with_mode(mode);
    println!("Using Ollama server: {}", config.ollama_url);

    let client = OllamaClient::from_config(&config);
    let relay = Relay::new(config.mode, Arc::new(client));
    let sessions = SessionStore::new();
    let session_id = relay.on_chat_start(&sessions);

    loop {
        let readline = rl.readline(">>> ");
        match readline {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                let result = if stream {
                    stream_reply(&relay, &sessions, &session_id, &line).await
                } else {
                    relay
                        .on_message(&sessions, &session_id, &line)
                        .await
                        .map(|reply| println!("{}", reply))
                };

                // The turn is dropped from the history so the user
                // can simply try again
                if let Err(e) = result {
                    println!("Error: {}", e);
                }
            }
            Err(ReadlineError::Interrupted) => break,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }

    relay.on_chat_end(&sessions, &session_id);

    Ok(())
}
