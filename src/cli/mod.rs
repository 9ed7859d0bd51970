use anyhow::Result;
use clap::{Parser, Subcommand};

pub mod chat;
pub mod serve;

use crate::relay::RelayMode;

#[derive(Subcommand)]
enum Command {
    /// Run the API server
    Serve {
        /// Set the server host address
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Set the server port
        #[arg(long, default_value = "2222")]
        port: String,

        /// How messages are answered
        #[arg(long, value_enum, default_value_t = RelayMode::History)]
        mode: RelayMode,
    },
    /// Start a chat session in the terminal
    Chat {
        /// How messages are answered
        #[arg(long, value_enum, default_value_t = RelayMode::History)]
        mode: RelayMode,

        /// Print the reply as it is generated
        #[arg(long, action, default_value = "false")]
        stream: bool,
    },
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

pub async fn run() -> Result<()> {
    let args = Cli::parse();

    // Handle each sub command
    match args.command {
        Some(Command::Serve { host, port, mode }) => {
            serve::run(host, port, mode).await?;
        }
        Some(Command::Chat { mode, stream }) => {
            chat::run(mode, stream).await?;
        }
        None => {}
    }

    Ok(())
}
