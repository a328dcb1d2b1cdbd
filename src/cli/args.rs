use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "chat-relay")]
#[command(version)]
#[command(about = "Relay WebSocket chat messages to a generative-language backend")]
#[command(long_about = None)]
pub struct Cli {
    /// Interface to listen on (default: localhost)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (default: 8000)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Backend model to use (e.g., gemini-1.5-pro-latest)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the relay (default)
    Serve,
    /// Write a default configuration file
    Init {
        /// Destination (defaults to the user configuration directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Show the resolved configuration and check the backend
    Status,
    /// Show version information
    Version,
}
