use anyhow::Result;
use colored::Colorize;

use crate::{
    app::{init_config, Config},
    models::BackendFactory,
};

use super::Commands;

/// Handle CLI subcommands.
/// Returns `true` when the command is complete and the relay should not start.
pub async fn handle_command(command: &Commands, config: &Config) -> Result<bool> {
    match command {
        Commands::Init { path } => {
            let (path, created) = init_config(path.clone())?;
            if created {
                println!("Created default configuration at: {}", path.display());
            } else {
                println!("Configuration already exists at: {}", path.display());
            }
            Ok(true)
        }
        Commands::Version => {
            show_version();
            Ok(true)
        }
        Commands::Status => {
            show_status(config).await?;
            Ok(true)
        }
        Commands::Serve => Ok(false),
    }
}

/// Show version information
pub fn show_version() {
    println!("chat-relay v{}", env!("CARGO_PKG_VERSION"));
    println!("   Relays WebSocket chat messages to a generative-language backend");
}

/// Show the resolved configuration and whether the backend answers
async fn show_status(config: &Config) -> Result<()> {
    println!("chat-relay Status:");
    println!();
    println!("  Listen address: ws://{}", config.server.address());
    println!("  Max frame size: {} bytes", config.server.max_frame_bytes);
    match config.session.max_history_turns {
        Some(turns) => println!("  History window: {} turns", turns),
        None => println!("  History window: unbounded"),
    }
    println!(
        "  Backend: {} ({}), providers: {}",
        config.backend.provider,
        config.backend.model,
        BackendFactory::list_available().join(", ")
    );

    if config.backend.requires_credential() {
        if config.backend.credential().is_ok() {
            println!("  [OK] Credential: {} is set", config.backend.api_key_env);
        } else {
            println!(
                "  {} Credential: {} is not set",
                "[ERROR]".red(),
                config.backend.api_key_env
            );
            println!();
            return Ok(());
        }
    }

    let client = BackendFactory::client(&config.backend)?;
    match client.validate_connection().await {
        Ok(true) => println!("  {} Backend: reachable", "[OK]".green()),
        Ok(false) => println!("  {} Backend: not reachable", "[WARNING]".yellow()),
        Err(e) => println!("  {} Backend: {}", "[ERROR]".red(), e),
    }

    println!();
    Ok(())
}
