use anyhow::Result;
use tracing::{error, info};

use crate::{
    app::{load_config, Config},
    cli::{handle_command, Cli},
    models::BackendFactory,
    server::Server,
};

/// Main runtime orchestrator
pub struct Orchestrator {
    cli: Cli,
    config: Config,
}

impl Orchestrator {
    /// Create a new orchestrator from CLI args.
    /// Configuration problems are fatal rather than silently defaulted.
    pub fn new(cli: Cli) -> Result<Self> {
        let mut config = load_config(cli.config.as_deref())?;
        config.apply_overrides(cli.host.clone(), cli.port, cli.model.clone());

        Ok(Self { cli, config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the orchestrator until a shutdown signal arrives
    pub async fn run(self) -> Result<()> {
        // Handle subcommands
        if let Some(command) = &self.cli.command {
            if handle_command(command, &self.config).await? {
                return Ok(());
            }
        }

        // The credential is resolved here, before anything binds
        let backend = BackendFactory::client(&self.config.backend)?;
        info!(
            provider = %self.config.backend.provider,
            model = backend.name(),
            "backend ready"
        );

        let server = Server::from_config(&self.config, backend);
        let handle = server
            .start(&self.config.server.host, self.config.server.port)
            .await?;

        shutdown_signal().await;
        handle.shutdown().await
    }
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
