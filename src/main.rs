//! agentflow CLI
//!
//! Subcommands: validate a workflow config, serve the deployment
//! registry, and serve the webhook ingress. Running workflows from the
//! CLI requires an LLM provider binding, which deployments wire in
//! through the library API; the CLI ships the service surfaces.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use agentflow::config::load_config;
use agentflow::registry::RegistryServer;
use agentflow::storage::SqliteStore;
use agentflow::webhooks::{webhook_router, WebhookConfig, WebhookState, WorkflowLauncher};

#[derive(Parser)]
#[command(name = "agentflow", version, about = "Configurable LLM workflow engine")]
struct Cli {
    /// SQLite database path shared by all services
    #[arg(long, env = "AGENTFLOW_DB", default_value = "agentflow.db")]
    database: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow config file
    Validate {
        /// Path to the workflow YAML/JSON
        config: PathBuf,
    },

    /// Serve the deployment registry
    Registry {
        /// Listen address
        #[arg(long, default_value = "0.0.0.0:9000")]
        addr: SocketAddr,

        /// Sweep interval for expired leases, in seconds
        #[arg(long, default_value_t = 60)]
        sweep_interval: u64,
    },

    /// Serve the webhook ingress
    Webhooks {
        /// Listen address
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: SocketAddr,

        /// Directory containing workflow configs referenced by name
        #[arg(long, default_value = "workflows")]
        config_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { config } => {
            let loaded = load_config(&config)
                .with_context(|| format!("validating {}", config.display()))?;
            println!(
                "OK: workflow '{}' ({} nodes, {} edges)",
                loaded.flow.name,
                loaded.nodes.len(),
                loaded.edges.len()
            );
        }

        Command::Registry {
            addr,
            sweep_interval,
        } => {
            let store = Arc::new(SqliteStore::open(&cli.database).await?);
            let server = RegistryServer::new(store)
                .with_sweep_interval(std::time::Duration::from_secs(sweep_interval));
            server.serve(addr).await.context("registry server")?;
        }

        Command::Webhooks { addr, config_dir } => {
            let store = Arc::new(SqliteStore::open(&cli.database).await?);
            let launcher = Arc::new(UnboundLauncher { config_dir });
            let state = WebhookState::new(launcher, store, WebhookConfig::from_env());
            let state = match agentflow::webhooks::WhatsAppHandler::from_env() {
                Some(handler) => state.with_whatsapp(Arc::new(handler)),
                None => state,
            };

            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!(%addr, "Webhook ingress listening");
            axum::serve(listener, webhook_router(state))
                .await
                .context("webhook server")?;
        }
    }

    Ok(())
}

/// Launcher used when the CLI serves webhooks without an LLM provider
/// bound: it validates the referenced config and reports that execution
/// needs a configured runtime.
struct UnboundLauncher {
    config_dir: PathBuf,
}

#[async_trait::async_trait]
impl WorkflowLauncher for UnboundLauncher {
    async fn launch(
        &self,
        workflow_name: &str,
        _inputs: serde_json::Value,
    ) -> Result<serde_json::Value, agentflow::AgentFlowError> {
        let path = self.config_dir.join(format!("{}.yaml", workflow_name));
        let config = load_config(&path)?;
        Err(agentflow::error::ConfigError::Validation(format!(
            "workflow '{}' is valid but no LLM provider is bound to this process; \
             embed agentflow::runtime::WorkflowRuntime with a provider to execute it",
            config.flow.name
        ))
        .into())
    }
}
