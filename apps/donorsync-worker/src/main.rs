//! donorsync worker - runs CRM syncs from a scheduler or by hand
//!
//! Every command prints its result as JSON on stdout and logs to stderr.
//! Ctrl-C cancels an in-flight run at the next page boundary.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use donorsync_connector::ProviderRegistry;
use donorsync_connector_salesforce::SalesforceAdapter;
use donorsync_core::{OrganizationId, ProviderName};
use donorsync_db::{run_migrations, DbPool, PgStore};
use donorsync_sync::{CancellationToken, IntegrationManager, SyncMode, SyncOrchestrator};

mod config;
mod logging;

use config::WorkerConfig;

/// donorsync worker - CRM synchronization
#[derive(Parser)]
#[command(name = "donorsync-worker")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending database migrations
    Migrate,

    /// Pull one organization's data from a provider
    Sync(SyncArgs),

    /// Pull data for every active integration
    SyncAll {
        /// Fetch donors together with their donations
        #[arg(long)]
        combined: bool,
    },

    /// Upload local records the provider has not seen
    Push(TargetArgs),

    /// Print the URL that starts the OAuth grant for a provider
    Authorize {
        #[arg(long)]
        provider: ProviderName,
        /// Opaque value echoed back on the callback
        #[arg(long, default_value = "")]
        state: String,
    },

    /// Exchange an OAuth code and store the integration
    Connect(ConnectArgs),
}

#[derive(Args)]
struct TargetArgs {
    #[arg(long, env = "DONORSYNC_ORGANIZATION")]
    organization: OrganizationId,
    #[arg(long)]
    provider: ProviderName,
}

#[derive(Args)]
struct SyncArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Fetch donors together with their donations
    #[arg(long)]
    combined: bool,
}

#[derive(Args)]
struct ConnectArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Authorization code from the OAuth callback
    #[arg(long)]
    code: String,
    /// Extra integration metadata as a JSON object
    #[arg(long, default_value = "{}")]
    metadata: String,
}

fn mode(combined: bool) -> SyncMode {
    if combined {
        SyncMode::Combined
    } else {
        SyncMode::Separate
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Build the registry from the configured providers.
fn build_registry(config: &WorkerConfig) -> anyhow::Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    match &config.salesforce {
        Some(salesforce) => {
            let adapter = SalesforceAdapter::new(salesforce.clone())
                .context("invalid Salesforce configuration")?;
            registry.register(Arc::new(adapter));
        }
        None => warn!("SALESFORCE_CLIENT_ID not set; Salesforce adapter disabled"),
    }
    Ok(registry)
}

/// Cancel the token on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; cancelling at next page boundary");
            token.cancel();
        }
    });
    cancel
}

async fn run(cli: Cli, config: WorkerConfig) -> anyhow::Result<()> {
    let pool = DbPool::connect_with(&config.database_url, config.database_max_connections)
        .await
        .context("failed to connect to the database")?;

    if let Command::Migrate = cli.command {
        run_migrations(&pool).await.context("migrations failed")?;
        info!("Migrations applied");
        return print_json(&serde_json::json!({ "migrated": true }));
    }

    let store = Arc::new(PgStore::new(pool));
    let orchestrator = SyncOrchestrator::new(store.clone(), store.clone(), config.sync.clone());
    let manager = IntegrationManager::new(
        Arc::new(build_registry(&config)?),
        store,
        orchestrator,
        config.sync.clone(),
    );
    let cancel = cancel_on_ctrl_c();

    match cli.command {
        Command::Migrate => Ok(()),
        Command::Sync(args) => {
            let result = manager
                .sync_now(
                    args.target.organization,
                    &args.target.provider,
                    mode(args.combined),
                    &cancel,
                )
                .await?;
            print_json(&result)
        }
        Command::SyncAll { combined } => {
            let runs = manager.sync_all(mode(combined), &cancel).await?;
            print_json(&runs)?;
            let failed = runs.iter().filter(|r| !r.succeeded()).count();
            if failed > 0 {
                bail!("{failed} of {} integrations failed", runs.len());
            }
            Ok(())
        }
        Command::Push(target) => {
            let result = manager
                .push_now(target.organization, &target.provider, &cancel)
                .await?;
            print_json(&result)
        }
        Command::Authorize { provider, state } => {
            let url = manager.authorization_url(&provider, &state)?;
            print_json(&serde_json::json!({ "authorization_url": url }))
        }
        Command::Connect(args) => {
            let metadata: serde_json::Value =
                serde_json::from_str(&args.metadata).context("--metadata must be JSON")?;
            if !metadata.is_object() {
                bail!("--metadata must be a JSON object");
            }
            let integration = manager
                .connect(
                    args.target.organization,
                    &args.target.provider,
                    &args.code,
                    metadata,
                )
                .await?;
            print_json(&integration)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = WorkerConfig::from_env().context("configuration error")?;
    logging::init_logging(&config.log_filter);

    run(cli, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sync_command() {
        let org = OrganizationId::new();
        let cli = Cli::try_parse_from([
            "donorsync-worker",
            "sync",
            "--organization",
            &org.to_string(),
            "--provider",
            "salesforce",
            "--combined",
        ])
        .unwrap();
        match cli.command {
            Command::Sync(args) => {
                assert_eq!(args.target.organization, org);
                assert_eq!(args.target.provider.as_str(), "salesforce");
                assert!(args.combined);
            }
            _ => panic!("expected sync"),
        }
    }

    #[test]
    fn test_invalid_provider_rejected() {
        let result = Cli::try_parse_from([
            "donorsync-worker",
            "push",
            "--organization",
            &OrganizationId::new().to_string(),
            "--provider",
            "Not A Provider!",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_mode_flag() {
        assert_eq!(mode(false), SyncMode::Separate);
        assert_eq!(mode(true), SyncMode::Combined);
    }
}
