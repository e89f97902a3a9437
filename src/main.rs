//! Jot - Inbox to Action-Item Journal
//!
//! Runs one incremental sync batch: new mail is summarized into action
//! items and filed into a per-day destination container.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jot::{
    auth::{ConsoleAuthorizer, CredentialGuardian, CredentialStore, OAuthClient},
    config::{resolve_secret, JotConfig},
    enrich::{Enricher, HuggingFaceClient},
    ingest::{GmailClient, MailSource},
    pipeline::{Pipeline, RunState},
    router::{NotionClient, ResourceRegistry, ResourceRouter},
    sync::{CheckpointStore, IncrementalSync},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "jot")]
#[command(version)]
#[command(about = "Summarize new mail into a date-partitioned action-item journal")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "JOT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process mail received since the last checkpoint
    Run,

    /// Show the checkpoint and the destination registry
    Status,

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("jot={}", log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let config = match &cli.config {
        Some(path) => JotConfig::from_file(path)?,
        None => JotConfig::default(),
    };

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Status => show_status(&config).await,
        Commands::Config { default } => show_config(if default { None } else { Some(&config) }),
    }
}

fn build_pipeline(config: &JotConfig) -> Result<Pipeline> {
    let client_secret = resolve_secret(&config.mail.client_secret_ref)?;
    let model_key = resolve_secret(&config.model.api_key_ref)?;
    let notion_secret = resolve_secret(&config.destination.secret_ref)?;

    let oauth = Arc::new(OAuthClient::new(config.mail.clone(), client_secret));
    let guardian = Arc::new(CredentialGuardian::new(
        CredentialStore::new(config.storage.credential_path()),
        oauth.clone(),
        Arc::new(ConsoleAuthorizer::new(oauth)),
    ));

    let source: Arc<dyn MailSource> = Arc::new(GmailClient::new(config.mail.clone(), guardian));
    let sync = IncrementalSync::new(
        CheckpointStore::new(config.storage.checkpoint_path()),
        source.clone(),
    );
    let enricher = Enricher::new(Arc::new(HuggingFaceClient::new(
        config.model.clone(),
        model_key,
    )));
    let router = ResourceRouter::new(
        Arc::new(NotionClient::new(config.destination.clone(), notion_secret)),
        config.destination.parent_page_id.clone(),
        ResourceRegistry::new(config.storage.registry_path()),
    );

    Ok(Pipeline::new(
        config.pipeline.clone(),
        sync,
        source,
        Arc::new(enricher),
        Arc::new(router),
    ))
}

async fn run(config: JotConfig) -> Result<()> {
    if config.destination.parent_page_id.is_empty() {
        anyhow::bail!("destination.parent_page_id is not configured");
    }

    let pipeline = build_pipeline(&config)?;
    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling run...");
            cancel.cancel();
        }
    });

    let report = pipeline.run().await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    match report.state {
        RunState::Completed => Ok(()),
        RunState::Cancelled => anyhow::bail!("run {} was cancelled", report.run_id),
        _ => anyhow::bail!(
            "run {} failed: {}",
            report.run_id,
            report.error.unwrap_or_default()
        ),
    }
}

async fn show_status(config: &JotConfig) -> Result<()> {
    let checkpoint = CheckpointStore::new(config.storage.checkpoint_path());
    match checkpoint.read().await? {
        Some(watermark) => println!("Checkpoint: {}", watermark),
        None => println!("Checkpoint: none (next run bootstraps)"),
    }
    println!("  {}", checkpoint.path().display());

    let registry_path = config.storage.registry_path();
    let entries = ResourceRegistry::read_entries(&registry_path)
        .await
        .with_context(|| format!("Failed to read {}", registry_path.display()))?;
    println!();
    println!("Destination containers: {}", entries.len());
    for entry in entries {
        println!("  {}  {}", entry.name, entry.id);
    }

    Ok(())
}

fn show_config(config: Option<&JotConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}
