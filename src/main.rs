use anyhow::{Context, Result};
use breadboard::config;
use breadboard::db;
use breadboard::discord::DiscordClient;
use breadboard::engine::{Engine, EngineSettings};
use breadboard::guilds::ConfigStore;
use breadboard::intake;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Reconcile starboard mirrors from newline-delimited JSON events on stdin"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    info!(mirrors = db::count_mirrors(&pool).await?, "mirror store ready");

    let configs = Arc::new(ConfigStore::load(&cfg.app.guilds_path()).await?);
    let platform = Arc::new(DiscordClient::from_config(&cfg)?);
    let engine = Arc::new(Engine::new(
        platform,
        pool.clone(),
        configs.clone(),
        EngineSettings {
            webhook_name: cfg.app.webhook_name.clone(),
            self_star_allowed: cfg.app.self_star_allowed,
        },
    ));

    info!("reading events from stdin");
    intake::run(
        engine,
        BufReader::new(tokio::io::stdin()),
        tokio::signal::ctrl_c(),
    )
    .await
    .context("failed to read stdin")?;
    configs.checkpoint().await?;
    pool.close().await;
    info!("shut down");
    Ok(())
}
