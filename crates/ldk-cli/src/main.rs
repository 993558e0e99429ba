//! `ldk` — operational CLI for the ledger.
//!
//! This binary is deliberately thin: it parses arguments, wires tracing and
//! env bootstrap, and delegates to the library crates.  The publisher daemon
//! runs under `ldk publisher run`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use ldk_config::PublisherSettings;
use ldk_publisher::{Publisher, PublisherConfig, RetryPolicy};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "ldk")]
#[command(about = "LedgerDesk CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> deployment)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Outbox commands
    Outbox {
        #[command(subcommand)]
        cmd: OutboxCmd,
    },

    /// Publisher commands
    Publisher {
        #[command(subcommand)]
        cmd: PublisherCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    Migrate,
}

#[derive(Subcommand)]
enum OutboxCmd {
    /// Per-status row counts and oldest unpublished age
    Stats,
}

#[derive(Subcommand)]
enum PublisherCmd {
    /// Run outbox publisher workers until ctrl-c
    Run {
        /// Layered config paths in merge order
        #[arg(long = "config")]
        config_paths: Vec<String>,

        /// Number of concurrent workers
        #[arg(long, default_value_t = 1)]
        workers: usize,

        /// Worker id prefix (defaults to host name)
        #[arg(long)]
        worker_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist — production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = ldk_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = ldk_db::status(&pool).await?;
                    println!("db_ok={} has_accounts_table={}", s.ok, s.has_accounts_table);
                }
                DbCmd::Migrate => {
                    ldk_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = ldk_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Outbox { cmd } => match cmd {
            OutboxCmd::Stats => {
                let pool = ldk_db::connect_from_env().await?;
                let stats = ldk_db::outbox_stats(&pool).await.map_err(anyhow::Error::new)?;
                println!(
                    "pending={} processing={} published={} failed={} oldest_unpublished_age_secs={}",
                    stats.pending,
                    stats.processing,
                    stats.published,
                    stats.failed,
                    stats.oldest_unpublished_age_secs
                );
            }
        },

        Commands::Publisher { cmd } => match cmd {
            PublisherCmd::Run {
                config_paths,
                workers,
                worker_id,
            } => {
                run_publisher(config_paths, workers, worker_id).await?;
            }
        },
    }

    Ok(())
}

async fn run_publisher(
    config_paths: Vec<String>,
    workers: usize,
    worker_id: Option<String>,
) -> Result<()> {
    let settings = if config_paths.is_empty() {
        PublisherSettings::default()
    } else {
        let path_refs: Vec<&str> = config_paths.iter().map(|s| s.as_str()).collect();
        let loaded = ldk_config::load_layered_yaml(&path_refs)?;
        info!(config_hash = %loaded.config_hash, "loaded publisher config");
        PublisherSettings::from_config(&loaded.config_json)
    };

    let pool = ldk_db::connect_from_env().await?;
    let bus = Arc::new(ldk_bus::KafkaEventBus::from_bootstrap(
        &settings.bootstrap_servers,
        settings.publish_timeout,
    )?);

    let cfg = PublisherConfig {
        poll_interval: settings.poll_interval,
        batch_size: settings.batch_size,
        publish_timeout: settings.publish_timeout,
        claim_lease: settings.claim_lease,
        retry: RetryPolicy {
            initial_interval: settings.retry_initial_interval,
            multiplier: settings.retry_multiplier,
            jitter: settings.retry_jitter,
            max_interval: settings.retry_max_interval,
        },
    };

    let prefix = worker_id.unwrap_or_else(|| {
        std::env::var("HOSTNAME").unwrap_or_else(|_| "ldk-publisher".to_string())
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let mut handles = Vec::with_capacity(workers);
    for i in 0..workers {
        let worker = Publisher::with_entropy(
            pool.clone(),
            Arc::clone(&bus),
            cfg.clone(),
            format!("{prefix}-{i}"),
        );
        handles.push(tokio::spawn(worker.run(shutdown_rx.clone())));
    }

    info!(workers, "publisher running; ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    shutdown_tx.send(true)?;

    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
