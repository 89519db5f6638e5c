//! Crypto Market Monitor
//!
//! Runs many independently configured monitoring instances against exchange
//! market data, evaluates indicator rules across timeframes and hands trend
//! gated trade signals to a review service.

mod api;
mod db;
mod engine;
mod indicators;
mod market;
mod models;
mod rules;
mod trading;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::db::Database;
use crate::engine::{Engine, EngineConfig};
use crate::market::{ClientFactory, DefaultClientFactory};
use crate::models::{Instance, InstanceStatus, MarketType, NewInstance};
use crate::trading::CapitalManager;

/// Multi-instance crypto market monitor CLI.
#[derive(Parser)]
#[command(name = "cryptomon")]
#[command(about = "Scheduled candle sync, indicator rules and trend-gated trade signals", long_about = None)]
struct Cli {
    /// Database URL
    #[arg(short, long, env = "CRYPTOMON_DATABASE", default_value = "sqlite:cryptomon.db")]
    database: String,

    /// Signal review service base URL
    #[arg(long, env = "CRYPTOMON_ANALYZE_URL", default_value = "http://localhost:8000")]
    analyze_url: String,

    /// Execution service base URL (approved signals are forwarded here)
    #[arg(long, env = "CRYPTOMON_EXECUTION_URL")]
    execution_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the monitoring engine
    Run {
        /// Instances processed concurrently per cycle
        #[arg(short, long, default_value = "4")]
        concurrency: usize,
    },

    /// Add an ACTIVE instance from a JSON document
    Add {
        /// Path to the instance document
        #[arg(short, long)]
        file: PathBuf,
    },

    /// List all instances
    List,

    /// Mark an instance ACTIVE
    Start { id: i64 },

    /// Mark an instance STOPPED
    Stop { id: i64 },

    /// Mark an instance DELETED; the engine purges it on its next refresh
    Delete { id: i64 },

    /// Show capital, level and recent trades per instance
    Status {
        /// Recent trades shown per instance
        #[arg(short, long, default_value = "5")]
        trades: i64,
    },

    /// Apply a realized P&L delta to an instance
    Pnl {
        id: i64,

        #[arg(allow_hyphen_values = true)]
        delta: Decimal,
    },

    /// Zero an instance's realized P&L (manual kill-switch reset)
    ResetCapital { id: i64 },

    /// Show top movers by 24h change
    Tickers {
        /// binance, kucoin or gateio
        #[arg(short, long, default_value = "binance")]
        exchange: String,

        /// Spot or Futures
        #[arg(short, long, default_value = "spot")]
        market_type: String,

        /// Only symbols quoted in this currency
        #[arg(short, long, default_value = "USDT")]
        quote: String,

        /// Number of movers to show
        #[arg(short, long, default_value = "10")]
        top: usize,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = EngineConfig {
        database_url: cli.database.clone(),
        analyze_url: cli.analyze_url.clone(),
        execution_url: cli.execution_url.clone(),
        ..Default::default()
    };

    match cli.command {
        Commands::Run { concurrency } => {
            let config = EngineConfig {
                concurrency,
                ..config
            };
            info!(database = %config.database_url, analyze_url = %config.analyze_url, "Starting monitor");

            println!("\n=== Crypto Market Monitor ===");
            println!("Database:     {}", config.database_url);
            println!("Analyze URL:  {}", config.analyze_url);
            println!(
                "Execution:    {}",
                config.execution_url.as_deref().unwrap_or("forwarded by review service")
            );
            println!("\nPress Ctrl+C to stop.\n");

            let mut engine = Engine::new(config).await?;
            if let Err(e) = engine.run().await {
                tracing::error!(error = %e, "Engine error");
            }
        }

        Commands::Add { file } => {
            let db = Database::new(&config.database_url).await?;
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let doc: NewInstance = serde_json::from_str(&raw).context("Invalid instance document")?;
            if doc.strategy.rules.has_unknown_indicator() {
                bail!("instance rules reference an unknown indicator");
            }

            let id = db.insert_instance(&doc).await?;
            println!("Added instance {} ({})", id, doc.name);
        }

        Commands::List => {
            let db = Database::new(&config.database_url).await?;
            let records = db.list_instance_records().await?;
            if records.is_empty() {
                println!("No instances. Use 'cryptomon add --file <json>' to add one.");
                return Ok(());
            }

            println!(
                "\n{:>4} {:<20} {:<8} {:<10} {:<14} {:<14} {}",
                "ID", "NAME", "STATUS", "EXCHANGE", "MARKET", "TIMEFRAMES", "PAIRS"
            );
            println!("{}", "-".repeat(90));
            for record in records {
                let id = record.id;
                let status = record.status.clone();
                match record.into_instance() {
                    Ok(instance) => {
                        let timeframes: Vec<String> =
                            instance.timeframes().iter().map(|tf| tf.to_string()).collect();
                        let pairs: Vec<&str> = instance.pairs.iter().map(String::as_str).collect();
                        println!(
                            "{:>4} {:<20} {:<8} {:<10} {:<14} {:<14} {}",
                            id,
                            truncate(&instance.name, 18),
                            status,
                            instance.exchange,
                            format!("{}/{}", instance.market_type, instance.base_currency),
                            timeframes.join(","),
                            pairs.join(",")
                        );
                    }
                    Err(e) => println!("{:>4} {:<20} {:<8} invalid: {}", id, "?", status, e),
                }
            }
        }

        Commands::Start { id } => set_status(&config, id, InstanceStatus::Active).await?,
        Commands::Stop { id } => set_status(&config, id, InstanceStatus::Stopped).await?,
        Commands::Delete { id } => set_status(&config, id, InstanceStatus::Deleted).await?,

        Commands::Status { trades } => {
            let db = Database::new(&config.database_url).await?;
            let records = db.list_instance_records().await?;
            if records.is_empty() {
                println!("No instances.");
                return Ok(());
            }

            for record in records {
                let instance = match record.into_instance() {
                    Ok(instance) => instance,
                    Err(e) => {
                        println!("\nSkipping unreadable instance: {}", e);
                        continue;
                    }
                };
                let capital = load_capital(&db, &instance).await?;
                let level = capital.current_level();

                println!("\n=== Instance {}: {} ===", instance.id, instance.name);
                println!("Status:        {}", instance.status);
                println!("Start Amount:  {}", capital.state().start_amount);
                println!("Realized P&L:  {}", capital.realized_pnl());
                println!("Capital:       {}", capital.current_capital());
                println!("Level:         {}", level);
                println!(
                    "Kill Switch:   {}",
                    if capital.is_kill_switch() { "ACTIVE" } else { "off" }
                );

                if let Some(stored) = db.load_instance_state(instance.id).await? {
                    println!(
                        "Last Snapshot: {} at {} ({})",
                        stored.total_capital, stored.updated_at, stored.current_level
                    );
                }

                let recent = db.recent_trades(instance.id, trades).await?;
                if !recent.is_empty() {
                    println!("\n--- Recent Trades ---");
                    for t in recent {
                        println!(
                            "  {} {:<4} {:<12} {:>12.4} @ {:<12.4} {}",
                            t.timestamp, t.side, t.symbol, t.amount, t.entry_price, t.status
                        );
                    }
                }
            }
        }

        Commands::Pnl { id, delta } => {
            let db = Database::new(&config.database_url).await?;
            let instance = require_instance(&db, id).await?;
            let cfg = &instance.strategy.capital;

            let realized = db.add_realized_pnl(id, cfg.start_amount, delta).await?;
            let mut capital = CapitalManager::new(id, cfg.start_amount, cfg.levels.clone())
                .with_realized_pnl(realized - delta);
            let level = capital.apply_pnl(delta);
            db.save_capital_snapshot(&capital.state()).await?;

            info!(instance_id = id, delta = %delta, level = %level, "Realized P&L applied");
            println!(
                "Instance {}: capital {} (level {})",
                id,
                capital.current_capital(),
                level
            );
        }

        Commands::ResetCapital { id } => {
            let db = Database::new(&config.database_url).await?;
            let instance = require_instance(&db, id).await?;
            let mut capital = load_capital(&db, &instance).await?;

            capital.reset();
            db.upsert_instance_state(&capital.state()).await?;
            info!(instance_id = id, "Capital reset");
            println!(
                "Instance {}: capital reset to {} (level {})",
                id,
                capital.current_capital(),
                capital.current_level()
            );
        }

        Commands::Tickers {
            exchange,
            market_type,
            quote,
            top,
        } => {
            let market_type: MarketType = market_type.parse()?;
            let client = DefaultClientFactory.create(&exchange, market_type).await?;
            let markets = client.load_markets().await?;
            info!(exchange = %exchange, markets, "Markets loaded");

            let suffix = format!("/{}", quote.to_uppercase());
            let mut tickers: Vec<_> = client
                .fetch_tickers(None)
                .await?
                .into_values()
                .filter(|t| t.symbol.ends_with(&suffix))
                .collect();
            tickers.sort_by(|a, b| {
                b.change_pct
                    .partial_cmp(&a.change_pct)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            println!("\n{:<16} {:>14} {:>10} {:>18}", "SYMBOL", "LAST", "24H %", "QUOTE VOLUME");
            println!("{}", "-".repeat(61));
            for t in tickers.iter().take(top) {
                println!(
                    "{:<16} {:>14.6} {:>9.2}% {:>18.0}",
                    t.symbol, t.last, t.change_pct, t.quote_volume
                );
            }
        }

        Commands::Config => {
            println!("\n=== Engine Configuration ===\n");
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn set_status(config: &EngineConfig, id: i64, status: InstanceStatus) -> Result<()> {
    let db = Database::new(&config.database_url).await?;
    if !db.set_status(id, status).await? {
        bail!("instance {} not found", id);
    }
    info!(instance_id = id, status = %status, "Instance status changed");
    println!("Instance {} is now {}", id, status);
    Ok(())
}

async fn require_instance(db: &Database, id: i64) -> Result<Instance> {
    match db.get_instance_record(id).await? {
        Some(record) => record.into_instance(),
        None => bail!("instance {} not found", id),
    }
}

/// Capital manager for an instance with its stored realized P&L applied.
async fn load_capital(db: &Database, instance: &Instance) -> Result<CapitalManager> {
    let cfg = &instance.strategy.capital;
    let capital = CapitalManager::new(instance.id, cfg.start_amount, cfg.levels.clone());
    Ok(match db.load_instance_state(instance.id).await? {
        Some(stored) => capital.with_realized_pnl(stored.realized_pnl),
        None => capital,
    })
}

/// Truncate a string with ellipsis if too long.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
