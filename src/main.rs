mod adapters;
mod api;
mod cache;
mod classify;
mod columns;
mod db;
mod error;
mod export;
mod fetch;
mod html;
mod markets;
mod normalize;
mod pipeline;
mod records;
mod runner;
mod sanitize;
mod scheduler;
mod settings;
mod writer;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use chrono::Local;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinHandle;

use crate::cache::BatchCache;
use crate::fetch::{HttpFetcher, PageFetcher};
use crate::runner::MarketRunner;
use crate::scheduler::{Cycle, MarketOutcome};
use crate::settings::Settings;

#[derive(Parser)]
#[command(name = "hal_prices", about = "Wholesale produce price collector for Turkish hal markets")]
struct Cli {
    /// Config file (default: hal_prices.toml, optional)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the price database schema
    Init,
    /// Scrape every market once and store the results
    Scrape {
        /// Only this market (e.g. kumluca_market)
        #[arg(short, long)]
        market: Option<String>,
    },
    /// Refresh on an interval and take the daily backup until Ctrl-C
    Run,
    /// Serve the query API (also refreshes unless --no-refresh)
    Serve {
        #[arg(long)]
        no_refresh: bool,
    },
    /// Back up each market's latest day right now
    Backup,
    /// Latest stored prices for one market
    Latest {
        market: String,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Row counts and latest scrape date per market
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Init => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            println!("Schema ready at {}", settings.db_path.display());
            Ok(())
        }
        Commands::Scrape { market } => {
            let (cycle, writer_task) = build_cycle(&settings, market.as_deref())?;
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
            spinner.set_message(format!("Scraping {} market(s)...", cycle.runners.len()));
            spinner.enable_steady_tick(Duration::from_millis(120));

            let reports = scheduler::run_cycle(&cycle, Local::now().date_naive()).await;
            spinner.finish_and_clear();
            drop(cycle);
            writer_task.await?;

            for r in &reports {
                let line = match &r.outcome {
                    MarketOutcome::Stored { rows } => format!("stored {} rows", rows),
                    MarketOutcome::Cached { rows, reason } => {
                        format!("failed ({}), {} cached rows kept", reason, rows)
                    }
                    MarketOutcome::Skipped => "skipped (already running)".to_string(),
                    MarketOutcome::Failed(reason) => format!("FAILED: {}", reason),
                };
                println!("{:<16} {}", r.market_id, line);
            }
            let failed = reports
                .iter()
                .filter(|r| matches!(r.outcome, MarketOutcome::Failed(_)))
                .count();
            println!("\n{} markets, {} failed.", reports.len(), failed);
            Ok(())
        }
        Commands::Run => {
            let (cycle, _writer_task) = build_cycle(&settings, None)?;
            scheduler::run_forever(cycle, &settings).await
        }
        Commands::Serve { no_refresh } => {
            let state = api::AppState::new(settings.db_path.clone(), settings.markets_path.clone());
            if no_refresh {
                let conn = db::connect(&settings.db_path)?;
                db::init_schema(&conn)?;
                api::serve(&settings.bind_addr, state).await
            } else {
                let (cycle, _writer_task) = build_cycle(&settings, None)?;
                tokio::select! {
                    r = api::serve(&settings.bind_addr, state) => r,
                    r = scheduler::run_forever(cycle, &settings) => r,
                }
            }
        }
        Commands::Backup => {
            let report = scheduler::run_backup(&settings).await?;
            for path in &report.written {
                println!("Wrote {}", path.display());
            }
            for id in &report.skipped {
                println!("No data for {}, skipped", id);
            }
            println!("{} backups written, {} old folders pruned.", report.written.len(), report.pruned);
            Ok(())
        }
        Commands::Latest { market, limit } => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let rows = db::fetch_latest(&conn, &market, limit)?;
            if rows.is_empty() {
                println!("No prices for {}. Run 'scrape' first.", market);
                return Ok(());
            }

            println!(
                "{:>3} | {:<28} | {:<12} | {:>8} | {:>8} | {:<5} | {:<10}",
                "#", "Product", "Category", "Min", "Max", "Unit", "Date"
            );
            println!("{}", "-".repeat(94));
            for (i, p) in rows.iter().enumerate() {
                let r = &p.record;
                println!(
                    "{:>3} | {:<28} | {:<12} | {:>8} | {:>8} | {:<5} | {:<10}",
                    i + 1,
                    truncate(&r.product, 28),
                    truncate(&r.category, 12),
                    format_price(r.price_min),
                    format_price(r.price_max),
                    r.unit,
                    r.date_scraped
                );
            }
            println!("\n{} rows | {}", rows.len(), market);
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let stats = db::get_stats(&conn)?;
            if stats.is_empty() {
                println!("Database is empty.");
                return Ok(());
            }
            for s in &stats {
                println!(
                    "{:<16} {:<10} rows: {:>6}  days: {:>4}  latest: {}",
                    s.market_id,
                    s.market_name,
                    s.rows,
                    s.days,
                    s.latest_date.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Wire rules, fetcher, cache and writer into runners for the chosen markets.
fn build_cycle(settings: &Settings, only: Option<&str>) -> anyhow::Result<(Cycle, JoinHandle<()>)> {
    let rules = Arc::new(classify::load_rules(&settings.rules_path)?);
    let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(settings.fetch_timeout())?);
    let cache = Arc::new(BatchCache::with_dir(&settings.cache_dir));

    let adapters: Vec<_> = match only {
        Some(id) => match adapters::adapter_for(id) {
            Some(a) => vec![a],
            None => bail!("unknown market {:?}", id),
        },
        None => adapters::default_adapters(),
    };

    let runners = adapters
        .into_iter()
        .map(|adapter| {
            Arc::new(MarketRunner::new(
                adapter,
                Arc::clone(&fetcher),
                Arc::clone(&rules),
                Arc::clone(&cache),
            ))
        })
        .collect();

    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn).context("initialising price schema")?;
    let (writer, task) = writer::spawn_writer(conn);

    Ok((
        Cycle {
            runners,
            writer,
            export_dir: Some(settings.export_dir.clone()),
        },
        task,
    ))
}

fn format_price(p: Option<f64>) -> String {
    p.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".into())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
