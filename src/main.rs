//! Options analytics CLI.
//!
//! # Usage
//!
//! ```bash
//! export ORATS_API_KEY=your-token
//! export TRADIER_API_KEY=your-token
//!
//! # IV term structure (iv7/iv30/iv60/iv90, slope, regime)
//! options-analytics iv SPY --config config/default.toml
//!
//! # Open-interest positioning with day-over-day change
//! options-analytics positioning SPY
//!
//! # Merged option chain / underlying quotes
//! options-analytics chain SPY
//! options-analytics quotes SPY,QQQ
//!
//! # Term structure and positioning for many symbols, JSON output
//! options-analytics scan --symbols SPY,QQQ,IWM --output scan.json
//!
//! # Routing table and connection test
//! options-analytics sources --test
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use options_analytics::analytics::{ExpiryBucket, IVTermResult, PositioningResult};
use options_analytics::data::types::total_contracts;
use options_analytics::data::OptionSide;
use options_analytics::{AppConfig, SourceOrchestrator};

const SEPARATOR: &str = "============================================================";

#[derive(Parser)]
#[command(name = "options-analytics")]
#[command(about = "Multi-source options analytics: IV term structure and OI positioning")]
#[command(version)]
struct Cli {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// IV term structure for one symbol
    Iv { symbol: String },

    /// Open-interest positioning for one symbol
    Positioning { symbol: String },

    /// Merged option chain for one symbol
    Chain { symbol: String },

    /// Underlying quotes (comma-separated symbols)
    Quotes { symbols: String },

    /// Term structure and positioning for many symbols
    Scan {
        /// Comma-separated list of symbols
        #[arg(long, default_value = "SPY,QQQ,IWM")]
        symbols: String,

        /// Write JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show provider routing
    Sources {
        /// Also call connect on every enabled provider
        #[arg(long)]
        test: bool,
    },
}

#[derive(Serialize)]
struct ScanRow {
    symbol: String,
    iv_term_structure: Option<IVTermResult>,
    positioning: Option<PositioningResult>,
}

fn split_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path).with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(AppConfig::default()),
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).context("Invalid logging.level")?,
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    Ok(())
}

fn print_term_structure(result: &IVTermResult) {
    println!("\n{}", SEPARATOR);
    println!("IV TERM STRUCTURE: {} ({})", result.symbol, result.as_of);
    println!("{}", SEPARATOR);
    println!("  IV7:   {:>7.2}%", result.iv7);
    println!("  IV30:  {:>7.2}%", result.iv30);
    println!("  IV60:  {:>7.2}%", result.iv60);
    println!("  IV90:  {:>7.2}%", result.iv90);
    println!("  Slope: {:>+7.2}  ({:?})", result.slope, result.regime);
    match result.total_open_interest {
        Some(oi) => println!("  Total OI: {}", oi),
        None => println!("  Total OI: n/a"),
    }
    println!("\n  Observed expiries:");
    for point in &result.points {
        println!("    {:>4} DTE  {:>7.2}%", point.dte, point.iv);
    }
}

fn print_positioning(result: &PositioningResult) {
    println!("\n{}", SEPARATOR);
    println!("OI POSITIONING: {} ({})", result.symbol, result.as_of);
    println!("{}", SEPARATOR);
    println!("  {:<8} {:>12} {:>12}", "DTE", "Calls", "Puts");
    for bucket in ExpiryBucket::ALL {
        println!(
            "  {:<8} {:>12} {:>12}",
            bucket.label(),
            result.buckets.get(bucket, OptionSide::Call),
            result.buckets.get(bucket, OptionSide::Put)
        );
    }
    println!("\n  Total OI: {}", result.total_open_interest);
    match result.delta_open_interest_1d {
        Some(delta) => println!("  1d change: {:+}", delta),
        None => println!("  1d change: n/a (first observation)"),
    }
    if let Some(ratio) = result.put_call_ratio() {
        println!("  Put/Call: {:.2}", ratio);
    }
}

async fn cmd_iv(orchestrator: &SourceOrchestrator, symbol: &str) -> Result<()> {
    match orchestrator.get_iv_term_structure(symbol).await {
        Some(result) => print_term_structure(&result),
        None => println!("IV term structure unavailable for {}", symbol),
    }
    Ok(())
}

async fn cmd_positioning(orchestrator: &SourceOrchestrator, symbol: &str) -> Result<()> {
    match orchestrator.get_positioning(symbol).await {
        Some(result) => print_positioning(&result),
        None => println!("Positioning unavailable for {}", symbol),
    }
    Ok(())
}

async fn cmd_chain(orchestrator: &SourceOrchestrator, symbol: &str) -> Result<()> {
    let Some(chains) = orchestrator.get_option_chain(symbol).await else {
        println!("Option chain unavailable for {}", symbol);
        return Ok(());
    };
    info!(symbol, expiries = chains.len(), contracts = total_contracts(&chains), "Option chain");
    println!("{}", serde_json::to_string_pretty(&chains)?);
    Ok(())
}

async fn cmd_quotes(orchestrator: &SourceOrchestrator, symbols: Vec<String>) -> Result<()> {
    match orchestrator.get_market_quotes(&symbols).await {
        Some(quotes) => println!("{}", serde_json::to_string_pretty(&quotes)?),
        None => println!("Quotes unavailable for {}", symbols.join(",")),
    }
    Ok(())
}

async fn cmd_scan(orchestrator: &SourceOrchestrator, symbols: Vec<String>, output: Option<PathBuf>) -> Result<()> {
    let pb = ProgressBar::new(symbols.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );

    let mut rows = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        pb.set_message(format!("{} term structure", symbol));
        let iv_term_structure = orchestrator.get_iv_term_structure(&symbol).await;
        pb.set_message(format!("{} positioning", symbol));
        let positioning = orchestrator.get_positioning(&symbol).await;
        if iv_term_structure.is_none() && positioning.is_none() {
            warn!(symbol = %symbol, "No analytics available");
        }
        rows.push(ScanRow {
            symbol,
            iv_term_structure,
            positioning,
        });
        pb.inc(1);
    }
    pb.finish_with_message("done");

    let json = serde_json::to_string_pretty(&rows)?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {} rows to {}", rows.len(), path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn cmd_sources(orchestrator: &SourceOrchestrator, test: bool) -> Result<()> {
    let info = orchestrator.source_info();
    println!("\n{}", SEPARATOR);
    println!("DATA SOURCES");
    println!("{}", SEPARATOR);
    for (group, route) in [("options_data", info.options_data), ("market_data", info.market_data)] {
        println!(
            "  {:<13} primary={} fallback={} auto_fallback={}",
            group,
            route.primary,
            route.fallback.map_or("-".to_string(), |f| f.to_string()),
            route.auto_fallback
        );
    }
    println!();
    for status in &info.providers {
        println!("  {:<8} {}", status.provider, if status.enabled { "enabled" } else { "disabled" });
    }

    if test {
        println!("\n  Connection test:");
        for report in orchestrator.test_connections().await {
            match &report.error {
                None => println!("    {:<8} OK", report.provider),
                Some(e) => println!("    {:<8} FAILED: {}", report.provider, e),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.logging.level)?;

    let orchestrator = SourceOrchestrator::from_config(&config).context("Invalid data source routing")?;

    match cli.command {
        Commands::Iv { symbol } => cmd_iv(&orchestrator, &symbol.to_uppercase()).await?,
        Commands::Positioning { symbol } => cmd_positioning(&orchestrator, &symbol.to_uppercase()).await?,
        Commands::Chain { symbol } => cmd_chain(&orchestrator, &symbol.to_uppercase()).await?,
        Commands::Quotes { symbols } => cmd_quotes(&orchestrator, split_symbols(&symbols)).await?,
        Commands::Scan { symbols, output } => cmd_scan(&orchestrator, split_symbols(&symbols), output).await?,
        Commands::Sources { test } => cmd_sources(&orchestrator, test).await?,
    }

    Ok(())
}
