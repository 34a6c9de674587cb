//! Operator tooling for the relay HBAR budget.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use relay_budget::budget::{load_spending_plans, IdentityKind, ResetSchedule, SubscriptionTier};
use relay_budget::execution::{estimate_file_transactions_fee, ExchangeRate, FileChunkPlan, TINYBARS_PER_HBAR};
use relay_budget::{logging, RelayConfig};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "relay-budget", version, about = "Inspect and plan the relay HBAR budget")]
struct Cli {
    /// TOML configuration file; RELAY_* environment variables still apply
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a pre-configured spending plan file
    ValidatePlans {
        /// Plan file; defaults to the configured spending_plans_config_file
        file: Option<PathBuf>,
    },
    /// Estimate the HBAR cost of uploading call data to a file
    EstimateFileFee {
        /// Raw call data size in bytes
        #[arg(long)]
        bytes: usize,
        /// US cents per HBAR
        #[arg(long, conflicts_with_all = ["hbar_equivalent", "cent_equivalent"])]
        cents_per_hbar: Option<f64>,
        #[arg(long, requires = "cent_equivalent")]
        hbar_equivalent: Option<u64>,
        #[arg(long, requires = "hbar_equivalent")]
        cent_equivalent: Option<u64>,
    },
    /// Show when the budget resets next
    NextReset {
        /// Evaluate at this RFC 3339 instant instead of now
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Print the effective configuration
    ShowConfig,
}

#[derive(Serialize)]
struct PlanSummary {
    id: String,
    name: String,
    tier: SubscriptionTier,
    evm_addresses: usize,
    ip_addresses: usize,
}

#[derive(Serialize)]
struct FeeEstimate {
    call_data_bytes: usize,
    hex_length: usize,
    chunk_size: usize,
    append_transactions: usize,
    max_chunks: usize,
    cents_per_hbar: f64,
    tinybars: u64,
    hbar: f64,
}

#[derive(Serialize)]
struct NextReset {
    now: DateTime<Utc>,
    next_reset: DateTime<Utc>,
    duration_ms: u64,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {:#}", "error:".red().bold(), err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = RelayConfig::load(cli.config.as_deref()).context("loading configuration")?;
    logging::init(&config.log_level);
    match cli.command {
        Command::ValidatePlans { file } => validate_plans(&config, file, cli.json),
        Command::EstimateFileFee {
            bytes,
            cents_per_hbar,
            hbar_equivalent,
            cent_equivalent,
        } => {
            let cents_per_hbar = match (cents_per_hbar, hbar_equivalent, cent_equivalent) {
                (Some(cents), _, _) => cents,
                (None, Some(hbar), Some(cents)) => ExchangeRate::new(hbar, cents).cents_per_hbar(),
                _ => bail!("an exchange rate is required: --cents-per-hbar or --hbar-equivalent/--cent-equivalent"),
            };
            estimate_file_fee(&config, bytes, cents_per_hbar, cli.json)
        }
        Command::NextReset { now } => next_reset(&config, now.unwrap_or_else(Utc::now), cli.json),
        Command::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn validate_plans(config: &RelayConfig, file: Option<PathBuf>, json: bool) -> Result<()> {
    let Some(path) = file.or_else(|| config.spending_plans_config_file.clone()) else {
        bail!("no plan file given and spending_plans_config_file is not configured");
    };
    let plans = load_spending_plans(&path)?;
    let summaries: Vec<PlanSummary> = plans
        .iter()
        .map(|plan| PlanSummary {
            id: plan.id.clone(),
            name: plan.name.clone(),
            tier: plan.subscription_tier,
            evm_addresses: plan.addresses(IdentityKind::EvmAddress).len(),
            ip_addresses: plan.addresses(IdentityKind::IpAddress).len(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }
    println!("{} {} ({} plans)", "✓".green(), path.display(), summaries.len());
    for plan in &summaries {
        println!(
            "  {} {} [{}] evm={} ip={}",
            plan.id.dimmed(),
            plan.name.bold(),
            plan.tier,
            plan.evm_addresses,
            plan.ip_addresses
        );
    }
    Ok(())
}

fn estimate_file_fee(config: &RelayConfig, bytes: usize, cents_per_hbar: f64, json: bool) -> Result<()> {
    if cents_per_hbar <= 0.0 {
        bail!("exchange rate must be positive, got {} cents per HBAR", cents_per_hbar);
    }
    let plan = FileChunkPlan::new(&vec![0u8; bytes], config.file_append_chunk_size);
    let tinybars = estimate_file_transactions_fee(plan.len(), plan.chunk_size(), cents_per_hbar);
    let estimate = FeeEstimate {
        call_data_bytes: bytes,
        hex_length: plan.len(),
        chunk_size: plan.chunk_size(),
        append_transactions: plan.append_count(),
        max_chunks: config.file_append_max_chunks,
        cents_per_hbar,
        tinybars,
        hbar: tinybars as f64 / TINYBARS_PER_HBAR,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&estimate)?);
    } else {
        println!(
            "{} tinybars ({:.8} HBAR) for 1 create and {} appends",
            estimate.tinybars.to_string().bold(),
            estimate.hbar,
            estimate.append_transactions
        );
    }
    if estimate.append_transactions > estimate.max_chunks {
        bail!(
            "payload needs {} appends, more than file_append_max_chunks ({})",
            estimate.append_transactions,
            estimate.max_chunks
        );
    }
    Ok(())
}

fn next_reset(config: &RelayConfig, now: DateTime<Utc>, json: bool) -> Result<()> {
    let duration = ChronoDuration::milliseconds(config.hbar_rate_limit_duration_ms as i64);
    let schedule = ResetSchedule::new(now, duration);
    schedule.advance(now);
    let result = NextReset {
        now,
        next_reset: schedule.next_reset(),
        duration_ms: config.hbar_rate_limit_duration_ms,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("Next budget reset: {}", result.next_reset.to_rfc3339().bold());
    }
    Ok(())
}
