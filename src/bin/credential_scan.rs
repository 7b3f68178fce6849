//! Credential Scan - Standalone Binary
//!
//! Runs one access-key hygiene sweep and prints the report. Meant for a
//! scheduler (cron, EventBridge Scheduler, Kubernetes CronJob).
//!
//! ## Usage
//!
//! ```bash
//! # Deactivate active keys older than 90 days
//! credential-scan
//!
//! # Custom threshold, JSON report
//! credential-scan --max-age-days 60 --output json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use iam_guard::agents::credential_hygiene::{CredentialScanner, IamAccessKeyClient};
use iam_guard::tools::load_sdk_config;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Credential Scan - Deactivate stale IAM access keys
#[derive(Parser, Debug)]
#[command(name = "credential-scan", version, about)]
struct Args {
    /// AWS region (default provider chain when omitted)
    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,

    /// Keys older than this many days are deactivated
    #[arg(long, env = "IAM_GUARD_KEY_MAX_AGE_DAYS", default_value_t = 90)]
    max_age_days: i64,

    /// Users processed in parallel
    #[arg(long, env = "IAM_GUARD_SCAN_CONCURRENCY", default_value_t = 8)]
    concurrency: usize,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if args.max_age_days < 1 {
        anyhow::bail!("--max-age-days must be at least 1");
    }

    info!(
        max_age_days = %args.max_age_days,
        concurrency = %args.concurrency,
        "Starting credential scan"
    );

    let sdk = load_sdk_config(args.region.as_deref()).await;
    let scanner = CredentialScanner::new(Arc::new(IamAccessKeyClient::new(&sdk)))
        .with_max_age_days(args.max_age_days)
        .with_concurrency(args.concurrency);

    let report = scanner.run().await.context("Credential scan failed")?;

    match args.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            println!("Users scanned:  {}", report.users_scanned);
            println!("Keys examined:  {}", report.keys_examined);
            println!("Keys disabled:  {}", report.disabled_count);
            for key in &report.disabled {
                println!("  {} {} ({} days)", key.user, key.key_id, key.age_days);
            }
            if !report.failures.is_empty() {
                println!("Failures:       {}", report.failures.len());
                for failure in &report.failures {
                    println!(
                        "  {} {}: {}",
                        failure.user,
                        failure.key_id.as_deref().unwrap_or("-"),
                        failure.message
                    );
                }
            }
        }
    }

    Ok(())
}
