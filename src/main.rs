//! IAM Guard
//!
//! Security workers for an AWS organization, served over HTTP or run as
//! one-shot tasks. Uses the AWS default credential chain - no secrets in code.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use iam_guard::handlers::{Handlers, InvocationContext};
use iam_guard::{server, GuardConfig, RiskLevel};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Task to run once instead of serving (e.g., 'credential-scan', 'finding')
    #[arg(long)]
    task: Option<String>,

    /// Finding event JSON file for `--task finding` (stdin when omitted)
    #[arg(long)]
    event: Option<PathBuf>,

    /// Listen address for the HTTP surface
    #[arg(long, env = "IAM_GUARD_LISTEN_ADDR")]
    listen_addr: Option<SocketAddr>,

    /// Access key age threshold in days
    #[arg(long, env = "IAM_GUARD_KEY_MAX_AGE_DAYS")]
    max_age_days: Option<i64>,

    /// Lowest risk level that triggers live remediation
    #[arg(long, env = "IAM_GUARD_MIN_ACTUATION_RISK")]
    min_actuation_risk: Option<RiskLevel>,
}

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = GuardConfig::from_env().context("Invalid configuration")?;
    if let Some(addr) = cli.listen_addr {
        config.listen_addr = addr;
    }
    if let Some(days) = cli.max_age_days {
        config.key_max_age_days = days;
    }
    if let Some(risk) = cli.min_actuation_risk {
        config.min_actuation_risk = risk;
    }
    config.validate()?;

    let handlers = Handlers::from_config(&config).await?;

    if let Some(task) = cli.task {
        let ctx = InvocationContext::new();
        let response = match task.as_str() {
            "credential-scan" => handlers.credential_scan(&ctx).await,
            "finding" => {
                let raw = match &cli.event {
                    Some(path) => std::fs::read_to_string(path)
                        .with_context(|| format!("Failed to read event file: {:?}", path))?,
                    None => std::io::read_to_string(std::io::stdin())
                        .context("Failed to read event from stdin")?,
                };
                let event = serde_json::from_str(&raw).context("Event is not valid JSON")?;
                handlers.finding_event(&event, &ctx).await
            }
            other => {
                warn!("Unknown task: {}", other);
                anyhow::bail!("Unknown task: {} (expected 'credential-scan' or 'finding')", other);
            }
        };

        println!("{}", serde_json::to_string_pretty(&response)?);
        if !response.is_success() {
            std::process::exit(1);
        }
        return Ok(());
    }

    info!("Starting IAM Guard");
    server::serve(handlers, config.listen_addr).await
}
