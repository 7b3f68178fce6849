//! Runtime configuration
//!
//! Read from environment variables with defaults. The CLI can override
//! individual values (see `main.rs`).

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::agents::credential_hygiene::scanner::{DEFAULT_MAX_AGE_DAYS, DEFAULT_SCAN_CONCURRENCY};
use crate::agents::findings::RiskLevel;
use crate::agents::jit_access::JitPolicy;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_JIT_HOLD_MINUTES: u64 = 30;
pub const DEFAULT_JIT_CEILING_MINUTES: u64 = 120;
pub const DEFAULT_JIT_RETENTION_HOURS: u64 = 7 * 24;

#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Explicit AWS region; the SDK default chain otherwise
    pub region: Option<String>,
    pub listen_addr: SocketAddr,
    pub key_max_age_days: i64,
    pub scan_concurrency: usize,
    pub min_actuation_risk: RiskLevel,
    /// Optional JSON rule file extending the built-in table
    pub remediation_rules: Option<PathBuf>,
    pub sso_instance_arn: Option<String>,
    /// Account the JIT assignments target
    pub account_id: Option<String>,
    pub jit_hold: Duration,
    pub jit_ceiling: Duration,
    pub jit_allowed_permission_sets: Option<HashSet<String>>,
    /// JSON file holding JIT requests across restarts; memory only when unset
    pub jit_state_path: Option<PathBuf>,
    /// How long revoked requests are kept before pruning
    pub jit_retention: Duration,
    pub alert_webhook_url: Option<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            region: None,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            key_max_age_days: DEFAULT_MAX_AGE_DAYS,
            scan_concurrency: DEFAULT_SCAN_CONCURRENCY,
            min_actuation_risk: RiskLevel::High,
            remediation_rules: None,
            sso_instance_arn: None,
            account_id: None,
            jit_hold: Duration::from_secs(DEFAULT_JIT_HOLD_MINUTES * 60),
            jit_ceiling: Duration::from_secs(DEFAULT_JIT_CEILING_MINUTES * 60),
            jit_allowed_permission_sets: None,
            jit_state_path: None,
            jit_retention: Duration::from_secs(DEFAULT_JIT_RETENTION_HOURS * 60 * 60),
            alert_webhook_url: None,
        }
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}={}: {}", key, raw, e)),
        None => Ok(default),
    }
}

impl GuardConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.trim().is_empty())
        })
    }

    /// Build from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let listen_addr = lookup("IAM_GUARD_LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr: SocketAddr = listen_addr
            .parse()
            .with_context(|| format!("Invalid IAM_GUARD_LISTEN_ADDR: {}", listen_addr))?;

        let hold_minutes: u64 = parsed(&lookup, "IAM_GUARD_JIT_HOLD_MINUTES", DEFAULT_JIT_HOLD_MINUTES)?;
        let ceiling_minutes: u64 =
            parsed(&lookup, "IAM_GUARD_JIT_CEILING_MINUTES", DEFAULT_JIT_CEILING_MINUTES)?;
        let retention_hours: u64 =
            parsed(&lookup, "IAM_GUARD_JIT_RETENTION_HOURS", DEFAULT_JIT_RETENTION_HOURS)?;

        let allowed = lookup("IAM_GUARD_JIT_ALLOWED_PERMISSION_SETS").map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect::<HashSet<_>>()
        });

        let config = Self {
            region: lookup("AWS_REGION"),
            listen_addr,
            key_max_age_days: parsed(&lookup, "IAM_GUARD_KEY_MAX_AGE_DAYS", DEFAULT_MAX_AGE_DAYS)?,
            scan_concurrency: parsed(&lookup, "IAM_GUARD_SCAN_CONCURRENCY", DEFAULT_SCAN_CONCURRENCY)?,
            min_actuation_risk: parsed(&lookup, "IAM_GUARD_MIN_ACTUATION_RISK", RiskLevel::High)?,
            remediation_rules: lookup("IAM_GUARD_REMEDIATION_RULES").map(PathBuf::from),
            sso_instance_arn: lookup("IAM_GUARD_SSO_INSTANCE_ARN"),
            account_id: lookup("IAM_GUARD_ACCOUNT_ID"),
            jit_hold: Duration::from_secs(hold_minutes * 60),
            jit_ceiling: Duration::from_secs(ceiling_minutes * 60),
            jit_allowed_permission_sets: allowed,
            jit_state_path: lookup("IAM_GUARD_JIT_STATE_PATH").map(PathBuf::from),
            jit_retention: Duration::from_secs(retention_hours * 60 * 60),
            alert_webhook_url: lookup("IAM_GUARD_ALERT_WEBHOOK_URL"),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.key_max_age_days < 1 {
            bail!("IAM_GUARD_KEY_MAX_AGE_DAYS must be at least 1");
        }
        if self.scan_concurrency == 0 {
            bail!("IAM_GUARD_SCAN_CONCURRENCY must be at least 1");
        }
        if self.jit_ceiling <= self.jit_hold {
            bail!(
                "JIT ceiling ({} min) must exceed the hold ({} min)",
                self.jit_ceiling.as_secs() / 60,
                self.jit_hold.as_secs() / 60
            );
        }
        if let Some(url) = &self.alert_webhook_url {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                bail!("IAM_GUARD_ALERT_WEBHOOK_URL must be an http(s) URL");
            }
        }
        Ok(())
    }

    /// JIT is available only with an Identity Center instance and account
    pub fn jit_enabled(&self) -> bool {
        self.sso_instance_arn.is_some() && self.account_id.is_some()
    }

    pub fn jit_policy(&self) -> JitPolicy {
        let defaults = JitPolicy::default();
        // keep the revoke budget inside the gap between hold and ceiling
        let gap = self.jit_ceiling.saturating_sub(self.jit_hold);
        JitPolicy {
            hold: self.jit_hold,
            ceiling: self.jit_ceiling,
            revoke_budget: defaults.revoke_budget.min(gap),
            allowed_permission_sets: self.jit_allowed_permission_sets.clone(),
        }
    }
}
