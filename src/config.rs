//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the reasoning-service API key) are referenced by env-var name
//! in the config and resolved at runtime.

use anyhow::{bail, Context, Result};
use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;

use crate::engine::approval::{ApprovalPolicy, Quorum};
use crate::engine::breaker::BreakerConfig;
use crate::engine::router::RouterConfig;
use crate::storage::DEFAULT_JOURNAL_FILE;
use crate::strategy::confidence::ConfidenceConfig;
use crate::strategy::costs::CostModel;
use crate::strategy::risk::RiskPolicy;
use crate::types::SignerId;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub costs: CostModel,
    #[serde(default)]
    pub scorer: ConfidenceConfig,
    #[serde(default)]
    pub risk: RiskPolicy,
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub breaker: BreakerSection,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub cycle_interval_secs: u64,
    pub currency: String,
    /// Funding deposited on a fresh start (empty journal).
    #[serde(default)]
    pub initial_deposit: Option<Decimal>,
    /// Policy version stamped on candidates; bump on every policy change.
    #[serde(default = "default_policy_version")]
    pub policy_version: u64,
}

fn default_policy_version() -> u64 {
    1
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarketConfig {
    pub freshness_window_secs: u64,
    /// JSON-lines file the price feed appends observations to.
    pub feed_path: String,
    /// Lookback for volatility and trend.
    pub conditions_window_secs: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            freshness_window_secs: 1800,
            feed_path: "prices.jsonl".into(),
            conditions_window_secs: 7 * 24 * 3600,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApprovalConfig {
    #[serde(default = "default_ceiling")]
    pub auto_approval_ceiling: Decimal,
    pub required: usize,
    pub signers: Vec<SignerId>,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// How long closed candidates stay queryable before they are pruned.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

fn default_ceiling() -> Decimal {
    dec!(5000)
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_retention_secs() -> u64 {
    86400
}

/// `[breaker]`: trip thresholds plus the reset quorum.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BreakerSection {
    #[serde(flatten)]
    pub limits: BreakerConfig,
    /// Defaults to the approval signers.
    #[serde(default)]
    pub reset_signers: Vec<SignerId>,
    /// Defaults to unanimity.
    #[serde(default)]
    pub reset_required: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub journal_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            journal_path: DEFAULT_JOURNAL_FILE.into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReasoningConfig {
    pub enabled: bool,
    pub api_key_env: String,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub timeout_ms: u64,
    /// Confidence used when the service fails or times out.
    pub fallback_confidence: Decimal,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key_env: "ANTHROPIC_API_KEY".into(),
            model: None,
            max_tokens: None,
            timeout_ms: 5000,
            fallback_confidence: Decimal::ZERO,
        }
    }
}

/// Immutable policy in force for new evaluations and submissions.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySnapshot {
    pub version: u64,
    pub risk: RiskPolicy,
    pub approval: ApprovalPolicy,
}

impl AppConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject policy that cannot be enforced.
    pub fn validate(&self) -> Result<()> {
        self.router.split.validate()?;
        let trade = self.approval_quorum()?;
        let reset = self.reset_quorum()?;
        if !reset.is_stricter_than(&trade) {
            bail!(
                "breaker reset quorum ({} of {}) must be stricter than trade approval ({} of {})",
                reset.required(),
                reset.participants().len(),
                trade.required(),
                trade.participants().len()
            );
        }

        let s = &self.scorer;
        if s.freshness_weight.is_sign_negative()
            || s.accuracy_weight.is_sign_negative()
            || s.freshness_weight + s.accuracy_weight <= Decimal::ZERO
        {
            bail!("confidence weights must be non-negative with a positive sum");
        }

        let r = &self.risk;
        if r.min_confidence < Decimal::ZERO || r.min_confidence > Decimal::ONE {
            bail!("risk.min_confidence must be within [0, 1]");
        }
        if r.max_inventory_exposure <= Decimal::ZERO || r.max_inventory_exposure > Decimal::ONE {
            bail!("risk.max_inventory_exposure must be within (0, 1]");
        }
        if r.default_quantity == 0 {
            bail!("risk.default_quantity must be at least 1");
        }
        if let Some((market, _)) = r
            .marketplace_haircuts
            .iter()
            .find(|(_, h)| **h < Decimal::ZERO || **h > Decimal::ONE)
        {
            bail!("risk.marketplace_haircuts.{market} must be within [0, 1]");
        }
        if self.market.freshness_window_secs == 0 {
            bail!("market.freshness_window_secs must be positive");
        }
        if self.approval.ttl_secs == 0 {
            bail!("approval.ttl_secs must be positive");
        }
        if self.agent.cycle_interval_secs == 0 {
            bail!("agent.cycle_interval_secs must be positive");
        }
        Ok(())
    }

    pub fn approval_quorum(&self) -> Result<Quorum> {
        Quorum::new(self.approval.required, self.approval.signers.iter().cloned())
            .context("Invalid [approval] quorum")
    }

    pub fn reset_quorum(&self) -> Result<Quorum> {
        let signers = if self.breaker.reset_signers.is_empty() {
            &self.approval.signers
        } else {
            &self.breaker.reset_signers
        };
        let quorum = match self.breaker.reset_required {
            Some(required) => Quorum::new(required, signers.iter().cloned()),
            None => Quorum::unanimous(signers.iter().cloned()),
        };
        quorum.context("Invalid [breaker] reset quorum")
    }

    /// Build the policy snapshot for the orchestrator and approval workflow.
    pub fn policy(&self) -> Result<PolicySnapshot> {
        Ok(PolicySnapshot {
            version: self.agent.policy_version,
            risk: self.risk.clone(),
            approval: ApprovalPolicy {
                auto_approval_ceiling: self.approval.auto_approval_ceiling,
                quorum: self.approval_quorum()?,
                ttl: Duration::seconds(self.approval.ttl_secs as i64),
                retention: Duration::seconds(self.approval.retention_secs as i64),
            },
        })
    }

    /// Resolve the reasoning-service API key from the environment.
    pub fn reasoning_api_key(&self) -> Result<SecretString> {
        Self::resolve_env(&self.reasoning.api_key_env).map(SecretString::new)
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::router::RouterMode;

    const MINIMAL: &str = r#"
[agent]
name = "RAMSTRAT-TEST"
cycle_interval_secs = 60
currency = "USD"

[approval]
required = 3
signers = ["alice", "bob", "carol", "dave", "erin"]
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = AppConfig::parse(MINIMAL).unwrap();
        assert_eq!(cfg.risk.min_profit, dec!(20));
        assert_eq!(cfg.risk.min_confidence, dec!(0.7));
        assert_eq!(cfg.approval.auto_approval_ceiling, dec!(5000));
        assert_eq!(cfg.breaker.limits.max_consecutive_losses, 3);
        assert_eq!(cfg.router.mode, RouterMode::Static);
        assert_eq!(cfg.storage.journal_path, DEFAULT_JOURNAL_FILE);

        let reset = cfg.reset_quorum().unwrap();
        assert_eq!(reset.required(), 5);

        let policy = cfg.policy().unwrap();
        assert_eq!(policy.version, 1);
        assert_eq!(policy.approval.quorum.required(), 3);
        assert_eq!(policy.approval.ttl, Duration::hours(1));
        assert_eq!(policy.approval.retention, Duration::hours(24));
        assert_eq!(policy.risk.max_open_lots_per_product, 5);
        assert_eq!(policy.risk.marketplace_haircuts.get("aliexpress"), Some(&dec!(0.2)));
    }

    #[test]
    fn test_full_sections_parse() {
        let text = format!(
            "{MINIMAL}\n{}",
            r#"
[costs]
default_shipping = "12.50"
sell_fee_rate = "0.10"

[costs.shipping]
newegg = "0"

[risk]
min_profit = "25"
min_margin_pct = "0"

[router]
mode = "dynamic"

[router.split]
inventory_fraction = "0.7"
buyback_fraction = "0.3"

[breaker]
max_consecutive_losses = 5
cash_floor = "100"
reset_required = 4
"#
        );
        let cfg = AppConfig::parse(&text).unwrap();
        assert_eq!(cfg.costs.shipping_from("newegg"), Decimal::ZERO);
        assert_eq!(cfg.costs.shipping_from("ebay"), dec!(12.50));
        assert_eq!(cfg.risk.min_profit, dec!(25));
        assert_eq!(cfg.router.mode, RouterMode::Dynamic);
        assert_eq!(cfg.breaker.limits.max_consecutive_losses, 5);
        assert_eq!(cfg.breaker.limits.cash_floor, dec!(100));
        assert_eq!(cfg.reset_quorum().unwrap().required(), 4);
    }

    #[test]
    fn test_bad_split_rejected() {
        let text = format!(
            "{MINIMAL}\n{}",
            "[router.split]\ninventory_fraction = \"0.6\"\nbuyback_fraction = \"0.6\"\n"
        );
        assert!(AppConfig::parse(&text).is_err());
    }

    #[test]
    fn test_quorum_larger_than_participants_rejected() {
        let text = MINIMAL.replace("required = 3", "required = 6");
        assert!(AppConfig::parse(&text).is_err());
    }

    #[test]
    fn test_reset_quorum_must_be_stricter() {
        let text = format!("{MINIMAL}\n[breaker]\nreset_required = 2\n");
        assert!(AppConfig::parse(&text).is_err());
    }

    #[test]
    fn test_zero_confidence_weights_rejected() {
        let text = format!(
            "{MINIMAL}\n[scorer]\nfreshness_weight = \"0\"\naccuracy_weight = \"0\"\n"
        );
        assert!(AppConfig::parse(&text).is_err());
    }

    #[test]
    fn test_marketplace_haircut_out_of_range_rejected() {
        let text = format!("{MINIMAL}\n[risk.marketplace_haircuts]\nwish = \"1.5\"\n");
        let err = AppConfig::parse(&text).unwrap_err();
        assert!(format!("{err:#}").contains("wish"));
    }

    #[test]
    fn test_load_repo_config() {
        let cfg = AppConfig::load("config.toml").unwrap();
        assert_eq!(cfg.agent.name, "RAMSTRAT-001");
        assert!(cfg.approval.signers.len() >= cfg.approval.required);
    }
}
