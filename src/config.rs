//! Relay budget configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `RELAY_*` environment variables (`RELAY_HBAR_RATE_LIMIT_TINYBAR=...`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::budget::{BudgetController, SpendingPlanStore, TierPolicy};
use crate::execution::{EngineConfig, MirrorClient, NetworkClient};
use crate::recorder::ExpenseRecorder;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "RELAY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Global (OPERATOR) budget per period in tinybars; 0 disables budgeting.
    pub hbar_rate_limit_tinybar: i64,
    pub hbar_rate_limit_basic: i64,
    pub hbar_rate_limit_extended: i64,
    pub hbar_rate_limit_privileged: i64,
    pub hbar_rate_limit_duration_ms: u64,
    pub file_append_chunk_size: usize,
    pub file_append_max_chunks: usize,
    pub query_cost_incrementation_step: f64,
    pub query_max_retries: u32,
    /// Fetch transaction records from a consensus node instead of the mirror.
    pub get_record_default_to_consensus_node: bool,
    pub mirror_node_request_retry_count: u32,
    pub mirror_node_retry_delay_ms: u64,
    /// EVM address identifying the operator plan.
    pub operator_address: Option<String>,
    /// JSON file of pre-configured spending plans.
    pub spending_plans_config_file: Option<PathBuf>,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            hbar_rate_limit_tinybar: 11_000_000_000,
            hbar_rate_limit_basic: 1_120_000_000,
            hbar_rate_limit_extended: 3_200_000_000,
            hbar_rate_limit_privileged: 8_000_000_000,
            hbar_rate_limit_duration_ms: 86_400_000,
            file_append_chunk_size: 5120,
            file_append_max_chunks: 20,
            query_cost_incrementation_step: 1.1,
            query_max_retries: 3,
            get_record_default_to_consensus_node: false,
            mirror_node_request_retry_count: 10,
            mirror_node_retry_delay_ms: 500,
            operator_address: None,
            spending_plans_config_file: None,
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        Self::load(None)
    }

    /// Defaults, then `path` when given, then the process environment.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        Self::load_layers(path, None)
    }

    fn load_layers(path: Option<&Path>, env: Option<HashMap<String, String>>) -> ConfigResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(env),
        );
        let loaded: RelayConfig = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn with_hbar_rate_limits(mut self, basic: i64, extended: i64, privileged: i64, total: i64) -> Self {
        self.hbar_rate_limit_basic = basic;
        self.hbar_rate_limit_extended = extended;
        self.hbar_rate_limit_privileged = privileged;
        self.hbar_rate_limit_tinybar = total;
        self
    }

    pub fn with_limit_duration(mut self, duration: Duration) -> Self {
        self.hbar_rate_limit_duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_operator_address(mut self, address: impl Into<String>) -> Self {
        self.operator_address = Some(address.into());
        self
    }

    pub fn with_spending_plans_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.spending_plans_config_file = Some(path.into());
        self
    }

    pub fn with_consensus_node_records(mut self, enabled: bool) -> Self {
        self.get_record_default_to_consensus_node = enabled;
        self
    }

    /// Reject settings the budget or the engine cannot work with.
    pub fn validate(&self) -> ConfigResult<()> {
        self.tier_policy().validate().map_err(ConfigError::Invalid)?;
        if self.hbar_rate_limit_duration_ms == 0 {
            return Err(ConfigError::Invalid("hbar_rate_limit_duration_ms must be positive".into()));
        }
        if self.file_append_chunk_size == 0 {
            return Err(ConfigError::Invalid("file_append_chunk_size must be positive".into()));
        }
        let step = self.query_cost_incrementation_step;
        if step.is_nan() || step < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "query_cost_incrementation_step must be at least 1.0, got {}",
                step
            )));
        }
        Ok(())
    }

    pub fn tier_policy(&self) -> TierPolicy {
        TierPolicy::new(
            self.hbar_rate_limit_basic,
            self.hbar_rate_limit_extended,
            self.hbar_rate_limit_privileged,
            self.hbar_rate_limit_tinybar,
        )
    }

    pub fn limit_duration(&self) -> Duration {
        Duration::from_millis(self.hbar_rate_limit_duration_ms)
    }

    pub fn mirror_retry_delay(&self) -> Duration {
        Duration::from_millis(self.mirror_node_retry_delay_ms)
    }

    /// Budget controller over `store` with the configured limits, period and
    /// operator address.
    pub fn budget_controller(&self, store: SpendingPlanStore) -> BudgetController {
        let controller = BudgetController::new(self.tier_policy(), store, self.limit_duration());
        match &self.operator_address {
            Some(address) => controller.with_operator_address(address.clone()),
            None => controller,
        }
    }

    pub fn expense_recorder(
        &self,
        budget: Arc<BudgetController>,
        client: Arc<dyn NetworkClient>,
        mirror: Arc<dyn MirrorClient>,
    ) -> ExpenseRecorder {
        ExpenseRecorder::new(budget, client, mirror)
            .with_consensus_node_records(self.get_record_default_to_consensus_node)
            .with_mirror_retry(self.mirror_node_request_retry_count, self.mirror_retry_delay())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new()
            .with_file_append_chunk_size(self.file_append_chunk_size)
            .with_file_append_max_chunks(self.file_append_max_chunks)
            .with_query_cost_incrementation_step(self.query_cost_incrementation_step)
            .with_query_max_retries(self.query_max_retries)
    }
}
