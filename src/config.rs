//! Configuration management for hubroute
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::amount::{BPS_DENOMINATOR, MAX_DECIMALS};

use anyhow::{Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

lazy_static::lazy_static! {
    static ref ENV_VAR_RE: regex::Regex =
        regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub hub: HubConfig,
    #[serde(default)]
    pub chains: HashMap<String, ChainConfig>,
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// The hub chain hosting the stable pool
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    #[serde(default = "default_confirmations")]
    pub confirmation_blocks: u64,
    pub pool_address: Address,
    pub withdrawer_address: Address,
    pub converter_address: Address,
    /// The pool's LP token (the hub stablecoin)
    pub lp_token: TokenConfig,
    pub pool_tokens: Vec<PoolTokenConfig>,
    pub explorer_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TokenConfig {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
}

/// A hub-side token held by the pool
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PoolTokenConfig {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
    /// Coin index inside the pool
    pub index: u8,
    /// External chain this token is bridged from, if it is an EVM chain we route to
    pub source_chain_id: Option<u64>,
}

/// An external chain connected to the hub through its gateway
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub gateway_address: Address,
    pub usdc: TokenConfig,
    #[serde(default = "default_confirmations")]
    pub confirmation_blocks: u64,
    pub explorer_url: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexerConfig {
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    pub poll_interval_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
        }
    }
}

impl TrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Upper bound on waiting for an approval or action receipt
    pub inclusion_timeout_secs: u64,
    pub default_slippage_bps: u32,
    pub default_gas_reserve_bps: u32,
    /// Gas granted to the revert handler of a deposit
    pub on_revert_gas_limit: u64,
    pub gas_limit_buffer_percent: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            inclusion_timeout_secs: 600,
            default_slippage_bps: 50,
            default_gas_reserve_bps: 1_000,
            on_revert_gas_limit: 100_000,
            gas_limit_buffer_percent: 20,
        }
    }
}

impl OrchestratorConfig {
    pub fn inclusion_timeout(&self) -> Duration {
        Duration::from_secs(self.inclusion_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Environment variable holding the signing key
    pub private_key_env: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            private_key_env: "HUBROUTE_PRIVATE_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

fn default_confirmations() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Settings {
    /// Load settings from the file named by `HUBROUTE_CONFIG`, or `config/default.toml`
    pub fn load() -> Result<Self> {
        let config_path = env::var("HUBROUTE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse and validate a TOML document, substituting `${VAR}` references first
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one external chain must be enabled");
        }

        if self.hub.rpc_urls.is_empty() {
            anyhow::bail!("Hub chain {} has no RPC URLs configured", self.hub.name);
        }

        for (name, chain) in &self.chains {
            if chain.enabled && chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
            if chain.chain_id == self.hub.chain_id {
                anyhow::bail!("Chain {} reuses the hub chain id {}", name, chain.chain_id);
            }
        }

        let mut tokens = vec![&self.hub.lp_token];
        tokens.extend(self.chains.values().map(|c| &c.usdc));
        for token in tokens {
            check_decimals(&token.symbol, token.decimals)?;
        }
        for token in &self.hub.pool_tokens {
            check_decimals(&token.symbol, token.decimals)?;
            if usize::from(token.index) >= self.hub.pool_tokens.len() {
                anyhow::bail!(
                    "Pool index {} of {} is outside a {}-coin pool",
                    token.index,
                    token.symbol,
                    self.hub.pool_tokens.len()
                );
            }
        }

        let mut indices = HashSet::new();
        let mut symbols = HashSet::new();
        for token in &self.hub.pool_tokens {
            if !indices.insert(token.index) {
                anyhow::bail!("Pool index {} is assigned twice", token.index);
            }
            if !symbols.insert(token.symbol.to_ascii_uppercase()) {
                anyhow::bail!("Pool token {} is listed twice", token.symbol);
            }
        }
        if symbols.contains(&self.hub.lp_token.symbol.to_ascii_uppercase()) {
            anyhow::bail!("LP token {} is also listed as a pool token", self.hub.lp_token.symbol);
        }

        if self.orchestrator.default_slippage_bps >= BPS_DENOMINATOR {
            anyhow::bail!(
                "default_slippage_bps must be below {}",
                BPS_DENOMINATOR
            );
        }
        if self.orchestrator.default_gas_reserve_bps >= BPS_DENOMINATOR {
            anyhow::bail!(
                "default_gas_reserve_bps must be below {}",
                BPS_DENOMINATOR
            );
        }
        if self.tracker.poll_interval_ms == 0 {
            anyhow::bail!("tracker.poll_interval_ms must be positive");
        }

        Ok(())
    }

    /// Get list of enabled external chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get an enabled external chain by chain ID
    pub fn get_chain_by_id(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains
            .values()
            .find(|c| c.enabled && c.chain_id == chain_id)
    }

    /// Resolve a chain name (or numeric id) to its chain ID, hub included
    pub fn resolve_chain(&self, name_or_id: &str) -> Option<u64> {
        if let Ok(chain_id) = name_or_id.parse::<u64>() {
            return Some(chain_id);
        }
        if self.hub.name.eq_ignore_ascii_case(name_or_id) {
            return Some(self.hub.chain_id);
        }
        self.chains
            .iter()
            .find(|(key, c)| key.eq_ignore_ascii_case(name_or_id) || c.name.eq_ignore_ascii_case(name_or_id))
            .map(|(_, c)| c.chain_id)
    }
}

fn check_decimals(symbol: &str, decimals: u8) -> Result<()> {
    if decimals > MAX_DECIMALS {
        anyhow::bail!(
            "Token {} has {} decimals, at most {} are supported",
            symbol,
            decimals,
            MAX_DECIMALS
        );
    }
    Ok(())
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR_RE.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
pub(crate) const TEST_CONFIG: &str = r#"
[hub]
chain_id = 7000
name = "zetachain"
rpc_urls = ["https://hub.example/rpc"]
pool_address = "0x1000000000000000000000000000000000000001"
withdrawer_address = "0x1000000000000000000000000000000000000002"
converter_address = "0x1000000000000000000000000000000000000003"
lp_token = { symbol = "USDC.4", address = "0x1000000000000000000000000000000000000001", decimals = 18 }

[[hub.pool_tokens]]
symbol = "USDC.ARB"
address = "0x2000000000000000000000000000000000000000"
decimals = 6
index = 0
source_chain_id = 42161

[[hub.pool_tokens]]
symbol = "USDC.SOL"
address = "0x2000000000000000000000000000000000000001"
decimals = 6
index = 1

[[hub.pool_tokens]]
symbol = "USDC.BASE"
address = "0x2000000000000000000000000000000000000002"
decimals = 6
index = 2
source_chain_id = 8453

[[hub.pool_tokens]]
symbol = "USDC.AVAX"
address = "0x2000000000000000000000000000000000000003"
decimals = 6
index = 3
source_chain_id = 43114

[chains.arbitrum]
chain_id = 42161
name = "Arbitrum"
rpc_urls = ["https://arb.example/rpc"]
gateway_address = "0x3000000000000000000000000000000000000001"
usdc = { symbol = "USDC", address = "0x4000000000000000000000000000000000000001", decimals = 6 }

[chains.base]
chain_id = 8453
name = "Base"
rpc_urls = ["https://base.example/rpc"]
gateway_address = "0x3000000000000000000000000000000000000002"
usdc = { symbol = "USDC", address = "0x4000000000000000000000000000000000000002", decimals = 6 }

[chains.avalanche]
chain_id = 43114
name = "Avalanche"
rpc_urls = ["https://avax.example/rpc"]
gateway_address = "0x3000000000000000000000000000000000000003"
usdc = { symbol = "USDC", address = "0x4000000000000000000000000000000000000003", decimals = 6 }
enabled = false

[indexer]
base_url = "https://indexer.example/lcd/v1/public"
"#;

#[cfg(test)]
pub(crate) fn test_settings() -> Settings {
    Settings::from_toml_str(TEST_CONFIG).unwrap()
}
