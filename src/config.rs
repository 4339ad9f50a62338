use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use crate::custody::KdfParams;
use crate::error::{Result, SigilError};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub custody: CustodyConfig,
    pub registry: RegistryConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub submission: SubmissionConfig,
    #[serde(default)]
    pub sponsor: SponsorConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub strategies: StrategiesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Deserialize)]
pub struct CustodyConfig {
    /// Directory holding one encrypted record per wallet name
    pub keys_dir: PathBuf,
    /// Process-wide passphrase for deriving record keys
    #[serde(default)]
    pub passphrase: Option<String>,
    /// Argon2 memory cost in KiB
    #[serde(default = "default_kdf_memory_kib")]
    pub kdf_memory_kib: u32,
    /// Argon2 iterations
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
    /// Argon2 lanes
    #[serde(default = "default_kdf_parallelism")]
    pub kdf_parallelism: u32,
}

fn default_kdf_memory_kib() -> u32 {
    19 * 1024
}

fn default_kdf_iterations() -> u32 {
    2
}

fn default_kdf_parallelism() -> u32 {
    1
}

impl CustodyConfig {
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            memory_kib: self.kdf_memory_kib,
            iterations: self.kdf_iterations,
            parallelism: self.kdf_parallelism,
        }
    }

    /// Resolve the passphrase once at startup.
    ///
    /// Order: `custody.passphrase` (also `SIGIL_CUSTODY__PASSPHRASE`), then
    /// `SIGIL_WALLET_PASSPHRASE`. Blank values count as missing.
    pub fn resolve_passphrase(&self) -> Option<Zeroizing<String>> {
        self.passphrase
            .clone()
            .or_else(|| std::env::var("SIGIL_WALLET_PASSPHRASE").ok())
            .filter(|p| !p.trim().is_empty())
            .map(Zeroizing::new)
    }
}

impl std::fmt::Debug for CustodyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustodyConfig")
            .field("keys_dir", &self.keys_dir)
            .field(
                "passphrase",
                &self.passphrase.as_ref().map(|_| "<redacted>"),
            )
            .field("kdf_memory_kib", &self.kdf_memory_kib)
            .field("kdf_iterations", &self.kdf_iterations)
            .field("kdf_parallelism", &self.kdf_parallelism)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// JSON file holding every agent record
    pub path: PathBuf,
    /// Spending ceiling (SOL) for agents created without an explicit limit
    pub default_spending_limit: Decimal,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PolicyConfig {
    /// Approved program ids. Empty means every program is allowed.
    #[serde(default)]
    pub allowed_programs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionConfig {
    /// Total submission attempts when the blockhash goes stale
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff delay in milliseconds
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Skip the pre-flight simulation by default
    #[serde(default)]
    pub skip_simulation: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    250
}

fn default_retry_max_delay_ms() -> u64 {
    4_000
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            skip_simulation: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SponsorConfig {
    /// Route signed transactions through the fee-sponsorship relay
    #[serde(default)]
    pub enabled: bool,
    /// Relay JSON-RPC endpoint
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Iterations per run when the caller does not specify one
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Pause between iterations in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_iterations() -> u32 {
    5
}

fn default_interval_ms() -> u64 {
    2_000
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            interval_ms: default_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategiesConfig {
    /// Destination for the simple strategy; the agent's own wallet when unset
    #[serde(default)]
    pub transfer_destination: Option<String>,
    /// SOL moved per simple transfer
    #[serde(default = "default_transfer_amount")]
    pub transfer_amount: Decimal,
    /// Swap program targeted by trading and rebalancing
    #[serde(default = "default_swap_program")]
    pub swap_program: String,
    /// Token mint traded against SOL
    #[serde(default = "default_quote_mint")]
    pub quote_mint: String,
    /// Buy when the simulated price drops below this
    #[serde(default = "default_buy_below")]
    pub buy_below: Decimal,
    /// Sell when the simulated price rises above this
    #[serde(default = "default_sell_above")]
    pub sell_above: Decimal,
    /// SOL committed per trade
    #[serde(default = "default_trade_amount")]
    pub trade_amount: Decimal,
    /// Target share of portfolio value held in SOL (0..1)
    #[serde(default = "default_target_sol_share")]
    pub target_sol_share: Decimal,
    /// Tolerated drift around the target share before rebalancing
    #[serde(default = "default_band")]
    pub band: Decimal,
    /// Starting price of the simulated feed
    #[serde(default = "default_initial_price")]
    pub initial_price: Decimal,
}

fn default_transfer_amount() -> Decimal {
    Decimal::new(1, 3)
}

fn default_swap_program() -> String {
    crate::ledger::SWAP_PROGRAM_ID.to_string()
}

fn default_quote_mint() -> String {
    crate::ledger::USDC_MINT.to_string()
}

fn default_buy_below() -> Decimal {
    Decimal::from(95)
}

fn default_sell_above() -> Decimal {
    Decimal::from(105)
}

fn default_trade_amount() -> Decimal {
    Decimal::new(1, 2)
}

fn default_target_sol_share() -> Decimal {
    Decimal::new(5, 1)
}

fn default_band() -> Decimal {
    Decimal::new(1, 1)
}

fn default_initial_price() -> Decimal {
    Decimal::from(100)
}

impl Default for StrategiesConfig {
    fn default() -> Self {
        Self {
            transfer_destination: None,
            transfer_amount: default_transfer_amount(),
            swap_program: default_swap_program(),
            quote_mint: default_quote_mint(),
            buy_below: default_buy_below(),
            sell_above: default_sell_above(),
            trade_amount: default_trade_amount(),
            target_sol_share: default_target_sol_share(),
            band: default_band(),
            initial_price: default_initial_price(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("custody.keys_dir", "data/wallets")?
            .set_default("registry.path", "data/state/agents.json")?
            .set_default("registry.default_spending_limit", "1.0")?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("SIGIL_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (SIGIL_CUSTODY__KEYS_DIR, etc.)
            .add_source(
                Environment::with_prefix("SIGIL")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Defaults rooted at `data_dir`, for tests and one-off CLI use
    pub fn default_config<P: AsRef<Path>>(data_dir: P) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            custody: CustodyConfig {
                keys_dir: data_dir.join("wallets"),
                passphrase: None,
                kdf_memory_kib: default_kdf_memory_kib(),
                kdf_iterations: default_kdf_iterations(),
                kdf_parallelism: default_kdf_parallelism(),
            },
            registry: RegistryConfig {
                path: data_dir.join("agents.json"),
                default_spending_limit: Decimal::ONE,
            },
            policy: PolicyConfig::default(),
            submission: SubmissionConfig::default(),
            sponsor: SponsorConfig::default(),
            runner: RunnerConfig::default(),
            strategies: StrategiesConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.registry.default_spending_limit < Decimal::ZERO {
            errors.push("registry.default_spending_limit must not be negative".to_string());
        }

        if self.custody.kdf_memory_kib < 8 * self.custody.kdf_parallelism.max(1) {
            errors.push("custody.kdf_memory_kib must be at least 8 KiB per lane".to_string());
        }

        if self.custody.kdf_iterations == 0 {
            errors.push("custody.kdf_iterations must be positive".to_string());
        }

        if self.submission.max_attempts == 0 {
            errors.push("submission.max_attempts must be at least 1".to_string());
        }

        if self.sponsor.enabled && self.sponsor.url.is_none() {
            errors.push("sponsor.url is required when sponsor.enabled is set".to_string());
        }

        let s = &self.strategies;
        if s.buy_below >= s.sell_above {
            errors.push("strategies.buy_below must be less than strategies.sell_above".to_string());
        }
        if s.target_sol_share <= Decimal::ZERO || s.target_sol_share >= Decimal::ONE {
            errors.push("strategies.target_sol_share must be between 0 and 1".to_string());
        }
        if s.band <= Decimal::ZERO {
            errors.push("strategies.band must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate and fold every problem into one configuration error
    pub fn ensure_valid(&self) -> Result<()> {
        self.validate()
            .map_err(|errors| SigilError::Configuration(errors.join("; ")))
    }
}
