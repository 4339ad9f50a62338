use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Main error type for wallet custody and agent execution
#[derive(Error, Debug)]
pub enum SigilError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Configuration source error: {0}")]
    Config(#[from] config::ConfigError),

    // Lookup errors
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Wallet already exists: {0}")]
    WalletExists(String),

    #[error("Wallet {wallet_name} is already registered as an agent")]
    DuplicateRegistration { wallet_name: String },

    // Custody errors. The message is fixed so callers cannot tell a wrong
    // passphrase from a damaged record.
    #[error("Authentication failed: cannot access wallet")]
    Authentication,

    // Submission errors
    #[error("Policy violation: program {program_id} is not allowlisted")]
    PolicyViolation { program_id: String },

    #[error("Simulation failed: {error}")]
    SimulationFailed { error: String, logs: Vec<String> },

    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Spending ledger errors
    #[error("Spending limit exceeded: spent {spent} + requested {requested} > limit {limit}")]
    LimitExceeded {
        spent: Decimal,
        requested: Decimal,
        limit: Decimal,
    },

    // Execution errors
    #[error("Agent {0} is already running")]
    AgentBusy(Uuid),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SigilError {
    /// Whether the failure belongs to the freshness-token staleness class,
    /// the only kind the submission pipeline retries.
    pub fn is_transient(&self) -> bool {
        matches!(self, SigilError::TransientNetwork(_))
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        SigilError::NotFound(what.to_string())
    }
}

/// Result type alias for SigilError
pub type Result<T> = std::result::Result<T, SigilError>;
