pub mod cli;
pub mod config;
pub mod custody;
pub mod error;
pub mod events;
pub mod ledger;
pub mod policy;
pub mod registry;
pub mod runner;
pub mod strategies;
pub mod submission;

pub use config::AppConfig;
pub use custody::{KeyStore, Keypair};
pub use error::{Result, SigilError};
pub use events::{AgentEvent, EventBus};
pub use ledger::{FeeSponsor, LedgerClient, SimulatedLedger, Transaction};
pub use policy::ProgramAllowlist;
pub use registry::{AgentRecord, AgentRegistry, StrategyKind};
pub use runner::{Decide, ExecutionLoop, LoopConfig, LoopOutcome, LoopState, RunningAgents};
pub use submission::{RetryPolicy, SubmitOptions, TransactionSubmitter};
