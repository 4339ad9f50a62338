//! Ledger network boundary: transaction types, the client and sponsor
//! traits, and the in-process dev ledger.

pub mod client;
pub mod simulated;
pub mod sponsor;
pub mod types;

pub use client::{FeeSponsor, LedgerClient};
pub use simulated::SimulatedLedger;
pub use sponsor::HttpSponsorRelay;
pub use types::{
    lamports_to_sol, sol_to_lamports, AccountMeta, Instruction, SimulationResult, SwapData,
    TokenBalance, Transaction, LAMPORTS_PER_SOL, NATIVE_MINT, SWAP_PROGRAM_ID, SYSTEM_PROGRAM_ID,
    USDC_MINT,
};
