//! In-process dev ledger
//!
//! Keeps balances and a rolling window of valid blockhashes in memory,
//! verifies signatures, and executes system transfers and router swaps
//! against a settable price. Fault hooks let callers reproduce stale
//! blockhashes, failing simulations and slow confirmation.

use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::RngCore;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::client::LedgerClient;
use super::types::{
    lamports_to_sol, SimulationResult, TokenBalance, Transaction, LAMPORTS_PER_SOL, NATIVE_MINT,
};
use crate::error::{Result, SigilError};

/// How many recent blockhashes stay valid
const BLOCKHASH_WINDOW: usize = 150;
const DEFAULT_FEE_LAMPORTS: u64 = 5_000;
const DEFAULT_TOKEN_DECIMALS: u8 = 6;

#[derive(Debug, Clone, Default)]
struct Balances {
    lamports: HashMap<String, u64>,
    /// owner -> mint -> base units
    tokens: HashMap<String, HashMap<String, u64>>,
}

#[derive(Debug)]
struct LedgerState {
    blockhashes: VecDeque<String>,
    balances: Balances,
    decimals: HashMap<String, u8>,
    /// Quote tokens per SOL
    price: Decimal,
    stale_submissions: u32,
    simulation_error: Option<String>,
    submit_delay: Duration,
    submit_attempts: u32,
    confirmed: Vec<Transaction>,
}

pub struct SimulatedLedger {
    state: Mutex<LedgerState>,
    fee_lamports: u64,
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                blockhashes: VecDeque::new(),
                balances: Balances::default(),
                decimals: HashMap::new(),
                price: Decimal::from(100),
                stale_submissions: 0,
                simulation_error: None,
                submit_delay: Duration::ZERO,
                submit_attempts: 0,
                confirmed: Vec::new(),
            }),
            fee_lamports: DEFAULT_FEE_LAMPORTS,
        }
    }

    pub fn fee_lamports(&self) -> u64 {
        self.fee_lamports
    }

    pub async fn fund(&self, public_key: &str, lamports: u64) {
        let mut state = self.state.lock().await;
        *state
            .balances
            .lamports
            .entry(public_key.to_string())
            .or_default() += lamports;
    }

    /// Set a token holding in UI units
    pub async fn set_token_balance(&self, owner: &str, mint: &str, amount: Decimal) {
        let mut state = self.state.lock().await;
        let decimals = state.decimals_for(mint);
        let base = to_base_units(amount, decimals);
        state
            .balances
            .tokens
            .entry(owner.to_string())
            .or_default()
            .insert(mint.to_string(), base);
    }

    pub async fn set_price(&self, price: Decimal) {
        self.state.lock().await.price = price;
    }

    /// Fail the next `count` submissions as if their blockhash expired
    pub async fn expire_next_submissions(&self, count: u32) {
        self.state.lock().await.stale_submissions = count;
    }

    /// Force every simulation to report `error` (None clears it)
    pub async fn fail_simulations_with(&self, error: Option<String>) {
        self.state.lock().await.simulation_error = error;
    }

    /// Delay applied before each submission is processed
    pub async fn set_submit_delay(&self, delay: Duration) {
        self.state.lock().await.submit_delay = delay;
    }

    pub async fn submit_attempts(&self) -> u32 {
        self.state.lock().await.submit_attempts
    }

    pub async fn confirmed(&self) -> Vec<Transaction> {
        self.state.lock().await.confirmed.clone()
    }
}

impl LedgerState {
    fn decimals_for(&self, mint: &str) -> u8 {
        self.decimals
            .get(mint)
            .copied()
            .unwrap_or(DEFAULT_TOKEN_DECIMALS)
    }

    fn rotate_blockhash(&mut self) -> String {
        let hash = random_hex(32);
        self.blockhashes.push_back(hash.clone());
        while self.blockhashes.len() > BLOCKHASH_WINDOW {
            self.blockhashes.pop_front();
        }
        hash
    }

    fn is_recent(&self, blockhash: Option<&str>) -> bool {
        blockhash.is_some_and(|h| self.blockhashes.iter().any(|b| b == h))
    }

    /// Apply a transaction to a scratch copy of balances
    fn execute(&self, tx: &Transaction, fee_lamports: u64) -> std::result::Result<(Balances, Vec<String>), String> {
        let mut scratch = self.balances.clone();
        let mut logs = Vec::new();

        let fee_payer = tx.fee_payer.as_deref().ok_or("missing fee payer")?;
        let fee = fee_lamports * tx.signatures.len().max(1) as u64;
        debit_lamports(&mut scratch, fee_payer, fee)?;

        for (depth, ix) in tx.instructions.iter().enumerate() {
            logs.push(format!("Program {} invoke [{}]", ix.program_id, depth + 1));

            if let Some((from, to, lamports)) = ix.as_system_transfer() {
                if from != fee_payer {
                    return Err(format!("missing signature for {}", from));
                }
                debit_lamports(&mut scratch, from, lamports)?;
                *scratch.lamports.entry(to.to_string()).or_default() += lamports;
            } else if let Some(swap) = ix.as_swap() {
                let owner = ix
                    .accounts
                    .first()
                    .map(|a| a.pubkey.as_str())
                    .ok_or("swap has no owner")?;
                if owner != fee_payer {
                    return Err(format!("missing signature for {}", owner));
                }
                self.execute_swap(&mut scratch, owner, &swap.input_mint, &swap.output_mint, swap.amount)?;
                logs.push(format!(
                    "Program log: swapped {} {} for {}",
                    swap.amount, swap.input_mint, swap.output_mint
                ));
            } else {
                logs.push(format!("Program {} consumed 0 compute units", ix.program_id));
            }

            logs.push(format!("Program {} success", ix.program_id));
        }

        Ok((scratch, logs))
    }

    fn execute_swap(
        &self,
        balances: &mut Balances,
        owner: &str,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
    ) -> std::result::Result<(), String> {
        if self.price <= Decimal::ZERO {
            return Err("no liquidity".to_string());
        }
        if input_mint == NATIVE_MINT {
            debit_lamports(balances, owner, amount)?;
            let decimals = self.decimals_for(output_mint);
            let out = to_base_units(lamports_to_sol(amount) * self.price, decimals);
            *balances
                .tokens
                .entry(owner.to_string())
                .or_default()
                .entry(output_mint.to_string())
                .or_default() += out;
        } else if output_mint == NATIVE_MINT {
            let decimals = self.decimals_for(input_mint);
            let holdings = balances.tokens.entry(owner.to_string()).or_default();
            let held = holdings.entry(input_mint.to_string()).or_default();
            if *held < amount {
                return Err(format!("insufficient {} balance", input_mint));
            }
            *held -= amount;
            let sol = from_base_units(amount, decimals) / self.price;
            let lamports = (sol * Decimal::from(LAMPORTS_PER_SOL))
                .trunc()
                .to_u64()
                .unwrap_or(0);
            *balances.lamports.entry(owner.to_string()).or_default() += lamports;
        } else {
            return Err("only SOL pairs are routable".to_string());
        }
        Ok(())
    }
}

fn debit_lamports(balances: &mut Balances, account: &str, lamports: u64) -> std::result::Result<(), String> {
    let balance = balances.lamports.entry(account.to_string()).or_default();
    if *balance < lamports {
        return Err(format!(
            "insufficient funds: {} has {} lamports, needs {}",
            account, balance, lamports
        ));
    }
    *balance -= lamports;
    Ok(())
}

fn to_base_units(amount: Decimal, decimals: u8) -> u64 {
    (amount * Decimal::from(10u64.pow(decimals as u32)))
        .trunc()
        .to_u64()
        .unwrap_or(0)
}

fn from_base_units(amount: u64, decimals: u8) -> Decimal {
    Decimal::from(amount) / Decimal::from(10u64.pow(decimals as u32))
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    async fn latest_blockhash(&self) -> Result<String> {
        Ok(self.state.lock().await.rotate_blockhash())
    }

    async fn simulate(&self, tx: &Transaction) -> Result<SimulationResult> {
        let state = self.state.lock().await;

        if let Some(error) = &state.simulation_error {
            return Ok(SimulationResult {
                error: Some(error.clone()),
                logs: vec!["Program log: forced failure".to_string()],
            });
        }
        if !tx.verify_signatures() {
            return Ok(SimulationResult {
                error: Some("SignatureFailure".to_string()),
                logs: Vec::new(),
            });
        }
        if !state.is_recent(tx.recent_blockhash.as_deref()) {
            return Ok(SimulationResult {
                error: Some("BlockhashNotFound".to_string()),
                logs: Vec::new(),
            });
        }

        Ok(match state.execute(tx, self.fee_lamports) {
            Ok((_, logs)) => SimulationResult { error: None, logs },
            Err(error) => SimulationResult {
                error: Some(error),
                logs: Vec::new(),
            },
        })
    }

    async fn submit_and_confirm(&self, tx: &Transaction) -> Result<String> {
        let delay = self.state.lock().await.submit_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        state.submit_attempts += 1;

        if state.stale_submissions > 0 {
            state.stale_submissions -= 1;
            state.blockhashes.clear();
            return Err(SigilError::TransientNetwork("Blockhash not found".to_string()));
        }
        if !state.is_recent(tx.recent_blockhash.as_deref()) {
            return Err(SigilError::TransientNetwork("Blockhash not found".to_string()));
        }
        if !tx.verify_signatures() {
            return Err(SigilError::Network("signature verification failed".to_string()));
        }

        let (balances, _) = state
            .execute(tx, self.fee_lamports)
            .map_err(|e| SigilError::Network(format!("transaction failed: {}", e)))?;
        state.balances = balances;
        state.confirmed.push(tx.clone());

        let signature = tx
            .signature()
            .map(str::to_string)
            .ok_or_else(|| SigilError::Network("unsigned transaction".to_string()))?;
        debug!(signature = %signature, "Simulated ledger confirmed transaction");
        Ok(signature)
    }

    async fn get_balance(&self, public_key: &str) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state
            .balances
            .lamports
            .get(public_key)
            .copied()
            .unwrap_or(0))
    }

    async fn get_token_balances(&self, public_key: &str) -> Result<Vec<TokenBalance>> {
        let state = self.state.lock().await;
        let mut balances: Vec<TokenBalance> = state
            .balances
            .tokens
            .get(public_key)
            .map(|holdings| {
                holdings
                    .iter()
                    .filter(|(_, amount)| **amount > 0)
                    .map(|(mint, amount)| {
                        let decimals = state.decimals_for(mint);
                        TokenBalance {
                            mint: mint.clone(),
                            amount: from_base_units(*amount, decimals),
                            decimals,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        balances.sort_by(|a, b| a.mint.cmp(&b.mint));
        Ok(balances)
    }

    async fn request_airdrop(&self, public_key: &str, lamports: u64) -> Result<String> {
        self.fund(public_key, lamports).await;
        Ok(random_hex(64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::Keypair;
    use crate::ledger::types::{Instruction, SwapData, USDC_MINT};
    use rust_decimal_macros::dec;

    async fn signed_transfer(ledger: &SimulatedLedger, from: &Keypair, to: &str, lamports: u64) -> Transaction {
        let mut tx = Transaction::new(vec![Instruction::system_transfer(&from.public_key(), to, lamports)]);
        tx.fee_payer = Some(from.public_key());
        tx.recent_blockhash = Some(ledger.latest_blockhash().await.unwrap());
        tx.sign(from).unwrap();
        tx
    }

    #[tokio::test]
    async fn transfer_moves_lamports_and_charges_fee() {
        let ledger = SimulatedLedger::new();
        let alice = Keypair::generate();
        let bob = Keypair::generate();
        ledger.fund(&alice.public_key(), LAMPORTS_PER_SOL).await;

        let tx = signed_transfer(&ledger, &alice, &bob.public_key(), 1_000).await;
        let sim = ledger.simulate(&tx).await.unwrap();
        assert!(sim.error.is_none(), "{:?}", sim);

        ledger.submit_and_confirm(&tx).await.unwrap();
        assert_eq!(ledger.get_balance(&bob.public_key()).await.unwrap(), 1_000);
        assert_eq!(
            ledger.get_balance(&alice.public_key()).await.unwrap(),
            LAMPORTS_PER_SOL - 1_000 - ledger.fee_lamports()
        );
    }

    #[tokio::test]
    async fn overdraft_fails_simulation() {
        let ledger = SimulatedLedger::new();
        let alice = Keypair::generate();
        let tx = signed_transfer(&ledger, &alice, "dead", 10).await;
        let sim = ledger.simulate(&tx).await.unwrap();
        assert!(sim.error.unwrap().contains("insufficient funds"));
    }

    #[tokio::test]
    async fn stale_submissions_are_transient() {
        let ledger = SimulatedLedger::new();
        let alice = Keypair::generate();
        ledger.fund(&alice.public_key(), LAMPORTS_PER_SOL).await;
        ledger.expire_next_submissions(1).await;

        let tx = signed_transfer(&ledger, &alice, "dead", 10).await;
        let err = ledger.submit_and_confirm(&tx).await.unwrap_err();
        assert!(err.is_transient());
        // The window was flushed, so the same transaction stays stale.
        assert!(ledger.submit_and_confirm(&tx).await.unwrap_err().is_transient());
        assert_eq!(ledger.submit_attempts().await, 2);
    }

    #[tokio::test]
    async fn swap_converts_at_price() {
        let ledger = SimulatedLedger::new();
        let alice = Keypair::generate();
        ledger.fund(&alice.public_key(), 2 * LAMPORTS_PER_SOL).await;
        ledger.set_price(dec!(150)).await;

        let swap = SwapData {
            input_mint: NATIVE_MINT.to_string(),
            output_mint: USDC_MINT.to_string(),
            amount: LAMPORTS_PER_SOL,
        };
        let mut tx = Transaction::new(vec![Instruction::swap(
            &alice.public_key(),
            crate::ledger::SWAP_PROGRAM_ID,
            &swap,
        )
        .unwrap()]);
        tx.fee_payer = Some(alice.public_key());
        tx.recent_blockhash = Some(ledger.latest_blockhash().await.unwrap());
        tx.sign(&alice).unwrap();
        ledger.submit_and_confirm(&tx).await.unwrap();

        let tokens = ledger.get_token_balances(&alice.public_key()).await.unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].mint, USDC_MINT);
        assert_eq!(tokens[0].amount, dec!(150));
    }
}
