//! Agent registry and spending ledger
//!
//! Records are durable; the running set is not. After a restart every agent
//! is idle until `run` is called again.

pub mod record;
pub mod store;

pub use record::{AgentRecord, StrategyKind};
pub use store::AgentStore;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{AppConfig, StrategiesConfig};
use crate::custody::KeyStore;
use crate::error::{Result, SigilError};
use crate::events::{AgentEvent, EventBus};
use crate::ledger::{FeeSponsor, HttpSponsorRelay, LedgerClient};
use crate::policy::ProgramAllowlist;
use crate::runner::{ExecutionLoop, LoopConfig, LoopOutcome, LoopState, RunningAgents, SpendGuard};
use crate::strategies::{build_decider, PriceFeed, SimulatedPriceFeed};
use crate::submission::{RetryPolicy, TransactionSubmitter};

/// Step size of the default simulated price walk
pub const DEFAULT_VOLATILITY_BPS: u32 = 200;

pub struct AgentRegistry {
    store: AgentStore,
    keys: KeyStore,
    submitter: Arc<TransactionSubmitter>,
    running: RunningAgents,
    events: EventBus,
    strategies: StrategiesConfig,
    feed: Arc<dyn PriceFeed>,
    default_limit: Decimal,
}

impl AgentRegistry {
    pub fn new(
        store: AgentStore,
        keys: KeyStore,
        submitter: Arc<TransactionSubmitter>,
        default_limit: Decimal,
    ) -> Self {
        let strategies = StrategiesConfig::default();
        let feed = Arc::new(SimulatedPriceFeed::new(
            strategies.initial_price,
            DEFAULT_VOLATILITY_BPS,
        ));
        Self {
            store,
            keys,
            submitter,
            running: RunningAgents::new(),
            events: EventBus::default(),
            strategies,
            feed,
            default_limit,
        }
    }

    /// Wire every component from configuration
    pub fn from_config(
        config: &AppConfig,
        client: Arc<dyn LedgerClient>,
        feed: Arc<dyn PriceFeed>,
    ) -> Result<Self> {
        let keys = KeyStore::new(
            &config.custody.keys_dir,
            config.custody.resolve_passphrase(),
            config.custody.kdf_params(),
        );
        let sponsor = HttpSponsorRelay::from_config(&config.sponsor)?
            .map(|relay| Arc::new(relay) as Arc<dyn FeeSponsor>);
        let submitter = TransactionSubmitter::new(
            client,
            ProgramAllowlist::new(config.policy.allowed_programs.iter().cloned()),
            sponsor,
            RetryPolicy::from_config(&config.submission),
        );

        Ok(Self::new(
            AgentStore::new(&config.registry.path),
            keys,
            Arc::new(submitter),
            config.registry.default_spending_limit,
        )
        .with_strategies(config.strategies.clone(), feed))
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_strategies(mut self, strategies: StrategiesConfig, feed: Arc<dyn PriceFeed>) -> Self {
        self.strategies = strategies;
        self.feed = feed;
        self
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    pub fn client(&self) -> &Arc<dyn LedgerClient> {
        self.submitter.client()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn running(&self) -> &RunningAgents {
        &self.running
    }

    pub fn default_limit(&self) -> Decimal {
        self.default_limit
    }

    // ==================== Registration ====================

    /// Create a fresh wallet and register it as an agent
    pub async fn spawn(
        &self,
        strategy: StrategyKind,
        wallet_name: Option<&str>,
        spending_limit: Option<Decimal>,
    ) -> Result<AgentRecord> {
        let limit = self.resolve_limit(spending_limit)?;
        let name = match wallet_name {
            Some(name) => name.to_string(),
            None => format!("agent-{}", &Uuid::new_v4().simple().to_string()[..8]),
        };

        let address = self.keys.create(&name).await?;
        let record = self
            .register(AgentRecord::new(&name, address, strategy, limit))
            .await?;
        info!(agent_id = %record.id, "Spawned {} agent on new wallet {}", strategy, name);
        Ok(record)
    }

    /// Register an existing wallet as an agent
    pub async fn promote(
        &self,
        wallet_name: &str,
        strategy: StrategyKind,
        spending_limit: Option<Decimal>,
    ) -> Result<AgentRecord> {
        let limit = self.resolve_limit(spending_limit)?;
        let keypair = self.keys.load(wallet_name).await?;
        let record = self
            .register(AgentRecord::new(
                wallet_name,
                keypair.public_key(),
                strategy,
                limit,
            ))
            .await?;
        info!(agent_id = %record.id, "Promoted wallet {} to {} agent", wallet_name, strategy);
        Ok(record)
    }

    async fn register(&self, record: AgentRecord) -> Result<AgentRecord> {
        let stored = record.clone();
        self.store
            .update(move |records| {
                if records.iter().any(|r| r.wallet_name == stored.wallet_name) {
                    return Err(SigilError::DuplicateRegistration {
                        wallet_name: stored.wallet_name,
                    });
                }
                records.push(stored);
                Ok(())
            })
            .await?;

        self.events.emit(AgentEvent::AgentSpawned {
            agent_id: record.id,
            wallet_name: record.wallet_name.clone(),
            wallet_address: record.wallet_address.clone(),
            strategy: record.strategy,
            at: record.created_at,
        });
        Ok(record)
    }

    fn resolve_limit(&self, limit: Option<Decimal>) -> Result<Decimal> {
        let limit = limit.unwrap_or(self.default_limit);
        if limit.is_sign_negative() {
            return Err(SigilError::Validation(format!(
                "spending limit must not be negative: {}",
                limit
            )));
        }
        Ok(limit)
    }

    // ==================== Lookup ====================

    pub async fn get(&self, id: Uuid) -> Result<AgentRecord> {
        self.store
            .load()
            .await?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| SigilError::not_found(format!("agent {}", id)))
    }

    pub async fn list(&self) -> Result<Vec<AgentRecord>> {
        let mut records = self.store.load().await?;
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    pub async fn find_by_wallet(&self, wallet_name: &str) -> Result<Option<AgentRecord>> {
        Ok(self
            .store
            .load()
            .await?
            .into_iter()
            .find(|r| r.wallet_name == wallet_name))
    }

    // ==================== Spending ledger ====================

    /// Look-before-you-leap check; never mutates
    pub async fn check_spending_limit(&self, id: Uuid, amount: Decimal) -> Result<()> {
        ensure_non_negative(amount)?;
        self.get(id).await?.ensure_within_limit(amount)
    }

    /// Re-check the ceiling and add `amount` to the accumulator in one step
    pub async fn track_spending(&self, id: Uuid, amount: Decimal) -> Result<AgentRecord> {
        ensure_non_negative(amount)?;
        let record = self
            .mutate(id, |record| {
                record.ensure_within_limit(amount)?;
                record.sol_spent += amount;
                Ok(())
            })
            .await?;
        info!(
            agent_id = %id,
            "Tracked {} SOL spend ({} of {} used)",
            amount, record.sol_spent, record.spending_limit
        );
        Ok(record)
    }

    /// Replace the stored token holdings with what the network reports now
    pub async fn update_snapshot(&self, id: Uuid) -> Result<AgentRecord> {
        let address = self.get(id).await?.wallet_address;
        let balances = self.client().get_token_balances(&address).await?;
        self.mutate(id, move |record| {
            record.spl_balances = balances;
            Ok(())
        })
        .await
    }

    /// Cancel a live run if there is one. Returns whether a run was signalled.
    pub async fn stop(&self, id: Uuid) -> Result<bool> {
        self.mutate(id, |_| Ok(())).await?;
        let was_running = self.running.cancel(id);
        if was_running {
            info!(agent_id = %id, "Stop requested for running agent");
        }
        Ok(was_running)
    }

    /// Apply `f` to one record and bump `lastUpdated`
    async fn mutate<F>(&self, id: Uuid, f: F) -> Result<AgentRecord>
    where
        F: FnOnce(&mut AgentRecord) -> Result<()>,
    {
        self.store
            .update(move |records| {
                let record = records
                    .iter_mut()
                    .find(|r| r.id == id)
                    .ok_or_else(|| SigilError::not_found(format!("agent {}", id)))?;
                f(record)?;
                record.last_updated = Utc::now();
                Ok(record.clone())
            })
            .await
    }

    // ==================== Execution ====================

    pub fn is_running(&self, id: Uuid) -> bool {
        self.running.is_running(id)
    }

    /// `Running` while a loop holds the id, `Idle` otherwise
    pub fn loop_state(&self, id: Uuid) -> LoopState {
        if self.running.is_running(id) {
            LoopState::Running
        } else {
            LoopState::Idle
        }
    }

    /// Run the agent's strategy until it completes or is stopped.
    ///
    /// Fails with `AgentBusy` if a loop for `id` is already live.
    pub async fn run(&self, id: Uuid, config: LoopConfig) -> Result<LoopOutcome> {
        let record = self.get(id).await?;
        let (guard, mut cancel) = self.running.try_register(id)?;

        let wallet = self.keys.load(&record.wallet_name).await?;
        if wallet.public_key() != record.wallet_address {
            return Err(SigilError::Validation(format!(
                "wallet {} no longer matches agent {}",
                record.wallet_name, id
            )));
        }
        let mut decider = build_decider(
            record.strategy,
            &self.strategies,
            &record.wallet_address,
            self.feed.clone(),
        )?;

        self.events.emit(AgentEvent::AgentStarted {
            agent_id: id,
            iterations: config.iterations,
            interval_ms: config.interval.as_millis() as u64,
            at: Utc::now(),
        });

        let spend = AgentSpend {
            registry: self,
            agent_id: id,
        };
        let outcome = ExecutionLoop::new(self.submitter.clone())
            .run(&wallet, &mut *decider, &config, &mut cancel, Some(&spend as &dyn SpendGuard))
            .await;
        drop(guard);

        if let Err(e) = self.update_snapshot(id).await {
            warn!(agent_id = %id, "Failed to refresh token snapshot after run: {}", e);
        }

        let at = Utc::now();
        self.events.emit(match outcome.state {
            LoopState::Stopped => AgentEvent::AgentStopped { agent_id: id, at },
            _ => AgentEvent::AgentCompleted {
                agent_id: id,
                signatures: outcome.signatures.clone(),
                at,
            },
        });
        Ok(outcome)
    }
}

fn ensure_non_negative(amount: Decimal) -> Result<()> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(SigilError::Validation(format!(
            "amount must not be negative: {}",
            amount
        )));
    }
    Ok(())
}

/// Binds the execution loop's spend checks to one agent's ledger
struct AgentSpend<'a> {
    registry: &'a AgentRegistry,
    agent_id: Uuid,
}

#[async_trait]
impl<'a> SpendGuard for AgentSpend<'a> {
    async fn check(&self, amount: Decimal) -> Result<()> {
        self.registry
            .check_spending_limit(self.agent_id, amount)
            .await
    }

    async fn record(&self, amount: Decimal) -> Result<()> {
        self.registry
            .track_spending(self.agent_id, amount)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::keystore::tests::test_store;
    use crate::ledger::{SimulatedLedger, TokenBalance, LAMPORTS_PER_SOL, USDC_MINT};
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        ledger: Arc<SimulatedLedger>,
        registry: AgentRegistry,
    }

    fn harness_with(strategies: StrategiesConfig) -> Harness {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(SimulatedLedger::new());
        let submitter = TransactionSubmitter::new(
            ledger.clone(),
            ProgramAllowlist::allow_all(),
            None,
            RetryPolicy::default(),
        );
        let registry = AgentRegistry::new(
            AgentStore::new(dir.path().join("state/agents.json")),
            test_store(&dir),
            Arc::new(submitter),
            dec!(1),
        )
        .with_strategies(strategies, Arc::new(SimulatedPriceFeed::fixed(dec!(100))));
        Harness {
            _dir: dir,
            ledger,
            registry,
        }
    }

    async fn wait_until_running(registry: &AgentRegistry, id: Uuid) {
        while !registry.is_running(id) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn harness() -> Harness {
        harness_with(StrategiesConfig::default())
    }

    #[tokio::test]
    async fn spawn_then_spend_up_to_the_ceiling() {
        let h = harness();
        let agent = h
            .registry
            .spawn(StrategyKind::Simple, None, None)
            .await
            .unwrap();
        assert_eq!(agent.sol_spent, Decimal::ZERO);
        assert_eq!(agent.spending_limit, dec!(1));
        assert!(agent.wallet_name.starts_with("agent-"));

        let half = agent.spending_limit * dec!(0.5);
        h.registry.track_spending(agent.id, half).await.unwrap();

        let err = h
            .registry
            .track_spending(agent.id, agent.spending_limit * dec!(0.6))
            .await
            .unwrap_err();
        assert!(matches!(err, SigilError::LimitExceeded { .. }));
        assert_eq!(h.registry.get(agent.id).await.unwrap().sol_spent, half);

        h.registry
            .check_spending_limit(agent.id, Decimal::ZERO)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn spend_sequence_never_passes_the_limit() {
        let h = harness();
        let agent = h
            .registry
            .spawn(StrategyKind::Simple, Some("steady"), Some(dec!(0.5)))
            .await
            .unwrap();

        for amount in [dec!(0.1), dec!(0.15), dec!(0.3), dec!(0.2), dec!(0.05), dec!(0.01)] {
            let before = h.registry.get(agent.id).await.unwrap().sol_spent;
            match h.registry.track_spending(agent.id, amount).await {
                Ok(record) => assert_eq!(record.sol_spent, before + amount),
                Err(SigilError::LimitExceeded { .. }) => {
                    assert_eq!(h.registry.get(agent.id).await.unwrap().sol_spent, before)
                }
                Err(other) => panic!("unexpected error: {:?}", other),
            }
            let after = h.registry.get(agent.id).await.unwrap();
            assert!(after.sol_spent <= after.spending_limit);
        }
        assert_eq!(h.registry.get(agent.id).await.unwrap().sol_spent, dec!(0.5));
    }

    #[tokio::test]
    async fn zero_check_passes_even_when_exhausted() {
        let h = harness();
        let agent = h
            .registry
            .spawn(StrategyKind::Simple, None, Some(Decimal::ZERO))
            .await
            .unwrap();
        h.registry
            .check_spending_limit(agent.id, Decimal::ZERO)
            .await
            .unwrap();
        assert!(h
            .registry
            .check_spending_limit(agent.id, dec!(0.000000001))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn negative_amounts_are_rejected() {
        let h = harness();
        let agent = h.registry.spawn(StrategyKind::Simple, None, None).await.unwrap();
        assert!(matches!(
            h.registry.track_spending(agent.id, dec!(-0.1)).await,
            Err(SigilError::Validation(_))
        ));
        assert!(matches!(
            h.registry.spawn(StrategyKind::Simple, None, Some(dec!(-1))).await,
            Err(SigilError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn promote_registers_existing_wallet_once() {
        let h = harness();
        let address = h.registry.keys().create("treasury").await.unwrap();

        let agent = h
            .registry
            .promote("treasury", StrategyKind::Trading, Some(dec!(2)))
            .await
            .unwrap();
        assert_eq!(agent.wallet_address, address);
        assert_eq!(agent.spending_limit, dec!(2));

        let err = h
            .registry
            .promote("treasury", StrategyKind::Rebalance, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SigilError::DuplicateRegistration { ref wallet_name } if wallet_name == "treasury"));

        let records = h.registry.list().await.unwrap();
        assert_eq!(records.iter().filter(|r| r.wallet_name == "treasury").count(), 1);
        assert_eq!(
            h.registry.find_by_wallet("treasury").await.unwrap().map(|r| r.id),
            Some(agent.id)
        );
    }

    #[tokio::test]
    async fn unknown_ids_and_wallets_are_not_found() {
        let h = harness();
        let ghost = Uuid::new_v4();
        assert!(matches!(h.registry.get(ghost).await, Err(SigilError::NotFound(_))));
        assert!(matches!(h.registry.stop(ghost).await, Err(SigilError::NotFound(_))));
        assert!(matches!(
            h.registry.track_spending(ghost, dec!(0.1)).await,
            Err(SigilError::NotFound(_))
        ));
        assert!(matches!(
            h.registry.promote("nobody", StrategyKind::Simple, None).await,
            Err(SigilError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_touches_record() {
        let h = harness();
        let agent = h.registry.spawn(StrategyKind::Simple, None, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(!h.registry.stop(agent.id).await.unwrap());
        assert!(!h.registry.stop(agent.id).await.unwrap());
        let after = h.registry.get(agent.id).await.unwrap();
        assert!(after.last_updated > agent.last_updated);
    }

    #[tokio::test]
    async fn snapshot_overwrites_token_holdings() {
        let h = harness();
        let agent = h.registry.spawn(StrategyKind::Trading, None, None).await.unwrap();
        h.ledger
            .set_token_balance(&agent.wallet_address, USDC_MINT, dec!(12.5))
            .await;

        let updated = h.registry.update_snapshot(agent.id).await.unwrap();
        assert_eq!(
            updated.spl_balances,
            vec![TokenBalance {
                mint: USDC_MINT.to_string(),
                amount: dec!(12.5),
                decimals: 6,
            }]
        );
    }

    #[tokio::test]
    async fn records_survive_a_new_registry_instance() {
        let h = harness();
        let agent = h.registry.spawn(StrategyKind::Rebalance, None, None).await.unwrap();
        h.registry.track_spending(agent.id, dec!(0.25)).await.unwrap();

        let reopened = AgentStore::new(h.registry.store.path());
        let records = reopened.load().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sol_spent, dec!(0.25));
        assert_eq!(records[0].strategy, StrategyKind::Rebalance);
    }

    #[tokio::test]
    async fn run_tracks_spend_and_respects_the_limit() {
        let h = harness_with(StrategiesConfig {
            transfer_amount: dec!(0.3),
            ..StrategiesConfig::default()
        });
        let mut events = h.registry.events().subscribe();
        let agent = h.registry.spawn(StrategyKind::Simple, None, None).await.unwrap();
        h.ledger
            .fund(&agent.wallet_address, 2 * LAMPORTS_PER_SOL)
            .await;

        let outcome = h
            .registry
            .run(agent.id, LoopConfig::new(5, Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(outcome.state, LoopState::Completed);
        assert_eq!(outcome.signatures.len(), 3);
        assert_eq!(h.registry.get(agent.id).await.unwrap().sol_spent, dec!(0.9));
        assert!(!h.registry.is_running(agent.id));

        let names: Vec<&str> = [
            events.recv().await.unwrap(),
            events.recv().await.unwrap(),
            events.recv().await.unwrap(),
        ]
        .iter()
        .map(|e| e.name())
        .collect();
        assert_eq!(names, ["agent_spawned", "agent_started", "agent_completed"]);
    }

    #[tokio::test]
    async fn concurrent_run_is_rejected() {
        let h = harness();
        let agent = h.registry.spawn(StrategyKind::Simple, None, None).await.unwrap();
        h.ledger.fund(&agent.wallet_address, LAMPORTS_PER_SOL).await;
        h.ledger.set_submit_delay(Duration::from_millis(100)).await;

        let first = h.registry.run(agent.id, LoopConfig::new(2, Duration::ZERO));
        let second = async {
            wait_until_running(&h.registry, agent.id).await;
            h.registry.run(agent.id, LoopConfig::new(2, Duration::ZERO)).await
        };
        let (first, second) = tokio::join!(first, second);

        assert!(first.is_ok());
        assert!(matches!(second, Err(SigilError::AgentBusy(id)) if id == agent.id));
        assert_eq!(h.registry.loop_state(agent.id), LoopState::Idle);
    }

    #[tokio::test]
    async fn stop_during_first_action_cuts_the_run_short() {
        let h = harness();
        let agent = h.registry.spawn(StrategyKind::Simple, None, None).await.unwrap();
        h.ledger
            .fund(&agent.wallet_address, 5 * LAMPORTS_PER_SOL)
            .await;
        h.ledger.set_submit_delay(Duration::from_millis(100)).await;
        let mut events = h.registry.events().subscribe();

        let run = h.registry.run(agent.id, LoopConfig::new(10, Duration::ZERO));
        let stop = async {
            wait_until_running(&h.registry, agent.id).await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.registry.stop(agent.id).await
        };
        let (outcome, stopped) = tokio::join!(run, stop);

        let outcome = outcome.unwrap();
        assert!(stopped.unwrap());
        assert_eq!(outcome.state, LoopState::Stopped);
        assert!(outcome.signatures.len() < 10);
        assert!(!h.registry.is_running(agent.id));

        assert_eq!(events.recv().await.unwrap().name(), "agent_started");
        assert_eq!(events.recv().await.unwrap().name(), "agent_stopped");
    }

    #[tokio::test]
    async fn rerun_after_stop_waits_for_the_old_loop() {
        let h = harness();
        let agent = h.registry.spawn(StrategyKind::Simple, None, None).await.unwrap();
        h.ledger
            .fund(&agent.wallet_address, 5 * LAMPORTS_PER_SOL)
            .await;
        h.ledger.set_submit_delay(Duration::from_millis(200)).await;

        let first = h.registry.run(agent.id, LoopConfig::new(10, Duration::ZERO));
        let restart = async {
            wait_until_running(&h.registry, agent.id).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(h.registry.stop(agent.id).await.unwrap());
            h.registry.run(agent.id, LoopConfig::new(1, Duration::ZERO)).await
        };
        let (first, second) = tokio::join!(first, restart);

        assert_eq!(first.unwrap().state, LoopState::Stopped);
        assert!(matches!(second, Err(SigilError::AgentBusy(id)) if id == agent.id));
        assert!(!h.registry.is_running(agent.id));

        let rerun = h
            .registry
            .run(agent.id, LoopConfig::new(1, Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(rerun.state, LoopState::Completed);
    }

    #[tokio::test]
    async fn overflowing_amounts_surface_as_limit_breaches() {
        let h = harness();
        let agent = h.registry.spawn(StrategyKind::Simple, None, None).await.unwrap();
        h.registry.track_spending(agent.id, dec!(0.5)).await.unwrap();

        let err = h
            .registry
            .check_spending_limit(agent.id, Decimal::MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, SigilError::LimitExceeded { .. }));

        let err = h
            .registry
            .track_spending(agent.id, Decimal::MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, SigilError::LimitExceeded { .. }));
        assert_eq!(h.registry.get(agent.id).await.unwrap().sol_spent, dec!(0.5));
    }
}
