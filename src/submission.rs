//! Transaction submission pipeline
//!
//! prepare -> sign -> policy check -> simulate -> submit, stopping at the
//! first failure. Only a stale blockhash at submission time is retried; each
//! retry refetches the blockhash and re-signs before going out again.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::SubmissionConfig;
use crate::custody::Keypair;
use crate::error::{Result, SigilError};
use crate::ledger::{FeeSponsor, LedgerClient, Transaction};
use crate::policy::ProgramAllowlist;

/// Backoff for freshness-token retries
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SubmissionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// Delay after the given failed attempt (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Per-call submission options
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitOptions {
    /// Go straight to the network without a dry run
    pub skip_simulation: bool,
}

pub struct TransactionSubmitter {
    client: Arc<dyn LedgerClient>,
    allowlist: ProgramAllowlist,
    sponsor: Option<Arc<dyn FeeSponsor>>,
    retry: RetryPolicy,
}

impl TransactionSubmitter {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        allowlist: ProgramAllowlist,
        sponsor: Option<Arc<dyn FeeSponsor>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            allowlist,
            sponsor,
            retry,
        }
    }

    pub fn client(&self) -> &Arc<dyn LedgerClient> {
        &self.client
    }

    pub fn allowlist(&self) -> &ProgramAllowlist {
        &self.allowlist
    }

    /// Sign and submit `tx`, returning its signature once confirmed
    pub async fn submit(
        &self,
        mut tx: Transaction,
        signer: &Keypair,
        options: SubmitOptions,
    ) -> Result<String> {
        let start = Instant::now();
        let mut attempt = 1;

        loop {
            self.prepare(&mut tx, signer, attempt > 1).await?;
            tx.sign(signer)?;
            self.allowlist.validate(&tx)?;

            if !options.skip_simulation {
                self.simulate(&tx).await?;
            }

            match self.send(&tx).await {
                Ok(signature) => {
                    info!(
                        signature = %signature,
                        attempts = attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Transaction confirmed"
                    );
                    return Ok(signature);
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        "Submission attempt {} hit a stale blockhash ({}). Retrying in {:?}",
                        attempt, e, delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!("Giving up after {} attempts: {}", attempt, e);
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Fill in fee payer and blockhash. `refresh` discards a stale blockhash.
    async fn prepare(&self, tx: &mut Transaction, signer: &Keypair, refresh: bool) -> Result<()> {
        if tx.fee_payer.is_none() {
            tx.fee_payer = Some(signer.public_key());
        }
        if refresh {
            tx.recent_blockhash = None;
        }
        if tx.recent_blockhash.is_none() {
            tx.recent_blockhash = Some(self.client.latest_blockhash().await?);
        }
        Ok(())
    }

    async fn simulate(&self, tx: &Transaction) -> Result<()> {
        let result = self.client.simulate(tx).await?;
        if let Some(error) = result.error {
            warn!("Simulation rejected transaction: {}", error);
            for line in &result.logs {
                debug!("  {}", line);
            }
            return Err(SigilError::SimulationFailed {
                error,
                logs: result.logs,
            });
        }
        debug!("Simulation passed ({} log lines)", result.logs.len());
        Ok(())
    }

    async fn send(&self, tx: &Transaction) -> Result<String> {
        if let Some(sponsor) = self.sponsor.as_ref().filter(|s| s.is_enabled()) {
            match sponsor.submit(tx).await {
                Ok(signature) => {
                    debug!(signature = %signature, "Submitted through fee sponsor");
                    return Ok(signature);
                }
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    warn!("Fee sponsor failed ({}), submitting directly", e);
                }
            }
        }
        self.client.submit_and_confirm(tx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Instruction, SimulatedLedger, LAMPORTS_PER_SOL, SYSTEM_PROGRAM_ID};
    use async_trait::async_trait;
    use mockall::mock;

    mock! {
        Sponsor {}
        #[async_trait]
        impl FeeSponsor for Sponsor {
            fn is_enabled(&self) -> bool;
            async fn submit(&self, tx: &Transaction) -> Result<String>;
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    async fn funded(ledger: &SimulatedLedger) -> Keypair {
        let kp = Keypair::generate();
        ledger.fund(&kp.public_key(), LAMPORTS_PER_SOL).await;
        kp
    }

    fn transfer(from: &Keypair, lamports: u64) -> Transaction {
        Transaction::new(vec![Instruction::system_transfer(
            &from.public_key(),
            "feedface",
            lamports,
        )])
    }

    fn submitter(
        ledger: &Arc<SimulatedLedger>,
        allowlist: ProgramAllowlist,
        sponsor: Option<Arc<dyn FeeSponsor>>,
        max_attempts: u32,
    ) -> TransactionSubmitter {
        TransactionSubmitter::new(ledger.clone(), allowlist, sponsor, fast_retry(max_attempts))
    }

    #[test]
    fn backoff_doubles_up_to_ceiling() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn prepares_signs_and_confirms() {
        let ledger = Arc::new(SimulatedLedger::new());
        let signer = funded(&ledger).await;
        let pipeline = submitter(&ledger, ProgramAllowlist::allow_all(), None, 3);

        let signature = pipeline
            .submit(transfer(&signer, 500), &signer, SubmitOptions::default())
            .await
            .unwrap();

        let confirmed = ledger.confirmed().await;
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].signature(), Some(signature.as_str()));
        assert_eq!(confirmed[0].fee_payer.as_deref(), Some(signer.public_key().as_str()));
        assert_eq!(ledger.get_balance("feedface").await.unwrap(), 500);
    }

    #[tokio::test]
    async fn policy_rejection_never_reaches_network() {
        let ledger = Arc::new(SimulatedLedger::new());
        let signer = funded(&ledger).await;
        let pipeline = submitter(&ledger, ProgramAllowlist::new(["OnlyThis"]), None, 3);

        let err = pipeline
            .submit(transfer(&signer, 1), &signer, SubmitOptions::default())
            .await
            .unwrap_err();
        match err {
            SigilError::PolicyViolation { program_id } => assert_eq!(program_id, SYSTEM_PROGRAM_ID),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(ledger.submit_attempts().await, 0);
    }

    #[tokio::test]
    async fn simulation_failure_stops_before_submit() {
        let ledger = Arc::new(SimulatedLedger::new());
        let signer = funded(&ledger).await;
        ledger
            .fail_simulations_with(Some("custom program error: 0x1".to_string()))
            .await;
        let pipeline = submitter(&ledger, ProgramAllowlist::allow_all(), None, 3);

        let err = pipeline
            .submit(transfer(&signer, 1), &signer, SubmitOptions::default())
            .await
            .unwrap_err();
        match err {
            SigilError::SimulationFailed { error, logs } => {
                assert_eq!(error, "custom program error: 0x1");
                assert!(!logs.is_empty());
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(ledger.submit_attempts().await, 0);

        // Skipping the dry run goes straight to the network.
        let skip = SubmitOptions {
            skip_simulation: true,
        };
        assert!(pipeline.submit(transfer(&signer, 1), &signer, skip).await.is_ok());
    }

    #[tokio::test]
    async fn stale_blockhash_is_retried_with_fresh_signature() {
        let ledger = Arc::new(SimulatedLedger::new());
        let signer = funded(&ledger).await;
        ledger.expire_next_submissions(2).await;
        let pipeline = submitter(&ledger, ProgramAllowlist::allow_all(), None, 3);

        let signature = pipeline
            .submit(transfer(&signer, 5), &signer, SubmitOptions::default())
            .await
            .unwrap();

        assert_eq!(ledger.submit_attempts().await, 3);
        let confirmed = ledger.confirmed().await;
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].signature(), Some(signature.as_str()));
        assert!(confirmed[0].verify_signatures());
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let ledger = Arc::new(SimulatedLedger::new());
        let signer = funded(&ledger).await;
        ledger.expire_next_submissions(10).await;
        let pipeline = submitter(&ledger, ProgramAllowlist::allow_all(), None, 3);

        let err = pipeline
            .submit(transfer(&signer, 5), &signer, SubmitOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(ledger.submit_attempts().await, 3);
    }

    #[tokio::test]
    async fn terminal_network_errors_are_not_retried() {
        let ledger = Arc::new(SimulatedLedger::new());
        let broke = Keypair::generate();
        let pipeline = submitter(&ledger, ProgramAllowlist::allow_all(), None, 3);

        let err = pipeline
            .submit(
                transfer(&broke, 5),
                &broke,
                SubmitOptions {
                    skip_simulation: true,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SigilError::Network(_)));
        assert_eq!(ledger.submit_attempts().await, 1);
    }

    #[tokio::test]
    async fn enabled_sponsor_receives_signed_transaction() {
        let ledger = Arc::new(SimulatedLedger::new());
        let signer = funded(&ledger).await;

        let mut sponsor = MockSponsor::new();
        sponsor.expect_is_enabled().return_const(true);
        sponsor
            .expect_submit()
            .withf(|tx| tx.verify_signatures())
            .times(1)
            .returning(|_| Ok("sponsored-sig".to_string()));

        let pipeline = submitter(&ledger, ProgramAllowlist::allow_all(), Some(Arc::new(sponsor) as Arc<dyn FeeSponsor>), 3);
        let signature = pipeline
            .submit(transfer(&signer, 5), &signer, SubmitOptions::default())
            .await
            .unwrap();

        assert_eq!(signature, "sponsored-sig");
        assert_eq!(ledger.submit_attempts().await, 0);
    }

    #[tokio::test]
    async fn transient_sponsor_error_is_retried_with_fresh_blockhash() {
        let ledger = Arc::new(SimulatedLedger::new());
        let signer = funded(&ledger).await;
        let seen = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));

        let mut sponsor = MockSponsor::new();
        let mut seq = mockall::Sequence::new();
        sponsor.expect_is_enabled().return_const(true);
        let first = seen.clone();
        sponsor
            .expect_submit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |tx| {
                first.lock().unwrap().push(tx.recent_blockhash.clone().unwrap_or_default());
                Err(SigilError::TransientNetwork("blockhash not found".to_string()))
            });
        let second = seen.clone();
        sponsor
            .expect_submit()
            .withf(|tx| tx.verify_signatures())
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |tx| {
                second.lock().unwrap().push(tx.recent_blockhash.clone().unwrap_or_default());
                Ok("sponsored-retry".to_string())
            });

        let pipeline = submitter(&ledger, ProgramAllowlist::allow_all(), Some(Arc::new(sponsor) as Arc<dyn FeeSponsor>), 3);
        let signature = pipeline
            .submit(transfer(&signer, 5), &signer, SubmitOptions::default())
            .await
            .unwrap();

        assert_eq!(signature, "sponsored-retry");
        assert_eq!(ledger.submit_attempts().await, 0);
        let hashes = seen.lock().unwrap().clone();
        assert_eq!(hashes.len(), 2);
        assert!(!hashes[0].is_empty());
        assert_ne!(hashes[0], hashes[1]);
    }

    #[tokio::test]
    async fn disabled_or_failing_sponsor_falls_back_to_direct() {
        let ledger = Arc::new(SimulatedLedger::new());
        let signer = funded(&ledger).await;

        let mut disabled = MockSponsor::new();
        disabled.expect_is_enabled().return_const(false);
        disabled.expect_submit().never();
        let pipeline = submitter(&ledger, ProgramAllowlist::allow_all(), Some(Arc::new(disabled) as Arc<dyn FeeSponsor>), 3);
        pipeline
            .submit(transfer(&signer, 5), &signer, SubmitOptions::default())
            .await
            .unwrap();
        assert_eq!(ledger.submit_attempts().await, 1);

        let mut failing = MockSponsor::new();
        failing.expect_is_enabled().return_const(true);
        failing
            .expect_submit()
            .times(1)
            .returning(|_| Err(SigilError::Network("relay down".to_string())));
        let pipeline = submitter(&ledger, ProgramAllowlist::allow_all(), Some(Arc::new(failing) as Arc<dyn FeeSponsor>), 3);
        pipeline
            .submit(transfer(&signer, 5), &signer, SubmitOptions::default())
            .await
            .unwrap();
        assert_eq!(ledger.submit_attempts().await, 2);
    }
}
