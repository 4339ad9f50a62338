//! Process-local set of agents with a live execution loop
//!
//! Membership is the only notion of "busy": an id is present exactly while
//! a loop registered under it is iterating, including while a stopped loop
//! finishes its in-flight step. Nothing here survives a restart.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, SigilError};

/// Sending half of a cooperative cancellation flag
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half, polled by the execution loop
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_, signal) = cancel_pair();
        signal
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration` unless cancelled first. Returns true if cancelled.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        let woke = tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = wait_cancelled(&mut self.rx) => true,
        };
        woke || self.is_cancelled()
    }
}

async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone without cancelling: nothing can fire any more.
            std::future::pending::<()>().await;
        }
    }
}

#[derive(Debug)]
struct RunEntry {
    run_id: Uuid,
    cancel: CancelHandle,
    started_at: DateTime<Utc>,
    stopping: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RunningAgents {
    inner: Arc<DashMap<Uuid, RunEntry>>,
}

impl RunningAgents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim `agent_id`. Fails with `AgentBusy` if a loop already
    /// holds it. The claim is released when the returned guard drops.
    pub fn try_register(&self, agent_id: Uuid) -> Result<(RunGuard, CancelSignal)> {
        match self.inner.entry(agent_id) {
            Entry::Occupied(_) => Err(SigilError::AgentBusy(agent_id)),
            Entry::Vacant(slot) => {
                let (cancel, signal) = cancel_pair();
                let run_id = Uuid::new_v4();
                slot.insert(RunEntry {
                    run_id,
                    cancel,
                    started_at: Utc::now(),
                    stopping: false,
                });
                debug!(agent_id = %agent_id, run_id = %run_id, "Registered running agent");
                Ok((
                    RunGuard {
                        agents: self.clone(),
                        agent_id,
                        run_id,
                    },
                    signal,
                ))
            }
        }
    }

    /// Signal cancellation. The entry stays until the loop's guard drops, so
    /// the id keeps rejecting new runs meanwhile. Returns whether this call
    /// signalled a live run; a run already stopping is not signalled twice.
    pub fn cancel(&self, agent_id: Uuid) -> bool {
        match self.inner.get_mut(&agent_id) {
            Some(mut entry) if !entry.stopping => {
                entry.stopping = true;
                entry.cancel.cancel();
                info!(agent_id = %agent_id, "Cancellation requested");
                true
            }
            _ => false,
        }
    }

    /// Whether a stop was requested for a loop that has not finished yet
    pub fn is_stopping(&self, agent_id: Uuid) -> bool {
        self.inner
            .get(&agent_id)
            .map_or(false, |entry| entry.stopping)
    }

    pub fn cancel_all(&self) -> usize {
        self.ids()
            .into_iter()
            .filter(|id| self.cancel(*id))
            .count()
    }

    pub fn is_running(&self, agent_id: Uuid) -> bool {
        self.inner.contains_key(&agent_id)
    }

    pub fn started_at(&self, agent_id: Uuid) -> Option<DateTime<Utc>> {
        self.inner.get(&agent_id).map(|e| e.started_at)
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.inner.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Releases a running-agent claim on drop, but only the claim it created
#[derive(Debug)]
pub struct RunGuard {
    agents: RunningAgents,
    agent_id: Uuid,
    run_id: Uuid,
}

impl RunGuard {
    pub fn agent_id(&self) -> Uuid {
        self.agent_id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let run_id = self.run_id;
        self.agents
            .inner
            .remove_if(&self.agent_id, |_, entry| entry.run_id == run_id);
    }
}
