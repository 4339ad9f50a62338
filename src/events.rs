//! Agent lifecycle notifications
//!
//! Delivery is best effort: a send with no subscribers, or a lagging
//! subscriber, never affects the operation that emitted the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::registry::StrategyKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    AgentSpawned {
        agent_id: Uuid,
        wallet_name: String,
        wallet_address: String,
        strategy: StrategyKind,
        at: DateTime<Utc>,
    },
    AgentStarted {
        agent_id: Uuid,
        iterations: u32,
        interval_ms: u64,
        at: DateTime<Utc>,
    },
    AgentStopped {
        agent_id: Uuid,
        at: DateTime<Utc>,
    },
    AgentCompleted {
        agent_id: Uuid,
        signatures: Vec<String>,
        at: DateTime<Utc>,
    },
}

impl AgentEvent {
    pub fn agent_id(&self) -> Uuid {
        match self {
            AgentEvent::AgentSpawned { agent_id, .. }
            | AgentEvent::AgentStarted { agent_id, .. }
            | AgentEvent::AgentStopped { agent_id, .. }
            | AgentEvent::AgentCompleted { agent_id, .. } => *agent_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AgentEvent::AgentSpawned { .. } => "agent_spawned",
            AgentEvent::AgentStarted { .. } => "agent_started",
            AgentEvent::AgentStopped { .. } => "agent_stopped",
            AgentEvent::AgentCompleted { .. } => "agent_completed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AgentEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: AgentEvent) {
        trace!(event = event.name(), agent_id = %event.agent_id(), "Emitting event");
        let _ = self.tx.send(event);
    }
}
