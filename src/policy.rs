//! Program allowlist
//!
//! An empty allowlist permits every program. That default is fail-open and
//! meant for development networks only; production deployments should list
//! the programs agents may call in `policy.allowed_programs`.

use std::collections::HashSet;
use tracing::{debug, warn};

use crate::error::{Result, SigilError};
use crate::ledger::Transaction;

#[derive(Debug, Clone, Default)]
pub struct ProgramAllowlist {
    allowed: HashSet<String>,
}

impl ProgramAllowlist {
    pub fn new<I, S>(programs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed: HashSet<String> = programs
            .into_iter()
            .map(Into::into)
            .map(|p: String| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        if allowed.is_empty() {
            warn!("Program allowlist is empty: every program is permitted");
        } else {
            debug!("Program allowlist holds {} programs", allowed.len());
        }

        Self { allowed }
    }

    /// Allowlist that permits everything
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn is_permissive(&self) -> bool {
        self.allowed.is_empty()
    }

    pub fn is_allowed(&self, program_id: &str) -> bool {
        self.allowed.is_empty() || self.allowed.contains(program_id)
    }

    /// Reject the transaction at the first instruction whose program is not listed
    pub fn validate(&self, tx: &Transaction) -> Result<()> {
        if self.allowed.is_empty() {
            return Ok(());
        }
        match tx.program_ids().find(|id| !self.allowed.contains(*id)) {
            Some(program_id) => Err(SigilError::PolicyViolation {
                program_id: program_id.to_string(),
            }),
            None => Ok(()),
        }
    }
}
