use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::custody::{verify_signature, Keypair};
use crate::error::{Result, SigilError};

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Native transfers
pub const SYSTEM_PROGRAM_ID: &str = "11111111111111111111111111111111";
/// Default swap router targeted by trading strategies
pub const SWAP_PROGRAM_ID: &str = "JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4";
/// Wrapped SOL mint, used as the native side of swaps
pub const NATIVE_MINT: &str = "So11111111111111111111111111111111111111112";
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

/// System program instruction index for a transfer
const SYSTEM_TRANSFER_TAG: u32 = 2;

/// Convert a SOL amount to lamports, rejecting negatives and overflow
pub fn sol_to_lamports(sol: Decimal) -> Result<u64> {
    if sol.is_sign_negative() {
        return Err(SigilError::Validation(format!("negative amount: {}", sol)));
    }
    sol.checked_mul(Decimal::from(LAMPORTS_PER_SOL))
        .and_then(|lamports| lamports.trunc().to_u64())
        .ok_or_else(|| SigilError::Validation(format!("amount out of range: {}", sol)))
}

pub fn lamports_to_sol(lamports: u64) -> Decimal {
    Decimal::from(lamports) / Decimal::from(LAMPORTS_PER_SOL)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountMeta {
    pub pubkey: String,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn signer(pubkey: &str) -> Self {
        Self {
            pubkey: pubkey.to_string(),
            is_signer: true,
            is_writable: true,
        }
    }

    pub fn writable(pubkey: &str) -> Self {
        Self {
            pubkey: pubkey.to_string(),
            is_signer: false,
            is_writable: true,
        }
    }
}

/// One program invocation inside a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instruction {
    pub program_id: String,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

/// Payload of a swap instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapData {
    pub input_mint: String,
    pub output_mint: String,
    /// Input amount in base units (lamports for the native mint)
    pub amount: u64,
}

impl Instruction {
    /// Native SOL transfer
    pub fn system_transfer(from: &str, to: &str, lamports: u64) -> Self {
        let mut data = Vec::with_capacity(12);
        data.extend_from_slice(&SYSTEM_TRANSFER_TAG.to_le_bytes());
        data.extend_from_slice(&lamports.to_le_bytes());
        Self {
            program_id: SYSTEM_PROGRAM_ID.to_string(),
            accounts: vec![AccountMeta::signer(from), AccountMeta::writable(to)],
            data,
        }
    }

    /// Decode a system transfer into (from, to, lamports)
    pub fn as_system_transfer(&self) -> Option<(&str, &str, u64)> {
        if self.program_id != SYSTEM_PROGRAM_ID || self.data.len() != 12 || self.accounts.len() < 2
        {
            return None;
        }
        let tag = u32::from_le_bytes(self.data[..4].try_into().ok()?);
        if tag != SYSTEM_TRANSFER_TAG {
            return None;
        }
        let lamports = u64::from_le_bytes(self.data[4..].try_into().ok()?);
        Some((&self.accounts[0].pubkey, &self.accounts[1].pubkey, lamports))
    }

    /// Swap through a router program
    pub fn swap(owner: &str, program_id: &str, swap: &SwapData) -> Result<Self> {
        Ok(Self {
            program_id: program_id.to_string(),
            accounts: vec![AccountMeta::signer(owner)],
            data: serde_json::to_vec(swap)?,
        })
    }

    pub fn as_swap(&self) -> Option<SwapData> {
        serde_json::from_slice(&self.data).ok()
    }
}

/// A transaction as it moves through the submission pipeline.
///
/// `fee_payer` and `recent_blockhash` start unset and are filled in during
/// preparation. Signatures cover [`Transaction::message_bytes`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub fee_payer: Option<String>,
    pub recent_blockhash: Option<String>,
    pub instructions: Vec<Instruction>,
    pub signatures: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Message<'a> {
    fee_payer: &'a str,
    recent_blockhash: &'a str,
    instructions: &'a [Instruction],
}

impl Transaction {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            instructions,
            ..Default::default()
        }
    }

    /// Deterministic signing payload. Requires fee payer and blockhash.
    pub fn message_bytes(&self) -> Result<Vec<u8>> {
        let fee_payer = self
            .fee_payer
            .as_deref()
            .ok_or_else(|| SigilError::Validation("transaction has no fee payer".to_string()))?;
        let recent_blockhash = self.recent_blockhash.as_deref().ok_or_else(|| {
            SigilError::Validation("transaction has no recent blockhash".to_string())
        })?;
        Ok(serde_json::to_vec(&Message {
            fee_payer,
            recent_blockhash,
            instructions: &self.instructions,
        })?)
    }

    /// Replace any signatures with one from `signer`
    pub fn sign(&mut self, signer: &Keypair) -> Result<()> {
        let message = self.message_bytes()?;
        self.signatures = vec![signer.sign(&message)];
        Ok(())
    }

    pub fn is_signed(&self) -> bool {
        !self.signatures.is_empty()
    }

    /// First signature, which identifies the transaction on the network
    pub fn signature(&self) -> Option<&str> {
        self.signatures.first().map(String::as_str)
    }

    /// Check the fee payer's signature over the current message
    pub fn verify_signatures(&self) -> bool {
        let (Some(fee_payer), Some(signature)) = (self.fee_payer.as_deref(), self.signature())
        else {
            return false;
        };
        match self.message_bytes() {
            Ok(message) => verify_signature(fee_payer, &message, signature),
            Err(_) => false,
        }
    }

    /// Target programs in instruction order
    pub fn program_ids(&self) -> impl Iterator<Item = &str> {
        self.instructions.iter().map(|ix| ix.program_id.as_str())
    }

    /// Base64 wire form handed to relays
    pub fn to_base64(&self) -> Result<String> {
        Ok(STANDARD.encode(serde_json::to_vec(self)?))
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| SigilError::Validation(format!("invalid transaction encoding: {}", e)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// SPL-style token holding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub mint: String,
    /// UI amount (already scaled by `decimals`)
    pub amount: Decimal,
    pub decimals: u8,
}

/// Outcome of a dry run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub error: Option<String>,
    pub logs: Vec<String>,
}
