//! JSON-RPC client for a fee-sponsorship relay

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::client::FeeSponsor;
use super::types::Transaction;
use crate::config::SponsorConfig;
use crate::error::{Result, SigilError};

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<RelayResult>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RelayResult {
    signature: String,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
}

/// Relay that co-signs as fee payer and forwards to the network
pub struct HttpSponsorRelay {
    client: Client,
    url: String,
    enabled: bool,
}

impl HttpSponsorRelay {
    pub fn new(url: impl Into<String>, enabled: bool) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            url: url.into(),
            enabled,
        })
    }

    /// Build from config; `None` when no relay URL is configured
    pub fn from_config(config: &SponsorConfig) -> Result<Option<Self>> {
        match &config.url {
            Some(url) => Ok(Some(Self::new(url.clone(), config.enabled)?)),
            None => Ok(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl FeeSponsor for HttpSponsorRelay {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn submit(&self, tx: &Transaction) -> Result<String> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "signAndSendTransaction",
            "params": { "transaction": tx.to_base64()? },
        });

        let response: RpcResponse = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(classify_relay_error(err.message));
        }
        let result = response
            .result
            .ok_or_else(|| SigilError::Network("relay returned neither result nor error".to_string()))?;

        debug!(signature = %result.signature, relay = %self.url, "Relay accepted transaction");
        Ok(result.signature)
    }
}

fn classify_relay_error(message: String) -> SigilError {
    if message.to_ascii_lowercase().contains("blockhash") {
        SigilError::TransientNetwork(message)
    } else {
        SigilError::Network(format!("relay rejected transaction: {}", message))
    }
}
