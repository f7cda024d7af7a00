//! Chain deployer.
//!
//! Broadcasts one contract-creation transaction and waits for inclusion.
//! There is NO retry at this layer: a rebroadcast after an ambiguous
//! failure risks a duplicate deployment, so the decision to try again
//! belongs to the dispatcher, which knows the attempt history.

use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use deployd_protocol::{DeployReceipt, PipelineError};
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

/// One contract-creation request handed to the ledger client, which signs
/// with its held key and encodes the constructor arguments per the
/// interface description.
#[derive(Debug, Clone)]
pub struct DeploymentRequest<'a> {
    pub bytecode: &'a Bytes,
    pub abi: &'a serde_json::Value,
    pub constructor_args: &'a [serde_json::Value],
}

/// Ledger client seam.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Sign and broadcast; returns the transaction hash.
    async fn broadcast_deployment(
        &self,
        request: DeploymentRequest<'_>,
    ) -> Result<B256, PipelineError>;

    /// Suspend until the transaction is included; returns the created
    /// address.
    async fn await_inclusion(&self, tx_hash: B256) -> Result<Address, PipelineError>;
}

/// Thin orchestration over a [`LedgerClient`]: broadcast, then confirm.
pub struct ChainDeployer {
    ledger: std::sync::Arc<dyn LedgerClient>,
}

impl ChainDeployer {
    pub fn new(ledger: std::sync::Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }

    pub async fn deploy(
        &self,
        bytecode: &Bytes,
        abi: &serde_json::Value,
        constructor_args: &[serde_json::Value],
    ) -> Result<DeployReceipt, PipelineError> {
        if bytecode.is_empty() {
            return Err(PipelineError::Deploy(
                "refusing to broadcast empty bytecode".to_string(),
            ));
        }

        let tx_hash = self
            .ledger
            .broadcast_deployment(DeploymentRequest {
                bytecode,
                abi,
                constructor_args,
            })
            .await?;
        debug!(%tx_hash, "creation transaction broadcast");

        let address = self.ledger.await_inclusion(tx_hash).await?;
        info!(%address, %tx_hash, "contract deployed");

        Ok(DeployReceipt { address, tx_hash })
    }
}

// ============================================================================
// HTTP signer-service client
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BroadcastResponse {
    tx_hash: B256,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InclusionResponse {
    address: Option<Address>,
}

/// Ledger client backed by a signer sidecar service: POST the creation
/// request, then poll the transaction until an address is resolvable.
#[derive(Debug, Clone)]
pub struct HttpLedgerClient {
    client: reqwest::Client,
    base: Url,
    poll_interval: Duration,
    confirm_timeout: Duration,
}

impl HttpLedgerClient {
    pub fn new(base: Url, poll_interval: Duration, confirm_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
            poll_interval,
            confirm_timeout,
        }
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn broadcast_deployment(
        &self,
        request: DeploymentRequest<'_>,
    ) -> Result<B256, PipelineError> {
        let url = self
            .base
            .join("deployments")
            .map_err(|e| PipelineError::Deploy(format!("bad ledger endpoint: {e}")))?;

        let response = self
            .client
            .post(url)
            .json(&json!({
                "bytecode": request.bytecode,
                "abi": request.abi,
                "constructorArgs": request.constructor_args,
            }))
            .send()
            .await
            .map_err(|e| PipelineError::Deploy(format!("broadcast failed: {e}")))?;

        if !response.status().is_success() {
            return Err(PipelineError::Deploy(format!(
                "broadcast rejected with {}",
                response.status()
            )));
        }

        let body: BroadcastResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Deploy(format!("unparseable broadcast response: {e}")))?;
        Ok(body.tx_hash)
    }

    async fn await_inclusion(&self, tx_hash: B256) -> Result<Address, PipelineError> {
        let url = self
            .base
            .join(&format!("deployments/{tx_hash}"))
            .map_err(|e| PipelineError::Deploy(format!("bad ledger endpoint: {e}")))?;

        let deadline = tokio::time::Instant::now() + self.confirm_timeout;
        loop {
            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| PipelineError::Deploy(format!("inclusion poll failed: {e}")))?;

            if response.status().is_success() {
                let body: InclusionResponse = response.json().await.map_err(|e| {
                    PipelineError::Deploy(format!("unparseable inclusion response: {e}"))
                })?;
                if let Some(address) = body.address {
                    return Ok(address);
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(PipelineError::Deploy(format!(
                    "transaction {tx_hash} not included within {:?}",
                    self.confirm_timeout
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
