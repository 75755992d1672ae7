//! JSON-RPC implementation of [`Network`].
//!
//! Transactions are sent with `eth_sendTransaction` from an account managed by
//! the node (Anvil, Hardhat node, or a signing proxy in front of a public
//! network).

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes};
use anyhow::{Context, Result};
use backon::{ConstantBuilder, Retryable};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::{Confirmation, Network, PendingTx};
use crate::{
    ArgValue, ArtifactStore, ContractId, abi,
    rpc::{self, deserialize_opt_u64_from_hex},
};

/// Default time to wait for a transaction to be mined.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(300);
/// Default interval between receipt polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Connection settings for an [`RpcNetwork`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcNetworkConfig {
    /// HTTP JSON-RPC endpoint.
    pub rpc_url: Url,
    /// Maximum time to wait for a receipt before the transaction is considered failed.
    #[serde(with = "secs")]
    pub confirmation_timeout: Duration,
    /// Interval between receipt polls.
    #[serde(with = "secs")]
    pub poll_interval: Duration,
    /// Fixed gas limit; left to the node's estimation when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
}

impl RpcNetworkConfig {
    pub fn new(rpc_url: Url) -> Self {
        Self {
            rpc_url,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            gas_limit: None,
        }
    }
}

/// Durations are written as whole seconds in config files.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[derive(Debug, thiserror::Error)]
enum ReceiptError {
    #[error("Transaction {0} is not mined yet")]
    Pending(B256),
    #[error("Transaction {0} reverted")]
    Reverted(B256),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Receipt {
    transaction_hash: B256,
    #[serde(default, deserialize_with = "deserialize_opt_u64_from_hex")]
    status: Option<u64>,
    #[serde(default)]
    contract_address: Option<Address>,
    #[serde(default, deserialize_with = "deserialize_opt_u64_from_hex")]
    block_number: Option<u64>,
}

/// A network reached over HTTP JSON-RPC.
pub struct RpcNetwork {
    client: reqwest::Client,
    config: RpcNetworkConfig,
    artifacts: ArtifactStore,
}

impl RpcNetwork {
    pub fn new(config: RpcNetworkConfig, artifacts: ArtifactStore) -> Result<Self> {
        Ok(Self {
            client: rpc::create_client()?,
            config,
            artifacts,
        })
    }

    fn url(&self) -> &str {
        self.config.rpc_url.as_str()
    }

    /// The first account managed by the node, used when no deployer is configured.
    pub async fn default_sender(&self) -> Result<Address> {
        let accounts: Vec<Address> =
            rpc::json_rpc_call(&self.client, self.url(), "eth_accounts", vec![])
                .await
                .context("Failed to list node accounts")?;
        accounts
            .first()
            .copied()
            .context("The node does not manage any account; configure a deployer address")
    }

    pub async fn chain_id(&self) -> Result<u64> {
        rpc::fetch_chain_id(&self.client, self.url()).await
    }

    async fn send_transaction(&self, mut tx: Value) -> Result<PendingTx> {
        if let Some(gas) = self.config.gas_limit {
            tx["gas"] = Value::String(format!("0x{:x}", gas));
        }

        let hash: B256 =
            rpc::json_rpc_call(&self.client, self.url(), "eth_sendTransaction", vec![tx])
                .await
                .context("Failed to send transaction")?;

        tracing::debug!(tx_hash = %hash, "Transaction submitted");
        Ok(PendingTx { hash })
    }

    async fn fetch_receipt(&self, hash: B256) -> Result<Receipt> {
        let receipt: Option<Receipt> = rpc::json_rpc_call(
            &self.client,
            self.url(),
            "eth_getTransactionReceipt",
            vec![serde_json::json!(hash)],
        )
        .await?;

        let receipt = receipt.ok_or(ReceiptError::Pending(hash))?;
        if receipt.status == Some(0) {
            return Err(ReceiptError::Reverted(hash).into());
        }
        Ok(receipt)
    }
}

impl Network for RpcNetwork {
    async fn submit_create(
        &self,
        contract: &ContractId,
        args: &[ArgValue],
        sender: Address,
    ) -> Result<PendingTx> {
        let artifact = self.artifacts.load(contract)?;

        let mut data = artifact.bytecode;
        data.extend_from_slice(&abi::encode_params(args));

        self.send_transaction(serde_json::json!({
            "from": sender,
            "data": format!("0x{}", hex::encode(data)),
        }))
        .await
    }

    async fn submit_call(
        &self,
        target: Address,
        operation: &str,
        args: &[ArgValue],
        sender: Address,
    ) -> Result<PendingTx> {
        let data = abi::encode_call(operation, args)?;

        self.send_transaction(serde_json::json!({
            "from": sender,
            "to": target,
            "data": format!("0x{}", hex::encode(data)),
        }))
        .await
    }

    async fn await_confirmation(&self, tx: &PendingTx) -> Result<Confirmation> {
        let hash = tx.hash;
        let poll_interval = self.config.poll_interval;
        let attempts = (self.config.confirmation_timeout.as_millis()
            / poll_interval.as_millis().max(1))
        .max(1) as usize;

        let receipt = (|| self.fetch_receipt(hash))
            .retry(
                ConstantBuilder::default()
                    .with_delay(poll_interval)
                    .with_max_times(attempts),
            )
            .sleep(tokio::time::sleep)
            .when(|e: &anyhow::Error| {
                !matches!(e.downcast_ref::<ReceiptError>(), Some(ReceiptError::Reverted(_)))
            })
            .notify(|e: &anyhow::Error, _| {
                tracing::trace!(tx_hash = %hash, error = %e, "Waiting for receipt...");
            })
            .await
            .with_context(|| {
                format!(
                    "Transaction {} not confirmed within {:?}",
                    hash, self.config.confirmation_timeout
                )
            })?;

        Ok(Confirmation {
            tx_hash: receipt.transaction_hash,
            contract_address: receipt.contract_address,
            block_number: receipt.block_number,
        })
    }

    async fn read_state(&self, target: Address, query: &str) -> Result<Bytes> {
        let data = abi::encode_call(query, &[])?;
        let result: String = rpc::json_rpc_call(
            &self.client,
            self.url(),
            "eth_call",
            vec![
                serde_json::json!({
                    "to": target,
                    "data": format!("0x{}", hex::encode(data)),
                }),
                serde_json::json!("latest"),
            ],
        )
        .await
        .with_context(|| format!("Failed to call {} on {}", query, target))?;

        let bytes = hex::decode(result.trim_start_matches("0x"))
            .with_context(|| format!("Invalid hex returned by {}", query))?;
        Ok(Bytes::from(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_parsing() {
        let receipt: Receipt = serde_json::from_value(serde_json::json!({
            "transactionHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "status": "0x1",
            "contractAddress": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "blockNumber": "0x2a",
            "gasUsed": "0x5208"
        }))
        .unwrap();

        assert_eq!(receipt.status, Some(1));
        assert_eq!(receipt.block_number, Some(42));
        assert_eq!(
            receipt.contract_address,
            Some("0x5FbDB2315678afecb367f032d93F642f64180aa3".parse().unwrap())
        );
    }

    #[test]
    fn test_call_receipt_without_contract_address() {
        let receipt: Receipt = serde_json::from_value(serde_json::json!({
            "transactionHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "status": "0x0",
            "contractAddress": null,
            "blockNumber": "0x2a"
        }))
        .unwrap();

        assert_eq!(receipt.status, Some(0));
        assert!(receipt.contract_address.is_none());
    }

    #[test]
    fn test_config_durations_as_seconds() {
        let config = RpcNetworkConfig::new("http://localhost:8545".parse().unwrap());
        let toml = toml::to_string(&config).unwrap();
        assert!(toml.contains("confirmation_timeout = 300"));
        assert!(toml.contains("poll_interval = 2"));

        let back: RpcNetworkConfig = toml::from_str(&toml).unwrap();
        assert_eq!(back, config);
    }
}
