//! Source verification with block explorers.

use std::{future::Future, time::Duration};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{ArgValue, ArtifactStore, ContractId, DeployedResource, abi, rpc};

/// Default wait before each submission, so the explorer indexes the bytecode.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(10);

/// Networks that disappear with the process and are never verified.
pub const EPHEMERAL_NETWORKS: &[&str] = &["localhost", "hardhat"];

pub fn is_ephemeral_network(name: &str) -> bool {
    EPHEMERAL_NETWORKS.contains(&name)
}

/// What a verification service needs to match a deployed resource to its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRequest {
    pub name: String,
    pub address: Address,
    pub contract: ContractId,
    pub constructor_args: Vec<ArgValue>,
}

impl From<&DeployedResource> for VerificationRequest {
    fn from(resource: &DeployedResource) -> Self {
        Self {
            name: resource.name.clone(),
            address: resource.address,
            contract: resource.contract.clone(),
            constructor_args: resource.constructor_args.clone(),
        }
    }
}

/// Result of one verification submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationOutcome {
    pub name: String,
    pub address: Address,
    /// The failure message, if the submission failed.
    pub error: Option<String>,
}

impl VerificationOutcome {
    pub fn is_verified(&self) -> bool {
        self.error.is_none()
    }
}

/// A source verification service.
pub trait Verifier: Send + Sync {
    fn submit_verification(
        &self,
        request: &VerificationRequest,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Submits verification requests one by one and never fails the run.
pub struct VerificationReporter<V> {
    verifier: V,
    settle_delay: Duration,
}

impl<V: Verifier> VerificationReporter<V> {
    pub fn new(verifier: V) -> Self {
        Self {
            verifier,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    pub fn verifier(&self) -> &V {
        &self.verifier
    }

    /// Submit every request, isolating failures.
    ///
    /// Each request waits for the settle delay first. Errors are logged and
    /// returned as failed outcomes; later requests are still submitted.
    pub async fn report_all(&self, requests: &[VerificationRequest]) -> Vec<VerificationOutcome> {
        let mut outcomes = Vec::with_capacity(requests.len());

        for request in requests {
            if !self.settle_delay.is_zero() {
                tracing::debug!(
                    name = %request.name,
                    delay = ?self.settle_delay,
                    "Waiting before verification..."
                );
                tokio::time::sleep(self.settle_delay).await;
            }

            let error = match self.verifier.submit_verification(request).await {
                Ok(()) => {
                    tracing::info!(
                        name = %request.name,
                        address = %request.address,
                        "Verification submitted"
                    );
                    None
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    tracing::warn!(
                        name = %request.name,
                        address = %request.address,
                        error = %message,
                        "Verification failed"
                    );
                    Some(message)
                }
            };

            outcomes.push(VerificationOutcome {
                name: request.name.clone(),
                address: request.address,
                error,
            });
        }

        outcomes
    }
}

/// Settings for an Etherscan-compatible explorer API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Whether to submit verifications at all on non-ephemeral networks.
    pub enabled: bool,
    /// Explorer API endpoint, e.g. `https://api-sepolia.etherscan.io/api`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<Url>,
    /// API key; usually provided through `STABLESTACK_VERIFICATION__API_KEY`.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Seconds to wait before each submission.
    pub settle_delay_secs: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: None,
            api_key: None,
            settle_delay_secs: DEFAULT_SETTLE_DELAY.as_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    status: String,
    message: String,
    result: String,
}

/// Verifier for explorers exposing the Etherscan `verifysourcecode` API.
///
/// The standard-JSON compiler input is taken from the Hardhat build info of
/// the artifact.
pub struct EtherscanVerifier {
    client: reqwest::Client,
    api_url: Url,
    api_key: String,
    artifacts: ArtifactStore,
}

impl EtherscanVerifier {
    pub fn new(api_url: Url, api_key: impl Into<String>, artifacts: ArtifactStore) -> Result<Self> {
        Ok(Self {
            client: rpc::create_client()?,
            api_url,
            api_key: api_key.into(),
            artifacts,
        })
    }

    /// Build a verifier from config, or `None` when verification can't run.
    pub fn from_config(config: &VerificationConfig, artifacts: ArtifactStore) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        let (Some(api_url), Some(api_key)) = (&config.api_url, &config.api_key) else {
            tracing::warn!("Verification enabled without an API URL and key, skipping it");
            return Ok(None);
        };
        Self::new(api_url.clone(), api_key.clone(), artifacts).map(Some)
    }

    fn form(&self, request: &VerificationRequest) -> Result<Vec<(&'static str, String)>> {
        let build_info = self
            .artifacts
            .load_build_info(&request.contract)
            .with_context(|| format!("No build info for {}", request.contract))?;
        let source = serde_json::to_string(&build_info.input)
            .context("Failed to serialize compiler input")?;

        Ok(vec![
            ("apikey", self.api_key.clone()),
            ("module", "contract".to_string()),
            ("action", "verifysourcecode".to_string()),
            ("contractaddress", request.address.to_string()),
            ("sourceCode", source),
            ("codeformat", "solidity-standard-json-input".to_string()),
            ("contractname", request.contract.to_string()),
            ("compilerversion", format!("v{}", build_info.solc_long_version)),
            // Misspelled in the explorer API.
            (
                "constructorArguements",
                hex::encode(abi::encode_params(&request.constructor_args)),
            ),
        ])
    }
}

impl Verifier for EtherscanVerifier {
    async fn submit_verification(&self, request: &VerificationRequest) -> Result<()> {
        let form = self.form(request)?;

        let response: ExplorerResponse = self
            .client
            .post(self.api_url.clone())
            .form(&form)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.api_url))?
            .json()
            .await
            .context("Failed to parse explorer response")?;

        check_response(response)
    }
}

fn check_response(response: ExplorerResponse) -> Result<()> {
    if response.status == "1" {
        tracing::debug!(guid = %response.result, "Verification queued");
        return Ok(());
    }
    if response.result.to_lowercase().contains("already verified") {
        return Ok(());
    }
    anyhow::bail!("{}: {}", response.message, response.result)
}
