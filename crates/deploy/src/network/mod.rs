//! The target network as seen by the orchestrator: create, call, wait, read.
//!
//! Signing, fee estimation and finality are the network's business. The
//! orchestrator only ever waits for a single confirmation.

mod json_rpc;
mod memory;

use std::future::Future;

use alloy_core::primitives::{Address, B256, Bytes};

pub use json_rpc::{RpcNetwork, RpcNetworkConfig};
pub use memory::{CallRecord, CreateRecord, InMemoryNetwork, NetworkEvent};

use crate::{ArgValue, ContractId};

/// A submitted transaction that has not been confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTx {
    pub hash: B256,
}

/// Outcome of a confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub tx_hash: B256,
    /// Address of the created contract, for creation transactions.
    pub contract_address: Option<Address>,
    pub block_number: Option<u64>,
}

/// External network service the provisioning run drives.
///
/// Every method is a suspension point. Implementations return an error for
/// rejected, reverted or timed-out transactions.
pub trait Network: Send + Sync {
    /// Submit a contract creation.
    fn submit_create(
        &self,
        contract: &ContractId,
        args: &[ArgValue],
        sender: Address,
    ) -> impl Future<Output = anyhow::Result<PendingTx>> + Send;

    /// Submit a call to `operation` (a function signature such as
    /// `grantRole(bytes32,address)`) on a deployed contract.
    fn submit_call(
        &self,
        target: Address,
        operation: &str,
        args: &[ArgValue],
        sender: Address,
    ) -> impl Future<Output = anyhow::Result<PendingTx>> + Send;

    /// Block until the transaction has one confirmation.
    fn await_confirmation(
        &self,
        tx: &PendingTx,
    ) -> impl Future<Output = anyhow::Result<Confirmation>> + Send;

    /// Read-only call of a no-argument view function such as `MINTER_ROLE()`.
    fn read_state(
        &self,
        target: Address,
        query: &str,
    ) -> impl Future<Output = anyhow::Result<Bytes>> + Send;
}
