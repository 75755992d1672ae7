//! Deterministic in-process network.
//!
//! Used to rehearse a plan (`stablestack plan --simulate`) and by the tests.
//! Contracts get `CREATE`-style addresses derived from the sender and its nonce,
//! a created contract only exists once its transaction is confirmed, and every
//! confirmed creation and call is appended to an event log.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard, PoisonError},
};

use alloy_core::primitives::{Address, B256, Bytes, keccak256};
use anyhow::Result;

use super::{Confirmation, Network, PendingTx};
use crate::{ArgValue, ContractId};

/// A confirmed contract creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRecord {
    pub contract: ContractId,
    pub args: Vec<ArgValue>,
    pub sender: Address,
    pub address: Address,
}

/// A confirmed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub target: Address,
    pub operation: String,
    pub args: Vec<ArgValue>,
    pub sender: Address,
}

/// Confirmed network activity, in confirmation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Created(CreateRecord),
    Called(CallRecord),
}

enum PendingEntry {
    Create(CreateRecord),
    Call(CallRecord),
}

type CreateFilter = Box<dyn Fn(&ContractId, &[ArgValue]) -> bool + Send>;
type CallFilter = Box<dyn Fn(&str, &[ArgValue]) -> bool + Send>;

#[derive(Default)]
struct ChainState {
    block: u64,
    nonces: HashMap<Address, u64>,
    pending: HashMap<B256, PendingEntry>,
    contracts: BTreeMap<Address, ContractId>,
    events: Vec<NetworkEvent>,
    create_failures: Vec<CreateFilter>,
    call_failures: Vec<CallFilter>,
}

impl ChainState {
    fn next_nonce(&mut self, sender: Address) -> u64 {
        let nonce = self.nonces.entry(sender).or_default();
        let current = *nonce;
        *nonce += 1;
        current
    }
}

/// An in-memory chain.
#[derive(Default)]
pub struct InMemoryNetwork {
    state: Mutex<ChainState>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next creation matching `filter` at submission time.
    pub fn fail_create_once(
        &self,
        filter: impl Fn(&ContractId, &[ArgValue]) -> bool + Send + 'static,
    ) {
        self.state().create_failures.push(Box::new(filter));
    }

    /// Reject the next call matching `filter` at submission time.
    pub fn fail_call_once(&self, filter: impl Fn(&str, &[ArgValue]) -> bool + Send + 'static) {
        self.state().call_failures.push(Box::new(filter));
    }

    /// All confirmed activity so far.
    pub fn events(&self) -> Vec<NetworkEvent> {
        self.state().events.clone()
    }

    pub fn creates(&self) -> Vec<CreateRecord> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                NetworkEvent::Created(record) => Some(record),
                NetworkEvent::Called(_) => None,
            })
            .collect()
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                NetworkEvent::Called(record) => Some(record),
                NetworkEvent::Created(_) => None,
            })
            .collect()
    }

    /// The contract deployed at `address`, if any.
    pub fn contract_at(&self, address: Address) -> Option<ContractId> {
        self.state().contracts.get(&address).cloned()
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn derive(sender: Address, nonce: u64, salt: &[u8]) -> B256 {
    let mut preimage = sender.to_vec();
    preimage.extend_from_slice(&nonce.to_be_bytes());
    preimage.extend_from_slice(salt);
    keccak256(preimage)
}

impl Network for InMemoryNetwork {
    async fn submit_create(
        &self,
        contract: &ContractId,
        args: &[ArgValue],
        sender: Address,
    ) -> Result<PendingTx> {
        let mut state = self.state();

        if let Some(index) = state
            .create_failures
            .iter()
            .position(|filter| filter(contract, args))
        {
            drop(state.create_failures.remove(index));
            anyhow::bail!("Creation of {} rejected by the network", contract);
        }

        let nonce = state.next_nonce(sender);
        let address = Address::from_slice(&derive(sender, nonce, b"")[12..]);
        let hash = derive(sender, nonce, b"tx");

        state.pending.insert(
            hash,
            PendingEntry::Create(CreateRecord {
                contract: contract.clone(),
                args: args.to_vec(),
                sender,
                address,
            }),
        );

        Ok(PendingTx { hash })
    }

    async fn submit_call(
        &self,
        target: Address,
        operation: &str,
        args: &[ArgValue],
        sender: Address,
    ) -> Result<PendingTx> {
        let mut state = self.state();

        if !state.contracts.contains_key(&target) {
            anyhow::bail!("No contract deployed at {}", target);
        }

        if let Some(index) = state
            .call_failures
            .iter()
            .position(|filter| filter(operation, args))
        {
            drop(state.call_failures.remove(index));
            anyhow::bail!("Call {} on {} reverted", operation, target);
        }

        let nonce = state.next_nonce(sender);
        let hash = derive(sender, nonce, b"tx");

        state.pending.insert(
            hash,
            PendingEntry::Call(CallRecord {
                target,
                operation: operation.to_string(),
                args: args.to_vec(),
                sender,
            }),
        );

        Ok(PendingTx { hash })
    }

    async fn await_confirmation(&self, tx: &PendingTx) -> Result<Confirmation> {
        // Let concurrently submitted transactions interleave.
        tokio::task::yield_now().await;

        let mut state = self.state();
        let entry = state
            .pending
            .remove(&tx.hash)
            .ok_or_else(|| anyhow::anyhow!("Unknown transaction {}", tx.hash))?;

        state.block += 1;
        let block_number = Some(state.block);

        let contract_address = match entry {
            PendingEntry::Create(record) => {
                let address = record.address;
                state.contracts.insert(address, record.contract.clone());
                state.events.push(NetworkEvent::Created(record));
                Some(address)
            }
            PendingEntry::Call(record) => {
                state.events.push(NetworkEvent::Called(record));
                None
            }
        };

        Ok(Confirmation {
            tx_hash: tx.hash,
            contract_address,
            block_number,
        })
    }

    async fn read_state(&self, target: Address, query: &str) -> Result<Bytes> {
        let state = self.state();
        if !state.contracts.contains_key(&target) {
            anyhow::bail!("No contract deployed at {}", target);
        }

        // Role getters follow the AccessControl convention: keccak256("<ROLE>").
        let role = query.strip_suffix("()").unwrap_or(query);
        Ok(Bytes::copy_from_slice(keccak256(role.as_bytes()).as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> ContractId {
        ContractId::new("contracts/xUSD.sol", "xUSD")
    }

    #[tokio::test]
    async fn test_create_is_visible_after_confirmation() {
        let network = InMemoryNetwork::new();
        let sender = Address::repeat_byte(0xaa);

        let pending = network.submit_create(&token(), &[], sender).await.unwrap();
        assert!(network.creates().is_empty());

        let confirmation = network.await_confirmation(&pending).await.unwrap();
        let address = confirmation.contract_address.unwrap();
        assert_eq!(network.contract_at(address), Some(token()));
        assert_eq!(confirmation.block_number, Some(1));
    }

    #[tokio::test]
    async fn test_addresses_depend_on_nonce() {
        let network = InMemoryNetwork::new();
        let sender = Address::repeat_byte(0xaa);

        let first = network.submit_create(&token(), &[], sender).await.unwrap();
        let second = network.submit_create(&token(), &[], sender).await.unwrap();
        let a = network.await_confirmation(&first).await.unwrap();
        let b = network.await_confirmation(&second).await.unwrap();

        assert_ne!(a.contract_address, b.contract_address);
        assert_ne!(a.tx_hash, b.tx_hash);
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let network = InMemoryNetwork::new();
        let sender = Address::repeat_byte(0xaa);
        network.fail_create_once(|contract, _| contract.name == "xUSD");

        assert!(network.submit_create(&token(), &[], sender).await.is_err());
        assert!(network.submit_create(&token(), &[], sender).await.is_ok());
    }

    #[tokio::test]
    async fn test_call_requires_deployed_target() {
        let network = InMemoryNetwork::new();
        let sender = Address::repeat_byte(0xaa);

        let result = network
            .submit_call(Address::repeat_byte(1), "grantRole(bytes32,address)", &[], sender)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_read_role() {
        let network = InMemoryNetwork::new();
        let sender = Address::repeat_byte(0xaa);

        let pending = network.submit_create(&token(), &[], sender).await.unwrap();
        let address = network
            .await_confirmation(&pending)
            .await
            .unwrap()
            .contract_address
            .unwrap();

        let role = network.read_state(address, "MINTER_ROLE()").await.unwrap();
        assert_eq!(role.as_ref(), keccak256("MINTER_ROLE").as_slice());
    }
}
