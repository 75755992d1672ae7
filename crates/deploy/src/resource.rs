//! Resource descriptions and deployment records.

use std::{fmt, str::FromStr};

use alloy_core::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Fully qualified contract identifier, e.g. `contracts/xUSD.sol:xUSD`.
///
/// The source path locates the compiled artifact and is what verification
/// services expect as the contract name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContractId {
    /// Source file relative to the project root.
    pub source: String,
    /// Contract name inside the source file.
    pub name: String,
}

impl ContractId {
    pub fn new(source: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.name)
    }
}

impl FromStr for ContractId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (source, name) = s
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("Contract id must be <source>:<name>, got '{}'", s))?;
        if source.is_empty() || name.is_empty() {
            anyhow::bail!("Contract id must be <source>:<name>, got '{}'", s);
        }
        Ok(Self::new(source, name))
    }
}

impl TryFrom<String> for ContractId {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContractId> for String {
    fn from(value: ContractId) -> Self {
        value.to_string()
    }
}

/// A concrete ABI value passed to a constructor or a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ArgValue {
    Address(Address),
    Uint(U256),
    Bytes32(B256),
    String(String),
}

impl ArgValue {
    pub fn uint(value: u64) -> Self {
        Self::Uint(U256::from(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            Self::Address(address) => Some(*address),
            _ => None,
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(address) => write!(f, "{}", address),
            Self::Uint(value) => write!(f, "{}", value),
            Self::Bytes32(value) => write!(f, "{}", value),
            Self::String(value) => write!(f, "{:?}", value),
        }
    }
}

/// An argument as written in a plan: either a literal or a reference that is
/// resolved against the registry (or the network) right before use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arg {
    /// A literal value.
    Value(ArgValue),
    /// The address of another resource, looked up by logical name.
    Resource(String),
    /// A `bytes32` role identifier read from another resource, e.g. `MINTER_ROLE`.
    Role { resource: String, role: String },
}

impl Arg {
    pub fn resource(name: impl Into<String>) -> Self {
        Self::Resource(name.into())
    }

    pub fn role(resource: impl Into<String>, role: impl Into<String>) -> Self {
        Self::Role {
            resource: resource.into(),
            role: role.into(),
        }
    }

    /// The logical resource name this argument depends on, if any.
    pub fn dependency(&self) -> Option<&str> {
        match self {
            Self::Value(_) => None,
            Self::Resource(name) => Some(name),
            Self::Role { resource, .. } => Some(resource),
        }
    }
}

impl From<ArgValue> for Arg {
    fn from(value: ArgValue) -> Self {
        Self::Value(value)
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => write!(f, "{}", value),
            Self::Resource(name) => write!(f, "@{}", name),
            Self::Role { resource, role } => write!(f, "{}.{}()", resource, role),
        }
    }
}

/// Everything needed to create one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Unique logical name, the registry key.
    pub name: String,
    /// Contract to instantiate.
    pub contract: ContractId,
    /// Ordered constructor arguments.
    pub args: Vec<Arg>,
    /// Whether the resource's source is submitted for verification.
    pub verify: bool,
}

impl ResourceSpec {
    pub fn new(name: impl Into<String>, contract: ContractId) -> Self {
        Self {
            name: name.into(),
            contract,
            args: Vec::new(),
            verify: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn verified(mut self) -> Self {
        self.verify = true;
        self
    }

    /// Names of the resources this one consumes.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.args.iter().filter_map(Arg::dependency)
    }
}

/// A confirmed resource as stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedResource {
    pub name: String,
    pub address: Address,
    pub contract: ContractId,
    /// Constructor arguments as resolved at creation time.
    pub constructor_args: Vec<ArgValue>,
    /// Fingerprint of `contract` and `constructor_args`.
    pub args_hash: String,
    /// Hash of the confirmed creation transaction.
    pub tx_hash: B256,
    /// Block the creation was confirmed in, when the network reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    /// Unix timestamp of the recording.
    pub deployed_at: i64,
}

/// Compute a deterministic SHA-256 fingerprint of a contract and its resolved
/// constructor arguments.
pub fn args_fingerprint(contract: &ContractId, args: &[ArgValue]) -> String {
    let json = serde_json::to_string(&(contract, args))
        .expect("contract ids and arg values always serialize");

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_id_roundtrip() {
        let id: ContractId = "contracts/oracle/PriceOracleAggregator.sol:PriceOracleAggregator"
            .parse()
            .unwrap();
        assert_eq!(id.source, "contracts/oracle/PriceOracleAggregator.sol");
        assert_eq!(id.name, "PriceOracleAggregator");
        assert_eq!(
            id.to_string(),
            "contracts/oracle/PriceOracleAggregator.sol:PriceOracleAggregator"
        );
    }

    #[test]
    fn test_contract_id_rejects_missing_name() {
        assert!("contracts/xUSD.sol".parse::<ContractId>().is_err());
        assert!("contracts/xUSD.sol:".parse::<ContractId>().is_err());
        assert!(":xUSD".parse::<ContractId>().is_err());
    }

    #[test]
    fn test_dependencies() {
        let spec = ResourceSpec::new("Redeem", ContractId::new("contracts/Redeem.sol", "Redeem"))
            .arg(Arg::resource("xUSD"))
            .arg(Arg::resource("PriceOracleAggregator"))
            .arg(ArgValue::uint(1));

        let deps: Vec<_> = spec.dependencies().collect();
        assert_eq!(deps, vec!["xUSD", "PriceOracleAggregator"]);
    }

    #[test]
    fn test_fingerprint_changes_with_args() {
        let contract = ContractId::new("contracts/mocks/MockToken.sol", "MockToken");
        let a = args_fingerprint(&contract, &[ArgValue::string("stETH"), ArgValue::uint(18)]);
        let b = args_fingerprint(&contract, &[ArgValue::string("rETH"), ArgValue::uint(18)]);

        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(
            a,
            args_fingerprint(&contract, &[ArgValue::string("stETH"), ArgValue::uint(18)])
        );
    }

    #[test]
    fn test_deployed_resource_json_shape() {
        let resource = DeployedResource {
            name: "xUSD".to_string(),
            address: Address::repeat_byte(0x11),
            contract: ContractId::new("contracts/xUSD.sol", "xUSD"),
            constructor_args: vec![],
            args_hash: "00".to_string(),
            tx_hash: B256::repeat_byte(0x22),
            block_number: None,
            deployed_at: 1_737_316_800,
        };

        let json = serde_json::to_value(&resource).unwrap();
        assert_eq!(json["contract"], "contracts/xUSD.sol:xUSD");
        assert!(json.get("block_number").is_none());

        let back: DeployedResource = serde_json::from_value(json).unwrap();
        assert_eq!(back, resource);
    }
}
