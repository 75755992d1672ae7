//! Compiled contract artifacts (Hardhat and Foundry layouts).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::ContractId;

/// A compiled contract ready to be deployed.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub contract: ContractId,
    /// Creation bytecode, without constructor arguments.
    pub bytecode: Vec<u8>,
}

/// Compiler input and version used to build an artifact.
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Full solc version, e.g. `0.8.17+commit.8df45f5f`.
    pub solc_long_version: String,
    /// Standard-JSON compiler input.
    pub input: Value,
}

#[derive(Debug, Deserialize)]
struct DebugFile {
    #[serde(rename = "buildInfo")]
    build_info: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildInfoFile {
    solc_long_version: String,
    input: Value,
}

/// Resolves contract ids to artifact files under an artifacts root.
///
/// Hardhat stores `contracts/xUSD.sol:xUSD` at
/// `<root>/contracts/xUSD.sol/xUSD.json`; Foundry uses `<root>/xUSD.sol/xUSD.json`.
/// Both are tried, in that order.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn candidates(&self, contract: &ContractId, extension: &str) -> Vec<PathBuf> {
        let file = format!("{}.{}", contract.name, extension);
        let mut paths = vec![self.root.join(&contract.source).join(&file)];
        if let Some(base) = Path::new(&contract.source).file_name() {
            paths.push(self.root.join(base).join(&file));
        }
        paths
    }

    fn find(&self, contract: &ContractId, extension: &str) -> Result<PathBuf> {
        let candidates = self.candidates(contract, extension);
        candidates
            .iter()
            .find(|path| path.exists())
            .cloned()
            .with_context(|| {
                format!(
                    "No artifact for {} (looked at {})",
                    contract,
                    candidates
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }

    /// Load the creation bytecode of a contract.
    pub fn load(&self, contract: &ContractId) -> Result<Artifact> {
        let path = self.find(contract, "json")?;
        let value = read_json(&path)?;

        // Hardhat: "bytecode": "0x..."; Foundry: "bytecode": { "object": "0x..." }
        let bytecode = match &value["bytecode"] {
            Value::String(code) => code.as_str(),
            other => other["object"].as_str().with_context(|| {
                format!("Artifact {} has no bytecode", path.display())
            })?,
        };

        let bytecode = hex::decode(bytecode.trim_start_matches("0x"))
            .with_context(|| format!("Artifact {} has invalid bytecode hex", path.display()))?;
        if bytecode.is_empty() {
            anyhow::bail!(
                "Artifact {} has empty bytecode (abstract contract or interface?)",
                path.display()
            );
        }

        Ok(Artifact {
            contract: contract.clone(),
            bytecode,
        })
    }

    /// Load the compiler input a contract was built from.
    ///
    /// Only Hardhat artifacts carry this link (via `<Name>.dbg.json`).
    pub fn load_build_info(&self, contract: &ContractId) -> Result<BuildInfo> {
        let dbg_path = self.find(contract, "dbg.json")?;
        let dbg: DebugFile = serde_json::from_value(read_json(&dbg_path)?)
            .with_context(|| format!("Failed to parse {}", dbg_path.display()))?;

        let dir = dbg_path
            .parent()
            .context("Debug file path must have a parent directory")?;
        let build_info_path = dir.join(&dbg.build_info);
        let build_info: BuildInfoFile = serde_json::from_value(read_json(&build_info_path)?)
            .with_context(|| format!("Failed to parse {}", build_info_path.display()))?;

        Ok(BuildInfo {
            solc_long_version: build_info.solc_long_version,
            input: build_info.input,
        })
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read artifact at {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse JSON at {}", path.display()))
}
