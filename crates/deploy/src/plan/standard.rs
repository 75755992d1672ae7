//! The xUSD fleet plan.
//!
//! 1. `xUSD`
//! 2. `PriceOracleAggregator(xUSD)`
//! 3. For each collateral asset: a mock token, a mock USD price adapter, and
//!    the adapter registered on the oracle. Assets are independent lanes.
//! 4. `Redeem(xUSD, PriceOracleAggregator)`, then granted the minter role.
//! 5. `Staking(xUSD)`, then granted the minter role.

use alloy_core::primitives::U256;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use super::{DeploymentPlan, Stage, Step};
use crate::{Arg, ArgValue, ContractId, ProvisionError, ResourceSpec, WiringSpec};

pub const TOKEN: &str = "xUSD";
pub const ORACLE: &str = "PriceOracleAggregator";
pub const REDEEM: &str = "Redeem";
pub const STAKING: &str = "Staking";
pub const MINTER_ROLE: &str = "MINTER_ROLE";

/// Decimals of the mocked USD price feeds.
pub const DEFAULT_PRICE_DECIMALS: u8 = 8;
/// Decimals of the mocked collateral tokens.
pub const MOCK_TOKEN_DECIMALS: u64 = 18;

const UPDATE_ORACLE_FOR_ASSET: &str = "updateOracleForAsset(address,address)";
const GRANT_ROLE: &str = "grantRole(bytes32,address)";

fn token_contract() -> ContractId {
    ContractId::new("contracts/xUSD.sol", "xUSD")
}

fn oracle_contract() -> ContractId {
    ContractId::new(
        "contracts/oracle/PriceOracleAggregator.sol",
        "PriceOracleAggregator",
    )
}

fn mock_token_contract() -> ContractId {
    ContractId::new("contracts/mocks/MockToken.sol", "MockToken")
}

fn mock_adapter_contract() -> ContractId {
    ContractId::new(
        "contracts/mocks/MockChainlinkUSDAdapter.sol",
        "MockChainlinkUSDAdapter",
    )
}

/// Liquid staking derivatives accepted as collateral, in deployment order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
)]
pub enum LsdAsset {
    #[strum(serialize = "stETH")]
    StEth,
    #[strum(serialize = "rETH")]
    REth,
    #[strum(serialize = "cbETH")]
    CbEth,
}

impl LsdAsset {
    /// Logical name of the mock token, which is also its symbol.
    pub fn token_name(&self) -> String {
        self.to_string()
    }

    pub fn adapter_name(&self) -> String {
        format!("{}MockChainlinkUSDAdapter", self)
    }
}

/// Mocked USD prices of the collateral assets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetPrices {
    pub steth: u64,
    pub reth: u64,
    pub cbeth: u64,
    /// Decimals the prices are scaled to.
    pub decimals: u8,
}

impl Default for AssetPrices {
    fn default() -> Self {
        Self {
            steth: 1900,
            reth: 2040,
            cbeth: 1950,
            decimals: DEFAULT_PRICE_DECIMALS,
        }
    }
}

impl AssetPrices {
    pub fn price(&self, asset: LsdAsset) -> u64 {
        match asset {
            LsdAsset::StEth => self.steth,
            LsdAsset::REth => self.reth,
            LsdAsset::CbEth => self.cbeth,
        }
    }

    pub fn set_price(&mut self, asset: LsdAsset, usd_price: u64) {
        match asset {
            LsdAsset::StEth => self.steth = usd_price,
            LsdAsset::REth => self.reth = usd_price,
            LsdAsset::CbEth => self.cbeth = usd_price,
        }
    }

    pub fn feeds(&self) -> Vec<PriceFeedAsset> {
        LsdAsset::iter()
            .map(|asset| PriceFeedAsset {
                asset,
                usd_price: self.price(asset),
                decimals: self.decimals,
            })
            .collect()
    }
}

/// A collateral asset and its mocked price feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceFeedAsset {
    pub asset: LsdAsset,
    /// Whole USD price.
    pub usd_price: u64,
    pub decimals: u8,
}

impl PriceFeedAsset {
    /// `usd_price * 10^decimals`, or `None` when it does not fit in a `uint256`.
    pub fn scaled_price(&self) -> Option<U256> {
        U256::from(10u64)
            .checked_pow(U256::from(self.decimals))
            .and_then(|scale| U256::from(self.usd_price).checked_mul(scale))
    }

    pub fn token(&self) -> ResourceSpec {
        ResourceSpec::new(self.asset.token_name(), mock_token_contract())
            .arg(ArgValue::string(format!("Mocked {}", self.asset)))
            .arg(ArgValue::string(self.asset.to_string()))
            .arg(ArgValue::uint(MOCK_TOKEN_DECIMALS))
    }

    pub fn adapter(&self) -> Result<ResourceSpec, ProvisionError> {
        let price = self.scaled_price().ok_or_else(|| {
            ProvisionError::InvalidPlan(format!(
                "{} price {} with {} decimals overflows uint256",
                self.asset, self.usd_price, self.decimals
            ))
        })?;
        Ok(ResourceSpec::new(self.asset.adapter_name(), mock_adapter_contract())
            .arg(ArgValue::Uint(price)))
    }

    /// Register the adapter as the asset's price source on the oracle.
    pub fn registration(&self) -> WiringSpec {
        WiringSpec::new(
            format!("{}.updateOracleForAsset({})", ORACLE, self.asset),
            ORACLE,
            UPDATE_ORACLE_FOR_ASSET,
            vec![
                Arg::resource(self.asset.token_name()),
                Arg::resource(self.asset.adapter_name()),
            ],
        )
    }

    fn lane(&self) -> Result<Vec<Step>, ProvisionError> {
        Ok(vec![
            self.token().into(),
            self.adapter()?.into(),
            self.registration().into(),
        ])
    }
}

fn grant_minter(grantee: &str) -> WiringSpec {
    WiringSpec::new(
        format!("{}.grantRole({}, {})", TOKEN, MINTER_ROLE, grantee),
        TOKEN,
        GRANT_ROLE,
        vec![Arg::role(TOKEN, MINTER_ROLE), Arg::resource(grantee)],
    )
}

/// Build the xUSD fleet plan for the given prices.
pub fn xusd_plan(prices: &AssetPrices) -> Result<DeploymentPlan, ProvisionError> {
    let token = ResourceSpec::new(TOKEN, token_contract()).verified();
    let oracle = ResourceSpec::new(ORACLE, oracle_contract())
        .arg(Arg::resource(TOKEN))
        .verified();
    let redeem = ResourceSpec::new(REDEEM, ContractId::new("contracts/Redeem.sol", "Redeem"))
        .arg(Arg::resource(TOKEN))
        .arg(Arg::resource(ORACLE))
        .verified();
    let staking = ResourceSpec::new(STAKING, ContractId::new("contracts/Staking.sol", "Staking"))
        .arg(Arg::resource(TOKEN))
        .verified();

    let lanes = prices
        .feeds()
        .iter()
        .map(PriceFeedAsset::lane)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DeploymentPlan::new(vec![
        Stage::sequential("token", vec![token.into()]),
        Stage::sequential("oracle", vec![oracle.into()]),
        Stage::concurrent("price-feeds", lanes),
        Stage::sequential("redeem", vec![redeem.into(), grant_minter(REDEEM).into()]),
        Stage::sequential("staking", vec![staking.into(), grant_minter(STAKING).into()]),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_is_valid() {
        let plan = xusd_plan(&AssetPrices::default()).unwrap();
        plan.validate().unwrap();
        assert_eq!(plan.resources().count(), 10);
        assert_eq!(plan.wiring().count(), 5);
    }

    #[test]
    fn test_step_order() {
        let plan = xusd_plan(&AssetPrices::default()).unwrap();
        let ids: Vec<_> = plan.steps().map(Step::id).collect();
        assert_eq!(
            ids,
            vec![
                "xUSD",
                "PriceOracleAggregator",
                "stETH",
                "stETHMockChainlinkUSDAdapter",
                "PriceOracleAggregator.updateOracleForAsset(stETH)",
                "rETH",
                "rETHMockChainlinkUSDAdapter",
                "PriceOracleAggregator.updateOracleForAsset(rETH)",
                "cbETH",
                "cbETHMockChainlinkUSDAdapter",
                "PriceOracleAggregator.updateOracleForAsset(cbETH)",
                "Redeem",
                "xUSD.grantRole(MINTER_ROLE, Redeem)",
                "Staking",
                "xUSD.grantRole(MINTER_ROLE, Staking)",
            ]
        );
    }

    #[test]
    fn test_only_core_contracts_are_verified() {
        let plan = xusd_plan(&AssetPrices::default()).unwrap();
        let verified: Vec<_> = plan
            .resources()
            .filter(|spec| spec.verify)
            .map(|spec| spec.name.as_str())
            .collect();
        assert_eq!(verified, vec![TOKEN, ORACLE, REDEEM, STAKING]);
    }

    #[test]
    fn test_mock_arguments() {
        let feeds = AssetPrices::default().feeds();
        let reth = feeds[1];
        assert_eq!(reth.asset, LsdAsset::REth);
        assert_eq!(reth.scaled_price(), Some(U256::from(204_000_000_000u64)));

        let token = reth.token();
        assert_eq!(
            token.args,
            vec![
                Arg::Value(ArgValue::string("Mocked rETH")),
                Arg::Value(ArgValue::string("rETH")),
                Arg::Value(ArgValue::uint(18)),
            ]
        );
        assert_eq!(token.contract.to_string(), "contracts/mocks/MockToken.sol:MockToken");
    }

    #[test]
    fn test_asset_symbols_parse() {
        assert_eq!("cbETH".parse::<LsdAsset>().unwrap(), LsdAsset::CbEth);
        assert!("wstETH".parse::<LsdAsset>().is_err());
    }

    #[test]
    fn test_price_overrides() {
        let prices = AssetPrices {
            steth: 2500,
            ..Default::default()
        };
        let plan = xusd_plan(&prices).unwrap();
        let adapter = plan
            .resources()
            .find(|spec| spec.name == "stETHMockChainlinkUSDAdapter")
            .unwrap();
        assert_eq!(
            adapter.args,
            vec![Arg::Value(ArgValue::Uint(U256::from(250_000_000_000u64)))]
        );
    }

    #[test]
    fn test_overflowing_price_is_rejected() {
        let prices = AssetPrices {
            cbeth: u64::MAX,
            decimals: 77,
            ..Default::default()
        };
        assert_eq!(prices.feeds()[2].scaled_price(), None);

        let err = xusd_plan(&prices).unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidPlan(ref reason) if reason.contains("cbETH")));
    }
}
