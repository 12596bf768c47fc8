// Copyright 2025 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Command line and environment configuration.

use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use clap::Parser;
use geb_rewards::{WeightMode, COLLATERAL_TYPES};
use url::Url;

/// Arguments for the mint rewards calculator.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct MintRewardsArgs {
    /// URL of the GEB subgraph.
    #[clap(long, env)]
    pub geb_subgraph_url: Url,

    /// URL of the Ethereum RPC endpoint.
    #[clap(short, long, env)]
    pub rpc_url: Url,

    /// First block of the campaign.
    #[clap(long, env)]
    pub start_block: u64,

    /// Last block of the campaign.
    #[clap(long, env)]
    pub end_block: u64,

    /// Reward amounts as JSON: `{"<reward token>": {"<collateral type>": <amount>}}`.
    #[clap(long, env)]
    pub config: CampaignConfig,

    /// URL of the Uniswap v3 subgraph. Only used with liquidity position weighting.
    #[clap(long, env)]
    pub uniswap_subgraph_url: Option<Url>,

    /// Address of the Uniswap v3 pool. Only used with liquidity position weighting.
    #[clap(long, env)]
    pub uniswap_pool_address: Option<Address>,

    /// File listing one excluded owner address per line. A missing file excludes no one.
    #[clap(long, env, default_value = "exclusion-list.csv")]
    pub exclusion_list: PathBuf,

    /// JSON ledger of bridge transactions, required with --with-bridge.
    #[clap(long, env)]
    pub bridged_ledger: Option<PathBuf>,

    /// Directory the reward files are written to.
    #[clap(long, env, default_value = "./output")]
    pub output_dir: PathBuf,

    /// Track bridged token balances of users.
    #[clap(long, env, default_value_t = false)]
    pub with_bridge: bool,

    /// How users are weighted.
    #[clap(long, env, value_enum, default_value_t = WeightMode::Debt)]
    pub weight_mode: WeightMode,

    /// Also reject negative debt and negative earnings after each event.
    #[clap(long, env, default_value_t = false)]
    pub strict_invariants: bool,

    /// Collateral types whose accumulated rate is tracked.
    #[clap(long, env, value_delimiter = ',', default_values_t = default_collateral_types())]
    pub collateral_types: Vec<String>,

    /// Timeout of subgraph requests in seconds.
    #[clap(long, env, default_value = "30")]
    pub http_timeout: u64,

    /// Whether to log in JSON format.
    #[clap(long, env, default_value_t = false)]
    pub log_json: bool,
}

impl MintRewardsArgs {
    /// Reject argument combinations that cannot produce a distribution.
    pub fn validate(&self) -> Result<()> {
        if self.start_block >= self.end_block {
            bail!(
                "Start block {} must be before end block {}",
                self.start_block,
                self.end_block
            );
        }

        if self.weight_mode == WeightMode::LiquidityPosition
            && (self.uniswap_subgraph_url.is_none() || self.uniswap_pool_address.is_none())
        {
            bail!("Liquidity position weighting needs a Uniswap subgraph URL and pool address");
        }

        if self.with_bridge && self.bridged_ledger.is_none() {
            bail!("--with-bridge needs a bridged ledger file");
        }

        if self.config.is_empty() {
            bail!("No reward configured");
        }

        for (reward_token, c_type, amount) in self.config.pairs() {
            if !amount.is_finite() || amount < 0.0 {
                bail!("Invalid reward amount {amount} of {reward_token} for {c_type}");
            }
            if !self.collateral_types.iter().any(|c| c == c_type) {
                bail!("Collateral type {c_type} of {reward_token} rewards is not tracked");
            }
        }

        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout)
    }
}

fn default_collateral_types() -> Vec<String> {
    COLLATERAL_TYPES.iter().map(|c_type| c_type.to_string()).collect()
}

/// Reward amount per reward token and collateral type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CampaignConfig(pub BTreeMap<String, BTreeMap<String, f64>>);

impl CampaignConfig {
    /// Every `(reward token, collateral type, amount)`, in name order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str, f64)> + '_ {
        self.0.iter().flat_map(|(token, amounts)| {
            amounts.iter().map(move |(c_type, amount)| (token.as_str(), c_type.as_str(), *amount))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeMap::is_empty)
    }
}

impl FromStr for CampaignConfig {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s).map(Self)
    }
}

/// Load the exclusion list: one address per line, blank lines ignored.
pub fn load_exclusion_list(path: &Path) -> Result<HashSet<Address>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("No exclusion list at {}, excluding no one", path.display());
            return Ok(HashSet::new());
        }
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to read exclusion list {}", path.display()))
        }
    };

    let exclusion_list = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.parse::<Address>().with_context(|| format!("Invalid excluded address {line}"))
        })
        .collect::<Result<HashSet<_>>>()?;

    tracing::info!("Excluding {} addresses", exclusion_list.len());
    Ok(exclusion_list)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{"KITE": {"WETH": 1000, "OP": 250.5}, "OP": {"WETH": 10}}"#;

    fn args(extra: &[&str]) -> Result<MintRewardsArgs, clap::Error> {
        let mut argv = vec![
            "mint-rewards",
            "--geb-subgraph-url",
            "http://localhost:8000/subgraphs/geb",
            "--rpc-url",
            "http://localhost:8545",
            "--start-block",
            "100",
            "--end-block",
            "200",
            "--config",
            CONFIG,
        ];
        argv.extend_from_slice(extra);
        MintRewardsArgs::try_parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let args = args(&[]).unwrap();

        assert_eq!(args.weight_mode, WeightMode::Debt);
        assert_eq!(args.collateral_types, COLLATERAL_TYPES);
        assert_eq!(args.output_dir, PathBuf::from("./output"));
        assert_eq!(args.exclusion_list, PathBuf::from("exclusion-list.csv"));
        assert_eq!(args.http_timeout(), Duration::from_secs(30));
        assert!(!args.with_bridge);
        args.validate().unwrap();
    }

    #[test]
    fn test_campaign_pairs_in_name_order() {
        let args = args(&[]).unwrap();
        let pairs: Vec<_> = args.config.pairs().collect();

        assert_eq!(
            pairs,
            vec![("KITE", "OP", 250.5), ("KITE", "WETH", 1000.0), ("OP", "WETH", 10.0)]
        );
    }

    #[test]
    fn test_rejects_malformed_config() {
        let argv = [
            "mint-rewards",
            "--geb-subgraph-url",
            "http://localhost:8000",
            "--rpc-url",
            "http://localhost:8545",
            "--start-block",
            "1",
            "--end-block",
            "2",
            "--config",
            "{\"KITE\": 12}",
        ];
        assert!(MintRewardsArgs::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_validation() {
        let mut inverted = args(&[]).unwrap();
        inverted.start_block = 200;
        assert!(inverted.validate().is_err());

        let lp = args(&["--weight-mode", "liquidity-position"]).unwrap();
        assert!(lp.validate().is_err());

        let bridge = args(&["--with-bridge"]).unwrap();
        assert!(bridge.validate().is_err());

        let untracked = args(&["--collateral-types", "WETH"]).unwrap();
        assert!(untracked.validate().is_err());

        let tracked = args(&["--collateral-types", "WETH,OP"]).unwrap();
        tracked.validate().unwrap();
    }

    #[test]
    fn test_exclusion_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exclusion-list.csv");

        assert!(load_exclusion_list(&path).unwrap().is_empty());

        let content = format!("{}\n\n{}\n", Address::repeat_byte(0x11), Address::repeat_byte(0x22));
        std::fs::write(&path, content).unwrap();
        let exclusion_list = load_exclusion_list(&path).unwrap();
        assert_eq!(exclusion_list.len(), 2);
        assert!(exclusion_list.contains(&Address::repeat_byte(0x22)));

        std::fs::write(&path, "not an address\n").unwrap();
        assert!(load_exclusion_list(&path).is_err());
    }
}
