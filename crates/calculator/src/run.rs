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

use std::{collections::HashSet, path::PathBuf};

use alloy::primitives::Address;
use anyhow::{Context, Result};
use geb_rewards::{
    export_rewards, order_events, replay, AccrualEngine, BridgedBalanceSource, BridgedLedger,
    Campaign, InvariantChecker, NoBridgedBalances, Rates, WeightMode,
};

use crate::{
    chain::{BlockTimestamps, ChainClient},
    config::MintRewardsArgs,
    fetch::{GebSubgraph, SafeOwners, UniswapSubgraph},
    subgraph::SubgraphClient,
};

/// Inputs shared by every reward token and collateral type pair of a run.
struct CampaignContext {
    start_timestamp: u64,
    end_timestamp: u64,
    owners: SafeOwners,
    initial_rates: Rates,
    initial_sqrt_price: f64,
}

/// Computes and exports the rewards of every configured pair.
pub struct MintRewardsCalculator<C> {
    args: MintRewardsArgs,
    geb: GebSubgraph,
    uniswap: Option<UniswapSubgraph>,
    clock: C,
    bridged_ledger: Option<BridgedLedger>,
    exclusion_list: HashSet<Address>,
}

impl MintRewardsCalculator<ChainClient> {
    /// Calculator reading block timestamps from the configured RPC endpoint.
    pub fn from_args(args: MintRewardsArgs) -> Result<Self> {
        let clock = ChainClient::new(args.rpc_url.clone());
        Self::new(args, clock)
    }
}

impl<C: BlockTimestamps> MintRewardsCalculator<C> {
    pub fn new(args: MintRewardsArgs, clock: C) -> Result<Self> {
        args.validate()?;

        let timeout = args.http_timeout();
        let geb = GebSubgraph::new(SubgraphClient::new(args.geb_subgraph_url.clone(), timeout)?);

        let uniswap = match (&args.weight_mode, &args.uniswap_subgraph_url) {
            (WeightMode::LiquidityPosition, Some(url)) => {
                tracing::warn!(
                    "Liquidity position weighting selected, but no pool position or swap events \
                     are fetched yet: every weight stays 0 and no rewards are distributed"
                );
                Some(UniswapSubgraph::new(SubgraphClient::new(url.clone(), timeout)?))
            }
            _ => None,
        };

        let bridged_ledger = match (&args.bridged_ledger, args.with_bridge) {
            (Some(path), true) => Some(BridgedLedger::load(path)?),
            _ => None,
        };

        let exclusion_list = crate::config::load_exclusion_list(&args.exclusion_list)?;

        Ok(Self { args, geb, uniswap, clock, bridged_ledger, exclusion_list })
    }

    /// Run every configured pair and return the files written.
    pub async fn run(&self) -> Result<Vec<PathBuf>> {
        let context = self.load_context().await?;

        let mut written = Vec::new();
        for (reward_token, c_type, reward_amount) in self.args.config.pairs() {
            tracing::info!("Calculating rewards for token: {}", reward_token);
            tracing::info!("...Reward amount: {}", reward_amount);
            tracing::info!("...Collateral type: {}", c_type);

            let path = self
                .calculate_pair(&context, reward_token, c_type, reward_amount)
                .await
                .with_context(|| format!("Failed to calculate {reward_token} for {c_type}"))?;
            written.push(path);
        }

        Ok(written)
    }

    async fn load_context(&self) -> Result<CampaignContext> {
        let (start_block, end_block) = (self.args.start_block, self.args.end_block);

        let (start_timestamp, end_timestamp, owners, initial_rates) = tokio::try_join!(
            self.clock.block_timestamp(start_block),
            self.clock.block_timestamp(end_block),
            // Owners as of the end of the campaign
            self.geb.safe_owners(end_block),
            self.geb.accumulated_rates(start_block, &self.args.collateral_types),
        )?;

        let initial_sqrt_price = match (&self.uniswap, self.args.uniswap_pool_address) {
            (Some(uniswap), Some(pool)) => uniswap.pool_sqrt_price(pool, start_block).await?,
            _ => 0.0,
        };

        tracing::info!(
            "Campaign runs from block {} ({}) to block {} ({})",
            start_block,
            start_timestamp,
            end_block,
            end_timestamp
        );

        Ok(CampaignContext {
            start_timestamp,
            end_timestamp,
            owners,
            initial_rates,
            initial_sqrt_price,
        })
    }

    async fn calculate_pair(
        &self,
        context: &CampaignContext,
        reward_token: &str,
        c_type: &str,
        reward_amount: f64,
    ) -> Result<PathBuf> {
        let (start_block, end_block) = (self.args.start_block, self.args.end_block);

        let (users, events) = tokio::try_join!(
            self.geb.initial_state(
                start_block,
                &context.owners,
                c_type,
                &context.initial_rates,
                &self.exclusion_list
            ),
            self.geb.events(start_block, end_block, &context.owners, c_type),
        )?;
        let events = order_events(events, &self.exclusion_list)?;

        let campaign = Campaign {
            reward_amount,
            start_block,
            end_block,
            start_timestamp: context.start_timestamp,
            end_timestamp: context.end_timestamp,
            initial_rates: context.initial_rates.clone(),
            initial_sqrt_price: context.initial_sqrt_price,
        };

        let bridged_balances: &dyn BridgedBalanceSource = match &self.bridged_ledger {
            Some(ledger) => ledger,
            None => &NoBridgedBalances,
        };

        let engine = AccrualEngine::new(
            campaign,
            users,
            self.args.weight_mode.strategy(),
            bridged_balances,
            &self.geb,
        )?
        .with_invariant_checker(InvariantChecker::new(self.args.strict_invariants));

        let distribution = replay(engine, &events).await?;

        export_rewards(&self.args.output_dir, reward_token, c_type, &distribution.users)
    }
}

/// Run the calculator described by `args`.
pub async fn run(args: MintRewardsArgs) -> Result<Vec<PathBuf>> {
    MintRewardsCalculator::from_args(args)?.run().await
}
