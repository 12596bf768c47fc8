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

//! Protocol history from the GEB and Uniswap subgraphs.

use std::collections::{HashMap, HashSet};

use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use geb_rewards::{get_or_create_user, Rates, RedemptionPriceSource, RewardEvent, UserList};
use serde::Deserialize;

use crate::subgraph::{from_str, SubgraphClient};

/// Safe handler to owner address
pub type SafeOwners = HashMap<Address, Address>;

#[derive(Deserialize)]
struct HandlerOwner {
    id: Address,
    owner: OwnerAccount,
}

#[derive(Deserialize)]
struct OwnerAccount {
    address: Address,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SafeSnapshot {
    #[serde(deserialize_with = "from_str")]
    debt: f64,
    #[serde(deserialize_with = "from_str")]
    collateral: f64,
    safe_handler: Address,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SafeModification {
    id: String,
    #[serde(deserialize_with = "from_str")]
    delta_debt: f64,
    safe_handler: Address,
    #[serde(deserialize_with = "from_str")]
    created_at: u64,
    #[serde(deserialize_with = "from_str")]
    created_at_block: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SafeTransfer {
    id: String,
    #[serde(deserialize_with = "from_str")]
    delta_debt: f64,
    src_handler: Address,
    dst_handler: Address,
    #[serde(deserialize_with = "from_str")]
    created_at: u64,
    #[serde(deserialize_with = "from_str")]
    created_at_block: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateUpdate {
    id: String,
    #[serde(deserialize_with = "from_str")]
    rate_multiplier: f64,
    #[serde(deserialize_with = "from_str")]
    created_at: u64,
    #[serde(deserialize_with = "from_str")]
    created_at_block: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollateralTypeRate {
    #[serde(deserialize_with = "from_str")]
    accumulated_rate: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollateralTypeResponse {
    collateral_type: Option<CollateralTypeRate>,
}

#[derive(Deserialize)]
struct RedemptionPrice {
    #[serde(deserialize_with = "from_str")]
    value: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RedemptionPricesResponse {
    redemption_prices: Vec<RedemptionPrice>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolState {
    #[serde(deserialize_with = "from_str")]
    sqrt_price: f64,
}

#[derive(Deserialize)]
struct PoolResponse {
    pool: Option<PoolState>,
}

/// Parse the log index out of a subgraph entity id, `<tx hash>-<log index>`.
pub fn log_index_from_id(id: &str) -> Result<u64> {
    id.split('-')
        .nth(1)
        .and_then(|index| index.parse().ok())
        .with_context(|| format!("Invalid log index in entity id {id}"))
}

/// Queries against the GEB subgraph.
#[derive(Debug, Clone)]
pub struct GebSubgraph {
    client: SubgraphClient,
}

impl GebSubgraph {
    pub fn new(client: SubgraphClient) -> Self {
        Self { client }
    }

    /// Owner of every safe handler as of `block`.
    pub async fn safe_owners(&self, block: u64) -> Result<SafeOwners> {
        let query = format!(
            "{{
                safeHandlerOwners(first: 1000, skip: [[skip]], block: {{number: {block}}}) {{
                    id
                    owner {{
                        address
                    }}
                }}
            }}"
        );
        let owners: Vec<HandlerOwner> =
            self.client.query_paginated(&query, "safeHandlerOwners").await?;

        tracing::info!("Fetched {} safe handler owners at block {}", owners.len(), block);
        Ok(owners.into_iter().map(|o| (o.id, o.owner.address)).collect())
    }

    /// Accumulated rate of `c_type` as of `block`.
    pub async fn accumulated_rate(&self, block: u64, c_type: &str) -> Result<f64> {
        let query = format!(
            "{{collateralType(id: \"{c_type}\", block: {{number: {block}}}) {{accumulatedRate}}}}"
        );
        let response: CollateralTypeResponse = self.client.query(&query).await?;
        let rate = response
            .collateral_type
            .with_context(|| format!("Unknown collateral type {c_type} at block {block}"))?;
        Ok(rate.accumulated_rate)
    }

    /// Accumulated rate of each collateral type as of `block`.
    pub async fn accumulated_rates(&self, block: u64, c_types: &[String]) -> Result<Rates> {
        let rates = try_join_all(c_types.iter().map(|c_type| async move {
            let rate = self.accumulated_rate(block, c_type).await?;
            Ok::<_, anyhow::Error>((c_type.clone(), rate))
        }))
        .await?;
        Ok(rates.into_iter().collect())
    }

    /// Debt and collateral of every owner with open debt on `c_type` as of `block`.
    ///
    /// Debt is converted from normalized to actual debt with `rates`. Excluded owners and
    /// safes whose handler has no known owner are left out.
    pub async fn initial_state(
        &self,
        block: u64,
        owners: &SafeOwners,
        c_type: &str,
        rates: &Rates,
        exclusion_list: &HashSet<Address>,
    ) -> Result<UserList> {
        let accumulated_rate = *rates
            .get(c_type)
            .with_context(|| format!("No accumulated rate for collateral type {c_type}"))?;

        let query = format!(
            "{{safes(where: {{debt_gt: 0, collateralType: \"{c_type}\"}}, first: 1000, \
             skip: [[skip]], block: {{number: {block}}}) {{debt, collateral, safeHandler}}}}"
        );
        let safes: Vec<SafeSnapshot> = self.client.query_paginated(&query, "safes").await?;
        tracing::info!("Fetched {} debt balances", safes.len());

        let mut users = UserList::new();
        for safe in safes {
            let Some(owner) = owners.get(&safe.safe_handler) else {
                tracing::warn!("Safe handler {} has no owner", safe.safe_handler);
                continue;
            };
            let user = get_or_create_user(&mut users, *owner);
            user.debt += safe.debt * accumulated_rate;
            user.collateral += safe.collateral;
        }

        users.retain(|address, _| !exclusion_list.contains(address));

        tracing::info!("Finished loading initial state for {} users", users.len());
        Ok(users)
    }

    /// Debt deltas on `c_type` between the two blocks, inclusive, unordered.
    ///
    /// Safe modifications, confiscations and transfers are fetched concurrently. A transfer
    /// credits the destination and debits the source.
    pub async fn debt_events(
        &self,
        start_block: u64,
        end_block: u64,
        owners: &SafeOwners,
        c_type: &str,
    ) -> Result<Vec<RewardEvent>> {
        let filter = format!(
            "where: {{createdAtBlock_gte: {start_block}, collateralType: \"{c_type}\", \
             createdAtBlock_lte: {end_block}, deltaDebt_not: 0}}, first: 1000, skip: [[skip]]"
        );
        let modification_query = format!(
            "{{modifySAFECollateralizations({filter}) \
             {{id deltaDebt safeHandler createdAt createdAtBlock}}}}"
        );
        let confiscation_query = format!(
            "{{confiscateSAFECollateralAndDebts({filter}) \
             {{id deltaDebt safeHandler createdAt createdAtBlock}}}}"
        );
        let transfer_query = format!(
            "{{transferSAFECollateralAndDebts({filter}) \
             {{id deltaDebt srcHandler dstHandler createdAt createdAtBlock}}}}"
        );

        let (modifications, confiscations, transfers) = tokio::try_join!(
            self.client.query_paginated::<SafeModification>(
                &modification_query,
                "modifySAFECollateralizations"
            ),
            self.client.query_paginated::<SafeModification>(
                &confiscation_query,
                "confiscateSAFECollateralAndDebts"
            ),
            self.client.query_paginated::<SafeTransfer>(
                &transfer_query,
                "transferSAFECollateralAndDebts"
            ),
        )?;

        let (modification_count, confiscation_count, transfer_count) =
            (modifications.len(), confiscations.len(), transfers.len());

        let transfer_legs = transfers.into_iter().flat_map(|t| {
            [
                SafeModification {
                    id: t.id.clone(),
                    delta_debt: t.delta_debt,
                    safe_handler: t.dst_handler,
                    created_at: t.created_at,
                    created_at_block: t.created_at_block,
                },
                SafeModification {
                    id: t.id,
                    delta_debt: -t.delta_debt,
                    safe_handler: t.src_handler,
                    created_at: t.created_at,
                    created_at_block: t.created_at_block,
                },
            ]
        });

        let mut events = Vec::new();
        for modification in modifications.into_iter().chain(confiscations).chain(transfer_legs) {
            let Some(owner) = owners.get(&modification.safe_handler) else {
                tracing::warn!("Safe handler {} has no owner", modification.safe_handler);
                continue;
            };
            events.push(RewardEvent::delta_debt(
                *owner,
                c_type,
                modification.delta_debt,
                modification.created_at,
                modification.created_at_block,
                log_index_from_id(&modification.id)?,
            ));
        }

        tracing::info!(
            "  Fetched {} safe modification events including {} standard safe modifications, \
             {} safe confiscations, {} safe debt transfers",
            events.len(),
            modification_count,
            confiscation_count,
            transfer_count
        );
        Ok(events)
    }

    /// Accumulated rate updates on `c_type` between the two blocks, inclusive, unordered.
    pub async fn accumulated_rate_events(
        &self,
        start_block: u64,
        end_block: u64,
        c_type: &str,
    ) -> Result<Vec<RewardEvent>> {
        let query = format!(
            "{{updateAccumulatedRates(where: {{createdAtBlock_gte: {start_block}, \
             collateralType: \"{c_type}\", createdAtBlock_lte: {end_block}}}, \
             first: 1000, skip: [[skip]]) {{id rateMultiplier createdAt createdAtBlock}}}}"
        );
        let updates: Vec<RateUpdate> =
            self.client.query_paginated(&query, "updateAccumulatedRates").await?;

        let events = updates
            .into_iter()
            .map(|u| {
                Ok(RewardEvent::update_accumulated_rate(
                    c_type,
                    u.rate_multiplier,
                    u.created_at,
                    u.created_at_block,
                    log_index_from_id(&u.id)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!("  Fetched {} accumulated rate events", events.len());
        Ok(events)
    }

    /// Every event of `c_type` between the two blocks, unordered.
    pub async fn events(
        &self,
        start_block: u64,
        end_block: u64,
        owners: &SafeOwners,
        c_type: &str,
    ) -> Result<Vec<RewardEvent>> {
        tracing::info!("Fetch events ...");
        let (mut events, rate_events) = tokio::try_join!(
            self.debt_events(start_block, end_block, owners, c_type),
            self.accumulated_rate_events(start_block, end_block, c_type),
        )?;
        events.extend(rate_events);
        Ok(events)
    }

    /// Most recent redemption price recorded at or before `timestamp`.
    pub async fn redemption_price_at(&self, timestamp: u64) -> Result<f64> {
        let query = format!(
            "{{redemptionPrices(orderBy: timestamp, orderDirection: desc, first: 1, \
             where: {{timestamp_lte: {timestamp}}}) {{value}}}}"
        );
        let response: RedemptionPricesResponse = self.client.query(&query).await?;
        match response.redemption_prices.first() {
            Some(price) => Ok(price.value),
            None => bail!("No redemption price recorded before {timestamp}"),
        }
    }
}

#[async_trait]
impl RedemptionPriceSource for GebSubgraph {
    async fn redemption_price(&self, timestamp: u64) -> Result<f64> {
        self.redemption_price_at(timestamp).await
    }
}

/// Queries against the Uniswap v3 subgraph.
#[derive(Debug, Clone)]
pub struct UniswapSubgraph {
    client: SubgraphClient,
}

impl UniswapSubgraph {
    pub fn new(client: SubgraphClient) -> Self {
        Self { client }
    }

    /// Square root price of `pool` as of `block`, as a Q64.96 value.
    pub async fn pool_sqrt_price(&self, pool: Address, block: u64) -> Result<f64> {
        let query =
            format!("{{pool(id: \"{pool:#x}\", block: {{number: {block}}}) {{sqrtPrice}}}}");
        let response: PoolResponse = self.client.query(&query).await?;
        let pool_state = response.pool.with_context(|| format!("Unknown pool {pool}"))?;
        Ok(pool_state.sqrt_price)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;
    use geb_rewards::RewardEventType;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn client(server: &MockServer) -> SubgraphClient {
        SubgraphClient::new(server.base_url().parse().unwrap(), Duration::from_secs(10)).unwrap()
    }

    fn owners() -> SafeOwners {
        SafeOwners::from([(addr(0xa1), addr(1)), (addr(0xa2), addr(2))])
    }

    fn mock_entities(server: &MockServer, field: &str, entities: serde_json::Value) {
        server.mock(|when, then| {
            when.method(POST).path("/").body_contains(field);
            then.status(200).json_body(json!({ "data": { field: entities } }));
        });
    }

    #[test]
    fn test_log_index_from_id() {
        assert_eq!(log_index_from_id("0xabc-12").unwrap(), 12);
        assert_eq!(log_index_from_id("0xabc-0").unwrap(), 0);
        assert!(log_index_from_id("0xabc").is_err());
        assert!(log_index_from_id("0xabc-x").is_err());
    }

    #[tokio::test]
    async fn test_safe_owners() {
        let server = MockServer::start();
        mock_entities(
            &server,
            "safeHandlerOwners",
            json!([{ "id": addr(0xa1).to_string(), "owner": { "address": addr(1).to_string() } }]),
        );

        let owners = GebSubgraph::new(client(&server)).safe_owners(100).await.unwrap();
        assert_eq!(owners, SafeOwners::from([(addr(0xa1), addr(1))]));
    }

    #[tokio::test]
    async fn test_initial_state_converts_debt_and_skips_unknown_handlers() {
        let server = MockServer::start();
        mock_entities(
            &server,
            "safes",
            json!([
                { "debt": "100", "collateral": "2", "safeHandler": addr(0xa1).to_string() },
                { "debt": "50", "collateral": "1", "safeHandler": addr(0xa1).to_string() },
                { "debt": "10", "collateral": "1", "safeHandler": addr(0xa2).to_string() },
                { "debt": "70", "collateral": "1", "safeHandler": addr(0xff).to_string() },
            ]),
        );

        let rates = Rates::from([("WETH".to_string(), 1.1)]);
        let users = GebSubgraph::new(client(&server))
            .initial_state(100, &owners(), "WETH", &rates, &HashSet::from([addr(2)]))
            .await
            .unwrap();

        assert_eq!(users.len(), 1);
        let first = &users[&addr(1)];
        assert!((first.debt - 165.0).abs() < 1e-9);
        assert_eq!(first.collateral, 3.0);
    }

    #[tokio::test]
    async fn test_initial_state_needs_rate() {
        let server = MockServer::start();
        let result = GebSubgraph::new(client(&server))
            .initial_state(100, &owners(), "OP", &Rates::new(), &HashSet::new())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_debt_events_split_transfers() {
        let server = MockServer::start();
        mock_entities(
            &server,
            "modifySAFECollateralizations",
            json!([{
                "id": "0x01-3",
                "deltaDebt": "25.5",
                "safeHandler": addr(0xa1).to_string(),
                "createdAt": "1700000100",
                "createdAtBlock": "101"
            }]),
        );
        mock_entities(
            &server,
            "confiscateSAFECollateralAndDebts",
            json!([{
                "id": "0x02-1",
                "deltaDebt": "-10",
                "safeHandler": addr(0xff).to_string(),
                "createdAt": "1700000200",
                "createdAtBlock": "102"
            }]),
        );
        mock_entities(
            &server,
            "transferSAFECollateralAndDebts",
            json!([{
                "id": "0x03-7",
                "deltaDebt": "4",
                "srcHandler": addr(0xa1).to_string(),
                "dstHandler": addr(0xa2).to_string(),
                "createdAt": "1700000300",
                "createdAtBlock": "103"
            }]),
        );

        let events = GebSubgraph::new(client(&server))
            .debt_events(100, 200, &owners(), "WETH")
            .await
            .unwrap();

        // The confiscation has no known owner
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            RewardEvent::delta_debt(addr(1), "WETH", 25.5, 1_700_000_100, 101, 3)
        );
        assert_eq!(events[1], RewardEvent::delta_debt(addr(2), "WETH", 4.0, 1_700_000_300, 103, 7));
        assert_eq!(
            events[2],
            RewardEvent::delta_debt(addr(1), "WETH", -4.0, 1_700_000_300, 103, 7)
        );
    }

    #[tokio::test]
    async fn test_accumulated_rate_events() {
        let server = MockServer::start();
        mock_entities(
            &server,
            "updateAccumulatedRates",
            json!([{
                "id": "0x04-2",
                "rateMultiplier": "0.0001",
                "createdAt": "1700000400",
                "createdAtBlock": "104"
            }]),
        );

        let events = GebSubgraph::new(client(&server))
            .accumulated_rate_events(100, 200, "WETH")
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, RewardEventType::UpdateAccumulatedRate);
        assert_eq!(events[0].value, 0.0001);
        assert_eq!(events[0].log_index, Some(2));
        assert_eq!(events[0].address, None);
    }

    #[tokio::test]
    async fn test_accumulated_rates_per_collateral_type() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/").body_contains("WETH");
            then.status(200)
                .json_body(json!({ "data": { "collateralType": { "accumulatedRate": "1.2" } } }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/").body_contains("RETH");
            then.status(200).json_body(json!({ "data": { "collateralType": null } }));
        });

        let geb = GebSubgraph::new(client(&server));
        let rates = geb.accumulated_rates(100, &["WETH".to_string()]).await.unwrap();
        assert_eq!(rates, Rates::from([("WETH".to_string(), 1.2)]));

        assert!(geb.accumulated_rate(100, "RETH").await.is_err());
    }

    #[tokio::test]
    async fn test_redemption_price() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/").body_contains("timestamp_lte: 1700000000");
            then.status(200)
                .json_body(json!({ "data": { "redemptionPrices": [{ "value": "1.0375" }] } }));
        });

        let geb = GebSubgraph::new(client(&server));
        assert_eq!(geb.redemption_price(1_700_000_000).await.unwrap(), 1.0375);
        mock.assert();
    }

    #[tokio::test]
    async fn test_pool_sqrt_price() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/").body_contains("pool(id");
            then.status(200).json_body(
                json!({ "data": { "pool": { "sqrtPrice": "79228162514264337593543950336" } } }),
            );
        });

        let uniswap = UniswapSubgraph::new(client(&server));
        let sqrt_price = uniswap.pool_sqrt_price(addr(0xee), 100).await.unwrap();
        assert_eq!(sqrt_price, 79228162514264337593543950336.0);
    }
}
