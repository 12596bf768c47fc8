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

//! Reward accrual replay.
//!
//! Rewards are streamed at `reward_amount / campaign duration` per second. Between two
//! events the stream is split pro rata of the staking weights, which is tracked with a
//! single reward-per-weight accumulator. Users are credited lazily, always before their
//! weight changes.

use std::collections::HashMap;

use alloy_primitives::Address;
use async_trait::async_trait;

use crate::{
    account::{get_or_create_user, UserAccount, UserList},
    bridge::BridgedBalanceSource,
    events::{RewardEvent, RewardEventType},
    invariants::InvariantChecker,
    weight::{WeightInputs, WeightStrategy},
    RewardsError, DUST_DEBT_THRESHOLD, REDEMPTION_PRICE_TTL,
};

/// Accumulated rate by collateral type
pub type Rates = HashMap<String, f64>;

/// Lookup of the redemption price in force at a point in time.
#[async_trait]
pub trait RedemptionPriceSource: Send + Sync {
    /// Most recent redemption price recorded at or before `timestamp`.
    async fn redemption_price(&self, timestamp: u64) -> anyhow::Result<f64>;
}

#[async_trait]
impl<T: RedemptionPriceSource + ?Sized> RedemptionPriceSource for &T {
    async fn redemption_price(&self, timestamp: u64) -> anyhow::Result<f64> {
        (**self).redemption_price(timestamp).await
    }
}

/// Redemption price that never moves.
#[derive(Debug, Clone, Copy)]
pub struct ConstantRedemptionPrice(pub f64);

#[async_trait]
impl RedemptionPriceSource for ConstantRedemptionPrice {
    async fn redemption_price(&self, _timestamp: u64) -> anyhow::Result<f64> {
        Ok(self.0)
    }
}

/// Parameters of a reward campaign for one reward token and collateral type.
#[derive(Debug, Clone)]
pub struct Campaign {
    /// Total amount of reward tokens to distribute
    pub reward_amount: f64,
    pub start_block: u64,
    pub end_block: u64,
    pub start_timestamp: u64,
    pub end_timestamp: u64,
    /// Accumulated rate of each collateral type at the start block
    pub initial_rates: Rates,
    /// Pool price at the start block, only read by liquidity position weighting
    pub initial_sqrt_price: f64,
}

impl Campaign {
    /// Reward tokens distributed per second.
    pub fn reward_rate(&self) -> Result<f64, RewardsError> {
        if self.end_timestamp <= self.start_timestamp {
            return Err(RewardsError::InvalidCampaign(format!(
                "end timestamp {} is not after start timestamp {}",
                self.end_timestamp, self.start_timestamp
            )));
        }
        if !self.reward_amount.is_finite() || self.reward_amount < 0.0 {
            return Err(RewardsError::InvalidCampaign(format!(
                "invalid reward amount {}",
                self.reward_amount
            )));
        }
        Ok(self.reward_amount / (self.end_timestamp - self.start_timestamp) as f64)
    }
}

#[derive(Debug, Clone)]
struct EngineState {
    reward_rate: f64,
    /// Cumulative reward per unit of weight since campaign start
    reward_per_weight: f64,
    total_staking_weight: f64,
    /// Time up to which the accumulator is current
    timestamp: u64,
    rates: Rates,
    redemption_price: f64,
    redemption_price_last_update: u64,
    sqrt_price: f64,
    events_processed: usize,
}

/// Effect of an event, resolved before any state changes.
enum PendingUpdate<'e> {
    DeltaDebt { address: Address, accumulated_rate: f64, bridged_balance: f64 },
    AccumulatedRate { c_type: &'e str, bridged_balances: Vec<f64> },
}

/// Final state of a replayed campaign.
#[derive(Debug, Clone)]
pub struct Distribution {
    pub users: UserList,
    pub reward_rate: f64,
    pub reward_per_weight: f64,
    pub rates: Rates,
    pub start_timestamp: u64,
    pub end_timestamp: u64,
    pub events_processed: usize,
}

impl Distribution {
    /// Sum of all rewards credited.
    pub fn total_earned(&self) -> f64 {
        self.users.values().map(|u| u.earned).sum()
    }
}

/// Stateful replay of reward events over a campaign.
///
/// Constructing the engine initializes the accumulator, [AccrualEngine::apply] consumes events
/// in order and [AccrualEngine::finalize] credits everyone up to the campaign end.
pub struct AccrualEngine<B, P> {
    campaign: Campaign,
    state: EngineState,
    users: UserList,
    strategy: Box<dyn WeightStrategy + Send + Sync>,
    checker: InvariantChecker,
    bridged_balances: B,
    redemption_prices: P,
    /// Set once an event left the users in a state failing the invariant checks
    poisoned: Option<String>,
}

impl<B: BridgedBalanceSource, P: RedemptionPriceSource> AccrualEngine<B, P> {
    pub fn new(
        campaign: Campaign,
        mut users: UserList,
        strategy: Box<dyn WeightStrategy + Send + Sync>,
        bridged_balances: B,
        redemption_prices: P,
    ) -> Result<Self, RewardsError> {
        let reward_rate = campaign.reward_rate()?;

        let state = EngineState {
            reward_rate,
            reward_per_weight: 0.0,
            total_staking_weight: 0.0,
            timestamp: campaign.start_timestamp,
            rates: campaign.initial_rates.clone(),
            redemption_price: 1.0,
            redemption_price_last_update: 0,
            sqrt_price: campaign.initial_sqrt_price,
            events_processed: 0,
        };

        for user in users.values_mut() {
            refresh_weight(&*strategy, user, &state);
        }

        let checker = InvariantChecker::default();
        checker.check(&users, "initial state")?;

        let mut engine = Self {
            campaign,
            state,
            users,
            strategy,
            checker,
            bridged_balances,
            redemption_prices,
            poisoned: None,
        };
        engine.state.total_staking_weight = engine.sum_all_weights();

        tracing::info!(
            "Distributing {} at a reward rate of {}/sec between {} and {} to {} initial users",
            engine.campaign.reward_amount,
            reward_rate,
            engine.campaign.start_timestamp,
            engine.campaign.end_timestamp,
            engine.users.len()
        );

        Ok(engine)
    }

    /// Replace the checker run after every event.
    pub fn with_invariant_checker(mut self, checker: InvariantChecker) -> Self {
        self.checker = checker;
        self
    }

    pub fn users(&self) -> &UserList {
        &self.users
    }

    pub fn user(&self, address: &Address) -> Option<&UserAccount> {
        self.users.get(address)
    }

    pub fn reward_rate(&self) -> f64 {
        self.state.reward_rate
    }

    pub fn reward_per_weight(&self) -> f64 {
        self.state.reward_per_weight
    }

    pub fn total_staking_weight(&self) -> f64 {
        self.state.total_staking_weight
    }

    pub fn rates(&self) -> &Rates {
        &self.state.rates
    }

    pub fn redemption_price(&self) -> f64 {
        self.state.redemption_price
    }

    /// Apply a single event. Events must be supplied in `(timestamp, log_index)` order.
    ///
    /// An event rejected before any state change leaves the engine as it was. A failed
    /// invariant check comes after the event took effect and stops the engine: every later
    /// [AccrualEngine::apply] or [AccrualEngine::finalize] returns [RewardsError::Poisoned].
    pub async fn apply(&mut self, event: &RewardEvent) -> Result<(), RewardsError> {
        self.ensure_healthy()?;

        if event.timestamp < self.state.timestamp || event.timestamp > self.campaign.end_timestamp
        {
            return Err(RewardsError::InconsistentEvent(format!(
                "{} is outside of [{}, {}]",
                event.describe(),
                self.state.timestamp,
                self.campaign.end_timestamp
            )));
        }

        // Only async step of the loop, keyed on event time
        let redemption_price =
            if self.state.redemption_price_last_update + REDEMPTION_PRICE_TTL <= event.timestamp {
                Some(self.redemption_prices.redemption_price(event.timestamp).await?)
            } else {
                None
            };

        let update = self.prepare(event)?;

        // Nothing fails from here until the invariant check
        if let Some(price) = redemption_price {
            self.state.redemption_price = price;
            self.state.redemption_price_last_update = event.timestamp;
            tracing::debug!("Redemption price at {} is {}", event.timestamp, price);
        }

        self.update_reward_per_weight(event.timestamp);

        match update {
            PendingUpdate::DeltaDebt { address, accumulated_rate, bridged_balance } => {
                self.apply_delta_debt(event, address, accumulated_rate, bridged_balance)
            }
            PendingUpdate::AccumulatedRate { c_type, bridged_balances } => {
                self.apply_accumulated_rate(c_type, event.value, bridged_balances)
            }
        }

        self.state.total_staking_weight = self.sum_all_weights();

        if let Err(e) = self.checker.check_with(&self.users, || event.describe()) {
            self.poisoned = Some(e.to_string());
            return Err(e);
        }

        self.state.events_processed += 1;
        if self.state.events_processed % 1000 == 0 {
            tracing::info!("  Processed {} events", self.state.events_processed);
        }

        Ok(())
    }

    /// Credit everyone up to the campaign end and return the final state.
    pub fn finalize(mut self) -> Result<Distribution, RewardsError> {
        self.ensure_healthy()?;
        self.update_reward_per_weight(self.campaign.end_timestamp);

        let reward_per_weight = self.state.reward_per_weight;
        for user in self.users.values_mut() {
            user.earn(reward_per_weight);
        }

        self.checker.check(&self.users, "finalization")?;

        let distribution = Distribution {
            users: self.users,
            reward_rate: self.state.reward_rate,
            reward_per_weight,
            rates: self.state.rates,
            start_timestamp: self.campaign.start_timestamp,
            end_timestamp: self.campaign.end_timestamp,
            events_processed: self.state.events_processed,
        };

        tracing::info!(
            "Applied {} events, distributed {} out of {}",
            distribution.events_processed,
            distribution.total_earned(),
            self.campaign.reward_amount
        );

        Ok(distribution)
    }

    fn update_reward_per_weight(&mut self, timestamp: u64) {
        // With no weight the stream for the interval goes to no one
        if self.state.total_staking_weight > 0.0 {
            let delta_time = (timestamp - self.state.timestamp) as f64;
            self.state.reward_per_weight +=
                delta_time * self.state.reward_rate / self.state.total_staking_weight;
        }
        self.state.timestamp = timestamp;
    }

    fn ensure_healthy(&self) -> Result<(), RewardsError> {
        match &self.poisoned {
            Some(reason) => Err(RewardsError::Poisoned(reason.clone())),
            None => Ok(()),
        }
    }

    /// Resolve everything `event` needs without touching the engine state.
    fn prepare<'e>(&self, event: &'e RewardEvent) -> Result<PendingUpdate<'e>, RewardsError> {
        match event.event_type {
            RewardEventType::DeltaDebt => {
                let address = event
                    .address
                    .ok_or_else(|| RewardsError::InconsistentEvent(event.describe()))?;
                let c_type = collateral_type(event)?;
                let accumulated_rate = self.accumulated_rate(c_type)?;
                let bridged_balance =
                    self.bridged_balances.bridged_balance(address, c_type, event.created_at_block)?;

                Ok(PendingUpdate::DeltaDebt { address, accumulated_rate, bridged_balance })
            }
            RewardEventType::UpdateAccumulatedRate => {
                let c_type = collateral_type(event)?;
                self.accumulated_rate(c_type)?;
                let bridged_balances = self
                    .users
                    .keys()
                    .map(|address| {
                        self.bridged_balances.bridged_balance(
                            *address,
                            c_type,
                            event.created_at_block,
                        )
                    })
                    .collect::<anyhow::Result<Vec<_>>>()?;

                Ok(PendingUpdate::AccumulatedRate { c_type, bridged_balances })
            }
            RewardEventType::PoolPositionUpdate | RewardEventType::PoolSwap => {
                Err(RewardsError::UnknownEvent(event.describe()))
            }
        }
    }

    fn accumulated_rate(&self, c_type: &str) -> Result<f64, RewardsError> {
        self.state
            .rates
            .get(c_type)
            .copied()
            .ok_or_else(|| RewardsError::UnknownCollateralType(c_type.to_string()))
    }

    fn apply_delta_debt(
        &mut self,
        event: &RewardEvent,
        address: Address,
        accumulated_rate: f64,
        bridged_balance: f64,
    ) {
        let user = get_or_create_user(&mut self.users, address);
        user.earn(self.state.reward_per_weight);

        user.total_bridged_tokens = bridged_balance;

        // Normalized debt to actual debt
        user.debt += event.value * accumulated_rate;
        user.collateral += event.complementary_value;

        if user.debt < 0.0 && user.debt > -DUST_DEBT_THRESHOLD {
            user.debt = 0.0;
        }

        refresh_weight(&*self.strategy, user, &self.state);
    }

    fn apply_accumulated_rate(
        &mut self,
        c_type: &str,
        rate_multiplier: f64,
        bridged_balances: Vec<f64>,
    ) {
        if let Some(accumulated_rate) = self.state.rates.get_mut(c_type) {
            *accumulated_rate += rate_multiplier;
        }

        let reward_per_weight = self.state.reward_per_weight;
        // Balances were collected in user order
        for (user, bridged_balance) in self.users.values_mut().zip(bridged_balances) {
            user.total_bridged_tokens = bridged_balance;

            // Credit at the old weight, then accrue interest on everyone's debt
            user.earn(reward_per_weight);
            user.debt *= rate_multiplier + 1.0;

            refresh_weight(&*self.strategy, user, &self.state);
        }
    }

    fn sum_all_weights(&self) -> f64 {
        self.users.values().map(|u| u.staking_weight).sum()
    }
}

fn collateral_type(event: &RewardEvent) -> Result<&str, RewardsError> {
    event.c_type.as_deref().ok_or_else(|| RewardsError::InconsistentEvent(event.describe()))
}

fn refresh_weight(strategy: &dyn WeightStrategy, user: &mut UserAccount, state: &EngineState) {
    let weight = strategy.weight(&WeightInputs {
        debt: user.debt,
        collateral: user.collateral,
        bridged_balance: user.total_bridged_tokens,
        lp_positions: &user.lp_positions,
        sqrt_price: state.sqrt_price,
        redemption_price: state.redemption_price,
    });
    user.staking_weight = weight;
}

/// Apply every event in order, then finalize. The first failure aborts the run.
pub async fn replay<B: BridgedBalanceSource, P: RedemptionPriceSource>(
    mut engine: AccrualEngine<B, P>,
    events: &[RewardEvent],
) -> Result<Distribution, RewardsError> {
    tracing::info!("Applying {} events...", events.len());

    for event in events {
        engine.apply(event).await?;
    }

    engine.finalize()
}
