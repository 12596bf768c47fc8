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

//! Reward accrual replay for debt mint incentives.
//!
//! Rewards are streamed at a constant rate over a campaign and split between users
//! proportionally to their staking weight, using a global reward-per-weight accumulator.

// Declare modules
pub mod account;
pub mod bridge;
pub mod engine;
pub mod error;
pub mod events;
pub mod export;
pub mod invariants;
pub mod weight;

// Re-export commonly used types
pub use account::{get_or_create_user, LpPosition, UserAccount, UserList};

pub use bridge::{BridgedBalanceSource, BridgedLedger, NoBridgedBalances};

pub use engine::{
    replay, AccrualEngine, Campaign, ConstantRedemptionPrice, Distribution, Rates,
    RedemptionPriceSource,
};

pub use error::RewardsError;

pub use events::{order_events, RewardEvent, RewardEventType};

pub use export::{export_rewards, reward_file_name, reward_rows, write_reward_csv, RewardRow};

pub use invariants::InvariantChecker;

pub use weight::{
    DebtWeighted, LiquidityPositionWeighted, WeightInputs, WeightMode, WeightStrategy,
};

/// Collateral types with an accumulated rate track on the protocol.
pub const COLLATERAL_TYPES: &[&str] = &["WSTETH", "WETH", "TBTC", "RETH", "OP", "APXETH"];

/// Debt in `(-DUST_DEBT_THRESHOLD, 0)` is rate rounding noise and is snapped to zero.
pub const DUST_DEBT_THRESHOLD: f64 = 0.4;

/// Minimum event-time age in seconds before the redemption price is fetched again.
pub const REDEMPTION_PRICE_TTL: u64 = 3600 * 24;
