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

//! Per-user reward accounting.

use std::collections::BTreeMap;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// Concentrated liquidity position held by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LpPosition {
    pub token_id: u64,
    pub lower_tick: i32,
    pub upper_tick: i32,
    pub liquidity: f64,
}

/// Reward state of a single user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub address: Address,
    /// Debt after accumulated rate, in system coin units
    pub debt: f64,
    pub collateral: f64,
    pub lp_positions: Vec<LpPosition>,
    /// Share of the reward stream, derived from the fields above
    pub staking_weight: f64,
    /// Accumulator value the user was last credited against
    pub reward_per_weight_stored: f64,
    /// Rewards credited so far
    pub earned: f64,
    /// Bridged token balance snapshot, refreshed on every event touching the user
    pub total_bridged_tokens: f64,
}

impl UserAccount {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            debt: 0.0,
            collateral: 0.0,
            lp_positions: Vec::new(),
            staking_weight: 0.0,
            reward_per_weight_stored: 0.0,
            earned: 0.0,
            total_bridged_tokens: 0.0,
        }
    }

    /// Credit the rewards accrued since the last call.
    ///
    /// Must run before any change to `staking_weight`, otherwise the time elapsed since the
    /// last credit would be paid out at the new weight.
    pub fn earn(&mut self, reward_per_weight: f64) {
        self.earned += (reward_per_weight - self.reward_per_weight_stored) * self.staking_weight;
        self.reward_per_weight_stored = reward_per_weight;
    }
}

/// All users of a run, keyed by address
pub type UserList = BTreeMap<Address, UserAccount>;

/// Fetch the account for `address`, creating an empty one on first reference.
pub fn get_or_create_user(users: &mut UserList, address: Address) -> &mut UserAccount {
    users.entry(address).or_insert_with(|| UserAccount::new(address))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_earn_credits_delta_since_last_call() {
        let mut user = UserAccount::new(Address::repeat_byte(1));
        user.staking_weight = 10.0;

        user.earn(0.5);
        assert_eq!(user.earned, 5.0);
        assert_eq!(user.reward_per_weight_stored, 0.5);

        user.earn(0.75);
        assert_eq!(user.earned, 7.5);
    }

    #[test]
    fn test_earn_is_idempotent_for_same_accumulator() {
        let mut user = UserAccount::new(Address::repeat_byte(1));
        user.staking_weight = 3.0;

        user.earn(2.0);
        let after_first = user.clone();
        user.earn(2.0);

        assert_eq!(user, after_first);
    }

    #[test]
    fn test_get_or_create_user() {
        let mut users = UserList::new();
        let address = Address::repeat_byte(7);

        get_or_create_user(&mut users, address).debt = 42.0;
        let user = get_or_create_user(&mut users, address);

        assert_eq!(user.debt, 42.0);
        assert_eq!(users.len(), 1);
    }
}
