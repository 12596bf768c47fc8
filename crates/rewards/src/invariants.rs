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

//! Sanity checks over the full user set.

use crate::{account::UserAccount, RewardsError, UserList, DUST_DEBT_THRESHOLD};

/// Checks run over every user after each applied event.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvariantChecker {
    /// Also reject negative debt outside the dust band and negative earnings.
    pub strict: bool,
}

impl InvariantChecker {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    /// Check every user. `context` describes what was applied last and ends up in the error.
    pub fn check(&self, users: &UserList, context: &str) -> Result<(), RewardsError> {
        self.check_with(users, || context.to_string())
    }

    /// Same as [Self::check], only rendering the context when a violation is found.
    pub fn check_with(
        &self,
        users: &UserList,
        context: impl FnOnce() -> String,
    ) -> Result<(), RewardsError> {
        match users.values().find_map(|user| self.violation(user).map(|d| (user.address, d))) {
            Some((address, details)) => {
                Err(RewardsError::InvariantViolation { address, details, event: context() })
            }
            None => Ok(()),
        }
    }

    fn violation(&self, user: &UserAccount) -> Option<String> {
        let fields = [
            ("debt", user.debt),
            ("earned", user.earned),
            ("staking_weight", user.staking_weight),
            ("reward_per_weight_stored", user.reward_per_weight_stored),
        ];
        if let Some((name, value)) = fields.iter().find(|(_, value)| !value.is_finite()) {
            return Some(format!("{name} is not a number ({value})"));
        }

        if self.strict {
            if user.debt < -DUST_DEBT_THRESHOLD {
                return Some(format!("negative debt {}", user.debt));
            }
            if user.earned < 0.0 {
                return Some(format!("negative earnings {}", user.earned));
            }
        }

        None
    }
}
