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

//! Reward events and their deterministic ordering.

use std::collections::HashSet;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::RewardsError;

/// Kind of state change carried by a [RewardEvent].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewardEventType {
    /// Change of a user's normalized debt. `value` is the delta.
    DeltaDebt,
    /// Reserved for liquidity position tracking, never emitted.
    PoolPositionUpdate,
    /// Reserved for pool price tracking, never emitted.
    PoolSwap,
    /// Accrual of interest on a collateral type. `value` is the rate multiplier.
    UpdateAccumulatedRate,
}

impl RewardEventType {
    /// Whether events of this type must reference a user.
    pub fn requires_address(&self) -> bool {
        matches!(self, Self::DeltaDebt | Self::PoolPositionUpdate)
    }
}

/// A single state change to replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardEvent {
    pub event_type: RewardEventType,
    /// Owner of the safe, for user-level events
    pub address: Option<Address>,
    pub value: f64,
    /// Collateral delta accompanying a debt delta, zero when not tracked
    #[serde(default)]
    pub complementary_value: f64,
    /// Block timestamp in seconds
    pub timestamp: u64,
    pub created_at_block: u64,
    /// Position of the log within its block, used to break timestamp ties
    pub log_index: Option<u64>,
    pub c_type: Option<String>,
}

impl RewardEvent {
    /// Debt delta for `address` on collateral type `c_type`.
    pub fn delta_debt(
        address: Address,
        c_type: impl Into<String>,
        value: f64,
        timestamp: u64,
        created_at_block: u64,
        log_index: u64,
    ) -> Self {
        Self {
            event_type: RewardEventType::DeltaDebt,
            address: Some(address),
            value,
            complementary_value: 0.0,
            timestamp,
            created_at_block,
            log_index: Some(log_index),
            c_type: Some(c_type.into()),
        }
    }

    /// Accumulated rate update on collateral type `c_type`.
    pub fn update_accumulated_rate(
        c_type: impl Into<String>,
        rate_multiplier: f64,
        timestamp: u64,
        created_at_block: u64,
        log_index: u64,
    ) -> Self {
        Self {
            event_type: RewardEventType::UpdateAccumulatedRate,
            address: None,
            value: rate_multiplier,
            complementary_value: 0.0,
            timestamp,
            created_at_block,
            log_index: Some(log_index),
            c_type: Some(c_type.into()),
        }
    }

    /// Full content of the event, for error reports.
    pub fn describe(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }

    fn validate(&self) -> Result<(), RewardsError> {
        let inconsistent = || RewardsError::InconsistentEvent(self.describe());

        if self.log_index.is_none() || self.timestamp == 0 || !self.value.is_finite() {
            return Err(inconsistent());
        }

        if self.event_type.requires_address() != self.address.is_some() {
            return Err(inconsistent());
        }

        if matches!(
            self.event_type,
            RewardEventType::DeltaDebt | RewardEventType::UpdateAccumulatedRate
        ) && self.c_type.as_deref().is_none_or(str::is_empty)
        {
            return Err(inconsistent());
        }

        Ok(())
    }
}

/// Merge-ready ordering of fetched events.
///
/// Events referencing an excluded address are dropped, the rest are sorted by
/// `(timestamp, log_index)` and validated. Any malformed event fails the whole batch.
pub fn order_events(
    events: Vec<RewardEvent>,
    exclusion_list: &HashSet<Address>,
) -> Result<Vec<RewardEvent>, RewardsError> {
    let fetched = events.len();

    let mut events: Vec<RewardEvent> = events
        .into_iter()
        .filter(|e| e.address.is_none_or(|address| !exclusion_list.contains(&address)))
        .collect();

    // Stable, so equal keys keep their fetch order
    events.sort_by_key(|e| (e.timestamp, e.log_index));

    tracing::info!(
        "Ordered {} events ({} dropped by the exclusion list)",
        events.len(),
        fetched - events.len()
    );

    for event in &events {
        event.validate()?;
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn test_orders_by_timestamp_then_log_index() {
        let events = vec![
            RewardEvent::delta_debt(user(1), "WETH", 1.0, 10, 100, 2),
            RewardEvent::update_accumulated_rate("WETH", 0.01, 5, 99, 7),
            RewardEvent::delta_debt(user(2), "WETH", 1.0, 10, 100, 1),
        ];

        let ordered = order_events(events, &HashSet::new()).unwrap();

        assert_eq!(ordered[0].timestamp, 5);
        assert_eq!(ordered[1].log_index, Some(1));
        assert_eq!(ordered[1].address, Some(user(2)));
        assert_eq!(ordered[2].log_index, Some(2));
    }

    #[test]
    fn test_drops_excluded_addresses() {
        let events = vec![
            RewardEvent::delta_debt(user(1), "WETH", 1.0, 10, 100, 0),
            RewardEvent::delta_debt(user(2), "WETH", 1.0, 11, 101, 0),
            RewardEvent::update_accumulated_rate("WETH", 0.01, 12, 102, 0),
        ];
        let exclusion_list = HashSet::from([user(1)]);

        let ordered = order_events(events, &exclusion_list).unwrap();

        assert_eq!(ordered.len(), 2);
        assert!(ordered.iter().all(|e| e.address != Some(user(1))));
    }

    #[test]
    fn test_rejects_debt_delta_without_address() {
        let mut event = RewardEvent::delta_debt(user(1), "WETH", 1.0, 10, 100, 0);
        event.address = None;

        let err = order_events(vec![event], &HashSet::new()).unwrap_err();
        assert!(matches!(err, RewardsError::InconsistentEvent(_)));
    }

    #[test]
    fn test_rejects_rate_update_with_address() {
        let mut event = RewardEvent::update_accumulated_rate("WETH", 0.01, 10, 100, 0);
        event.address = Some(user(3));

        let err = order_events(vec![event], &HashSet::new()).unwrap_err();
        match err {
            RewardsError::InconsistentEvent(content) => {
                assert!(content.contains("UpdateAccumulatedRate"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_rejects_missing_ordinals() {
        let mut missing_log_index = RewardEvent::delta_debt(user(1), "WETH", 1.0, 10, 100, 0);
        missing_log_index.log_index = None;
        assert!(order_events(vec![missing_log_index], &HashSet::new()).is_err());

        let missing_timestamp = RewardEvent::delta_debt(user(1), "WETH", 1.0, 0, 100, 0);
        assert!(order_events(vec![missing_timestamp], &HashSet::new()).is_err());
    }

    #[test]
    fn test_reserved_types_still_validated() {
        let mut swap = RewardEvent::update_accumulated_rate("WETH", 0.0, 10, 100, 0);
        swap.event_type = RewardEventType::PoolSwap;
        assert!(order_events(vec![swap.clone()], &HashSet::new()).is_ok());

        swap.address = Some(user(4));
        assert!(order_events(vec![swap], &HashSet::new()).is_err());
    }
}
