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

use alloy_primitives::Address;
use thiserror::Error;

/// Errors aborting a rewards run. There is no partial result.
#[derive(Error, Debug)]
pub enum RewardsError {
    #[error("Inconsistent event: {0}")]
    InconsistentEvent(String),

    #[error("Invariant violated for user {address}: {details} (after event {event})")]
    InvariantViolation { address: Address, details: String, event: String },

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("No accumulated rate for collateral type {0}")]
    UnknownCollateralType(String),

    #[error("Invalid campaign: {0}")]
    InvalidCampaign(String),

    #[error("Engine stopped after an earlier failure: {0}")]
    Poisoned(String),

    #[error("Collaborator error {0:?}")]
    Collaborator(#[from] anyhow::Error),
}
