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

//! Mint rewards calculator: fetches protocol history for a block range, replays it through
//! the reward accrual engine and exports the reward of every user.

pub mod chain;
pub mod config;
pub mod fetch;
pub mod run;
pub mod subgraph;

pub use chain::{BlockTimestamps, ChainClient};
pub use config::{load_exclusion_list, CampaignConfig, MintRewardsArgs};
pub use fetch::{log_index_from_id, GebSubgraph, SafeOwners, UniswapSubgraph};
pub use run::{run, MintRewardsCalculator};
pub use subgraph::SubgraphClient;
