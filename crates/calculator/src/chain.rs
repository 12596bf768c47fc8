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

//! Block timestamps from the chain.

use alloy::{
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::{client::RpcClient, types::BlockNumberOrTag},
    transports::layers::RetryBackoffLayer,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use url::Url;

/// Lookup of block timestamps.
#[async_trait]
pub trait BlockTimestamps: Send + Sync {
    /// Timestamp of `block` in seconds.
    async fn block_timestamp(&self, block: u64) -> Result<u64>;
}

/// JSON-RPC backed [BlockTimestamps].
#[derive(Clone)]
pub struct ChainClient {
    provider: DynProvider,
}

impl ChainClient {
    pub fn new(rpc_url: Url) -> Self {
        let provider = ProviderBuilder::new()
            .disable_recommended_fillers()
            .connect_client(
                RpcClient::builder().layer(RetryBackoffLayer::new(3, 1000, 200)).http(rpc_url),
            )
            .erased();
        Self { provider }
    }
}

#[async_trait]
impl BlockTimestamps for ChainClient {
    async fn block_timestamp(&self, block: u64) -> Result<u64> {
        let block_data = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(block))
            .await
            .with_context(|| format!("Failed to fetch block {block}"))?
            .with_context(|| format!("Block {block} not found"))?;
        Ok(block_data.header.timestamp)
    }
}
