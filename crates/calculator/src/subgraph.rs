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

//! Minimal GraphQL client for The Graph subgraphs.

use std::{fmt::Display, str::FromStr, time::Duration};

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::Value;
use url::Url;

/// Number of entities requested per page by [SubgraphClient::query_paginated]
pub const PAGE_SIZE: usize = 1000;

/// Placeholder replaced with the page offset in paginated queries
pub const SKIP_PLACEHOLDER: &str = "[[skip]]";

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<Value>,
    errors: Option<Value>,
}

/// Client for one subgraph endpoint.
#[derive(Debug, Clone)]
pub struct SubgraphClient {
    client: Client,
    url: Url,
}

impl SubgraphClient {
    pub fn new(url: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Run a query and return its `data` object.
    pub async fn query_raw(&self, query: &str) -> Result<Value> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&serde_json::json!({ "query": query }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("Error with subgraph query to {}", self.url))?;

        let body: GraphQlResponse =
            response.json().await.context("Invalid subgraph response body")?;

        match (body.data, body.errors) {
            (Some(data), errors) if !data.is_null() => {
                if let Some(errors) = errors {
                    tracing::warn!("Subgraph query to {} returned errors: {}", self.url, errors);
                }
                Ok(data)
            }
            (_, Some(errors)) => bail!("Subgraph query failed: {errors}"),
            _ => bail!("No data in subgraph response"),
        }
    }

    /// Run a query and deserialize its `data` object.
    pub async fn query<T: DeserializeOwned>(&self, query: &str) -> Result<T> {
        let data = self.query_raw(query).await?;
        serde_json::from_value(data).context("Unexpected subgraph response shape")
    }

    /// Fetch every entity of `field`, one page of [PAGE_SIZE] at a time.
    ///
    /// `query` must contain [SKIP_PLACEHOLDER] where the page offset goes and request
    /// `first: 1000`. Pages are fetched until one comes back short.
    pub async fn query_paginated<T: DeserializeOwned>(
        &self,
        query: &str,
        field: &str,
    ) -> Result<Vec<T>> {
        if !query.contains(SKIP_PLACEHOLDER) {
            bail!("Paginated query on {field} has no {SKIP_PLACEHOLDER} placeholder");
        }

        let mut entities = Vec::new();
        let mut skip = 0;
        loop {
            let page_query = query.replace(SKIP_PLACEHOLDER, &skip.to_string());
            let mut data = self.query_raw(&page_query).await?;

            let page = data
                .get_mut(field)
                .map(Value::take)
                .with_context(|| format!("Missing field {field} in subgraph response"))?;
            let page: Vec<T> = serde_json::from_value(page)
                .with_context(|| format!("Unexpected shape of {field} entities"))?;

            let page_len = page.len();
            entities.extend(page);
            tracing::debug!("Fetched {} {} (skip {})", page_len, field, skip);

            if page_len < PAGE_SIZE {
                break;
            }
            skip += PAGE_SIZE;
        }

        Ok(entities)
    }
}

/// Deserialize a number the subgraph serializes as a string (`BigInt` and `BigDecimal`).
pub fn from_str<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let raw = String::deserialize(deserializer)?;
    raw.trim().parse().map_err(serde::de::Error::custom)
}
