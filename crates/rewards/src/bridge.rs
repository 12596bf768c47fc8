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

//! Historical bridged token balances.

use std::{collections::HashMap, path::Path};

use alloy_primitives::{utils::format_units, Address, U256};
use anyhow::Context;
use serde::Deserialize;

/// Lookup of how many tokens an address had bridged as of a block.
pub trait BridgedBalanceSource: Send + Sync {
    /// Balance in whole tokens, zero when the address never bridged.
    fn bridged_balance(&self, address: Address, token: &str, block: u64) -> anyhow::Result<f64>;
}

impl<T: BridgedBalanceSource + ?Sized> BridgedBalanceSource for &T {
    fn bridged_balance(&self, address: Address, token: &str, block: u64) -> anyhow::Result<f64> {
        (**self).bridged_balance(address, token, block)
    }
}

/// Source used when bridged balances are not part of the run.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBridgedBalances;

impl BridgedBalanceSource for NoBridgedBalances {
    fn bridged_balance(&self, _address: Address, _token: &str, _block: u64) -> anyhow::Result<f64> {
        Ok(0.0)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerEntry {
    address: Option<Address>,
    #[serde(default)]
    bridge_transactions: Vec<LedgerTransaction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerTransaction {
    token: String,
    block_height: u64,
    /// Base 10 integer in 18 decimals units
    amount: String,
}

#[derive(Debug, Clone)]
struct BridgeTransaction {
    token: String,
    block_height: u64,
    amount: U256,
}

/// In-memory ledger of bridge transactions per address.
#[derive(Debug, Clone, Default)]
pub struct BridgedLedger {
    transactions: HashMap<Address, Vec<BridgeTransaction>>,
}

impl BridgedLedger {
    /// Load a ledger from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read bridged ledger {}", path.display()))?;
        Self::from_json_str(&raw)
            .with_context(|| format!("Failed to parse bridged ledger {}", path.display()))
    }

    /// Parse a ledger: an array of `{address, bridgeTransactions: [{token, blockHeight, amount}]}`.
    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        let entries: Vec<LedgerEntry> = serde_json::from_str(raw)?;
        let mut transactions: HashMap<Address, Vec<BridgeTransaction>> = HashMap::new();

        // Entries without an address can never match a user
        for entry in entries {
            let Some(address) = entry.address else {
                continue;
            };

            let user_transactions = transactions.entry(address).or_default();
            for tx in entry.bridge_transactions {
                let amount: U256 = tx.amount.parse().with_context(|| {
                    format!("Invalid bridged amount {} for {}", tx.amount, address)
                })?;
                user_transactions.push(BridgeTransaction {
                    token: tx.token,
                    block_height: tx.block_height,
                    amount,
                });
            }
        }

        tracing::debug!("Loaded bridged ledger for {} addresses", transactions.len());

        Ok(Self { transactions })
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

impl BridgedBalanceSource for BridgedLedger {
    fn bridged_balance(&self, address: Address, token: &str, block: u64) -> anyhow::Result<f64> {
        let Some(user_transactions) = self.transactions.get(&address) else {
            return Ok(0.0);
        };

        let total = user_transactions
            .iter()
            .filter(|tx| tx.token.eq_ignore_ascii_case(token) && tx.block_height <= block)
            .fold(U256::ZERO, |acc, tx| acc.saturating_add(tx.amount));

        let formatted = format_units(total, 18u8)?;
        formatted.parse::<f64>().with_context(|| format!("Invalid formatted amount {formatted}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEDGER: &str = r#"[
        {
            "address": "0x1111111111111111111111111111111111111111",
            "bridgeTransactions": [
                { "token": "WETH", "blockHeight": 100, "amount": "1000000000000000000" },
                { "token": "weth", "blockHeight": 200, "amount": "500000000000000000" },
                { "token": "OP", "blockHeight": 150, "amount": "7000000000000000000" }
            ]
        },
        { "bridgeTransactions": [] }
    ]"#;

    #[test]
    fn test_bridged_balance_at_block() {
        let ledger = BridgedLedger::from_json_str(LEDGER).unwrap();
        let user = Address::repeat_byte(0x11);

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.bridged_balance(user, "WETH", 99).unwrap(), 0.0);
        assert_eq!(ledger.bridged_balance(user, "WETH", 100).unwrap(), 1.0);
        assert_eq!(ledger.bridged_balance(user, "WETH", 250).unwrap(), 1.5);
        assert_eq!(ledger.bridged_balance(user, "op", 250).unwrap(), 7.0);
    }

    #[test]
    fn test_unknown_address_has_no_balance() {
        let ledger = BridgedLedger::from_json_str(LEDGER).unwrap();
        let balance = ledger.bridged_balance(Address::repeat_byte(0x22), "WETH", 1_000).unwrap();
        assert_eq!(balance, 0.0);
        assert_eq!(NoBridgedBalances.bridged_balance(Address::ZERO, "WETH", 1).unwrap(), 0.0);
    }

    #[test]
    fn test_rejects_invalid_amount() {
        let raw = r#"[{
            "address": "0x1111111111111111111111111111111111111111",
            "bridgeTransactions": [{ "token": "WETH", "blockHeight": 1, "amount": "1.5" }]
        }]"#;
        assert!(BridgedLedger::from_json_str(raw).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), LEDGER).unwrap();

        let ledger = BridgedLedger::load(file.path()).unwrap();
        assert!(!ledger.is_empty());
        assert!(BridgedLedger::load(file.path().with_extension("missing")).is_err());
    }
}
