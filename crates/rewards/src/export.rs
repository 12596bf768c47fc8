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

//! Export of final reward totals.

use std::{
    io,
    path::{Path, PathBuf},
};

use alloy_primitives::Address;
use anyhow::Context;

use crate::UserList;

/// Final reward of one user
#[derive(Debug, Clone, PartialEq)]
pub struct RewardRow {
    pub address: Address,
    pub earned: f64,
}

/// Users with a positive reward, largest first. Ties keep address order.
pub fn reward_rows(users: &UserList) -> Vec<RewardRow> {
    let mut rows: Vec<RewardRow> = users
        .values()
        .filter(|u| u.earned > 0.0)
        .map(|u| RewardRow { address: u.address, earned: u.earned })
        .collect();
    rows.sort_by(|a, b| b.earned.total_cmp(&a.earned));
    rows
}

/// Name of the file holding the rewards of a reward token and collateral type pair.
pub fn reward_file_name(reward_token: &str, c_type: &str) -> String {
    format!("mint-reward_token-{reward_token}_collateral-{c_type}.csv")
}

/// Write `address,earned` lines, without header.
pub fn write_reward_csv<W: io::Write>(writer: W, rows: &[RewardRow]) -> anyhow::Result<()> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    for row in rows {
        writer.write_record([format!("{:#x}", row.address), row.earned.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Export the rewards of a pair under `output_dir`, returning the written path.
pub fn export_rewards(
    output_dir: &Path,
    reward_token: &str,
    c_type: &str,
    users: &UserList,
) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

    let path = output_dir.join(reward_file_name(reward_token, c_type));
    let file = std::fs::File::create(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let rows = reward_rows(users);
    write_reward_csv(file, &rows)?;

    tracing::info!("Exported {} rewarded users to {}", rows.len(), path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::get_or_create_user;

    fn users(earnings: &[(u8, f64)]) -> UserList {
        let mut users = UserList::new();
        for &(byte, earned) in earnings {
            get_or_create_user(&mut users, Address::repeat_byte(byte)).earned = earned;
        }
        users
    }

    #[test]
    fn test_rows_sorted_descending_without_zero_rewards() {
        let rows = reward_rows(&users(&[(1, 5.0), (2, 0.0), (3, 20.0), (4, 5.0), (5, 7.5)]));

        let addresses: Vec<u8> = rows.iter().map(|r| r.address[0]).collect();
        assert_eq!(addresses, vec![3, 5, 1, 4]);
        assert_eq!(rows[0].earned, 20.0);
    }

    #[test]
    fn test_csv_lines() {
        let rows = reward_rows(&users(&[(0xab, 1.5), (0x01, 10.0)]));
        let mut out = Vec::new();
        write_reward_csv(&mut out, &rows).unwrap();

        let expected = format!("0x{},10\n0x{},1.5\n", "01".repeat(20), "ab".repeat(20));
        assert_eq!(String::from_utf8(out).unwrap(), expected);
    }

    #[test]
    fn test_export_rewards_writes_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("output");

        let path =
            export_rewards(&output_dir, "KITE", "WETH", &users(&[(1, 2.0), (2, 0.0)])).unwrap();

        assert_eq!(path, output_dir.join("mint-reward_token-KITE_collateral-WETH.csv"));
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.ends_with(",2\n"));
    }
}
