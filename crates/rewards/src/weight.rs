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

//! Staking weight strategies.
//!
//! The weight decides how the reward stream is split between users at any point in time.
//! Debt weighting is the live mode. Liquidity position weighting values full range
//! concentrated liquidity positions instead, and is kept selectable.

use crate::account::LpPosition;

/// Lower tick of a full range position on the pool
pub const FULL_RANGE_LOWER_TICK: i32 = -887220;
/// Upper tick of a full range position on the pool
pub const FULL_RANGE_UPPER_TICK: i32 = 887220;
/// Tick spacing of the pool
pub const DEFAULT_TICK_SPACING: i32 = 10;

/// Everything a strategy may look at to weight a user.
#[derive(Debug, Clone, Copy)]
pub struct WeightInputs<'a> {
    pub debt: f64,
    pub collateral: f64,
    pub bridged_balance: f64,
    pub lp_positions: &'a [LpPosition],
    /// Pool price as a Q64.96 square root
    pub sqrt_price: f64,
    pub redemption_price: f64,
}

/// Maps a user's position to a scalar staking weight.
pub trait WeightStrategy {
    fn weight(&self, inputs: &WeightInputs<'_>) -> f64;
}

/// Weight equals debt.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebtWeighted;

impl WeightStrategy for DebtWeighted {
    fn weight(&self, inputs: &WeightInputs<'_>) -> f64 {
        inputs.debt
    }
}

/// Weight equals the value of the user's full range liquidity positions.
#[derive(Debug, Clone, Copy)]
pub struct LiquidityPositionWeighted {
    pub full_range_lower_tick: i32,
    pub full_range_upper_tick: i32,
    pub tick_spacing: i32,
    /// Whether the system coin is token0 of the pool
    pub system_coin_is_token0: bool,
}

impl Default for LiquidityPositionWeighted {
    fn default() -> Self {
        Self {
            full_range_lower_tick: FULL_RANGE_LOWER_TICK,
            full_range_upper_tick: FULL_RANGE_UPPER_TICK,
            tick_spacing: DEFAULT_TICK_SPACING,
            system_coin_is_token0: true,
        }
    }
}

impl LiquidityPositionWeighted {
    pub fn is_full_range(&self, lp: &LpPosition) -> bool {
        lp.lower_tick == self.full_range_lower_tick && lp.upper_tick == self.full_range_upper_tick
    }

    /// Both the market price and the redemption price must sit inside the position.
    pub fn is_in_range(&self, lp: &LpPosition, sqrt_price: f64, redemption_price: f64) -> bool {
        let tick_market_price = tick_math::sqrt_price_to_tick(sqrt_price);
        let tick_redemption_price = tick_math::sqrt_price_to_adjusted_tick(
            tick_math::price_to_sqrt_price(redemption_price, 18, 18),
            self.tick_spacing,
        );
        let (lower, upper) = (f64::from(lp.lower_tick), f64::from(lp.upper_tick));

        tick_market_price >= lower
            && tick_market_price <= upper
            && tick_redemption_price >= lower
            && tick_redemption_price <= upper
    }

    /// Value of a position in the non system coin, zero when out of range.
    pub fn position_size(&self, lp: &LpPosition, sqrt_price: f64, redemption_price: f64) -> f64 {
        if !self.is_in_range(lp, sqrt_price, redemption_price) {
            return 0.0;
        }

        let (amount0, amount1) = tick_math::token_amounts_from_lp(lp, sqrt_price);
        let (coin_amount, other_amount) =
            if self.system_coin_is_token0 { (amount0, amount1) } else { (amount1, amount0) };

        other_amount + coin_amount * redemption_price
    }
}

impl WeightStrategy for LiquidityPositionWeighted {
    fn weight(&self, inputs: &WeightInputs<'_>) -> f64 {
        inputs
            .lp_positions
            .iter()
            .filter(|lp| self.is_full_range(lp))
            .map(|lp| self.position_size(lp, inputs.sqrt_price, inputs.redemption_price))
            .sum()
    }
}

/// Weighting strategy selection.
#[derive(clap::ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WeightMode {
    /// Weight by debt
    #[default]
    Debt,
    /// Weight by full range liquidity positions
    LiquidityPosition,
}

impl WeightMode {
    pub fn strategy(&self) -> Box<dyn WeightStrategy + Send + Sync> {
        match self {
            Self::Debt => Box::new(DebtWeighted),
            Self::LiquidityPosition => Box::new(LiquidityPositionWeighted::default()),
        }
    }
}

/// Uniswap v3 price and tick conversions on floating point values.
pub mod tick_math {
    use crate::account::LpPosition;

    const Q96: f64 = 79228162514264337593543950336.0;
    const Q192: f64 = Q96 * Q96;
    const TOKEN_UNIT: f64 = 1e18;

    pub fn sqrt_price_to_tick(sqrt_price: f64) -> f64 {
        (sqrt_price / Q96).ln() / 1.0001_f64.sqrt().ln()
    }

    pub fn tick_to_sqrt_price(tick: f64) -> f64 {
        1.0001_f64.powf(tick / 2.0)
    }

    /// Tick of a price, floored then snapped toward zero onto the tick spacing.
    pub fn sqrt_price_to_adjusted_tick(sqrt_price: f64, tick_spacing: i32) -> f64 {
        let floored_tick = sqrt_price_to_tick(sqrt_price).floor();
        floored_tick - floored_tick % f64::from(tick_spacing)
    }

    pub fn price_to_sqrt_price(price: f64, token0_decimals: i32, token1_decimals: i32) -> f64 {
        (price * 10f64.powi(token1_decimals) / 10f64.powi(token0_decimals) * Q192).sqrt()
    }

    /// Pool market price of token0 in token1 from a Q64.96 square root price. Position
    /// values use the redemption price instead; this is the pool side of the conversion.
    pub fn sqrt_price_to_price(sqrt_price: f64, token0_decimals: i32, token1_decimals: i32) -> f64 {
        sqrt_price.powi(2) * (10f64.powi(token0_decimals) / 10f64.powi(token1_decimals)) / Q192
    }

    pub fn amount0_delta(lower_tick: f64, upper_tick: f64, liquidity: f64) -> f64 {
        (liquidity / tick_to_sqrt_price(lower_tick) - liquidity / tick_to_sqrt_price(upper_tick))
            / TOKEN_UNIT
    }

    pub fn amount1_delta(lower_tick: f64, upper_tick: f64, liquidity: f64) -> f64 {
        liquidity * (tick_to_sqrt_price(upper_tick) - tick_to_sqrt_price(lower_tick)) / TOKEN_UNIT
    }

    /// Token0 and token1 amounts backing a position at the given pool price.
    pub fn token_amounts_from_lp(lp: &LpPosition, sqrt_price: f64) -> (f64, f64) {
        let current_tick = sqrt_price_to_tick(sqrt_price);
        let (lower, upper) = (f64::from(lp.lower_tick), f64::from(lp.upper_tick));

        if current_tick < lower {
            (amount0_delta(lower, upper, lp.liquidity), 0.0)
        } else if current_tick < upper {
            (
                amount0_delta(current_tick, upper, lp.liquidity),
                amount1_delta(lower, current_tick, lp.liquidity),
            )
        } else {
            (0.0, amount1_delta(lower, upper, lp.liquidity))
        }
    }
}
