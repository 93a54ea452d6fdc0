//! Position sizer - fixed dollar risk into a margin-feasible order
//!
//! The stop sits 1.5x ATR from entry and the target 3.0x ATR (fixed 1:2
//! reward:risk). Contracts are floored from risk / stop-distance, so the
//! realized risk never exceeds the budget.

use thiserror::Error;

use crate::types::Side;

/// Structured sizing rejections; normal control flow, not faults
#[derive(Debug, Error, PartialEq)]
pub enum SizingRejection {
    #[error("Position too small: {contracts_raw:.4} contracts rounds below 1")]
    PositionTooSmall { contracts_raw: f64 },

    #[error("Insufficient margin: need ${required:.2}, usable ${usable:.2}")]
    InsufficientMargin { required: f64, usable: f64 },

    #[error("Notional ${notional:.2} below exchange minimum ${minimum:.2}")]
    BelowMinimumNotional { notional: f64, minimum: f64 },

    #[error("Volatility reading is zero or negative, refusing to size")]
    ZeroVolatility,
}

#[derive(Debug, Clone)]
pub struct SizerConfig {
    /// Dollar risk budget per trade
    pub risk_per_trade: f64,
    /// Stop distance as a multiple of ATR
    pub stop_atr_mult: f64,
    /// Target distance as a multiple of ATR
    pub target_atr_mult: f64,
    /// Fraction of the balance margin may consume
    pub margin_utilization_cap: f64,
    /// Exchange-imposed minimum notional (USD)
    pub min_notional: f64,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            risk_per_trade: 10.0,
            stop_atr_mult: 1.5,
            target_atr_mult: 3.0,
            margin_utilization_cap: 0.95,
            min_notional: 10.0,
        }
    }
}

/// Sizing request assembled by the monitor
#[derive(Debug, Clone, Copy)]
pub struct SizeRequest {
    pub side: Side,
    pub price: f64,
    pub atr: f64,
    pub balance: f64,
    pub leverage: f64,
}

/// A feasible order with its bracket prices
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizedOrder {
    pub contracts: u32,
    pub stop_price: f64,
    pub target_price: f64,
    /// Dollars actually at risk: contracts x stop distance
    pub actual_risk: f64,
    pub notional: f64,
    pub margin_required: f64,
}

/// Converts the fixed risk budget and an ATR reading into an integer
/// contract count, validating margin and notional feasibility.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    config: SizerConfig,
}

impl PositionSizer {
    pub fn new(config: SizerConfig) -> Self {
        Self { config }
    }

    pub fn size(&self, request: SizeRequest) -> Result<SizedOrder, SizingRejection> {
        let stop_distance = request.atr * self.config.stop_atr_mult;
        let target_distance = request.atr * self.config.target_atr_mult;
        if stop_distance <= 0.0 {
            return Err(SizingRejection::ZeroVolatility);
        }

        // Floor, never round up: realized risk stays within the budget.
        let contracts_raw = self.config.risk_per_trade / stop_distance;
        let contracts = contracts_raw.floor() as u32;
        if contracts < 1 {
            return Err(SizingRejection::PositionTooSmall { contracts_raw });
        }

        let notional = contracts as f64 * request.price;
        if notional < self.config.min_notional {
            return Err(SizingRejection::BelowMinimumNotional {
                notional,
                minimum: self.config.min_notional,
            });
        }

        let leverage = request.leverage.max(1.0);
        let margin_required = notional / leverage;
        let usable = self.config.margin_utilization_cap * request.balance;
        if margin_required > usable {
            return Err(SizingRejection::InsufficientMargin {
                required: margin_required,
                usable,
            });
        }

        let (stop_price, target_price) = match request.side {
            Side::Long => (
                request.price - stop_distance,
                request.price + target_distance,
            ),
            Side::Short => (
                request.price + stop_distance,
                request.price - target_distance,
            ),
        };

        Ok(SizedOrder {
            contracts,
            stop_price,
            target_price,
            actual_risk: contracts as f64 * stop_distance,
            notional,
            margin_required,
        })
    }
}

impl Default for PositionSizer {
    fn default() -> Self {
        Self::new(SizerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(side: Side, price: f64, atr: f64) -> SizeRequest {
        SizeRequest {
            side,
            price,
            atr,
            balance: 500.0,
            leverage: 20.0,
        }
    }

    #[test]
    fn test_actual_risk_never_exceeds_budget() {
        let sizer = PositionSizer::default();
        // Sweep a spread of prices and volatilities; flooring must keep
        // contracts * stop_distance within the $10 budget.
        for atr in [0.01, 0.037, 0.5, 1.33, 3.0] {
            for price in [5.0, 42.0, 2500.0] {
                let req = request(Side::Long, price, atr);
                if let Ok(order) = sizer.size(req) {
                    assert!(
                        order.actual_risk <= 10.0 + 1e-9,
                        "atr {} price {}: risk {}",
                        atr,
                        price,
                        order.actual_risk
                    );
                }
            }
        }
    }

    #[test]
    fn test_long_bracket_sides() {
        let sizer = PositionSizer::default();
        let order = sizer.size(request(Side::Long, 2500.0, 2.0)).unwrap();
        // stop 1.5x ATR below entry, target 3x ATR above
        assert_eq!(order.stop_price, 2497.0);
        assert_eq!(order.target_price, 2506.0);
        assert_eq!(order.contracts, 3); // floor(10 / 3.0)
        assert!((order.actual_risk - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_bracket_mirrored() {
        let sizer = PositionSizer::default();
        let order = sizer.size(request(Side::Short, 2500.0, 2.0)).unwrap();
        assert_eq!(order.stop_price, 2503.0);
        assert_eq!(order.target_price, 2494.0);
    }

    #[test]
    fn test_position_too_small() {
        let sizer = PositionSizer::default();
        // Stop distance 15 > budget 10: zero contracts.
        let result = sizer.size(request(Side::Long, 2500.0, 10.0));
        assert!(matches!(
            result,
            Err(SizingRejection::PositionTooSmall { .. })
        ));
    }

    #[test]
    fn test_below_minimum_notional() {
        let sizer = PositionSizer::default();
        // price 5, ATR makes exactly 1 contract: notional 5 < 10.
        let result = sizer.size(request(Side::Long, 5.0, 4.0));
        assert_eq!(
            result,
            Err(SizingRejection::BelowMinimumNotional {
                notional: 5.0,
                minimum: 10.0
            })
        );
    }

    #[test]
    fn test_insufficient_margin() {
        let sizer = PositionSizer::default();
        let req = SizeRequest {
            side: Side::Long,
            price: 2500.0,
            atr: 2.0,
            balance: 100.0,
            leverage: 1.0,
        };
        // 3 contracts x 2500 = 7500 notional at 1x > 95 usable margin.
        let result = sizer.size(req);
        assert!(matches!(
            result,
            Err(SizingRejection::InsufficientMargin { .. })
        ));
    }

    #[test]
    fn test_zero_atr_refused() {
        let sizer = PositionSizer::default();
        let result = sizer.size(request(Side::Long, 2500.0, 0.0));
        assert_eq!(result, Err(SizingRejection::ZeroVolatility));
    }
}
