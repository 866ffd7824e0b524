use gate_core::adaptive::{coefficient_of_variation, mean};
use gate_core::{Direction, Level, OrderBook};

use crate::models::*;

/// Result of walking one side of the book for a given notional
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillEstimate {
    pub filled_fraction: f64,
    pub vwap: Option<f64>,
    pub slippage_bps: f64,
}

/// Walk `levels` best-first until `notional` is filled.
pub fn simulate_fill(levels: &[Level], notional: f64) -> FillEstimate {
    let Some(best) = levels.first().map(|l| l[0]).filter(|p| *p > 0.0) else {
        return FillEstimate { filled_fraction: 0.0, vwap: None, slippage_bps: 0.0 };
    };

    let mut remaining = notional;
    let mut filled = 0.0;
    let mut qty = 0.0;
    for &[price, size] in levels {
        if remaining <= 0.0 {
            break;
        }
        let take = remaining.min(price * size);
        filled += take;
        qty += take / price;
        remaining -= take;
    }

    if qty <= 0.0 {
        return FillEstimate { filled_fraction: 0.0, vwap: None, slippage_bps: 0.0 };
    }
    let vwap = filled / qty;
    FillEstimate {
        filled_fraction: (filled / notional).min(1.0),
        vwap: Some(vwap),
        slippage_bps: (vwap - best).abs() / best * 10_000.0,
    }
}

/// Pre-trade execution quality gate over the live order book
pub struct ExecutionGuard {
    config: ExecutionConfig,
}

impl ExecutionGuard {
    pub fn new(config: ExecutionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Run the spread, depth, slippage and liquidity checks for an order of
    /// `notional` in `side` against `book`.
    pub fn check(&self, symbol: &str, side: Direction, notional: f64, book: &OrderBook) -> ExecutionCheck {
        let (tier, limits) = self.config.thresholds_for(symbol);

        if !side.is_actionable() {
            return ExecutionCheck::rejected(tier, "no order side to execute");
        }
        if !notional.is_finite() || notional <= 0.0 {
            return ExecutionCheck::rejected(tier, format!("invalid order notional {notional}"));
        }
        if book.is_empty() {
            return ExecutionCheck::rejected(tier, "order book is empty");
        }
        let min_levels = self.config.min_depth_levels;
        if book.bids.len() < min_levels || book.asks.len() < min_levels {
            return ExecutionCheck::rejected(
                tier,
                format!(
                    "order book too shallow: {} bid / {} ask levels (need {} per side)",
                    book.bids.len(),
                    book.asks.len(),
                    min_levels
                ),
            );
        }
        let Some(spread_bps) = book.spread_bps() else {
            return ExecutionCheck::rejected(tier, "order book has no usable top of book");
        };

        let levels = book.liquidity_side(side);
        let depth_score = self.depth_score(levels, notional);
        let fill = simulate_fill(levels, notional);
        let liquidity_score = self.liquidity_score(book);

        let fully_filled = fill.filled_fraction >= 1.0 - 1e-9;
        let checks = vec![
            SubCheck {
                name: "spread".into(),
                passed: spread_bps <= limits.max_spread_bps,
                value: spread_bps,
                threshold: limits.max_spread_bps,
            },
            SubCheck {
                name: "depth".into(),
                passed: depth_score >= self.config.min_depth_score,
                value: depth_score,
                threshold: self.config.min_depth_score,
            },
            SubCheck {
                name: "slippage".into(),
                passed: fully_filled && fill.slippage_bps <= limits.max_slippage_bps,
                value: fill.slippage_bps,
                threshold: limits.max_slippage_bps,
            },
            SubCheck {
                name: "liquidity".into(),
                passed: liquidity_score >= self.config.min_liquidity_score,
                value: liquidity_score,
                threshold: self.config.min_liquidity_score,
            },
        ];

        let passed = checks.iter().filter(|c| c.passed).count();
        let status = if passed == checks.len() {
            ExecutionStatus::Approved
        } else if passed == 0 {
            ExecutionStatus::Rejected
        } else {
            ExecutionStatus::Warning
        };

        let mut reasons = Vec::new();
        for c in checks.iter().filter(|c| !c.passed) {
            let reason = match c.name.as_str() {
                "spread" => format!(
                    "spread {:.2} bps above {} ceiling {:.2} bps",
                    c.value,
                    tier.name(),
                    c.threshold
                ),
                "depth" => format!(
                    "depth within {}% covers {:.0}% of order (need {:.0}%)",
                    self.config.depth_band_pct,
                    c.value * 100.0,
                    c.threshold * 100.0
                ),
                "slippage" if !fully_filled => format!(
                    "book can only fill {:.1}% of {:.2} notional",
                    fill.filled_fraction * 100.0,
                    notional
                ),
                "slippage" => format!(
                    "estimated slippage {:.2} bps above {:.2} bps",
                    c.value, c.threshold
                ),
                _ => format!(
                    "liquidity score {:.2} below {:.2}",
                    c.value, c.threshold
                ),
            };
            reasons.push(reason);
        }
        if status == ExecutionStatus::Approved {
            reasons.push(format!(
                "execution ok: spread {spread_bps:.2} bps, slippage {:.2} bps",
                fill.slippage_bps
            ));
        }

        tracing::debug!(
            "execution {} {} {:.2}: {:?} spread={:.2} depth={:.2} slip={:.2} liq={:.2}",
            symbol,
            side.as_str(),
            notional,
            status,
            spread_bps,
            depth_score,
            fill.slippage_bps,
            liquidity_score
        );

        ExecutionCheck {
            status,
            tier,
            spread_bps,
            depth_score,
            slippage_estimate_bps: fill.slippage_bps,
            filled_fraction: fill.filled_fraction,
            liquidity_score,
            checks,
            reasons,
        }
    }

    /// Notional resting within the impact band of the best price, over the order size.
    fn depth_score(&self, levels: &[Level], notional: f64) -> f64 {
        let Some(best) = levels.first().map(|l| l[0]) else {
            return 0.0;
        };
        let band = best * self.config.depth_band_pct / 100.0;
        let available: f64 = levels
            .iter()
            .take_while(|l| (l[0] - best).abs() <= band)
            .map(|l| l[0] * l[1])
            .sum();
        (available / notional).clamp(0.0, 1.0)
    }

    /// 0.6 * bid/ask size balance + 0.4 * level-size consistency over the top N levels.
    fn liquidity_score(&self, book: &OrderBook) -> f64 {
        let n = self.config.liquidity_levels;
        let bid_sizes: Vec<f64> = book.bids.iter().take(n).map(|l| l[1]).collect();
        let ask_sizes: Vec<f64> = book.asks.iter().take(n).map(|l| l[1]).collect();

        let bid_vol: f64 = bid_sizes.iter().sum();
        let ask_vol: f64 = ask_sizes.iter().sum();
        let total = bid_vol + ask_vol;
        if total <= 0.0 {
            return 0.0;
        }
        let balance = 1.0 - (bid_vol - ask_vol).abs() / total;

        let consistency = mean(&[
            1.0 / (1.0 + coefficient_of_variation(&bid_sizes)),
            1.0 / (1.0 + coefficient_of_variation(&ask_sizes)),
        ]);

        (0.6 * balance + 0.4 * consistency).clamp(0.0, 1.0)
    }
}
