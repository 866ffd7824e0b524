use gate_core::{ConfidenceTier, Direction, OrderBook, SignalType, VolatilityRegime};
use structure_tracker::{BreakKind, LiquiditySide, StructureState};

use crate::models::*;
use crate::momentum::MomentumReading;

// Sub-factor points at the reference caps, scaled to the configured ones
const STRUCTURE_REFERENCE_MAX: f64 = 40.0;
const TREND_POINTS: f64 = 10.0;
const BOS_POINTS: f64 = 12.0;
const CHOCH_POINTS: f64 = 10.0;
const ZONE_POINTS: f64 = 10.0;
const IMBALANCE_POINTS: f64 = 5.0;
const SWEEP_POINTS: f64 = 3.0;

const MOMENTUM_REFERENCE_MAX: f64 = 15.0;
const ROC_POINTS: f64 = 8.0;
const RSI_TRENDING_POINTS: f64 = 7.0;
const RSI_STRETCHED_POINTS: f64 = 4.0;

/// One scored factor: points awarded and why
struct Contribution {
    points: f64,
    reason: String,
}

impl Contribution {
    fn new(points: f64, reason: impl Into<String>) -> Self {
        Self {
            points,
            reason: reason.into(),
        }
    }
}

/// Multi-factor confluence scorer. Stateless; never fails on partial input.
pub struct ConfluenceScorer {
    config: ScoringConfig,
}

impl ConfluenceScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn score(&self, inputs: &ConfluenceInputs<'_>) -> ScoredSignal {
        let direction = inputs
            .structure
            .map(|s| s.trend.direction())
            .unwrap_or(Direction::Hold);

        let mut contributions: Vec<Contribution> = Vec::new();
        let mut notes: Vec<String> = Vec::new();
        let mut missing: Vec<String> = Vec::new();
        let mut breakdown = ScoreBreakdown::default();

        match inputs.structure {
            Some(structure) if direction.is_actionable() => {
                breakdown.structure_score =
                    self.structure_score(structure, direction, &mut contributions);
            }
            Some(_) => notes.push("no structural trend yet".to_string()),
            None => missing.push("structure".to_string()),
        }

        match inputs.orderbook.filter(|b| !b.bids.is_empty() && !b.asks.is_empty()) {
            Some(book) => {
                breakdown.orderbook_score = self.orderbook_score(book, direction, &mut contributions);
            }
            None => missing.push("orderbook".to_string()),
        }

        match inputs.volatility {
            Some(regime) => {
                let points = match regime {
                    VolatilityRegime::Normal => self.config.volatility_max,
                    VolatilityRegime::Low => self.config.volatility_max / 2.0,
                    VolatilityRegime::High => self.config.volatility_max * 3.0 / 10.0,
                };
                breakdown.volatility_score = points;
                contributions.push(Contribution::new(
                    points,
                    format!("{} volatility (+{:.1})", regime.name(), points),
                ));
            }
            None => missing.push("volatility".to_string()),
        }

        match inputs.momentum.filter(|m| !m.is_empty()) {
            Some(momentum) => {
                breakdown.momentum_score =
                    self.momentum_score(&momentum, direction, &mut contributions);
            }
            None => missing.push("momentum".to_string()),
        }

        match inputs.funding_rate.filter(|r| r.is_finite()) {
            Some(rate) => {
                breakdown.funding_score = self.funding_score(rate, direction, &mut contributions);
            }
            None => missing.push("funding".to_string()),
        }

        match inputs.sentiment.filter(|s| s.is_finite()) {
            Some(sentiment) => {
                let s = sentiment.clamp(-1.0, 1.0);
                if s * direction.sign() > 0.0 {
                    let points = (self.config.sentiment_max * s.abs()).min(self.config.sentiment_max);
                    breakdown.sentiment_score = points;
                    contributions.push(Contribution::new(
                        points,
                        format!("sentiment {s:+.2} agrees (+{points:.1})"),
                    ));
                }
            }
            None => missing.push("sentiment".to_string()),
        }

        let score = breakdown.total().clamp(0.0, 100.0);

        // Ranked top-N contributions, then notes about what was not available
        contributions.sort_by(|a, b| b.points.total_cmp(&a.points));
        let mut reasons: Vec<String> = contributions
            .into_iter()
            .filter(|c| c.points > 0.0)
            .take(self.config.max_reasons)
            .map(|c| c.reason)
            .collect();
        reasons.extend(notes);
        if !missing.is_empty() {
            reasons.push(format!("unavailable inputs: {}", missing.join(", ")));
        }

        let signal_type = inputs
            .structure
            .and_then(|s| s.last_break)
            .filter(|b| b.direction == direction)
            .map(|b| match b.kind {
                BreakKind::Bos => SignalType::TrendFollowing,
                BreakKind::Choch => SignalType::Reversal,
            })
            .unwrap_or(SignalType::Unclassified);

        let levels = levels(inputs.structure, inputs.reference_price);

        tracing::debug!(
            "confluence {} score={:.1} structure={:.1} book={:.1} vol={:.1} mom={:.1} funding={:.1} sent={:.1}",
            direction.as_str(),
            score,
            breakdown.structure_score,
            breakdown.orderbook_score,
            breakdown.volatility_score,
            breakdown.momentum_score,
            breakdown.funding_score,
            breakdown.sentiment_score
        );

        ScoredSignal {
            direction,
            score,
            tier: ConfidenceTier::from_score(score),
            signal_type,
            breakdown,
            reasons,
            missing_inputs: missing,
            levels,
        }
    }

    fn structure_score(
        &self,
        s: &StructureState,
        direction: Direction,
        out: &mut Vec<Contribution>,
    ) -> f64 {
        let scale = self.config.structure_max / STRUCTURE_REFERENCE_MAX;
        let mut total = 0.0;
        let mut add = |points: f64, reason: String, out: &mut Vec<Contribution>| {
            total += points;
            out.push(Contribution::new(points, format!("{reason} (+{points:.1})")));
        };

        add(TREND_POINTS * scale, format!("{:?} market structure", s.trend), out);

        if let Some(brk) = s.last_break.filter(|b| b.direction == direction) {
            match brk.kind {
                BreakKind::Bos => add(
                    BOS_POINTS * scale,
                    format!("BOS through {:.4}", brk.reference_level),
                    out,
                ),
                BreakKind::Choch => add(
                    CHOCH_POINTS * scale,
                    format!("CHoCH through {:.4}", brk.reference_level),
                    out,
                ),
            }
        }

        let best_zone = s
            .zones_for(direction)
            .iter()
            .map(|z| z.quality_score)
            .fold(None::<f64>, |best, q| Some(best.map_or(q, |b| b.max(q))));
        if let Some(quality) = best_zone {
            let points = ZONE_POINTS * scale * quality.clamp(0.0, 1.0);
            add(points, format!("order block quality {quality:.2}"), out);
        }

        if s.open_imbalances(direction).next().is_some() {
            add(
                IMBALANCE_POINTS * scale,
                "unfilled imbalance in trend direction".to_string(),
                out,
            );
        }

        // Stops taken on the other side fuel the move
        let swept = match direction {
            Direction::Buy => LiquiditySide::SellSide,
            _ => LiquiditySide::BuySide,
        };
        if s.liquidity_sweeps.iter().any(|sw| sw.side == swept) {
            add(SWEEP_POINTS * scale, "opposing liquidity swept".to_string(), out);
        }

        total.min(self.config.structure_max)
    }

    fn orderbook_score(
        &self,
        book: &OrderBook,
        direction: Direction,
        out: &mut Vec<Contribution>,
    ) -> f64 {
        let Some(imbalance) = book.imbalance(self.config.orderbook_levels) else {
            return 0.0;
        };
        if imbalance * direction.sign() <= 0.0 {
            out.push(Contribution::new(
                0.0,
                format!("order book imbalance {imbalance:+.2} does not confirm"),
            ));
            return 0.0;
        }
        let strength = (imbalance.abs() / self.config.orderbook_full_imbalance).min(1.0);
        let points = self.config.orderbook_max * strength;
        out.push(Contribution::new(
            points,
            format!("order book imbalance {imbalance:+.2} (+{points:.1})"),
        ));
        points
    }

    fn momentum_score(
        &self,
        m: &MomentumReading,
        direction: Direction,
        out: &mut Vec<Contribution>,
    ) -> f64 {
        let scale = self.config.momentum_max / MOMENTUM_REFERENCE_MAX;
        let mut total = 0.0;

        if let Some(roc) = m.roc_pct.filter(|r| r.is_finite()) {
            if roc * direction.sign() > 0.0 {
                let points = ROC_POINTS * scale * (roc.abs() / self.config.roc_full_pct).min(1.0);
                total += points;
                out.push(Contribution::new(points, format!("ROC {roc:+.2}% (+{points:.1})")));
            }
        }

        if let Some(rsi) = m.rsi.filter(|r| r.is_finite()) {
            // Mirror sells onto the buy-side bands
            let aligned = match direction {
                Direction::Buy => rsi,
                Direction::Sell => 100.0 - rsi,
                Direction::Hold => 0.0,
            };
            let points = if (50.0..70.0).contains(&aligned) {
                RSI_TRENDING_POINTS * scale
            } else if (70.0..80.0).contains(&aligned) {
                RSI_STRETCHED_POINTS * scale
            } else {
                0.0
            };
            if points > 0.0 {
                total += points;
                out.push(Contribution::new(points, format!("RSI {rsi:.1} (+{points:.1})")));
            }
        }

        f64::min(total, self.config.momentum_max)
    }

    fn funding_score(&self, rate: f64, direction: Direction, out: &mut Vec<Contribution>) -> f64 {
        if !direction.is_actionable() {
            return 0.0;
        }
        let half = self.config.funding_max / 2.0;
        let strength = (rate.abs() / self.config.funding_reference_rate).min(1.0);

        // Positive funding favours shorts, negative favours longs
        let (points, label) = if rate.abs() < self.config.funding_neutral_band {
            (half, "neutral")
        } else if rate * direction.sign() < 0.0 {
            (half + half * strength, "favourable")
        } else {
            ((half * (1.0 - strength)).max(0.0), "adverse")
        };
        out.push(Contribution::new(
            points,
            format!("{label} funding {:.4}% (+{points:.1})", rate * 100.0),
        ));
        points.min(self.config.funding_max)
    }
}

/// Nearest structural support below and resistance above the reference price.
fn levels(structure: Option<&StructureState>, price: f64) -> PriceLevels {
    let Some(s) = structure else {
        return PriceLevels {
            support: None,
            resistance: None,
            reference_price: price,
        };
    };

    let support = s
        .swing_lows
        .iter()
        .filter(|p| p.confirmed)
        .map(|p| p.price)
        .chain(s.bullish_zones.iter().map(|z| z.high))
        .filter(|&p| p < price)
        .reduce(f64::max);
    let resistance = s
        .swing_highs
        .iter()
        .filter(|p| p.confirmed)
        .map(|p| p.price)
        .chain(s.bearish_zones.iter().map(|z| z.low))
        .filter(|&p| p > price)
        .reduce(f64::min);

    PriceLevels {
        support,
        resistance,
        reference_price: price,
    }
}
