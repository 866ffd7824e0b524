use std::collections::VecDeque;
use std::sync::Mutex;

use dashmap::DashMap;
use gate_core::adaptive::{percentile_rank, z_score_of};
use gate_core::{Direction, GateError, GateResult, SignalType, VolatilityRegime};

use crate::models::*;

#[derive(Debug, Default)]
struct SymbolHistory {
    atr_pct: VecDeque<f64>,
    open_interest: VecDeque<f64>,
}

fn push_bounded(buf: &mut VecDeque<f64>, value: f64, cap: usize) {
    buf.push_back(value);
    while buf.len() > cap {
        buf.pop_front();
    }
}

/// Volatility/funding regime classifier with per-symbol rolling history.
pub struct RegimeClassifier {
    config: RegimeConfig,
    history: DashMap<(String, String), Mutex<SymbolHistory>>,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig) -> Self {
        Self {
            config,
            history: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    /// Number of ATR samples held for `symbol` on `timeframe`
    pub fn history_len(&self, symbol: &str, timeframe: &str) -> usize {
        self.history
            .get(&(symbol.to_string(), timeframe.to_string()))
            .and_then(|h| h.lock().ok().map(|h| h.atr_pct.len()))
            .unwrap_or(0)
    }

    /// Classify current conditions, then fold the readings into history.
    /// The current sample is ranked against prior samples only.
    pub fn classify(
        &self,
        market: &MarketStats,
        funding: &FundingStats,
        oi: &OiStats,
    ) -> GateResult<RegimeState> {
        let atr_pct = market
            .atr
            .filter(|a| a.is_finite() && *a >= 0.0 && market.price > 0.0)
            .map(|a| a / market.price * 100.0);

        let entry = self
            .history
            .entry((market.symbol.clone(), market.timeframe.clone()))
            .or_default();
        let mut history = entry
            .lock()
            .map_err(|_| GateError::poisoned("regime history"))?;

        let history_len = history.atr_pct.len();
        let (volatility_regime, volatility_percentile) = match atr_pct {
            Some(current) if history_len >= self.config.min_history => {
                let samples: Vec<f64> = history.atr_pct.iter().copied().collect();
                let pct = percentile_rank(current, &samples) * 100.0;
                let regime = if pct < self.config.low_percentile {
                    VolatilityRegime::Low
                } else if pct > self.config.high_percentile {
                    VolatilityRegime::High
                } else {
                    VolatilityRegime::Normal
                };
                (regime, pct)
            }
            _ => (VolatilityRegime::Normal, 50.0),
        };

        let funding_rate = funding.rate.filter(|r| r.is_finite());
        let funding_extreme = funding_rate
            .is_some_and(|r| r.abs() >= self.config.extreme_funding_rate);
        // Positive funding: longs pay shorts, so longs are crowded.
        let crowded_side = funding_rate.filter(|_| funding_extreme).map(|r| {
            if r > 0.0 {
                Direction::Buy
            } else {
                Direction::Sell
            }
        });

        let open_interest = oi.open_interest.filter(|v| v.is_finite() && *v >= 0.0);
        let oi_zscore = match open_interest {
            Some(current) if history.open_interest.len() >= self.config.min_history => {
                let samples: Vec<f64> = history.open_interest.iter().copied().collect();
                Some(z_score_of(current, &samples))
            }
            _ => None,
        };
        let open_interest_anomaly =
            oi_zscore.is_some_and(|z| z.abs() > self.config.oi_zscore_threshold);

        let cap = self.config.history_window;
        if let Some(v) = atr_pct {
            push_bounded(&mut history.atr_pct, v, cap);
        }
        if let Some(v) = open_interest {
            push_bounded(&mut history.open_interest, v, cap);
        }

        let mut regime_score = 100.0;
        regime_score -= match volatility_regime {
            VolatilityRegime::High => 30.0,
            VolatilityRegime::Low => 15.0,
            VolatilityRegime::Normal => 0.0,
        };
        if funding_extreme {
            regime_score -= 25.0;
        }
        if open_interest_anomaly {
            regime_score -= 20.0;
        }

        let state = RegimeState {
            volatility_regime,
            volatility_percentile,
            atr_pct,
            funding_rate,
            funding_extreme,
            crowded_side,
            open_interest_anomaly,
            oi_zscore,
            regime_score: f64::clamp(regime_score, 0.0, 100.0),
            history_len,
        };
        tracing::debug!(
            "{}:{} regime={} pct={:.1} funding_extreme={} oi_anomaly={}",
            market.symbol,
            market.timeframe,
            volatility_regime.name(),
            volatility_percentile,
            funding_extreme,
            open_interest_anomaly
        );
        Ok(state)
    }

    /// Apply the rules table to a scored candidate.
    pub fn decide(
        &self,
        regime: &RegimeState,
        direction: Direction,
        score: f64,
        signal_type: SignalType,
    ) -> RegimeDecision {
        let rule = self.config.rule(regime.volatility_regime);
        let mut adjustments = RegimeAdjustments {
            min_score: rule.min_score,
            position_size_multiplier: rule.position_size_multiplier,
            stop_multiplier: rule.stop_multiplier,
            target_multiplier: rule.target_multiplier,
        };
        if regime.open_interest_anomaly {
            adjustments.position_size_multiplier *= self.config.oi_anomaly_size_multiplier;
        }

        if !direction.is_actionable() {
            return RegimeDecision {
                allowed: false,
                reason: "no actionable direction".to_string(),
                block: Some(RegimeBlock::BelowMinimum),
                adjustments,
            };
        }

        if let Some(crowded) = regime.crowded_side {
            let rate = regime.funding_rate.unwrap_or_default();
            if direction == crowded && signal_type == SignalType::TrendFollowing {
                return RegimeDecision {
                    allowed: false,
                    reason: format!(
                        "extreme funding {:.4}%: trend-following {} would chase the crowded side",
                        rate * 100.0,
                        direction.as_str()
                    ),
                    block: Some(RegimeBlock::CrowdedFunding),
                    adjustments,
                };
            }
            adjustments.min_score = adjustments.min_score.max(self.config.extreme_funding_min_score);
        }

        if score < adjustments.min_score {
            return RegimeDecision {
                allowed: false,
                reason: format!(
                    "score {:.1} below {} regime minimum {:.1}",
                    score,
                    regime.volatility_regime.name(),
                    adjustments.min_score
                ),
                block: Some(RegimeBlock::BelowMinimum),
                adjustments,
            };
        }

        let mut reason = format!(
            "{} regime: score {:.1} >= {:.1}, size x{:.2}",
            regime.volatility_regime.name(),
            score,
            adjustments.min_score,
            adjustments.position_size_multiplier
        );
        if regime.funding_extreme {
            reason.push_str(", extreme funding floor applied");
        }
        RegimeDecision {
            allowed: true,
            reason,
            block: None,
            adjustments,
        }
    }
}
