use gate_core::{Direction, VolatilityRegime};
use serde::{Deserialize, Serialize};

/// Per-regime gating rule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeRule {
    pub min_score: f64,
    pub position_size_multiplier: f64,
    pub stop_multiplier: f64,
    pub target_multiplier: f64,
}

impl RegimeRule {
    fn validate(&self, name: &str, errors: &mut Vec<String>) {
        if !(0.0..=100.0).contains(&self.min_score) {
            errors.push(format!(
                "regime.{name}: min_score must be in [0, 100], got {}",
                self.min_score
            ));
        }
        for (field, value) in [
            ("position_size_multiplier", self.position_size_multiplier),
            ("stop_multiplier", self.stop_multiplier),
            ("target_multiplier", self.target_multiplier),
        ] {
            if !value.is_finite() || value <= 0.0 {
                errors.push(format!("regime.{name}: {field} must be positive, got {value}"));
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    /// Rolling ATR samples kept per symbol
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Samples needed before percentile ranking kicks in
    #[serde(default = "default_min_history")]
    pub min_history: usize,
    #[serde(default = "default_low_percentile")]
    pub low_percentile: f64,
    #[serde(default = "default_high_percentile")]
    pub high_percentile: f64,
    /// Absolute funding rate (per interval) treated as extreme
    #[serde(default = "default_extreme_funding_rate")]
    pub extreme_funding_rate: f64,
    #[serde(default = "default_oi_zscore_threshold")]
    pub oi_zscore_threshold: f64,
    /// Score floor for setups allowed through extreme funding
    #[serde(default = "default_extreme_funding_min_score")]
    pub extreme_funding_min_score: f64,
    #[serde(default = "default_oi_anomaly_size_multiplier")]
    pub oi_anomaly_size_multiplier: f64,
    #[serde(default = "default_low_rule")]
    pub low: RegimeRule,
    #[serde(default = "default_normal_rule")]
    pub normal: RegimeRule,
    #[serde(default = "default_high_rule")]
    pub high: RegimeRule,
}

fn default_history_window() -> usize { 200 }
fn default_min_history() -> usize { 20 }
fn default_low_percentile() -> f64 { 25.0 }
fn default_high_percentile() -> f64 { 75.0 }
fn default_extreme_funding_rate() -> f64 { 0.001 }
fn default_oi_zscore_threshold() -> f64 { 2.5 }
fn default_extreme_funding_min_score() -> f64 { 75.0 }
fn default_oi_anomaly_size_multiplier() -> f64 { 0.75 }

fn default_low_rule() -> RegimeRule {
    RegimeRule {
        min_score: 65.0,
        position_size_multiplier: 0.75,
        stop_multiplier: 0.8,
        target_multiplier: 0.8,
    }
}

fn default_normal_rule() -> RegimeRule {
    RegimeRule {
        min_score: 60.0,
        position_size_multiplier: 1.0,
        stop_multiplier: 1.0,
        target_multiplier: 1.0,
    }
}

fn default_high_rule() -> RegimeRule {
    RegimeRule {
        min_score: 70.0,
        position_size_multiplier: 0.5,
        stop_multiplier: 1.5,
        target_multiplier: 1.3,
    }
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            min_history: default_min_history(),
            low_percentile: default_low_percentile(),
            high_percentile: default_high_percentile(),
            extreme_funding_rate: default_extreme_funding_rate(),
            oi_zscore_threshold: default_oi_zscore_threshold(),
            extreme_funding_min_score: default_extreme_funding_min_score(),
            oi_anomaly_size_multiplier: default_oi_anomaly_size_multiplier(),
            low: default_low_rule(),
            normal: default_normal_rule(),
            high: default_high_rule(),
        }
    }
}

impl RegimeConfig {
    pub fn rule(&self, regime: VolatilityRegime) -> &RegimeRule {
        match regime {
            VolatilityRegime::Low => &self.low,
            VolatilityRegime::Normal => &self.normal,
            VolatilityRegime::High => &self.high,
        }
    }

    pub fn validate(&self, errors: &mut Vec<String>) {
        if self.min_history < 2 || self.history_window < self.min_history {
            errors.push(format!(
                "regime: need 2 <= min_history ({}) <= history_window ({})",
                self.min_history, self.history_window
            ));
        }
        if !(0.0 <= self.low_percentile
            && self.low_percentile < self.high_percentile
            && self.high_percentile <= 100.0)
        {
            errors.push(format!(
                "regime: percentile bands must satisfy 0 <= low ({}) < high ({}) <= 100",
                self.low_percentile, self.high_percentile
            ));
        }
        if !self.extreme_funding_rate.is_finite() || self.extreme_funding_rate <= 0.0 {
            errors.push("regime: extreme_funding_rate must be positive".into());
        }
        if !self.oi_zscore_threshold.is_finite() || self.oi_zscore_threshold <= 0.0 {
            errors.push("regime: oi_zscore_threshold must be positive".into());
        }
        if !(0.0..=100.0).contains(&self.extreme_funding_min_score) {
            errors.push("regime: extreme_funding_min_score must be in [0, 100]".into());
        }
        if !(self.oi_anomaly_size_multiplier > 0.0 && self.oi_anomaly_size_multiplier <= 1.0) {
            errors.push("regime: oi_anomaly_size_multiplier must be in (0, 1]".into());
        }
        self.low.validate("low", errors);
        self.normal.validate("normal", errors);
        self.high.validate("high", errors);
    }
}

/// Volatility input: current ATR and the price it is normalised by.
/// History is kept per (symbol, timeframe).
#[derive(Debug, Clone)]
pub struct MarketStats {
    pub symbol: String,
    pub timeframe: String,
    pub atr: Option<f64>,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FundingStats {
    pub rate: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OiStats {
    pub open_interest: Option<f64>,
}

/// Derived per request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegimeState {
    pub volatility_regime: VolatilityRegime,
    /// 0 to 100
    pub volatility_percentile: f64,
    pub atr_pct: Option<f64>,
    pub funding_rate: Option<f64>,
    pub funding_extreme: bool,
    /// Side the crowd is positioned on when funding is extreme
    pub crowded_side: Option<Direction>,
    pub open_interest_anomaly: bool,
    pub oi_zscore: Option<f64>,
    /// 0 to 100, higher is calmer
    pub regime_score: f64,
    pub history_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegimeBlock {
    /// Score under the regime-adjusted minimum
    BelowMinimum,
    /// Trend-following into the crowded side of extreme funding
    CrowdedFunding,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegimeAdjustments {
    pub min_score: f64,
    pub position_size_multiplier: f64,
    pub stop_multiplier: f64,
    pub target_multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeDecision {
    pub allowed: bool,
    pub reason: String,
    pub block: Option<RegimeBlock>,
    pub adjustments: RegimeAdjustments,
}
