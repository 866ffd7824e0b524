use gate_core::{ConfidenceTier, Direction, OrderBook, SignalType, VolatilityRegime};
use serde::{Deserialize, Serialize};
use structure_tracker::StructureState;

use crate::momentum::MomentumReading;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_structure_max")]
    pub structure_max: f64,
    #[serde(default = "default_orderbook_max")]
    pub orderbook_max: f64,
    #[serde(default = "default_volatility_max")]
    pub volatility_max: f64,
    #[serde(default = "default_momentum_max")]
    pub momentum_max: f64,
    #[serde(default = "default_funding_max")]
    pub funding_max: f64,
    #[serde(default = "default_sentiment_max")]
    pub sentiment_max: f64,
    /// Book levels per side used for the imbalance
    #[serde(default = "default_orderbook_levels")]
    pub orderbook_levels: usize,
    /// Imbalance that earns the full orderbook score
    #[serde(default = "default_orderbook_full_imbalance")]
    pub orderbook_full_imbalance: f64,
    /// Rate of change (percent) that earns the full ROC points
    #[serde(default = "default_roc_full_pct")]
    pub roc_full_pct: f64,
    /// Funding magnitude that earns the full funding score
    #[serde(default = "default_funding_reference_rate")]
    pub funding_reference_rate: f64,
    /// Funding inside this band counts as neutral
    #[serde(default = "default_funding_neutral_band")]
    pub funding_neutral_band: f64,
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "default_roc_period")]
    pub roc_period: usize,
    #[serde(default = "default_max_reasons")]
    pub max_reasons: usize,
}

fn default_structure_max() -> f64 { 40.0 }
fn default_orderbook_max() -> f64 { 20.0 }
fn default_volatility_max() -> f64 { 10.0 }
fn default_momentum_max() -> f64 { 15.0 }
fn default_funding_max() -> f64 { 10.0 }
fn default_sentiment_max() -> f64 { 5.0 }
fn default_orderbook_levels() -> usize { 10 }
fn default_orderbook_full_imbalance() -> f64 { 0.5 }
fn default_roc_full_pct() -> f64 { 2.0 }
fn default_funding_reference_rate() -> f64 { 0.0005 }
fn default_funding_neutral_band() -> f64 { 0.0001 }
fn default_rsi_period() -> usize { 14 }
fn default_roc_period() -> usize { 10 }
fn default_max_reasons() -> usize { 6 }

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            structure_max: default_structure_max(),
            orderbook_max: default_orderbook_max(),
            volatility_max: default_volatility_max(),
            momentum_max: default_momentum_max(),
            funding_max: default_funding_max(),
            sentiment_max: default_sentiment_max(),
            orderbook_levels: default_orderbook_levels(),
            orderbook_full_imbalance: default_orderbook_full_imbalance(),
            roc_full_pct: default_roc_full_pct(),
            funding_reference_rate: default_funding_reference_rate(),
            funding_neutral_band: default_funding_neutral_band(),
            rsi_period: default_rsi_period(),
            roc_period: default_roc_period(),
            max_reasons: default_max_reasons(),
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self, errors: &mut Vec<String>) {
        let caps = [
            ("structure_max", self.structure_max),
            ("orderbook_max", self.orderbook_max),
            ("volatility_max", self.volatility_max),
            ("momentum_max", self.momentum_max),
            ("funding_max", self.funding_max),
            ("sentiment_max", self.sentiment_max),
        ];
        for (name, value) in caps {
            if !value.is_finite() || value < 0.0 {
                errors.push(format!("scoring: {name} must be non-negative, got {value}"));
            }
        }
        let total: f64 = caps.iter().map(|(_, v)| v).sum();
        if (total - 100.0).abs() > 1e-9 {
            errors.push(format!("scoring: sub-score maxima must sum to 100, got {total}"));
        }
        for (name, value) in [
            ("orderbook_full_imbalance", self.orderbook_full_imbalance),
            ("roc_full_pct", self.roc_full_pct),
            ("funding_reference_rate", self.funding_reference_rate),
        ] {
            if !value.is_finite() || value <= 0.0 {
                errors.push(format!("scoring: {name} must be positive, got {value}"));
            }
        }
        if self.funding_neutral_band < 0.0 || self.funding_neutral_band >= self.funding_reference_rate {
            errors.push("scoring: funding_neutral_band must be in [0, funding_reference_rate)".into());
        }
        if self.orderbook_levels == 0 || self.rsi_period == 0 || self.roc_period == 0 {
            errors.push("scoring: orderbook_levels, rsi_period and roc_period must be >= 1".into());
        }
    }
}

/// Everything the scorer can use; any input may be missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfluenceInputs<'a> {
    pub structure: Option<&'a StructureState>,
    pub orderbook: Option<&'a OrderBook>,
    pub volatility: Option<VolatilityRegime>,
    pub momentum: Option<MomentumReading>,
    pub funding_rate: Option<f64>,
    /// -1 (bearish) to 1 (bullish)
    pub sentiment: Option<f64>,
    pub reference_price: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub structure_score: f64,
    pub orderbook_score: f64,
    pub volatility_score: f64,
    pub momentum_score: f64,
    pub funding_score: f64,
    pub sentiment_score: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.structure_score
            + self.orderbook_score
            + self.volatility_score
            + self.momentum_score
            + self.funding_score
            + self.sentiment_score
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceLevels {
    pub support: Option<f64>,
    pub resistance: Option<f64>,
    pub reference_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredSignal {
    pub direction: Direction,
    /// clamp(breakdown total, 0, 100)
    pub score: f64,
    pub tier: ConfidenceTier,
    pub signal_type: SignalType,
    pub breakdown: ScoreBreakdown,
    pub reasons: Vec<String>,
    pub missing_inputs: Vec<String>,
    pub levels: PriceLevels,
}
