use std::collections::VecDeque;
use std::fmt;

use gate_core::{Candle, Direction, Trend};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureConfig {
    /// Candles kept per key for swing detection, ATR and momentum
    #[serde(default = "default_lookback_periods")]
    pub lookback_periods: usize,
    /// Retrace (percent) from the local extreme needed to confirm a swing
    #[serde(default = "default_min_swing_change_pct")]
    pub min_swing_change_pct: f64,
    /// Distance (percent) beyond a confirmed swing that counts as a break
    #[serde(default = "default_bos_confirmation_pct")]
    pub bos_confirmation_pct: f64,
    /// Snapshots a counter-trend break must hold before it becomes a CHoCH
    #[serde(default = "default_choch_retest_periods")]
    pub choch_retest_periods: u32,
    /// Zone lifetime in snapshots
    #[serde(default = "default_ob_validity_periods")]
    pub ob_validity_periods: u64,
    /// Proximity (percent) to a swing level that counts as a liquidity sweep
    #[serde(default = "default_sweep_proximity_pct")]
    pub sweep_proximity_pct: f64,
    #[serde(default = "default_sweep_window_minutes")]
    pub sweep_window_minutes: i64,
    #[serde(default = "default_max_swings")]
    pub max_swings: usize,
    #[serde(default = "default_max_zones")]
    pub max_zones: usize,
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
}

fn default_lookback_periods() -> usize { 20 }
fn default_min_swing_change_pct() -> f64 { 0.5 }
fn default_bos_confirmation_pct() -> f64 { 0.1 }
fn default_choch_retest_periods() -> u32 { 2 }
fn default_ob_validity_periods() -> u64 { 50 }
fn default_sweep_proximity_pct() -> f64 { 0.1 }
fn default_sweep_window_minutes() -> i64 { 60 }
fn default_max_swings() -> usize { 10 }
fn default_max_zones() -> usize { 10 }
fn default_atr_period() -> usize { 14 }

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            lookback_periods: default_lookback_periods(),
            min_swing_change_pct: default_min_swing_change_pct(),
            bos_confirmation_pct: default_bos_confirmation_pct(),
            choch_retest_periods: default_choch_retest_periods(),
            ob_validity_periods: default_ob_validity_periods(),
            sweep_proximity_pct: default_sweep_proximity_pct(),
            sweep_window_minutes: default_sweep_window_minutes(),
            max_swings: default_max_swings(),
            max_zones: default_max_zones(),
            atr_period: default_atr_period(),
        }
    }
}

impl StructureConfig {
    pub fn validate(&self, errors: &mut Vec<String>) {
        if self.lookback_periods < 3 {
            errors.push(format!(
                "structure: lookback_periods must be >= 3, got {}",
                self.lookback_periods
            ));
        }
        for (name, value) in [
            ("min_swing_change_pct", self.min_swing_change_pct),
            ("bos_confirmation_pct", self.bos_confirmation_pct),
            ("sweep_proximity_pct", self.sweep_proximity_pct),
        ] {
            if !value.is_finite() || value < 0.0 || value >= 100.0 {
                errors.push(format!("structure: {name} must be in [0, 100), got {value}"));
            }
        }
        if self.ob_validity_periods == 0 {
            errors.push("structure: ob_validity_periods must be >= 1".into());
        }
        if self.sweep_window_minutes <= 0 {
            errors.push("structure: sweep_window_minutes must be positive".into());
        }
        if self.max_swings == 0 || self.max_zones == 0 {
            errors.push("structure: max_swings and max_zones must be >= 1".into());
        }
        if self.atr_period == 0 {
            errors.push("structure: atr_period must be >= 1".into());
        }
    }
}

/// Partition key: one state per (symbol, timeframe)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructureKey {
    pub symbol: String,
    pub timeframe: String,
}

impl StructureKey {
    pub fn new(symbol: &str, timeframe: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
        }
    }
}

impl fmt::Display for StructureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.symbol, self.timeframe)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub timestamp_ms: i64,
    pub price: f64,
    pub confirmed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakKind {
    Bos,
    Choch,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StructureBreak {
    pub kind: BreakKind,
    pub direction: Direction,
    pub break_price: f64,
    pub reference_level: f64,
    pub timestamp_ms: i64,
}

/// Counter-trend break waiting out its retest period
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PendingChoch {
    pub direction: Direction,
    pub level: f64,
    pub break_price: f64,
    pub timestamp_ms: i64,
    pub periods_held: u32,
}

/// Order-block zone left behind by a confirmed break
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub price: f64,
    pub low: f64,
    pub high: f64,
    pub created_at_ms: i64,
    pub created_seq: u64,
    pub quality_score: f64,
}

impl Zone {
    pub fn contains(&self, price: f64) -> bool {
        price >= self.low && price <= self.high
    }
}

/// Three-candle fair value gap
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImbalanceZone {
    pub direction: Direction,
    pub low: f64,
    pub high: f64,
    pub filled: bool,
    pub created_at_ms: i64,
    pub created_seq: u64,
}

/// Which resting liquidity was taken: stops above highs or below lows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquiditySide {
    BuySide,
    SellSide,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiquiditySweep {
    pub side: LiquiditySide,
    pub level: f64,
    pub swing_timestamp_ms: i64,
    pub timestamp_ms: i64,
}

/// Market structure for one (symbol, timeframe).
///
/// Only snapshot timestamps and the update `sequence` feed the rules, so a
/// replay of the same snapshots from a fresh state reproduces it exactly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureState {
    pub symbol: String,
    pub timeframe: String,
    pub trend: Trend,
    pub last_break: Option<StructureBreak>,
    #[serde(default)]
    pub pending_choch: Option<PendingChoch>,
    #[serde(default)]
    pub swing_highs: Vec<SwingPoint>,
    #[serde(default)]
    pub swing_lows: Vec<SwingPoint>,
    #[serde(default)]
    pub bullish_zones: Vec<Zone>,
    #[serde(default)]
    pub bearish_zones: Vec<Zone>,
    #[serde(default)]
    pub imbalance_zones: Vec<ImbalanceZone>,
    #[serde(default)]
    pub liquidity_sweeps: Vec<LiquiditySweep>,
    #[serde(default)]
    pub candles: VecDeque<Candle>,
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub last_timestamp_ms: Option<i64>,
    #[serde(default)]
    pub consumed_high_ts: Option<i64>,
    #[serde(default)]
    pub consumed_low_ts: Option<i64>,
}

impl StructureState {
    pub fn new(symbol: &str, timeframe: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> StructureKey {
        StructureKey::new(&self.symbol, &self.timeframe)
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn last_candle(&self) -> Option<&Candle> {
        self.candles.back()
    }

    /// Wilder ATR over the candle window. With fewer than `period + 1`
    /// candles it falls back to the plain mean true range.
    pub fn atr(&self, period: usize) -> Option<f64> {
        if self.candles.is_empty() || period == 0 {
            return None;
        }
        let mut true_ranges = Vec::with_capacity(self.candles.len());
        let mut prev_close = None;
        for c in &self.candles {
            true_ranges.push(c.true_range(prev_close));
            prev_close = Some(c.close);
        }

        // Skip the first candle: it has no previous close.
        if true_ranges.len() < period + 1 {
            return Some(gate_core::adaptive::mean(&true_ranges));
        }
        let ranges = &true_ranges[1..];
        let mut atr = ranges[..period].iter().sum::<f64>() / period as f64;
        for tr in &ranges[period..] {
            atr = (atr * (period - 1) as f64 + tr) / period as f64;
        }
        Some(atr)
    }

    pub fn last_confirmed_high(&self) -> Option<&SwingPoint> {
        self.swing_highs.iter().rev().find(|s| s.confirmed)
    }

    pub fn last_confirmed_low(&self) -> Option<&SwingPoint> {
        self.swing_lows.iter().rev().find(|s| s.confirmed)
    }

    /// Unfilled imbalance zones in `direction`
    pub fn open_imbalances(&self, direction: Direction) -> impl Iterator<Item = &ImbalanceZone> {
        self.imbalance_zones
            .iter()
            .filter(move |z| !z.filled && z.direction == direction)
    }

    pub fn zones_for(&self, direction: Direction) -> &[Zone] {
        match direction {
            Direction::Buy => &self.bullish_zones,
            Direction::Sell => &self.bearish_zones,
            Direction::Hold => &[],
        }
    }
}
