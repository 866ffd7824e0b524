use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Liquidity bucket a symbol trades in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LiquidityTier {
    Major,
    Large,
    Alt,
}

impl LiquidityTier {
    pub fn name(&self) -> &'static str {
        match self {
            LiquidityTier::Major => "major",
            LiquidityTier::Large => "large",
            LiquidityTier::Alt => "alt",
        }
    }
}

/// Strip the quote currency / contract suffix: `BTCUSDT`, `BTC-USD`, `BTC/USDT:PERP` -> `BTC`.
fn base_asset(symbol: &str) -> String {
    let upper = symbol.to_uppercase();
    let head = upper
        .split(['/', '-', ':', '_'])
        .next()
        .unwrap_or_default()
        .to_string();
    for quote in ["USDT", "USDC", "BUSD", "USD", "PERP"] {
        if let Some(base) = head.strip_suffix(quote) {
            if !base.is_empty() {
                return base.to_string();
            }
        }
    }
    head
}

/// Map a symbol to its liquidity tier
pub fn symbol_tier(symbol: &str) -> LiquidityTier {
    match base_asset(symbol).as_str() {
        "BTC" | "XBT" | "ETH" => LiquidityTier::Major,
        "SOL" | "BNB" | "XRP" | "ADA" | "DOGE" | "AVAX" | "LINK" | "DOT" | "MATIC" | "POL"
        | "LTC" | "TRX" | "TON" | "BCH" => LiquidityTier::Large,
        _ => LiquidityTier::Alt,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    pub max_spread_bps: f64,
    pub max_slippage_bps: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Books thinner than this on either side are rejected outright
    #[serde(default = "default_min_depth_levels")]
    pub min_depth_levels: usize,
    /// Price-impact band (percent from best) counted as available depth
    #[serde(default = "default_depth_band_pct")]
    pub depth_band_pct: f64,
    #[serde(default = "default_min_depth_score")]
    pub min_depth_score: f64,
    /// Levels per side for the liquidity balance/consistency measure
    #[serde(default = "default_liquidity_levels")]
    pub liquidity_levels: usize,
    #[serde(default = "default_min_liquidity_score")]
    pub min_liquidity_score: f64,
    #[serde(default = "default_major")]
    pub major: TierThresholds,
    #[serde(default = "default_large")]
    pub large: TierThresholds,
    #[serde(default = "default_alt")]
    pub alt: TierThresholds,
    /// Per-symbol thresholds that win over the tier table
    #[serde(default)]
    pub symbol_overrides: BTreeMap<String, TierThresholds>,
}

fn default_min_depth_levels() -> usize { 10 }
fn default_depth_band_pct() -> f64 { 0.5 }
fn default_min_depth_score() -> f64 { 1.0 }
fn default_liquidity_levels() -> usize { 10 }
fn default_min_liquidity_score() -> f64 { 0.5 }

fn default_major() -> TierThresholds {
    TierThresholds { max_spread_bps: 5.0, max_slippage_bps: 10.0 }
}

fn default_large() -> TierThresholds {
    TierThresholds { max_spread_bps: 10.0, max_slippage_bps: 20.0 }
}

fn default_alt() -> TierThresholds {
    TierThresholds { max_spread_bps: 25.0, max_slippage_bps: 50.0 }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            min_depth_levels: default_min_depth_levels(),
            depth_band_pct: default_depth_band_pct(),
            min_depth_score: default_min_depth_score(),
            liquidity_levels: default_liquidity_levels(),
            min_liquidity_score: default_min_liquidity_score(),
            major: default_major(),
            large: default_large(),
            alt: default_alt(),
            symbol_overrides: BTreeMap::new(),
        }
    }
}

impl ExecutionConfig {
    /// Thresholds for a symbol: explicit override, else its tier's row.
    pub fn thresholds_for(&self, symbol: &str) -> (LiquidityTier, TierThresholds) {
        let tier = symbol_tier(symbol);
        if let Some(t) = self.symbol_overrides.get(&symbol.to_uppercase()) {
            return (tier, *t);
        }
        let row = match tier {
            LiquidityTier::Major => self.major,
            LiquidityTier::Large => self.large,
            LiquidityTier::Alt => self.alt,
        };
        (tier, row)
    }

    pub fn validate(&self, errors: &mut Vec<String>) {
        if self.min_depth_levels == 0 || self.liquidity_levels == 0 {
            errors.push("execution: min_depth_levels and liquidity_levels must be >= 1".into());
        }
        if !self.depth_band_pct.is_finite() || self.depth_band_pct <= 0.0 {
            errors.push("execution: depth_band_pct must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.min_depth_score) {
            errors.push("execution: min_depth_score must be in [0, 1]".into());
        }
        if !(0.0..=1.0).contains(&self.min_liquidity_score) {
            errors.push("execution: min_liquidity_score must be in [0, 1]".into());
        }
        let rows = [
            ("major".to_string(), self.major),
            ("large".to_string(), self.large),
            ("alt".to_string(), self.alt),
        ];
        let overrides = self
            .symbol_overrides
            .iter()
            .map(|(s, t)| (format!("override {s}"), *t));
        for (name, t) in rows.into_iter().chain(overrides) {
            if !(t.max_spread_bps > 0.0 && t.max_slippage_bps > 0.0) {
                errors.push(format!("execution: {name} thresholds must be positive"));
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Approved,
    Warning,
    Rejected,
}

/// One of the four sub-checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubCheck {
    pub name: String,
    pub passed: bool,
    pub value: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionCheck {
    pub status: ExecutionStatus,
    pub tier: LiquidityTier,
    pub spread_bps: f64,
    /// 0 to 1
    pub depth_score: f64,
    pub slippage_estimate_bps: f64,
    pub filled_fraction: f64,
    /// 0 to 1
    pub liquidity_score: f64,
    pub checks: Vec<SubCheck>,
    pub reasons: Vec<String>,
}

impl ExecutionCheck {
    pub fn rejected(tier: LiquidityTier, reason: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Rejected,
            tier,
            spread_bps: 0.0,
            depth_score: 0.0,
            slippage_estimate_bps: 0.0,
            filled_fraction: 0.0,
            liquidity_score: 0.0,
            checks: Vec::new(),
            reasons: vec![reason.into()],
        }
    }

    pub fn passed(&self, name: &str) -> Option<bool> {
        self.checks.iter().find(|c| c.name == name).map(|c| c.passed)
    }
}
