use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GateError, GateResult};

/// OHLCV candle carried by a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// True range against the previous close (plain high-low without one)
    pub fn true_range(&self, prev_close: Option<f64>) -> f64 {
        let range = self.high - self.low;
        match prev_close {
            Some(pc) => range.max((self.high - pc).abs()).max((self.low - pc).abs()),
            None => range,
        }
    }
}

/// A single book level: `[price, size]`
pub type Level = [f64; 2];

/// Level-2 order book, best level first on both sides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    #[serde(default)]
    pub bids: Vec<Level>,
    #[serde(default)]
    pub asks: Vec<Level>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l[0])
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l[0])
    }

    pub fn mid(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((a + b) / 2.0),
            _ => None,
        }
    }

    /// Quoted spread in basis points of mid
    pub fn spread_bps(&self) -> Option<f64> {
        let (bid, ask) = (self.best_bid()?, self.best_ask()?);
        let mid = (bid + ask) / 2.0;
        if mid <= 0.0 {
            return None;
        }
        Some((ask - bid) / mid * 10_000.0)
    }

    /// Levels per side on the thinner side
    pub fn depth_levels(&self) -> usize {
        self.bids.len().min(self.asks.len())
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// The side an order in `direction` consumes: asks for buys, bids for sells.
    pub fn liquidity_side(&self, direction: Direction) -> &[Level] {
        match direction {
            Direction::Sell => &self.bids,
            _ => &self.asks,
        }
    }

    /// Notional (price * size) resting in the top `n` levels of a side
    pub fn top_notional(levels: &[Level], n: usize) -> f64 {
        levels.iter().take(n).map(|l| l[0] * l[1]).sum()
    }

    /// Signed notional imbalance of the top `n` levels in [-1, 1];
    /// positive means bids dominate.
    pub fn imbalance(&self, n: usize) -> Option<f64> {
        let bid = Self::top_notional(&self.bids, n);
        let ask = Self::top_notional(&self.asks, n);
        let total = bid + ask;
        if total <= 0.0 {
            return None;
        }
        Some((bid - ask) / total)
    }

    pub fn validate(&self) -> GateResult<()> {
        for (side, levels) in [("bid", &self.bids), ("ask", &self.asks)] {
            for (i, level) in levels.iter().enumerate() {
                let [price, size] = *level;
                if !price.is_finite() || !size.is_finite() || price <= 0.0 || size < 0.0 {
                    return Err(GateError::InputValidation(format!(
                        "{side} level {i} is malformed: [{price}, {size}]"
                    )));
                }
            }
        }
        if self.bids.windows(2).any(|w| w[1][0] > w[0][0]) {
            return Err(GateError::InputValidation(
                "bids are not sorted best-first (descending)".into(),
            ));
        }
        if self.asks.windows(2).any(|w| w[1][0] < w[0][0]) {
            return Err(GateError::InputValidation(
                "asks are not sorted best-first (ascending)".into(),
            ));
        }
        if let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) {
            if bid >= ask {
                return Err(GateError::InputValidation(format!(
                    "crossed book: best bid {bid} >= best ask {ask}"
                )));
            }
        }
        Ok(())
    }
}

/// Inbound market snapshot produced by the market-data collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub symbol: String,
    pub timeframe: String,
    pub timestamp_unix_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub orderbook: OrderBook,
    #[serde(default)]
    pub funding_rate: Option<f64>,
    #[serde(default)]
    pub open_interest: Option<f64>,
    #[serde(default)]
    pub sentiment_score: Option<f64>,
}

impl MarketSnapshot {
    pub fn candle(&self) -> Candle {
        Candle {
            timestamp_ms: self.timestamp_unix_ms,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp_unix_ms)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp_millis() - self.timestamp_unix_ms
    }

    /// Structural validation; runs before any stateful component sees the snapshot.
    pub fn validate(&self) -> GateResult<()> {
        if self.symbol.trim().is_empty() {
            return Err(GateError::InputValidation("symbol is empty".into()));
        }
        if self.timeframe.trim().is_empty() {
            return Err(GateError::InputValidation("timeframe is empty".into()));
        }
        if self.timestamp_unix_ms <= 0 {
            return Err(GateError::InputValidation(format!(
                "timestamp {} is not a valid unix-ms value",
                self.timestamp_unix_ms
            )));
        }
        for (name, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(GateError::InputValidation(format!(
                    "{name} price {value} must be finite and positive"
                )));
            }
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(GateError::InputValidation(format!(
                "volume {} must be finite and non-negative",
                self.volume
            )));
        }
        if self.high < self.open.max(self.close) || self.low > self.open.min(self.close) {
            return Err(GateError::InputValidation(format!(
                "inconsistent candle: high {} low {} open {} close {}",
                self.high, self.low, self.open, self.close
            )));
        }
        for (name, value) in [
            ("fundingRate", self.funding_rate),
            ("openInterest", self.open_interest),
            ("sentimentScore", self.sentiment_score),
        ] {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(GateError::InputValidation(format!("{name} is not finite")));
                }
            }
        }
        self.orderbook.validate()
    }
}

/// Trade direction of a candidate signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
    Hold,
}

impl Direction {
    /// +1 for buys, -1 for sells, 0 for hold
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Buy => 1.0,
            Direction::Sell => -1.0,
            Direction::Hold => 0.0,
        }
    }

    pub fn is_actionable(&self) -> bool {
        !matches!(self, Direction::Hold)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
            Direction::Hold => "HOLD",
        }
    }
}

/// Prevailing market-structure trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Trend {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

impl Trend {
    pub fn direction(&self) -> Direction {
        match self {
            Trend::Bullish => Direction::Buy,
            Trend::Bearish => Direction::Sell,
            Trend::Neutral => Direction::Hold,
        }
    }
}

/// Confidence band derived from the confluence score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfidenceTier {
    Discard,
    Weak,
    Good,
    Sharp,
}

impl ConfidenceTier {
    pub fn from_score(score: f64) -> Self {
        if score >= 70.0 {
            ConfidenceTier::Sharp
        } else if score >= 60.0 {
            ConfidenceTier::Good
        } else if score >= 40.0 {
            ConfidenceTier::Weak
        } else {
            ConfidenceTier::Discard
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConfidenceTier::Sharp => "sharp",
            ConfidenceTier::Good => "good",
            ConfidenceTier::Weak => "weak",
            ConfidenceTier::Discard => "discard",
        }
    }
}

/// Setup family: continuation after a BOS, reversal after a CHoCH
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalType {
    TrendFollowing,
    Reversal,
    Unclassified,
}

/// Volatility bucket from the ATR percentile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum VolatilityRegime {
    Low,
    #[default]
    Normal,
    High,
}

impl VolatilityRegime {
    pub fn name(&self) -> &'static str {
        match self {
            VolatilityRegime::Low => "low",
            VolatilityRegime::Normal => "normal",
            VolatilityRegime::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionStatus {
    Approved,
    Rejected,
    Blocked,
}

/// Pipeline stage that produced a decision's final status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    InputValidation,
    CircuitBreaker,
    StructureTracker,
    RegimeFilter,
    ConfluenceScorer,
    ExecutionGuard,
    OutcomeLedger,
    Deadline,
    Complete,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::InputValidation => "InputValidation",
            Stage::CircuitBreaker => "CircuitBreaker",
            Stage::StructureTracker => "StructureTracker",
            Stage::RegimeFilter => "RegimeFilter",
            Stage::ConfluenceScorer => "ConfluenceScorer",
            Stage::ExecutionGuard => "ExecutionGuard",
            Stage::OutcomeLedger => "OutcomeLedger",
            Stage::Deadline => "Deadline",
            Stage::Complete => "Complete",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of a trade reported by the execution collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Win,
    Loss,
    Pending,
}

/// Caller-supplied account context for sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountContext {
    pub equity: f64,
    /// Fraction of equity put at risk per trade, in percent
    #[serde(default = "default_risk_per_trade_pct")]
    pub risk_per_trade_pct: f64,
    /// Notional to test against the book; defaults to the pipeline setting
    #[serde(default)]
    pub notional_override: Option<f64>,
}

fn default_risk_per_trade_pct() -> f64 {
    1.0
}

impl Default for AccountContext {
    fn default() -> Self {
        Self {
            equity: 100_000.0,
            risk_per_trade_pct: default_risk_per_trade_pct(),
            notional_override: None,
        }
    }
}

/// Outbound decision consumed by execution / notification collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalDecision {
    pub symbol: String,
    pub timeframe: String,
    pub status: DecisionStatus,
    pub stage: Stage,
    pub direction: Direction,
    pub score: f64,
    pub confidence_tier: ConfidenceTier,
    pub entry: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Vec<f64>,
    pub position_size_multiplier: f64,
    pub reasons: Vec<String>,
    pub trade_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SignalDecision {
    fn refused(
        status: DecisionStatus,
        stage: Stage,
        symbol: &str,
        timeframe: &str,
        reasons: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            status,
            stage,
            direction: Direction::Hold,
            score: 0.0,
            confidence_tier: ConfidenceTier::Discard,
            entry: None,
            stop_loss: None,
            take_profit: Vec::new(),
            position_size_multiplier: 0.0,
            reasons,
            trade_id: None,
            timestamp: now,
        }
    }

    pub fn rejected(
        stage: Stage,
        symbol: &str,
        timeframe: &str,
        reasons: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self::refused(DecisionStatus::Rejected, stage, symbol, timeframe, reasons, now)
    }

    pub fn blocked(
        stage: Stage,
        symbol: &str,
        timeframe: &str,
        reasons: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self::refused(DecisionStatus::Blocked, stage, symbol, timeframe, reasons, now)
    }

    pub fn is_approved(&self) -> bool {
        self.status == DecisionStatus::Approved
    }
}
