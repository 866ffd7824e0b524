use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use confluence_scorer::ScoreBreakdown;
use execution_guard::ExecutionCheck;
use gate_core::{ConfidenceTier, Direction, Outcome, SignalType, Trend};
use regime_filter::RegimeState;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use structure_tracker::StructureBreak;

/// Everything the pipeline knew when it admitted the signal
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSnapshot {
    pub trend: Trend,
    pub last_break: Option<StructureBreak>,
    pub breakdown: ScoreBreakdown,
    pub regime: Option<RegimeState>,
    pub execution: Option<ExecutionCheck>,
    pub funding_rate: Option<f64>,
    pub open_interest: Option<f64>,
    pub sentiment: Option<f64>,
    pub reasons: Vec<String>,
}

/// One admitted decision. Immutable apart from the single outcome update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    pub trade_id: String,
    pub symbol: String,
    pub timeframe: String,
    pub created_at: DateTime<Utc>,
    pub direction: Direction,
    pub signal_type: SignalType,
    pub score: f64,
    pub confidence_tier: ConfidenceTier,
    pub entry: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Vec<f64>,
    pub position_size_multiplier: f64,
    pub notional: f64,
    pub features: FeatureSnapshot,

    pub outcome: Outcome,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub pnl: Option<Decimal>,
    #[serde(default)]
    pub hold_time_minutes: Option<i64>,
    #[serde(default)]
    pub exit_reason: Option<String>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

impl OutcomeRecord {
    /// A fresh pending record with a generated trade id.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: &str,
        timeframe: &str,
        direction: Direction,
        signal_type: SignalType,
        score: f64,
        entry: f64,
        features: FeatureSnapshot,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            trade_id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            created_at,
            direction,
            signal_type,
            score,
            confidence_tier: ConfidenceTier::from_score(score),
            entry,
            stop_loss: None,
            take_profit: Vec::new(),
            position_size_multiplier: 1.0,
            notional: 0.0,
            features,
            outcome: Outcome::Pending,
            exit_price: None,
            pnl: None,
            hold_time_minutes: None,
            exit_reason: None,
            closed_at: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}

/// Terminal update supplied by the execution/monitoring collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResult {
    pub outcome: Outcome,
    pub exit_price: f64,
    pub pnl: f64,
    pub hold_time_minutes: i64,
    pub exit_reason: String,
}

/// Per-day counters (`daily_stats.json`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerDayStats {
    pub opened: u32,
    pub closed: u32,
    pub wins: u32,
    pub losses: u32,
    pub total_pnl: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketPerformance {
    pub trades: u32,
    pub wins: u32,
    pub win_rate: f64,
    pub total_pnl: Decimal,
}

impl BucketPerformance {
    pub(crate) fn add(&mut self, outcome: Outcome, pnl: Decimal) {
        self.trades += 1;
        if outcome == Outcome::Win {
            self.wins += 1;
        }
        self.total_pnl += pnl;
        self.win_rate = self.wins as f64 / self.trades as f64;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
    /// 0 to 1; None without resolved trades
    pub win_rate: Option<f64>,
    pub total_pnl: Decimal,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    /// Gross profit over gross loss; infinite when nothing was lost
    pub profit_factor: Option<f64>,
    pub average_pnl: Option<Decimal>,
    pub average_hold_minutes: Option<f64>,
    pub by_tier: BTreeMap<String, BucketPerformance>,
    pub by_regime: BTreeMap<String, BucketPerformance>,
}
