use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Losses in a row (no intervening win) that trip the breaker
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
    /// Today's realised loss as percentage of reference equity before tripping
    #[serde(default = "default_max_daily_drawdown_pct")]
    pub max_daily_drawdown_pct: f64,
    /// Trailing 30-day win rate floor (0-1)
    #[serde(default = "default_min_win_rate_30d")]
    pub min_win_rate_30d: f64,
    /// Resolved trades needed before the win-rate floor applies
    #[serde(default = "default_min_samples_30d")]
    pub min_samples_30d: u32,
    #[serde(default = "default_max_signals_per_hour")]
    pub max_signals_per_hour: u32,
    #[serde(default = "default_max_signals_per_day")]
    pub max_signals_per_day: u32,
    /// Time spent Open before a recovery test starts
    #[serde(default = "default_cooling_period_minutes")]
    pub cooling_period_minutes: i64,
    /// Length of the HalfOpen recovery test
    #[serde(default = "default_recovery_test_minutes")]
    pub recovery_test_minutes: i64,
    /// Equity the daily drawdown ratio is measured against until the pipeline reports one
    #[serde(default = "default_reference_equity")]
    pub reference_equity: f64,
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    #[serde(default = "default_stats_retention_days")]
    pub stats_retention_days: i64,
}

fn default_max_consecutive_losses() -> u32 { 4 }
fn default_max_daily_drawdown_pct() -> f64 { 5.0 }
fn default_min_win_rate_30d() -> f64 { 0.40 }
fn default_min_samples_30d() -> u32 { 10 }
fn default_max_signals_per_hour() -> u32 { 10 }
fn default_max_signals_per_day() -> u32 { 50 }
fn default_cooling_period_minutes() -> i64 { 60 }
fn default_recovery_test_minutes() -> i64 { 30 }
fn default_reference_equity() -> f64 { 100_000.0 }
fn default_max_events() -> usize { 200 }
fn default_stats_retention_days() -> i64 { 90 }

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_losses: default_max_consecutive_losses(),
            max_daily_drawdown_pct: default_max_daily_drawdown_pct(),
            min_win_rate_30d: default_min_win_rate_30d(),
            min_samples_30d: default_min_samples_30d(),
            max_signals_per_hour: default_max_signals_per_hour(),
            max_signals_per_day: default_max_signals_per_day(),
            cooling_period_minutes: default_cooling_period_minutes(),
            recovery_test_minutes: default_recovery_test_minutes(),
            reference_equity: default_reference_equity(),
            max_events: default_max_events(),
            stats_retention_days: default_stats_retention_days(),
        }
    }
}

impl BreakerConfig {
    pub fn validate(&self, errors: &mut Vec<String>) {
        if self.max_consecutive_losses == 0 {
            errors.push("breaker: max_consecutive_losses must be >= 1".into());
        }
        if !(self.max_daily_drawdown_pct > 0.0 && self.max_daily_drawdown_pct <= 100.0) {
            errors.push(format!(
                "breaker: max_daily_drawdown_pct must be in (0, 100], got {}",
                self.max_daily_drawdown_pct
            ));
        }
        if !(0.0..=1.0).contains(&self.min_win_rate_30d) {
            errors.push(format!(
                "breaker: min_win_rate_30d must be in [0, 1], got {}",
                self.min_win_rate_30d
            ));
        }
        if self.max_signals_per_hour == 0 || self.max_signals_per_day == 0 {
            errors.push("breaker: signal rate limits must be >= 1".into());
        }
        if self.max_signals_per_hour > self.max_signals_per_day {
            errors.push(format!(
                "breaker: max_signals_per_hour ({}) exceeds max_signals_per_day ({})",
                self.max_signals_per_hour, self.max_signals_per_day
            ));
        }
        if self.cooling_period_minutes <= 0 || self.recovery_test_minutes <= 0 {
            errors.push("breaker: cooling and recovery periods must be positive".into());
        }
        if !self.reference_equity.is_finite() || self.reference_equity <= 0.0 {
            errors.push("breaker: reference_equity must be positive".into());
        }
        if self.max_events == 0 {
            errors.push("breaker: max_events must be >= 1".into());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Phase {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub signal_count: u32,
    pub wins: u32,
    pub losses: u32,
    pub total_pnl: Decimal,
}

impl DailyStats {
    pub fn resolved(&self) -> u32 {
        self.wins + self.losses
    }

    pub fn total_pnl_f64(&self) -> f64 {
        self.total_pnl.to_f64().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerEventKind {
    Triggered,
    HalfOpen,
    Recovered,
    Reopened,
    ForcedOpen,
    ForcedReset,
    Outcome,
    EquityUpdated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: BreakerEventKind,
    pub value: f64,
    pub reason: String,
}

/// Persisted breaker state (`breaker_state.json`).
///
/// `phase == Open` implies `triggered_at` is set; `phase == HalfOpen`
/// implies `recovery_started_at` is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreakerState {
    pub phase: Phase,
    pub triggered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trigger_reason: Option<String>,
    pub recovery_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub losses_during_recovery: u32,
    pub consecutive_losses: u32,
    #[serde(default)]
    pub daily_stats: BTreeMap<NaiveDate, DailyStats>,
    /// Admission times of recent signals (trailing 24h)
    #[serde(default)]
    pub recent_signals: VecDeque<DateTime<Utc>>,
    #[serde(default)]
    pub reference_equity: Option<f64>,
    #[serde(default)]
    pub event_log: VecDeque<BreakerEvent>,
}

/// Result of a permission check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionCheck {
    pub allowed: bool,
    pub reason: String,
    pub phase: Phase,
}

impl PermissionCheck {
    pub fn allow(reason: impl Into<String>, phase: Phase) -> Self {
        Self { allowed: true, reason: reason.into(), phase }
    }

    pub fn deny(reason: impl Into<String>, phase: Phase) -> Self {
        Self { allowed: false, reason: reason.into(), phase }
    }
}

/// Operator-facing snapshot of the breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub phase: Phase,
    pub trigger_reason: Option<String>,
    pub triggered_at: Option<DateTime<Utc>>,
    pub recovery_started_at: Option<DateTime<Utc>>,
    pub consecutive_losses: u32,
    pub signals_last_hour: usize,
    pub signals_today: u32,
    pub today: DailyStats,
    pub win_rate_30d: Option<f64>,
    pub samples_30d: u32,
    pub recent_events: Vec<BreakerEvent>,
}
