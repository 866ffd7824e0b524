use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use circuit_breaker::BreakerConfig;
use confluence_scorer::ScoringConfig;
use execution_guard::{ExecutionConfig, TierThresholds};
use gate_core::{GateError, GateResult};
use regime_filter::RegimeConfig;
use serde::{Deserialize, Serialize};
use structure_tracker::StructureConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Snapshots older than this are a hard reject
    #[serde(default = "default_max_snapshot_age_ms")]
    pub max_snapshot_age_ms: i64,
    /// Order notional tested against the book when the caller gives none
    #[serde(default = "default_notional")]
    pub default_notional: f64,
    #[serde(default = "default_stop_atr_multiple")]
    pub stop_atr_multiple: f64,
    /// Take-profit ladder in multiples of initial risk
    #[serde(default = "default_take_profit_r")]
    pub take_profit_r: Vec<f64>,
    /// Where breaker, structure and ledger state live; in-memory when unset
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    /// Emit a metrics summary every N evaluations (0 disables)
    #[serde(default = "default_metrics_log_interval")]
    pub metrics_log_interval: u64,
}

fn default_max_snapshot_age_ms() -> i64 { 300_000 }
fn default_notional() -> f64 { 10_000.0 }
fn default_stop_atr_multiple() -> f64 { 1.5 }
fn default_take_profit_r() -> Vec<f64> { vec![1.5, 2.5, 4.0] }
fn default_deadline_ms() -> u64 { 2_000 }
fn default_metrics_log_interval() -> u64 { 100 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_snapshot_age_ms: default_max_snapshot_age_ms(),
            default_notional: default_notional(),
            stop_atr_multiple: default_stop_atr_multiple(),
            take_profit_r: default_take_profit_r(),
            data_dir: None,
            deadline_ms: default_deadline_ms(),
            metrics_log_interval: default_metrics_log_interval(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self, errors: &mut Vec<String>) {
        if self.max_snapshot_age_ms <= 0 {
            errors.push("pipeline: max_snapshot_age_ms must be positive".into());
        }
        if !self.default_notional.is_finite() || self.default_notional <= 0.0 {
            errors.push("pipeline: default_notional must be positive".into());
        }
        if !self.stop_atr_multiple.is_finite() || self.stop_atr_multiple <= 0.0 {
            errors.push("pipeline: stop_atr_multiple must be positive".into());
        }
        if self.take_profit_r.is_empty() {
            errors.push("pipeline: take_profit_r needs at least one target".into());
        }
        if self.take_profit_r.iter().any(|r| !r.is_finite() || *r <= 0.0) {
            errors.push("pipeline: take_profit_r entries must be positive".into());
        }
        if self.take_profit_r.windows(2).any(|w| w[1] <= w[0]) {
            errors.push("pipeline: take_profit_r must be strictly increasing".into());
        }
        if self.deadline_ms == 0 {
            errors.push("pipeline: deadline_ms must be >= 1".into());
        }
    }
}

/// Full gate configuration, one section per component
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub structure: StructureConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub regime: RegimeConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl GateConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let breaker_defaults = BreakerConfig::default();
        let breaker = BreakerConfig {
            max_consecutive_losses: parse(&var, "BREAKER_MAX_CONSECUTIVE_LOSSES", breaker_defaults.max_consecutive_losses)?,
            max_daily_drawdown_pct: parse(&var, "BREAKER_MAX_DAILY_DRAWDOWN_PCT", breaker_defaults.max_daily_drawdown_pct)?,
            min_win_rate_30d: parse(&var, "BREAKER_MIN_WIN_RATE_30D", breaker_defaults.min_win_rate_30d)?,
            max_signals_per_hour: parse(&var, "BREAKER_MAX_SIGNALS_PER_HOUR", breaker_defaults.max_signals_per_hour)?,
            max_signals_per_day: parse(&var, "BREAKER_MAX_SIGNALS_PER_DAY", breaker_defaults.max_signals_per_day)?,
            cooling_period_minutes: parse(&var, "BREAKER_COOLING_MINUTES", breaker_defaults.cooling_period_minutes)?,
            recovery_test_minutes: parse(&var, "BREAKER_RECOVERY_MINUTES", breaker_defaults.recovery_test_minutes)?,
            reference_equity: parse(&var, "BREAKER_REFERENCE_EQUITY", breaker_defaults.reference_equity)?,
            ..breaker_defaults
        };

        let structure_defaults = StructureConfig::default();
        let structure = StructureConfig {
            lookback_periods: parse(&var, "STRUCTURE_LOOKBACK_PERIODS", structure_defaults.lookback_periods)?,
            min_swing_change_pct: parse(&var, "STRUCTURE_MIN_SWING_CHANGE_PCT", structure_defaults.min_swing_change_pct)?,
            bos_confirmation_pct: parse(&var, "STRUCTURE_BOS_CONFIRMATION_PCT", structure_defaults.bos_confirmation_pct)?,
            choch_retest_periods: parse(&var, "STRUCTURE_CHOCH_RETEST_PERIODS", structure_defaults.choch_retest_periods)?,
            ob_validity_periods: parse(&var, "STRUCTURE_OB_VALIDITY_PERIODS", structure_defaults.ob_validity_periods)?,
            sweep_proximity_pct: parse(&var, "STRUCTURE_SWEEP_PROXIMITY_PCT", structure_defaults.sweep_proximity_pct)?,
            ..structure_defaults
        };

        let regime_defaults = RegimeConfig::default();
        let regime = RegimeConfig {
            history_window: parse(&var, "REGIME_HISTORY_WINDOW", regime_defaults.history_window)?,
            min_history: parse(&var, "REGIME_MIN_HISTORY", regime_defaults.min_history)?,
            extreme_funding_rate: parse(&var, "REGIME_EXTREME_FUNDING_RATE", regime_defaults.extreme_funding_rate)?,
            oi_zscore_threshold: parse(&var, "REGIME_OI_ZSCORE_THRESHOLD", regime_defaults.oi_zscore_threshold)?,
            ..regime_defaults
        };

        let execution_defaults = ExecutionConfig::default();
        let symbol_overrides = match var("EXEC_SYMBOL_OVERRIDES") {
            Some(raw) => serde_json::from_str::<BTreeMap<String, TierThresholds>>(&raw)
                .context("EXEC_SYMBOL_OVERRIDES must be a JSON object of {symbol: {max_spread_bps, max_slippage_bps}}")?
                .into_iter()
                .map(|(symbol, t)| (symbol.to_uppercase(), t))
                .collect(),
            None => BTreeMap::new(),
        };
        let execution = ExecutionConfig {
            min_depth_levels: parse(&var, "EXEC_MIN_DEPTH_LEVELS", execution_defaults.min_depth_levels)?,
            depth_band_pct: parse(&var, "EXEC_DEPTH_BAND_PCT", execution_defaults.depth_band_pct)?,
            min_liquidity_score: parse(&var, "EXEC_MIN_LIQUIDITY_SCORE", execution_defaults.min_liquidity_score)?,
            symbol_overrides,
            ..execution_defaults
        };

        let pipeline_defaults = PipelineConfig::default();
        let take_profit_r = match var("PIPELINE_TAKE_PROFIT_R") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().parse::<f64>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .with_context(|| format!("invalid PIPELINE_TAKE_PROFIT_R={raw}"))?,
            None => pipeline_defaults.take_profit_r.clone(),
        };
        let pipeline = PipelineConfig {
            max_snapshot_age_ms: parse(&var, "PIPELINE_MAX_SNAPSHOT_AGE_MS", pipeline_defaults.max_snapshot_age_ms)?,
            default_notional: parse(&var, "PIPELINE_DEFAULT_NOTIONAL", pipeline_defaults.default_notional)?,
            stop_atr_multiple: parse(&var, "PIPELINE_STOP_ATR_MULTIPLE", pipeline_defaults.stop_atr_multiple)?,
            take_profit_r,
            data_dir: var("GATE_DATA_DIR").map(PathBuf::from),
            deadline_ms: parse(&var, "PIPELINE_DEADLINE_MS", pipeline_defaults.deadline_ms)?,
            metrics_log_interval: parse(&var, "PIPELINE_METRICS_LOG_INTERVAL", pipeline_defaults.metrics_log_interval)?,
        };

        Ok(Self {
            breaker,
            structure,
            scoring: ScoringConfig::default(),
            execution,
            regime,
            pipeline,
        })
    }

    /// Collect every violation across all sections; fails once with the full list.
    pub fn validate(&self) -> GateResult<()> {
        let mut errors = Vec::new();
        self.breaker.validate(&mut errors);
        self.structure.validate(&mut errors);
        self.scoring.validate(&mut errors);
        self.execution.validate(&mut errors);
        self.regime.validate(&mut errors);
        self.pipeline.validate(&mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(GateError::Configuration(errors.join("; ")))
        }
    }
}

fn parse<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {key}={raw}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = GateConfig::from_lookup(|_| None).unwrap();
        config.validate().unwrap();
        assert_eq!(config.breaker.max_consecutive_losses, 4);
        assert_eq!(config.pipeline.take_profit_r, vec![1.5, 2.5, 4.0]);
        assert!(config.pipeline.data_dir.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = GateConfig::from_lookup(lookup(&[
            ("BREAKER_MAX_CONSECUTIVE_LOSSES", "3"),
            ("PIPELINE_TAKE_PROFIT_R", "1, 2"),
            ("GATE_DATA_DIR", "/var/lib/gate"),
            ("EXEC_SYMBOL_OVERRIDES", r#"{"arbusdt": {"max_spread_bps": 15, "max_slippage_bps": 30}}"#),
        ]))
        .unwrap();
        assert_eq!(config.breaker.max_consecutive_losses, 3);
        assert_eq!(config.pipeline.take_profit_r, vec![1.0, 2.0]);
        assert_eq!(config.pipeline.data_dir, Some(PathBuf::from("/var/lib/gate")));
        assert_eq!(config.execution.symbol_overrides["ARBUSDT"].max_spread_bps, 15.0);
    }

    #[test]
    fn test_unparseable_value_names_the_key() {
        let err = GateConfig::from_lookup(lookup(&[("PIPELINE_DEADLINE_MS", "soon")])).unwrap_err();
        assert!(format!("{err:#}").contains("PIPELINE_DEADLINE_MS"));
    }

    #[test]
    fn test_validation_reports_every_violation() {
        let mut config = GateConfig::default();
        config.breaker.max_consecutive_losses = 0;
        config.pipeline.take_profit_r = vec![2.0, 1.0];
        config.pipeline.deadline_ms = 0;
        match config.validate() {
            Err(GateError::Configuration(msg)) => {
                assert!(msg.contains("max_consecutive_losses"));
                assert!(msg.contains("strictly increasing"));
                assert!(msg.contains("deadline_ms"));
            }
            other => panic!("expected configuration error, got {other:?}"),
        }
    }
}
