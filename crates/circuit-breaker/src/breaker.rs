use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use gate_core::{GateError, GateResult, JsonStore, Outcome};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::models::*;

/// Performance circuit breaker.
///
/// Closed -> Open on a breach, Open -> HalfOpen after the cooling period,
/// HalfOpen -> Closed after a loss-free recovery test (any loss reopens it).
/// Every mutation is persisted; a failed write is logged and the in-memory
/// state stays authoritative. Internal failures always resolve to "blocked".
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: Mutex<BreakerState>,
    store: Option<JsonStore<BreakerState>>,
}

impl CircuitBreaker {
    /// In-memory breaker (nothing persisted)
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState::default()),
            store: None,
        }
    }

    /// Breaker backed by `breaker_state.json`; loads once at startup.
    pub fn with_store(config: BreakerConfig, path: impl Into<PathBuf>) -> Self {
        let store = JsonStore::new(path);
        let mut state: BreakerState = store.load_or_default();
        repair_invariants(&mut state);
        tracing::info!(
            "Circuit breaker loaded from {} (phase={:?}, consecutive_losses={})",
            store.path().display(),
            state.phase,
            state.consecutive_losses
        );
        Self {
            config,
            state: Mutex::new(state),
            store: Some(store),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn lock(&self) -> GateResult<MutexGuard<'_, BreakerState>> {
        self.state
            .lock()
            .map_err(|_| GateError::poisoned("circuit breaker"))
    }

    pub fn phase(&self) -> Phase {
        // A poisoned lock reports Open so nothing reads it as healthy.
        self.lock().map(|s| s.phase).unwrap_or(Phase::Open)
    }

    /// Check whether a new signal for `symbol` may be emitted now.
    pub fn check_permission(&self, symbol: &str) -> PermissionCheck {
        self.check_permission_at(symbol, Utc::now())
    }

    pub fn check_permission_at(&self, symbol: &str, now: DateTime<Utc>) -> PermissionCheck {
        let mut state = match self.lock() {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Breaker check for {} failed closed: {}", symbol, e);
                return PermissionCheck::deny(format!("breaker unavailable: {e}"), Phase::Open);
            }
        };
        self.permission_locked(&mut state, symbol, now)
    }

    /// Re-run every permission check and count the signal under a single
    /// lock acquisition. Concurrent callers can never admit more signals
    /// than the rate limits allow.
    pub fn try_admit_signal(&self, symbol: &str) -> PermissionCheck {
        self.try_admit_signal_at(symbol, Utc::now())
    }

    pub fn try_admit_signal_at(&self, symbol: &str, now: DateTime<Utc>) -> PermissionCheck {
        let mut state = match self.lock() {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Breaker admission for {} failed closed: {}", symbol, e);
                return PermissionCheck::deny(format!("breaker unavailable: {e}"), Phase::Open);
            }
        };
        let check = self.permission_locked(&mut state, symbol, now);
        if check.allowed {
            count_signal(&mut state, symbol, now);
            self.persist(&state);
        }
        check
    }

    /// Steps (a) to (c) of the permission check on an already locked state.
    fn permission_locked(
        &self,
        state: &mut BreakerState,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> PermissionCheck {
        let mut dirty = self.apply_time_transitions(state, now);

        // (a) hard block
        if state.phase == Phase::Open {
            if dirty {
                self.persist(state);
            }
            let reason = state
                .trigger_reason
                .clone()
                .unwrap_or_else(|| "unspecified breach".to_string());
            return PermissionCheck::deny(format!("circuit breaker open: {reason}"), Phase::Open);
        }

        // (b) rate limits
        dirty |= prune_signals(state, now);
        let last_hour = signals_since(state, now - Duration::hours(1));
        if last_hour >= self.config.max_signals_per_hour as usize {
            if dirty {
                self.persist(state);
            }
            return PermissionCheck::deny(
                format!(
                    "rate limit: {} signals in the last hour (max {})",
                    last_hour, self.config.max_signals_per_hour
                ),
                state.phase,
            );
        }
        let today = state
            .daily_stats
            .get(&now.date_naive())
            .map(|d| d.signal_count)
            .unwrap_or(0);
        if today >= self.config.max_signals_per_day {
            if dirty {
                self.persist(state);
            }
            return PermissionCheck::deny(
                format!(
                    "rate limit: {} signals today (max {})",
                    today, self.config.max_signals_per_day
                ),
                state.phase,
            );
        }

        // (c) performance gate
        let (win_rate, samples) = self.win_rate_30d(state, now);
        if let Some(rate) = win_rate {
            if rate < self.config.min_win_rate_30d {
                let reason = format!(
                    "30-day win rate {:.1}% below minimum {:.1}% ({} trades)",
                    rate * 100.0,
                    self.config.min_win_rate_30d * 100.0,
                    samples
                );
                self.trip(state, now, BreakerEventKind::Triggered, rate, &reason);
                self.persist(state);
                return PermissionCheck::deny(format!("circuit breaker open: {reason}"), Phase::Open);
            }
        }

        if dirty {
            self.persist(state);
        }

        tracing::debug!("Breaker permits {} (phase={:?})", symbol, state.phase);
        match state.phase {
            Phase::HalfOpen => {
                PermissionCheck::allow("half-open: recovery test in progress", Phase::HalfOpen)
            }
            phase => PermissionCheck::allow("all breaker checks clear", phase),
        }
    }

    /// Count an admitted signal against the rate limits.
    pub fn record_signal(&self, symbol: &str) -> GateResult<()> {
        self.record_signal_at(symbol, Utc::now())
    }

    pub fn record_signal_at(&self, symbol: &str, now: DateTime<Utc>) -> GateResult<()> {
        let mut state = self.lock()?;
        count_signal(&mut state, symbol, now);
        self.persist(&state);
        Ok(())
    }

    /// Feed a resolved trade result into the breaker.
    pub fn record_outcome(&self, symbol: &str, outcome: Outcome, pnl: f64) -> GateResult<()> {
        self.record_outcome_at(symbol, outcome, pnl, Utc::now())
    }

    pub fn record_outcome_at(
        &self,
        symbol: &str,
        outcome: Outcome,
        pnl: f64,
        now: DateTime<Utc>,
    ) -> GateResult<()> {
        if !pnl.is_finite() {
            return Err(GateError::InputValidation(format!("pnl {pnl} is not finite")));
        }
        let mut state = self.lock()?;
        self.apply_time_transitions(&mut state, now);

        let pnl_dec = Decimal::from_f64(pnl).unwrap_or_default();
        let day_key = now.date_naive();

        match outcome {
            Outcome::Win => {
                let day = state.daily_stats.entry(day_key).or_default();
                day.wins += 1;
                day.total_pnl += pnl_dec;
                state.consecutive_losses = 0;
            }
            Outcome::Loss => {
                let day = state.daily_stats.entry(day_key).or_default();
                day.losses += 1;
                day.total_pnl += pnl_dec;
                state.consecutive_losses += 1;

                if state.phase == Phase::HalfOpen {
                    state.losses_during_recovery += 1;
                    self.trip(
                        &mut state,
                        now,
                        BreakerEventKind::Reopened,
                        pnl,
                        &format!("loss on {symbol} during half-open recovery test"),
                    );
                } else if state.consecutive_losses >= self.config.max_consecutive_losses
                    && state.phase != Phase::Open
                {
                    let reason = format!(
                        "{} consecutive losses (max {})",
                        state.consecutive_losses, self.config.max_consecutive_losses
                    );
                    let value = state.consecutive_losses as f64;
                    self.trip(&mut state, now, BreakerEventKind::Triggered, value, &reason);
                }
            }
            Outcome::Pending => {}
        }

        push_event(
            &mut state,
            self.config.max_events,
            now,
            BreakerEventKind::Outcome,
            pnl,
            format!("{symbol} {outcome:?}"),
        );

        // Daily drawdown ratio against reference equity
        let equity = state
            .reference_equity
            .unwrap_or(self.config.reference_equity);
        let today_pnl = state
            .daily_stats
            .get(&day_key)
            .map(|d| d.total_pnl_f64())
            .unwrap_or(0.0);
        if equity > 0.0 && today_pnl < 0.0 && state.phase != Phase::Open {
            let drawdown_pct = -today_pnl / equity * 100.0;
            if drawdown_pct >= self.config.max_daily_drawdown_pct {
                let reason = format!(
                    "daily drawdown {:.2}% exceeds limit of {:.2}%",
                    drawdown_pct, self.config.max_daily_drawdown_pct
                );
                self.trip(&mut state, now, BreakerEventKind::Triggered, drawdown_pct, &reason);
            }
        }

        let cutoff = day_key - Duration::days(self.config.stats_retention_days);
        state.daily_stats.retain(|day, _| *day >= cutoff);

        self.persist(&state);
        Ok(())
    }

    /// Latest account equity used for the daily drawdown ratio.
    pub fn update_equity(&self, equity: f64) -> GateResult<()> {
        self.update_equity_at(equity, Utc::now())
    }

    pub fn update_equity_at(&self, equity: f64, now: DateTime<Utc>) -> GateResult<()> {
        if !equity.is_finite() || equity <= 0.0 {
            return Err(GateError::InputValidation(format!(
                "equity {equity} must be finite and positive"
            )));
        }
        let mut state = self.lock()?;
        if state.reference_equity != Some(equity) {
            state.reference_equity = Some(equity);
            push_event(
                &mut state,
                self.config.max_events,
                now,
                BreakerEventKind::EquityUpdated,
                equity,
                "reference equity updated".to_string(),
            );
            self.persist(&state);
        }
        Ok(())
    }

    /// Operator override: block everything immediately.
    pub fn force_open(&self, reason: &str) -> GateResult<()> {
        self.force_open_at(reason, Utc::now())
    }

    pub fn force_open_at(&self, reason: &str, now: DateTime<Utc>) -> GateResult<()> {
        let mut state = self.lock()?;
        self.trip(
            &mut state,
            now,
            BreakerEventKind::ForcedOpen,
            0.0,
            &format!("forced open: {reason}"),
        );
        self.persist(&state);
        Ok(())
    }

    /// Operator override: close the breaker and clear the loss streak.
    pub fn force_reset(&self, reason: &str) -> GateResult<()> {
        self.force_reset_at(reason, Utc::now())
    }

    pub fn force_reset_at(&self, reason: &str, now: DateTime<Utc>) -> GateResult<()> {
        let mut state = self.lock()?;
        state.phase = Phase::Closed;
        state.triggered_at = None;
        state.trigger_reason = None;
        state.recovery_started_at = None;
        state.losses_during_recovery = 0;
        state.consecutive_losses = 0;
        push_event(
            &mut state,
            self.config.max_events,
            now,
            BreakerEventKind::ForcedReset,
            0.0,
            reason.to_string(),
        );
        tracing::warn!("Circuit breaker force-reset: {}", reason);
        self.persist(&state);
        Ok(())
    }

    pub fn status(&self) -> GateResult<BreakerStatus> {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> GateResult<BreakerStatus> {
        let state = self.lock()?;
        let (win_rate_30d, samples_30d) = self.win_rate_30d(&state, now);
        let today = state
            .daily_stats
            .get(&now.date_naive())
            .cloned()
            .unwrap_or_default();
        Ok(BreakerStatus {
            phase: state.phase,
            trigger_reason: state.trigger_reason.clone(),
            triggered_at: state.triggered_at,
            recovery_started_at: state.recovery_started_at,
            consecutive_losses: state.consecutive_losses,
            signals_last_hour: signals_since(&state, now - Duration::hours(1)),
            signals_today: today.signal_count,
            today,
            win_rate_30d,
            samples_30d,
            recent_events: state.event_log.iter().rev().take(10).cloned().collect(),
        })
    }

    /// Clone of the full persisted state.
    pub fn state(&self) -> GateResult<BreakerState> {
        Ok(self.lock()?.clone())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Time-based phase changes. Returns true if the state changed.
    fn apply_time_transitions(&self, state: &mut BreakerState, now: DateTime<Utc>) -> bool {
        match state.phase {
            Phase::Closed => false,
            Phase::Open => {
                let Some(triggered_at) = state.triggered_at else {
                    // Open without a trigger time: restart the cooling period.
                    state.triggered_at = Some(now);
                    return true;
                };
                if now - triggered_at < Duration::minutes(self.config.cooling_period_minutes) {
                    return false;
                }
                state.phase = Phase::HalfOpen;
                state.recovery_started_at = Some(now);
                state.losses_during_recovery = 0;
                push_event(
                    state,
                    self.config.max_events,
                    now,
                    BreakerEventKind::HalfOpen,
                    0.0,
                    "cooling period elapsed, starting recovery test".to_string(),
                );
                tracing::warn!("Circuit breaker half-open: recovery test started");
                true
            }
            Phase::HalfOpen => {
                let Some(started) = state.recovery_started_at else {
                    state.recovery_started_at = Some(now);
                    return true;
                };
                if now - started < Duration::minutes(self.config.recovery_test_minutes) {
                    return false;
                }
                if state.losses_during_recovery == 0 {
                    state.phase = Phase::Closed;
                    state.triggered_at = None;
                    state.trigger_reason = None;
                    state.recovery_started_at = None;
                    state.consecutive_losses = 0;
                    push_event(
                        state,
                        self.config.max_events,
                        now,
                        BreakerEventKind::Recovered,
                        0.0,
                        "recovery test passed".to_string(),
                    );
                    tracing::info!("Circuit breaker closed: recovery test passed");
                } else {
                    let losses = state.losses_during_recovery as f64;
                    self.trip(
                        state,
                        now,
                        BreakerEventKind::Reopened,
                        losses,
                        "losses during recovery test",
                    );
                }
                true
            }
        }
    }

    fn trip(
        &self,
        state: &mut BreakerState,
        now: DateTime<Utc>,
        kind: BreakerEventKind,
        value: f64,
        reason: &str,
    ) {
        state.phase = Phase::Open;
        state.triggered_at = Some(now);
        state.trigger_reason = Some(reason.to_string());
        state.recovery_started_at = None;
        push_event(state, self.config.max_events, now, kind, value, reason.to_string());
        tracing::error!("Circuit breaker OPEN ({:?}): {}", kind, reason);
    }

    fn win_rate_30d(&self, state: &BreakerState, now: DateTime<Utc>) -> (Option<f64>, u32) {
        // Today plus the 29 days before it
        let since = now.date_naive() - Duration::days(29);
        let (wins, losses) = state
            .daily_stats
            .range(since..)
            .fold((0u32, 0u32), |(w, l), (_, d)| (w + d.wins, l + d.losses));
        let samples = wins + losses;
        if samples == 0 || samples < self.config.min_samples_30d {
            return (None, samples);
        }
        (Some(wins as f64 / samples as f64), samples)
    }

    fn persist(&self, state: &BreakerState) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(state) {
                tracing::error!("Failed to persist breaker state: {}", e);
            }
        }
    }
}

fn push_event(
    state: &mut BreakerState,
    max_events: usize,
    timestamp: DateTime<Utc>,
    kind: BreakerEventKind,
    value: f64,
    reason: String,
) {
    state.event_log.push_back(BreakerEvent {
        timestamp,
        kind,
        value,
        reason,
    });
    while state.event_log.len() > max_events {
        state.event_log.pop_front();
    }
}

fn count_signal(state: &mut BreakerState, symbol: &str, now: DateTime<Utc>) {
    state.recent_signals.push_back(now);
    prune_signals(state, now);
    let day = state.daily_stats.entry(now.date_naive()).or_default();
    day.signal_count += 1;
    tracing::debug!("Signal recorded for {} ({} today)", symbol, day.signal_count);
}

/// Drop signal timestamps older than a day. Returns true if any were removed.
fn prune_signals(state: &mut BreakerState, now: DateTime<Utc>) -> bool {
    let cutoff = now - Duration::hours(24);
    let before = state.recent_signals.len();
    while state
        .recent_signals
        .front()
        .is_some_and(|t| *t <= cutoff)
    {
        state.recent_signals.pop_front();
    }
    before != state.recent_signals.len()
}

fn signals_since(state: &BreakerState, since: DateTime<Utc>) -> usize {
    state.recent_signals.iter().filter(|t| **t > since).count()
}

/// Restore the Open/HalfOpen timestamp invariants on a loaded document.
fn repair_invariants(state: &mut BreakerState) {
    let now = Utc::now();
    if state.phase == Phase::Open && state.triggered_at.is_none() {
        tracing::warn!("Loaded breaker state is Open without a trigger time; restarting cooling period");
        state.triggered_at = Some(now);
    }
    if state.phase == Phase::HalfOpen && state.recovery_started_at.is_none() {
        tracing::warn!("Loaded breaker state is HalfOpen without a start time; restarting recovery test");
        state.recovery_started_at = Some(now);
    }
}
