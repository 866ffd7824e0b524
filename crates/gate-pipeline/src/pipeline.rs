use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use circuit_breaker::CircuitBreaker;
use confluence_scorer::{ConfluenceInputs, ConfluenceScorer, MomentumReading, PriceLevels, ScoredSignal};
use execution_guard::{ExecutionGuard, ExecutionStatus};
use gate_core::{
    AccountContext, DecisionStatus, Direction, GateError, GateResult, MarketSnapshot, Outcome,
    SignalDecision, Stage,
};
use outcome_ledger::{FeatureSnapshot, OutcomeLedger, OutcomeRecord, TradeResult};
use regime_filter::{FundingStats, MarketStats, OiStats, RegimeAdjustments, RegimeBlock, RegimeClassifier};
use structure_tracker::StructureTracker;

use crate::config::{GateConfig, PipelineConfig};
use crate::metrics::PipelineMetrics;

pub const BREAKER_STATE_FILE: &str = "breaker_state.json";
pub const STRUCTURE_STATES_FILE: &str = "structure_states.json";

const RUNNING: u8 = 0;
const COMMITTED: u8 = 1;
const ABANDONED: u8 = 2;

/// Arbitrates between an evaluation reaching its commit step and the caller
/// giving up on it. Exactly one side wins.
pub struct CommitGate(AtomicU8);

impl CommitGate {
    pub fn new() -> Self {
        Self(AtomicU8::new(RUNNING))
    }

    fn try_commit(&self) -> bool {
        self.0
            .compare_exchange(RUNNING, COMMITTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn abandon(&self) -> bool {
        self.0
            .compare_exchange(RUNNING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for CommitGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry, protective stop and target ladder for an admitted signal
#[derive(Debug, Clone, PartialEq)]
struct TradePlan {
    entry: f64,
    stop_loss: f64,
    take_profit: Vec<f64>,
}

/// The signal quality gate.
///
/// Stages run in a fixed order and the first refusal wins:
/// input validation, circuit breaker, structure tracker, regime classifier,
/// confluence scorer (against the regime-adjusted minimum), execution guard,
/// trade planning, then the outcome ledger. Every decision names the stage
/// that produced it.
pub struct GatePipeline {
    config: PipelineConfig,
    breaker: CircuitBreaker,
    tracker: StructureTracker,
    regime: RegimeClassifier,
    scorer: ConfluenceScorer,
    guard: ExecutionGuard,
    ledger: OutcomeLedger,
    metrics: Mutex<PipelineMetrics>,
}

impl GatePipeline {
    /// Validate the configuration and build every component. State is
    /// loaded from `data_dir` when one is configured.
    pub fn new(config: GateConfig) -> GateResult<Self> {
        config.validate()?;
        let GateConfig {
            breaker,
            structure,
            scoring,
            execution,
            regime,
            pipeline,
        } = config;

        let (breaker, tracker, ledger) = match &pipeline.data_dir {
            Some(dir) => (
                CircuitBreaker::with_store(breaker, dir.join(BREAKER_STATE_FILE)),
                StructureTracker::with_store(structure, dir.join(STRUCTURE_STATES_FILE)),
                OutcomeLedger::open(dir),
            ),
            None => (
                CircuitBreaker::new(breaker),
                StructureTracker::new(structure),
                OutcomeLedger::in_memory(),
            ),
        };

        Ok(Self {
            metrics: Mutex::new(PipelineMetrics::new(pipeline.metrics_log_interval)),
            config: pipeline,
            breaker,
            tracker,
            regime: RegimeClassifier::new(regime),
            scorer: ConfluenceScorer::new(scoring),
            guard: ExecutionGuard::new(execution),
            ledger,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn tracker(&self) -> &StructureTracker {
        &self.tracker
    }

    pub fn regime(&self) -> &RegimeClassifier {
        &self.regime
    }

    pub fn ledger(&self) -> &OutcomeLedger {
        &self.ledger
    }

    pub fn metrics(&self) -> PipelineMetrics {
        self.metrics.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn evaluate(
        &self,
        symbol: &str,
        timeframe: &str,
        snapshot: &MarketSnapshot,
        account: &AccountContext,
    ) -> SignalDecision {
        self.evaluate_at(symbol, timeframe, snapshot, account, Utc::now())
    }

    pub fn evaluate_at(
        &self,
        symbol: &str,
        timeframe: &str,
        snapshot: &MarketSnapshot,
        account: &AccountContext,
        now: DateTime<Utc>,
    ) -> SignalDecision {
        self.evaluate_gated(symbol, timeframe, snapshot, account, now, None)
    }

    /// Run `evaluate` on the blocking pool under the configured deadline.
    /// A missed deadline is a `Rejected` decision at stage `Deadline`, and
    /// the abandoned evaluation is prevented from committing anything.
    pub async fn evaluate_with_deadline(
        self: &Arc<Self>,
        snapshot: MarketSnapshot,
        account: AccountContext,
    ) -> SignalDecision {
        let deadline = Duration::from_millis(self.config.deadline_ms);
        let symbol = snapshot.symbol.clone();
        let timeframe = snapshot.timeframe.clone();
        let (s, t) = (symbol.clone(), timeframe.clone());
        self.run_with_deadline(&symbol, &timeframe, deadline, move |pipeline, gate| {
            pipeline.evaluate_gated(&s, &t, &snapshot, &account, Utc::now(), Some(gate))
        })
        .await
    }

    pub(crate) async fn run_with_deadline<F>(
        self: &Arc<Self>,
        symbol: &str,
        timeframe: &str,
        deadline: Duration,
        job: F,
    ) -> SignalDecision
    where
        F: FnOnce(&GatePipeline, &CommitGate) -> SignalDecision + Send + 'static,
    {
        let gate = Arc::new(CommitGate::new());
        let pipeline = Arc::clone(self);
        let job_gate = Arc::clone(&gate);
        let mut handle = tokio::task::spawn_blocking(move || job(pipeline.as_ref(), job_gate.as_ref()));

        match tokio::time::timeout(deadline, &mut handle).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                tracing::error!("Evaluation task for {}:{} failed: {}", symbol, timeframe, e);
                self.deadline_refusal(symbol, timeframe, format!("evaluation task failed: {e}"))
            }
            Err(_) if gate.abandon() => {
                tracing::warn!(
                    "Evaluation for {}:{} exceeded {}ms deadline",
                    symbol,
                    timeframe,
                    deadline.as_millis()
                );
                if let Ok(mut m) = self.metrics.lock() {
                    m.deadline_exceeded += 1;
                }
                self.deadline_refusal(
                    symbol,
                    timeframe,
                    format!("evaluation exceeded {}ms deadline", deadline.as_millis()),
                )
            }
            // Already committed: the trade exists, so report it
            Err(_) => match handle.await {
                Ok(decision) => decision,
                Err(e) => self.deadline_refusal(symbol, timeframe, format!("evaluation task failed: {e}")),
            },
        }
    }

    fn deadline_refusal(&self, symbol: &str, timeframe: &str, reason: String) -> SignalDecision {
        SignalDecision::rejected(Stage::Deadline, symbol, timeframe, vec![reason], Utc::now())
    }

    pub(crate) fn evaluate_gated(
        &self,
        symbol: &str,
        timeframe: &str,
        snapshot: &MarketSnapshot,
        account: &AccountContext,
        now: DateTime<Utc>,
        gate: Option<&CommitGate>,
    ) -> SignalDecision {
        let started = PipelineMetrics::start_timer();
        let decision = self.run(symbol, timeframe, snapshot, account, now, gate);
        self.finish(&decision, started);
        decision
    }

    fn finish(&self, decision: &SignalDecision, started: Instant) {
        let headline = decision.reasons.first().map(String::as_str).unwrap_or_default();
        match decision.status {
            DecisionStatus::Approved => tracing::info!(
                "{}:{} approved {} score={:.1} trade={}",
                decision.symbol,
                decision.timeframe,
                decision.direction.as_str(),
                decision.score,
                decision.trade_id.as_deref().unwrap_or_default()
            ),
            status => tracing::info!(
                "{}:{} {:?} at {}: {}",
                decision.symbol,
                decision.timeframe,
                status,
                decision.stage,
                headline
            ),
        }
        if let Ok(mut m) = self.metrics.lock() {
            m.record_decision(decision, started);
        }
    }

    fn run(
        &self,
        symbol: &str,
        timeframe: &str,
        snapshot: &MarketSnapshot,
        account: &AccountContext,
        now: DateTime<Utc>,
        gate: Option<&CommitGate>,
    ) -> SignalDecision {
        let reject = |stage: Stage, reason: String| {
            SignalDecision::rejected(stage, symbol, timeframe, vec![reason], now)
        };

        // Input validation, before any stateful component is touched
        if snapshot.symbol != symbol || snapshot.timeframe != timeframe {
            return reject(
                Stage::InputValidation,
                format!(
                    "snapshot is for {}:{}, not {}:{}",
                    snapshot.symbol, snapshot.timeframe, symbol, timeframe
                ),
            );
        }
        if let Err(e) = snapshot.validate().and_then(|_| self.check_fresh(snapshot, now)) {
            return reject(Stage::InputValidation, e.to_string());
        }
        if !account.equity.is_finite() || account.equity <= 0.0 {
            return reject(
                Stage::InputValidation,
                format!("account equity {} must be finite and positive", account.equity),
            );
        }
        let notional = account.notional_override.unwrap_or(self.config.default_notional);
        if !notional.is_finite() || notional <= 0.0 {
            return reject(Stage::InputValidation, format!("order notional {notional} must be positive"));
        }

        // Circuit breaker
        let permission = self.breaker.check_permission_at(symbol, now);
        if !permission.allowed {
            return SignalDecision::blocked(Stage::CircuitBreaker, symbol, timeframe, vec![permission.reason], now);
        }
        if let Err(e) = self.breaker.update_equity_at(account.equity, now) {
            return SignalDecision::blocked(Stage::CircuitBreaker, symbol, timeframe, vec![e.to_string()], now);
        }

        // Market structure
        let structure = match self.tracker.apply_snapshot(symbol, timeframe, snapshot, snapshot.close) {
            Ok(update) if update.applied => update.state,
            Ok(_) => {
                return reject(
                    Stage::StructureTracker,
                    format!(
                        "snapshot at {} is not newer than the last one processed for {}:{}",
                        snapshot.timestamp_unix_ms, symbol, timeframe
                    ),
                )
            }
            Err(e) => return reject(Stage::StructureTracker, e.to_string()),
        };
        let atr = structure.atr(self.tracker.config().atr_period);
        tracing::debug!(
            "{}:{} structure trend={:?} last_break={:?} atr={:?}",
            symbol,
            timeframe,
            structure.trend,
            structure.last_break.map(|b| b.kind),
            atr
        );

        // Regime
        let regime_state = match self.regime.classify(
            &MarketStats {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
                atr,
                price: snapshot.close,
            },
            &FundingStats { rate: snapshot.funding_rate },
            &OiStats { open_interest: snapshot.open_interest },
        ) {
            Ok(state) => state,
            Err(e) => return reject(Stage::RegimeFilter, e.to_string()),
        };

        // Confluence
        let scoring = self.scorer.config();
        let momentum = MomentumReading::from_closes(&structure.closes(), scoring.rsi_period, scoring.roc_period);
        let signal = self.scorer.score(&ConfluenceInputs {
            structure: Some(&structure),
            orderbook: Some(&snapshot.orderbook),
            volatility: Some(regime_state.volatility_regime),
            momentum: Some(momentum),
            funding_rate: snapshot.funding_rate,
            sentiment: snapshot.sentiment_score,
            reference_price: snapshot.close,
        });
        let mut reasons = signal.reasons.clone();

        if !signal.direction.is_actionable() {
            reasons.insert(0, "no directional market structure".to_string());
            return scored_refusal(Stage::ConfluenceScorer, symbol, timeframe, &signal, reasons, now);
        }

        let verdict = self.regime.decide(&regime_state, signal.direction, signal.score, signal.signal_type);
        if !verdict.allowed {
            let stage = match verdict.block {
                Some(RegimeBlock::CrowdedFunding) => Stage::RegimeFilter,
                _ => Stage::ConfluenceScorer,
            };
            reasons.insert(0, verdict.reason);
            return scored_refusal(stage, symbol, timeframe, &signal, reasons, now);
        }
        reasons.push(verdict.reason.clone());
        let adjustments = verdict.adjustments;

        // Execution quality for the regime-sized order
        let order_notional = notional * adjustments.position_size_multiplier;
        let execution = self.guard.check(symbol, signal.direction, order_notional, &snapshot.orderbook);
        match execution.status {
            ExecutionStatus::Rejected => {
                let mut refused = vec![format!("execution rejected: {}", execution.reasons.join("; "))];
                refused.extend(reasons);
                return scored_refusal(Stage::ExecutionGuard, symbol, timeframe, &signal, refused, now);
            }
            ExecutionStatus::Warning => {
                reasons.push(format!("execution warning: {}", execution.reasons.join("; ")));
            }
            ExecutionStatus::Approved => {}
        }

        let Some(plan) = self.plan_trade(signal.direction, snapshot.close, atr, &signal.levels, &adjustments)
        else {
            reasons.insert(0, "no usable volatility or structure level for a protective stop".to_string());
            return scored_refusal(Stage::StructureTracker, symbol, timeframe, &signal, reasons, now);
        };

        // Commit: side effects only past this point
        if let Some(gate) = gate {
            if !gate.try_commit() {
                reasons.insert(0, "deadline passed before the decision was committed".to_string());
                return scored_refusal(Stage::Deadline, symbol, timeframe, &signal, reasons, now);
            }
        }
        // Limits are re-checked and the signal counted under one breaker lock
        let admission = self.breaker.try_admit_signal_at(symbol, now);
        if !admission.allowed {
            return SignalDecision::blocked(Stage::CircuitBreaker, symbol, timeframe, vec![admission.reason], now);
        }

        let mut record = OutcomeRecord::new(
            symbol,
            timeframe,
            signal.direction,
            signal.signal_type,
            signal.score,
            plan.entry,
            FeatureSnapshot {
                trend: structure.trend,
                last_break: structure.last_break,
                breakdown: signal.breakdown,
                regime: Some(regime_state),
                execution: Some(execution),
                funding_rate: snapshot.funding_rate,
                open_interest: snapshot.open_interest,
                sentiment: snapshot.sentiment_score,
                reasons: reasons.clone(),
            },
            now,
        );
        record.stop_loss = Some(plan.stop_loss);
        record.take_profit = plan.take_profit.clone();
        record.position_size_multiplier = adjustments.position_size_multiplier;
        record.notional = order_notional;

        let trade_id = match self.ledger.open_trade(record) {
            Ok(id) => id,
            Err(e) => {
                reasons.insert(0, format!("could not record trade: {e}"));
                return scored_refusal(Stage::OutcomeLedger, symbol, timeframe, &signal, reasons, now);
            }
        };

        SignalDecision {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            status: DecisionStatus::Approved,
            stage: Stage::Complete,
            direction: signal.direction,
            score: signal.score,
            confidence_tier: signal.tier,
            entry: Some(plan.entry),
            stop_loss: Some(plan.stop_loss),
            take_profit: plan.take_profit,
            position_size_multiplier: adjustments.position_size_multiplier,
            reasons,
            trade_id: Some(trade_id),
            timestamp: now,
        }
    }

    fn check_fresh(&self, snapshot: &MarketSnapshot, now: DateTime<Utc>) -> GateResult<()> {
        let age_ms = snapshot.age_ms(now);
        let max_age_ms = self.config.max_snapshot_age_ms;
        if age_ms > max_age_ms {
            return Err(GateError::StaleData { age_ms, max_age_ms });
        }
        if -age_ms > max_age_ms {
            return Err(GateError::InputValidation(format!(
                "snapshot timestamp is {}ms in the future",
                -age_ms
            )));
        }
        Ok(())
    }

    /// ATR stop scaled by the regime, pulled in to the nearest structure
    /// level when that is closer; targets at R-multiples of the risk.
    fn plan_trade(
        &self,
        direction: Direction,
        entry: f64,
        atr: Option<f64>,
        levels: &PriceLevels,
        adjustments: &RegimeAdjustments,
    ) -> Option<TradePlan> {
        let sign = direction.sign();
        let atr_stop = atr
            .filter(|a| a.is_finite() && *a > 0.0)
            .map(|a| entry - sign * a * self.config.stop_atr_multiple * adjustments.stop_multiplier);
        let structural = match direction {
            Direction::Buy => levels.support.filter(|s| *s < entry),
            Direction::Sell => levels.resistance.filter(|r| *r > entry),
            Direction::Hold => None,
        };

        let stop_loss = match (atr_stop, structural) {
            (Some(a), Some(s)) if (entry - s).abs() < (entry - a).abs() => s,
            (Some(a), _) => a,
            (None, Some(s)) => s,
            (None, None) => return None,
        };
        let risk = (entry - stop_loss).abs();
        if !stop_loss.is_finite() || stop_loss <= 0.0 || risk <= 0.0 {
            return None;
        }

        let take_profit = self
            .config
            .take_profit_r
            .iter()
            .map(|r| entry + sign * r * adjustments.target_multiplier * risk)
            .filter(|p| *p > 0.0)
            .collect();

        Some(TradePlan {
            entry,
            stop_loss,
            take_profit,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn report_outcome(
        &self,
        trade_id: &str,
        outcome: Outcome,
        exit_price: f64,
        pnl: f64,
        hold_time_minutes: i64,
        exit_reason: &str,
    ) -> GateResult<OutcomeRecord> {
        self.report_outcome_at(trade_id, outcome, exit_price, pnl, hold_time_minutes, exit_reason, Utc::now())
    }

    /// Sole feedback path: the ledger finalises the record first, then the
    /// breaker sees the result. If the breaker cannot record it, the breaker
    /// is forced open so the lost loss cannot be traded through.
    #[allow(clippy::too_many_arguments)]
    pub fn report_outcome_at(
        &self,
        trade_id: &str,
        outcome: Outcome,
        exit_price: f64,
        pnl: f64,
        hold_time_minutes: i64,
        exit_reason: &str,
        now: DateTime<Utc>,
    ) -> GateResult<OutcomeRecord> {
        if !pnl.is_finite() {
            return Err(GateError::InputValidation(format!("pnl {pnl} must be finite")));
        }
        if !exit_price.is_finite() || exit_price <= 0.0 {
            return Err(GateError::InputValidation(format!(
                "exit price {exit_price} must be finite and positive"
            )));
        }
        let record = self.ledger.report_outcome_at(
            trade_id,
            TradeResult {
                outcome,
                exit_price,
                pnl,
                hold_time_minutes,
                exit_reason: exit_reason.to_string(),
            },
            now,
        )?;
        if let Err(e) = self.breaker.record_outcome_at(&record.symbol, outcome, pnl, now) {
            tracing::error!("Breaker could not record outcome for {}: {}", trade_id, e);
            if let Err(trip) = self
                .breaker
                .force_open_at(&format!("outcome for {trade_id} not recorded: {e}"), now)
            {
                tracing::error!("Failed to force the breaker open: {}", trip);
            }
            return Err(e);
        }
        if let Ok(mut m) = self.metrics.lock() {
            m.record_outcome(outcome, pnl);
        }
        Ok(record)
    }
}

fn scored_refusal(
    stage: Stage,
    symbol: &str,
    timeframe: &str,
    signal: &ScoredSignal,
    reasons: Vec<String>,
    now: DateTime<Utc>,
) -> SignalDecision {
    let mut decision = SignalDecision::rejected(stage, symbol, timeframe, reasons, now);
    decision.direction = signal.direction;
    decision.score = signal.score;
    decision.confidence_tier = signal.tier;
    decision
}
