use std::collections::BTreeMap;
use std::time::Instant;

use gate_core::{DecisionStatus, Outcome, SignalDecision};
use serde::Serialize;

/// Running counters for the gate, logged periodically through tracing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineMetrics {
    pub evaluations: u64,
    pub approved: u64,
    pub rejected: u64,
    pub blocked: u64,
    /// Rejections and blocks keyed by the stage that produced them
    pub refused_by_stage: BTreeMap<String, u64>,
    /// Evaluations abandoned by the caller after the deadline
    pub deadline_exceeded: u64,
    pub outcomes_reported: u64,
    pub wins: u64,
    pub losses: u64,
    pub total_pnl: f64,
    pub last_evaluation_ms: u64,
    pub max_evaluation_ms: u64,
    #[serde(skip)]
    log_interval: u64,
}

impl PipelineMetrics {
    pub fn new(log_interval: u64) -> Self {
        Self {
            log_interval,
            ..Default::default()
        }
    }

    pub fn start_timer() -> Instant {
        Instant::now()
    }

    pub fn record_decision(&mut self, decision: &SignalDecision, started: Instant) {
        let elapsed = started.elapsed().as_millis() as u64;
        self.last_evaluation_ms = elapsed;
        self.max_evaluation_ms = self.max_evaluation_ms.max(elapsed);
        self.evaluations += 1;

        match decision.status {
            DecisionStatus::Approved => self.approved += 1,
            DecisionStatus::Rejected => self.rejected += 1,
            DecisionStatus::Blocked => self.blocked += 1,
        }
        if decision.status != DecisionStatus::Approved {
            *self
                .refused_by_stage
                .entry(decision.stage.as_str().to_string())
                .or_default() += 1;
        }

        if self.log_interval > 0 && self.evaluations.is_multiple_of(self.log_interval) {
            self.log_metrics();
        }
    }

    pub fn record_outcome(&mut self, outcome: Outcome, pnl: f64) {
        self.outcomes_reported += 1;
        match outcome {
            Outcome::Win => self.wins += 1,
            Outcome::Loss => self.losses += 1,
            Outcome::Pending => {}
        }
        self.total_pnl += pnl;
    }

    /// Share of evaluations approved (0-100%)
    pub fn approval_rate(&self) -> f64 {
        if self.evaluations == 0 {
            return 0.0;
        }
        self.approved as f64 / self.evaluations as f64 * 100.0
    }

    pub fn win_rate(&self) -> f64 {
        let total = self.wins + self.losses;
        if total == 0 {
            return 0.0;
        }
        self.wins as f64 / total as f64 * 100.0
    }

    pub fn log_metrics(&self) {
        tracing::info!(
            evaluations = self.evaluations,
            approved = self.approved,
            rejected = self.rejected,
            blocked = self.blocked,
            approval_rate = format!("{:.1}%", self.approval_rate()),
            refused_by_stage = ?self.refused_by_stage,
            deadline_exceeded = self.deadline_exceeded,
            outcomes = self.outcomes_reported,
            win_rate = format!("{:.1}%", self.win_rate()),
            total_pnl = format!("{:.2}", self.total_pnl),
            last_eval_ms = self.last_evaluation_ms,
            max_eval_ms = self.max_evaluation_ms,
            "Gate metrics summary"
        );
    }
}
