use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use gate_core::{GateError, GateResult, JsonStore, JsonlLog, Outcome};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::models::*;

pub const ACTIVE_TRADES_FILE: &str = "active_trades.json";
pub const DAILY_STATS_FILE: &str = "daily_stats.json";
pub const TRADE_LOG_FILE: &str = "trade_log.jsonl";

type ActiveTrades = BTreeMap<String, OutcomeRecord>;
type DailyLedger = BTreeMap<NaiveDate, LedgerDayStats>;

struct LedgerStores {
    active: JsonStore<ActiveTrades>,
    daily: JsonStore<DailyLedger>,
    log: JsonlLog<OutcomeRecord>,
}

pub struct OutcomeLedger {
    active: Mutex<ActiveTrades>,
    daily: Mutex<DailyLedger>,
    /// Finalised records when running without a data directory
    closed: Mutex<Vec<OutcomeRecord>>,
    stores: Option<LedgerStores>,
}

impl OutcomeLedger {
    pub fn in_memory() -> Self {
        Self {
            active: Mutex::new(BTreeMap::new()),
            daily: Mutex::new(BTreeMap::new()),
            closed: Mutex::new(Vec::new()),
            stores: None,
        }
    }

    /// Ledger persisted under `dir`. Missing files start empty.
    pub fn open(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let stores = LedgerStores {
            active: JsonStore::new(dir.join(ACTIVE_TRADES_FILE)),
            daily: JsonStore::new(dir.join(DAILY_STATS_FILE)),
            log: JsonlLog::new(dir.join(TRADE_LOG_FILE)),
        };
        let mut active: ActiveTrades = stores.active.load_or_default();
        reconcile_with_log(&stores, &mut active);
        let daily = stores.daily.load_or_default();
        tracing::info!(
            "Outcome ledger opened at {} ({} active trades)",
            dir.display(),
            active.len()
        );
        Self {
            active: Mutex::new(active),
            daily: Mutex::new(daily),
            closed: Mutex::new(Vec::new()),
            stores: Some(stores),
        }
    }

    fn lock_active(&self) -> GateResult<MutexGuard<'_, ActiveTrades>> {
        self.active.lock().map_err(|_| GateError::poisoned("active trades"))
    }

    fn lock_daily(&self) -> GateResult<MutexGuard<'_, DailyLedger>> {
        self.daily.lock().map_err(|_| GateError::poisoned("daily stats"))
    }

    /// Record a newly admitted decision. Fails (and keeps nothing) if the
    /// active set cannot be persisted.
    pub fn open_trade(&self, record: OutcomeRecord) -> GateResult<String> {
        if record.outcome != Outcome::Pending || record.is_closed() {
            return Err(GateError::InputValidation(format!(
                "trade {} is already resolved",
                record.trade_id
            )));
        }
        if !record.direction.is_actionable() {
            return Err(GateError::InputValidation("cannot open a Hold trade".into()));
        }
        if !record.entry.is_finite() || record.entry <= 0.0 {
            return Err(GateError::InputValidation(format!(
                "invalid entry price {}",
                record.entry
            )));
        }

        let trade_id = record.trade_id.clone();
        let opened_on = record.created_at.date_naive();
        let summary = format!(
            "{} {} {} score={:.1}",
            record.symbol,
            record.timeframe,
            record.direction.as_str(),
            record.score
        );
        {
            let mut active = self.lock_active()?;
            if active.contains_key(&trade_id) {
                return Err(GateError::InputValidation(format!(
                    "duplicate trade id {trade_id}"
                )));
            }
            active.insert(trade_id.clone(), record);
            if let Some(stores) = &self.stores {
                if let Err(e) = stores.active.save(&active) {
                    active.remove(&trade_id);
                    tracing::error!("Failed to persist new trade {}: {}", trade_id, e);
                    return Err(e);
                }
            }
        }

        let mut daily = self.lock_daily()?;
        daily.entry(opened_on).or_default().opened += 1;
        self.persist_daily(&daily);

        tracing::info!("Opened trade {} {}", trade_id, summary);
        Ok(trade_id)
    }

    pub fn report_outcome(&self, trade_id: &str, result: TradeResult) -> GateResult<OutcomeRecord> {
        self.report_outcome_at(trade_id, result, Utc::now())
    }

    /// Attach the terminal outcome to an active trade and move it to the log.
    pub fn report_outcome_at(
        &self,
        trade_id: &str,
        result: TradeResult,
        now: DateTime<Utc>,
    ) -> GateResult<OutcomeRecord> {
        if result.outcome == Outcome::Pending {
            return Err(GateError::InputValidation(
                "Pending is not a terminal outcome".into(),
            ));
        }
        let pnl = Decimal::from_f64(result.pnl).ok_or_else(|| {
            GateError::InputValidation(format!("pnl {} is not representable", result.pnl))
        })?;
        if !result.exit_price.is_finite() || result.exit_price <= 0.0 {
            return Err(GateError::InputValidation(format!(
                "invalid exit price {}",
                result.exit_price
            )));
        }
        if result.hold_time_minutes < 0 {
            return Err(GateError::InputValidation("hold time cannot be negative".into()));
        }

        let record = {
            let mut active = self.lock_active()?;
            let Some(open) = active.remove(trade_id) else {
                return Err(GateError::UnknownTrade(trade_id.to_string()));
            };

            let mut record = open.clone();
            record.outcome = result.outcome;
            record.exit_price = Some(result.exit_price);
            record.pnl = Some(pnl);
            record.hold_time_minutes = Some(result.hold_time_minutes);
            record.exit_reason = Some(result.exit_reason);
            record.closed_at = Some(now);

            // Active set first: a crash between the two writes leaves the
            // trade neither active nor logged, never both.
            if let Some(stores) = &self.stores {
                if let Err(e) = stores.active.save(&active) {
                    active.insert(trade_id.to_string(), open);
                    tracing::error!(
                        "Failed to persist active trades while closing {}: {}",
                        trade_id,
                        e
                    );
                    return Err(e);
                }
            }
            if let Err(e) = self.append_closed(&record) {
                active.insert(trade_id.to_string(), open);
                tracing::error!("Failed to log outcome for {}: {}", trade_id, e);
                if let Some(stores) = &self.stores {
                    if let Err(e) = stores.active.save(&active) {
                        tracing::error!("Failed to restore active trade {}: {}", trade_id, e);
                    }
                }
                return Err(e);
            }
            record
        };

        let mut daily = self.lock_daily()?;
        let day = daily.entry(now.date_naive()).or_default();
        day.closed += 1;
        match record.outcome {
            Outcome::Win => day.wins += 1,
            Outcome::Loss => day.losses += 1,
            Outcome::Pending => {}
        }
        day.total_pnl += pnl;
        self.persist_daily(&daily);

        tracing::info!(
            "Closed trade {} {} {:?} pnl={} ({})",
            record.trade_id,
            record.symbol,
            record.outcome,
            pnl,
            record.exit_reason.as_deref().unwrap_or_default()
        );
        Ok(record)
    }

    fn append_closed(&self, record: &OutcomeRecord) -> GateResult<()> {
        match &self.stores {
            Some(stores) => stores.log.append(record),
            None => {
                self.closed
                    .lock()
                    .map_err(|_| GateError::poisoned("trade log"))?
                    .push(record.clone());
                Ok(())
            }
        }
    }

    fn persist_daily(&self, daily: &DailyLedger) {
        if let Some(stores) = &self.stores {
            if let Err(e) = stores.daily.save(daily) {
                tracing::error!("Failed to persist daily stats: {}", e);
            }
        }
    }

    pub fn active_trades(&self) -> GateResult<Vec<OutcomeRecord>> {
        Ok(self.lock_active()?.values().cloned().collect())
    }

    pub fn active_trade(&self, trade_id: &str) -> GateResult<Option<OutcomeRecord>> {
        Ok(self.lock_active()?.get(trade_id).cloned())
    }

    pub fn daily_stats(&self) -> GateResult<BTreeMap<NaiveDate, LedgerDayStats>> {
        Ok(self.lock_daily()?.clone())
    }

    /// Every finalised record, oldest first
    pub fn read_log(&self) -> GateResult<Vec<OutcomeRecord>> {
        match &self.stores {
            Some(stores) => stores.log.read_all(),
            None => Ok(self
                .closed
                .lock()
                .map_err(|_| GateError::poisoned("trade log"))?
                .clone()),
        }
    }

    /// Aggregate resolved trades closed at or after `since` (all when None).
    pub fn performance_summary(&self, since: Option<DateTime<Utc>>) -> GateResult<PerformanceSummary> {
        let records: Vec<OutcomeRecord> = self
            .read_log()?
            .into_iter()
            .filter(|r| r.outcome != Outcome::Pending)
            .filter(|r| match (since, r.closed_at) {
                (Some(since), Some(closed)) => closed >= since,
                (Some(_), None) => false,
                (None, _) => true,
            })
            .collect();
        Ok(summarize(&records))
    }
}

/// Drop active entries whose outcome is already in the trade log.
fn reconcile_with_log(stores: &LedgerStores, active: &mut ActiveTrades) {
    if active.is_empty() {
        return;
    }
    let logged = match stores.log.read_all() {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!("Could not read trade log to reconcile active trades: {}", e);
            return;
        }
    };
    let before = active.len();
    for record in &logged {
        if active.remove(&record.trade_id).is_some() {
            tracing::warn!(
                "Trade {} is already finalised in the log, dropping it from the active set",
                record.trade_id
            );
        }
    }
    if active.len() != before {
        if let Err(e) = stores.active.save(active) {
            tracing::error!("Failed to persist reconciled active trades: {}", e);
        }
    }
}

fn summarize(records: &[OutcomeRecord]) -> PerformanceSummary {
    let mut summary = PerformanceSummary::default();
    if records.is_empty() {
        return summary;
    }

    let mut hold_total = 0i64;
    let mut hold_count = 0u32;
    for r in records {
        let pnl = r.pnl.unwrap_or(Decimal::ZERO);
        summary.total_trades += 1;
        match r.outcome {
            Outcome::Win => summary.wins += 1,
            Outcome::Loss => summary.losses += 1,
            Outcome::Pending => {}
        }
        summary.total_pnl += pnl;
        if pnl > Decimal::ZERO {
            summary.gross_profit += pnl;
        } else if pnl < Decimal::ZERO {
            summary.gross_loss += pnl.abs();
        }
        if let Some(h) = r.hold_time_minutes {
            hold_total += h;
            hold_count += 1;
        }

        summary
            .by_tier
            .entry(r.confidence_tier.name().to_string())
            .or_default()
            .add(r.outcome, pnl);
        let regime = r
            .features
            .regime
            .as_ref()
            .map(|s| s.volatility_regime.name())
            .unwrap_or("unknown");
        summary
            .by_regime
            .entry(regime.to_string())
            .or_default()
            .add(r.outcome, pnl);
    }

    let resolved = summary.wins + summary.losses;
    if resolved > 0 {
        summary.win_rate = Some(summary.wins as f64 / resolved as f64);
    }
    summary.average_pnl = Some(summary.total_pnl / Decimal::from(summary.total_trades));
    if hold_count > 0 {
        summary.average_hold_minutes = Some(hold_total as f64 / hold_count as f64);
    }
    summary.profit_factor = {
        let gp = summary.gross_profit.to_f64().unwrap_or(0.0);
        let gl = summary.gross_loss.to_f64().unwrap_or(0.0);
        if gl > 0.0 {
            Some(gp / gl)
        } else if gp > 0.0 {
            Some(f64::INFINITY)
        } else {
            None
        }
    };
    summary
}
