//! Durable record of every admitted decision and its eventual outcome.
//!
//! Open trades live in `active_trades.json` until their outcome is reported,
//! then move to the append-only `trade_log.jsonl`. Per-day counters are kept
//! in `daily_stats.json`.

pub mod ledger;
pub mod models;

pub use ledger::OutcomeLedger;
pub use models::*;
