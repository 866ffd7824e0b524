//! Deterministic structure rules.
//!
//! Each snapshot runs, in order: window bookkeeping and expiry, swing
//! detection, break detection (with zone creation), liquidity sweeps.

use gate_core::adaptive::mean;
use gate_core::{Candle, Direction, Trend};

use crate::models::*;

/// Apply one candle to the state. Returns false if the candle is not newer
/// than the last one processed (state untouched).
pub fn apply(
    state: &mut StructureState,
    config: &StructureConfig,
    candle: Candle,
    current_price: f64,
) -> bool {
    if state
        .last_timestamp_ms
        .is_some_and(|last| candle.timestamp_ms <= last)
    {
        return false;
    }

    state.sequence += 1;
    state.last_timestamp_ms = Some(candle.timestamp_ms);
    state.candles.push_back(candle);
    while state.candles.len() > config.lookback_periods {
        state.candles.pop_front();
    }

    expire(state, config, &candle);
    detect_swings(state, config, &candle);
    let broke = detect_breaks(state, config, &candle, current_price);
    detect_sweeps(state, config, &candle, current_price, broke);
    true
}

/// Evict expired zones and stale sweeps, mark imbalances price traded through.
fn expire(state: &mut StructureState, config: &StructureConfig, candle: &Candle) {
    let seq = state.sequence;
    let alive = |created: u64| seq.saturating_sub(created) <= config.ob_validity_periods;

    state.bullish_zones.retain(|z| alive(z.created_seq));
    state.bearish_zones.retain(|z| alive(z.created_seq));
    state.imbalance_zones.retain(|z| alive(z.created_seq));

    for zone in state.imbalance_zones.iter_mut().filter(|z| !z.filled) {
        zone.filled = match zone.direction {
            Direction::Buy => candle.low <= zone.low,
            Direction::Sell => candle.high >= zone.high,
            Direction::Hold => false,
        };
    }

    let window_ms = config.sweep_window_minutes * 60_000;
    state
        .liquidity_sweeps
        .retain(|s| candle.timestamp_ms - s.timestamp_ms <= window_ms);
}

fn detect_swings(state: &mut StructureState, config: &StructureConfig, candle: &Candle) {
    let retrace = config.min_swing_change_pct / 100.0;

    // Highest high in the window, earliest on ties
    let extreme_high = state
        .candles
        .iter()
        .fold(None::<&Candle>, |best, c| match best {
            Some(b) if b.high >= c.high => Some(b),
            _ => Some(c),
        })
        .map(|c| (c.timestamp_ms, c.high));
    let extreme_low = state
        .candles
        .iter()
        .fold(None::<&Candle>, |best, c| match best {
            Some(b) if b.low <= c.low => Some(b),
            _ => Some(c),
        })
        .map(|c| (c.timestamp_ms, c.low));

    if let Some((ts, price)) = extreme_high {
        let confirmed = candle.close <= price * (1.0 - retrace);
        update_swing_list(&mut state.swing_highs, ts, price, confirmed, config.max_swings);
    }
    if let Some((ts, price)) = extreme_low {
        let confirmed = candle.close >= price * (1.0 + retrace);
        update_swing_list(&mut state.swing_lows, ts, price, confirmed, config.max_swings);
    }
}

/// The tail may hold one unconfirmed candidate, refreshed every update.
fn update_swing_list(
    swings: &mut Vec<SwingPoint>,
    timestamp_ms: i64,
    price: f64,
    confirmed: bool,
    max: usize,
) {
    if swings.last().is_some_and(|s| !s.confirmed) {
        swings.pop();
    }
    let newer = swings
        .last()
        .map_or(true, |last| timestamp_ms > last.timestamp_ms);
    if !newer {
        return;
    }
    swings.push(SwingPoint {
        timestamp_ms,
        price,
        confirmed,
    });
    while swings.len() > max {
        swings.remove(0);
    }
}

/// Returns the direction of any break that fired this update.
fn detect_breaks(
    state: &mut StructureState,
    config: &StructureConfig,
    candle: &Candle,
    price: f64,
) -> Option<Direction> {
    let margin = config.bos_confirmation_pct / 100.0;

    let up = state
        .last_confirmed_high()
        .filter(|s| state.consumed_high_ts != Some(s.timestamp_ms))
        .filter(|s| price >= s.price * (1.0 + margin))
        .copied();
    let down = state
        .last_confirmed_low()
        .filter(|s| state.consumed_low_ts != Some(s.timestamp_ms))
        .filter(|s| price <= s.price * (1.0 - margin))
        .copied();

    let fresh = match (up, down) {
        (Some(level), _) => Some((Direction::Buy, level)),
        (None, Some(level)) => Some((Direction::Sell, level)),
        (None, None) => None,
    };

    let Some((direction, level)) = fresh else {
        advance_pending_choch(state, config, candle, price);
        return None;
    };

    match direction {
        Direction::Buy => state.consumed_high_ts = Some(level.timestamp_ms),
        _ => state.consumed_low_ts = Some(level.timestamp_ms),
    }

    let with_trend = state.trend == Trend::Neutral || state.trend.direction() == direction;
    if with_trend {
        // BOS wins over any CHoCH that would confirm on the same snapshot.
        state.pending_choch = None;
        confirm_break(state, config, candle, BreakKind::Bos, direction, price, level.price);
        tracing::debug!(
            "{}:{} BOS {} through {:.4} at {:.4}",
            state.symbol,
            state.timeframe,
            direction.as_str(),
            level.price,
            price
        );
    } else {
        state.pending_choch = Some(PendingChoch {
            direction,
            level: level.price,
            break_price: price,
            timestamp_ms: candle.timestamp_ms,
            periods_held: 0,
        });
        if config.choch_retest_periods == 0 {
            confirm_pending(state, config, candle);
        }
    }
    Some(direction)
}

fn advance_pending_choch(
    state: &mut StructureState,
    config: &StructureConfig,
    candle: &Candle,
    price: f64,
) {
    let Some(pending) = state.pending_choch.as_mut() else {
        return;
    };
    let holds = match pending.direction {
        Direction::Buy => price > pending.level,
        Direction::Sell => price < pending.level,
        Direction::Hold => false,
    };
    if !holds {
        tracing::debug!(
            "{}:{} CHoCH {} failed retest at {:.4}",
            state.symbol,
            state.timeframe,
            pending.direction.as_str(),
            price
        );
        state.pending_choch = None;
        return;
    }
    pending.periods_held += 1;
    if pending.periods_held >= config.choch_retest_periods {
        confirm_pending(state, config, candle);
    }
}

fn confirm_pending(state: &mut StructureState, config: &StructureConfig, candle: &Candle) {
    if let Some(pending) = state.pending_choch.take() {
        confirm_break(
            state,
            config,
            candle,
            BreakKind::Choch,
            pending.direction,
            pending.break_price,
            pending.level,
        );
        tracing::debug!(
            "{}:{} CHoCH {} confirmed at level {:.4}",
            state.symbol,
            state.timeframe,
            pending.direction.as_str(),
            pending.level
        );
    }
}

fn confirm_break(
    state: &mut StructureState,
    config: &StructureConfig,
    candle: &Candle,
    kind: BreakKind,
    direction: Direction,
    break_price: f64,
    reference_level: f64,
) {
    state.trend = match direction {
        Direction::Buy => Trend::Bullish,
        Direction::Sell => Trend::Bearish,
        Direction::Hold => state.trend,
    };
    state.last_break = Some(StructureBreak {
        kind,
        direction,
        break_price,
        reference_level,
        timestamp_ms: candle.timestamp_ms,
    });
    create_order_block(state, config, candle, direction);
    create_imbalance(state, config, candle);
}

/// Order block: the last opposite-coloured candle before the break candle,
/// else the candle right before it.
fn create_order_block(
    state: &mut StructureState,
    config: &StructureConfig,
    candle: &Candle,
    direction: Direction,
) {
    let n = state.candles.len();
    let prior = state.candles.iter().take(n.saturating_sub(1));
    let origin = match direction {
        Direction::Buy => prior.clone().rev().find(|c| c.is_bearish()),
        _ => prior.clone().rev().find(|c| c.is_bullish()),
    }
    .or_else(|| prior.last())
    .copied()
    .unwrap_or(*candle);

    let zone = Zone {
        price: origin.open,
        low: origin.low,
        high: origin.high,
        created_at_ms: candle.timestamp_ms,
        created_seq: state.sequence,
        quality_score: zone_quality(state, candle),
    };
    let zones = match direction {
        Direction::Buy => &mut state.bullish_zones,
        _ => &mut state.bearish_zones,
    };
    zones.push(zone);
    while zones.len() > config.max_zones {
        zones.remove(0);
    }
}

/// Displacement of the break candle and its volume, each against the
/// window average, blended into [0, 1].
fn zone_quality(state: &StructureState, candle: &Candle) -> f64 {
    let ranges: Vec<f64> = state.candles.iter().map(|c| c.high - c.low).collect();
    let volumes: Vec<f64> = state.candles.iter().map(|c| c.volume).collect();
    let avg_range = mean(&ranges);
    let avg_volume = mean(&volumes);

    let displacement = if avg_range > 0.0 {
        ((candle.close - candle.open).abs() / avg_range).min(1.0)
    } else {
        0.0
    };
    let volume = if avg_volume > 0.0 {
        (candle.volume / avg_volume / 2.0).min(1.0)
    } else {
        0.0
    };
    (0.5 * displacement + 0.5 * volume).clamp(0.0, 1.0)
}

fn create_imbalance(state: &mut StructureState, config: &StructureConfig, candle: &Candle) {
    let n = state.candles.len();
    if n < 3 {
        return;
    }
    let first = state.candles[n - 3];
    let gap = if candle.low > first.high {
        Some((Direction::Buy, first.high, candle.low))
    } else if candle.high < first.low {
        Some((Direction::Sell, candle.high, first.low))
    } else {
        None
    };
    if let Some((direction, low, high)) = gap {
        state.imbalance_zones.push(ImbalanceZone {
            direction,
            low,
            high,
            filled: false,
            created_at_ms: candle.timestamp_ms,
            created_seq: state.sequence,
        });
        while state.imbalance_zones.len() > config.max_zones {
            state.imbalance_zones.remove(0);
        }
    }
}

/// Price came within proximity of a confirmed swing but did not break it.
fn detect_sweeps(
    state: &mut StructureState,
    config: &StructureConfig,
    candle: &Candle,
    price: f64,
    broke: Option<Direction>,
) {
    let proximity = config.sweep_proximity_pct / 100.0;
    let margin = config.bos_confirmation_pct / 100.0;

    if broke != Some(Direction::Buy) {
        if let Some(high) = state.last_confirmed_high().copied() {
            let reached = candle.high >= high.price * (1.0 - proximity);
            let held = price < high.price * (1.0 + margin);
            if high.timestamp_ms < candle.timestamp_ms && reached && held {
                record_sweep(state, LiquiditySide::BuySide, &high, candle);
            }
        }
    }
    if broke != Some(Direction::Sell) {
        if let Some(low) = state.last_confirmed_low().copied() {
            let reached = candle.low <= low.price * (1.0 + proximity);
            let held = price > low.price * (1.0 - margin);
            if low.timestamp_ms < candle.timestamp_ms && reached && held {
                record_sweep(state, LiquiditySide::SellSide, &low, candle);
            }
        }
    }
}

fn record_sweep(state: &mut StructureState, side: LiquiditySide, swing: &SwingPoint, candle: &Candle) {
    let seen = state
        .liquidity_sweeps
        .iter()
        .any(|s| s.side == side && s.swing_timestamp_ms == swing.timestamp_ms);
    if seen {
        return;
    }
    state.liquidity_sweeps.push(LiquiditySweep {
        side,
        level: swing.price,
        swing_timestamp_ms: swing.timestamp_ms,
        timestamp_ms: candle.timestamp_ms,
    });
}
