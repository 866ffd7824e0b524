#[cfg(test)]
mod structure_tracker_tests {
    use gate_core::{Direction, MarketSnapshot, OrderBook, Trend};

    use crate::models::*;
    use crate::tracker::StructureTracker;

    const T0: i64 = 1_700_000_000_000;
    const MINUTE: i64 = 60_000;

    fn snap(i: i64, open: f64, high: f64, low: f64, close: f64) -> MarketSnapshot {
        MarketSnapshot {
            symbol: "BTCUSDT".into(),
            timeframe: "1m".into(),
            timestamp_unix_ms: T0 + i * MINUTE,
            open,
            high,
            low,
            close,
            volume: 100.0,
            orderbook: OrderBook::default(),
            funding_rate: None,
            open_interest: None,
            sentiment_score: None,
        }
    }

    fn feed(tracker: &StructureTracker, snaps: &[MarketSnapshot]) -> StructureState {
        let mut last = None;
        for s in snaps {
            last = Some(tracker.update("BTCUSDT", "1m", s, s.close).unwrap());
        }
        last.unwrap()
    }

    /// Rally, pullback that confirms a swing high at 102, then a close through it.
    fn bullish_bos_sequence() -> Vec<MarketSnapshot> {
        vec![
            snap(1, 100.0, 101.0, 99.5, 100.5),
            snap(2, 100.5, 102.0, 100.0, 101.8),
            snap(3, 101.8, 101.9, 100.8, 101.0),
            snap(4, 101.0, 103.0, 100.9, 102.9),
        ]
    }

    /// Drop through 99 (BOS down), then a counter-trend push through 100.5.
    fn bearish_then_counter_break() -> Vec<MarketSnapshot> {
        vec![
            snap(1, 100.0, 100.5, 99.0, 99.5),
            snap(2, 99.5, 99.6, 98.0, 98.2),
            snap(3, 98.2, 99.0, 98.1, 98.9),
            snap(4, 98.9, 100.8, 98.8, 100.7),
        ]
    }

    /// Oscillating drift used for replay and bound checks
    fn synthetic(n: i64) -> Vec<MarketSnapshot> {
        let mut out = Vec::new();
        let mut prev = 100.0;
        for i in 0..n {
            let price = 100.0 + 3.0 * (i as f64 * 0.5).sin() + 0.05 * i as f64;
            let mut s = snap(i, prev, prev.max(price) + 0.3, prev.min(price) - 0.3, price);
            s.volume = 100.0 + (i % 7) as f64 * 10.0;
            out.push(s);
            prev = price;
        }
        out
    }

    #[test]
    fn swing_high_needs_retrace() {
        let tracker = StructureTracker::new(StructureConfig::default());
        let seq = bullish_bos_sequence();

        let state = feed(&tracker, &seq[..2]);
        assert!(state.last_confirmed_high().is_none());
        assert!(state.swing_highs.last().is_some_and(|s| !s.confirmed));

        let state = feed(&tracker, &seq[2..3]);
        let high = state.last_confirmed_high().unwrap();
        assert_eq!(high.price, 102.0);
        assert_eq!(high.timestamp_ms, T0 + 2 * MINUTE);
    }

    #[test]
    fn bos_sets_trend_and_zone() {
        let tracker = StructureTracker::new(StructureConfig::default());
        let state = feed(&tracker, &bullish_bos_sequence());

        assert_eq!(state.trend, Trend::Bullish);
        let brk = state.last_break.unwrap();
        assert_eq!(brk.kind, BreakKind::Bos);
        assert_eq!(brk.direction, Direction::Buy);
        assert_eq!(brk.reference_level, 102.0);
        assert_eq!(state.consumed_high_ts, Some(T0 + 2 * MINUTE));

        // Order block is the last bearish candle before the break
        assert_eq!(state.bullish_zones.len(), 1);
        let zone = state.bullish_zones[0];
        assert_eq!((zone.low, zone.high), (100.8, 101.9));
        assert!((0.0..=1.0).contains(&zone.quality_score));
    }

    #[test]
    fn consumed_swing_does_not_refire() {
        let tracker = StructureTracker::new(StructureConfig::default());
        let mut seq = bullish_bos_sequence();
        seq.push(snap(5, 102.9, 103.2, 102.6, 103.1));
        let state = feed(&tracker, &seq);
        assert_eq!(state.bullish_zones.len(), 1);
        assert_eq!(state.last_break.unwrap().timestamp_ms, T0 + 4 * MINUTE);
    }

    #[test]
    fn choch_confirms_after_retest_periods() {
        let tracker = StructureTracker::new(StructureConfig::default());
        let state = feed(&tracker, &bearish_then_counter_break());
        assert_eq!(state.trend, Trend::Bearish);
        assert_eq!(state.last_break.unwrap().kind, BreakKind::Bos);
        assert!(state.pending_choch.is_some());

        let state = feed(&tracker, &[snap(5, 100.7, 101.0, 100.6, 100.9)]);
        assert_eq!(state.trend, Trend::Bearish);
        assert_eq!(state.pending_choch.unwrap().periods_held, 1);

        let state = feed(&tracker, &[snap(6, 100.9, 101.2, 100.8, 101.1)]);
        assert_eq!(state.trend, Trend::Bullish);
        let brk = state.last_break.unwrap();
        assert_eq!(brk.kind, BreakKind::Choch);
        assert_eq!(brk.direction, Direction::Buy);
        assert_eq!(brk.reference_level, 100.5);
        assert!(state.pending_choch.is_none());
    }

    #[test]
    fn choch_fails_when_price_falls_back() {
        let tracker = StructureTracker::new(StructureConfig::default());
        feed(&tracker, &bearish_then_counter_break());
        let state = feed(&tracker, &[snap(5, 100.7, 100.75, 100.1, 100.3)]);
        assert_eq!(state.trend, Trend::Bearish);
        assert!(state.pending_choch.is_none());
        assert_eq!(state.last_break.unwrap().kind, BreakKind::Bos);
    }

    #[test]
    fn choch_without_retest_confirms_immediately() {
        let config = StructureConfig {
            choch_retest_periods: 0,
            ..Default::default()
        };
        let tracker = StructureTracker::new(config);
        let state = feed(&tracker, &bearish_then_counter_break());
        assert_eq!(state.trend, Trend::Bullish);
        assert_eq!(state.last_break.unwrap().kind, BreakKind::Choch);
    }

    #[test]
    fn zones_expire_after_validity() {
        let config = StructureConfig {
            ob_validity_periods: 3,
            ..Default::default()
        };
        let tracker = StructureTracker::new(config);
        let state = feed(&tracker, &bullish_bos_sequence());
        assert_eq!(state.bullish_zones.len(), 1);

        let quiet = |i| snap(i, 102.5, 102.8, 102.2, 102.5);
        let state = feed(&tracker, &[quiet(5), quiet(6), quiet(7)]);
        assert_eq!(state.bullish_zones.len(), 1);

        let state = feed(&tracker, &[quiet(8)]);
        assert!(state.bullish_zones.is_empty());
    }

    #[test]
    fn sweep_flagged_near_swing_without_break() {
        let tracker = StructureTracker::new(StructureConfig::default());
        let mut seq = bullish_bos_sequence();
        seq[3] = snap(4, 101.0, 101.95, 100.9, 101.2);
        let state = feed(&tracker, &seq);

        assert!(state.last_break.is_none());
        assert_eq!(state.liquidity_sweeps.len(), 1);
        let sweep = state.liquidity_sweeps[0];
        assert_eq!(sweep.side, LiquiditySide::BuySide);
        assert_eq!(sweep.level, 102.0);

        // Same level is not flagged twice; the sweep ages out after an hour
        let state = feed(&tracker, &[snap(5, 101.2, 101.92, 101.0, 101.3)]);
        assert_eq!(state.liquidity_sweeps.len(), 1);
        let state = feed(&tracker, &[snap(70, 101.3, 101.5, 101.1, 101.3)]);
        assert!(state
            .liquidity_sweeps
            .iter()
            .all(|s| s.timestamp_ms > T0 + 10 * MINUTE));
    }

    #[test]
    fn duplicate_snapshot_is_ignored() {
        let tracker = StructureTracker::new(StructureConfig::default());
        let seq = bullish_bos_sequence();
        let first = feed(&tracker, &seq);
        let again = feed(&tracker, &seq[3..]);
        assert_eq!(first, again);
        assert_eq!(again.sequence, 4);

        // Older timestamps are ignored too
        let older = feed(&tracker, &seq[..1]);
        assert_eq!(older.sequence, 4);
    }

    #[test]
    fn replay_is_deterministic() {
        let a = StructureTracker::new(StructureConfig::default());
        let b = StructureTracker::new(StructureConfig::default());

        for s in synthetic(50) {
            let sa = a.update("BTCUSDT", "1m", &s, s.close).unwrap();
            let sb = b.update("BTCUSDT", "1m", &s, s.close).unwrap();
            assert_eq!(sa.trend, sb.trend);
            assert_eq!(sa.last_break, sb.last_break);
            assert_eq!(sa, sb);
        }
        let last = a.snapshot("BTCUSDT", "1m").unwrap().unwrap();
        assert!(last.last_break.is_some(), "synthetic series should break structure");
    }

    #[test]
    fn lists_stay_bounded() {
        let config = StructureConfig::default();
        let tracker = StructureTracker::new(config.clone());
        for s in synthetic(200) {
            let state = tracker.update("BTCUSDT", "1m", &s, s.close).unwrap();
            assert!(state.swing_highs.len() <= config.max_swings);
            assert!(state.swing_lows.len() <= config.max_swings);
            assert!(state.bullish_zones.len() <= config.max_zones);
            assert!(state.bearish_zones.len() <= config.max_zones);
            assert!(state.candles.len() <= config.lookback_periods);
            assert!(state
                .bullish_zones
                .iter()
                .chain(&state.bearish_zones)
                .all(|z| state.sequence - z.created_seq <= config.ob_validity_periods));
        }
    }

    #[test]
    fn keys_are_partitioned() {
        let tracker = StructureTracker::new(StructureConfig::default());
        let s = snap(1, 100.0, 101.0, 99.5, 100.5);
        tracker.update("BTCUSDT", "1m", &s, s.close).unwrap();
        tracker.update("BTCUSDT", "15m", &s, s.close).unwrap();
        tracker.update("ETHUSDT", "1m", &s, s.close).unwrap();

        let keys = tracker.keys();
        assert_eq!(keys.len(), 3);
        assert_eq!(keys[0], StructureKey::new("BTCUSDT", "15m"));

        assert!(tracker.reset("BTCUSDT", "15m").unwrap());
        assert!(!tracker.reset("BTCUSDT", "15m").unwrap());
        assert!(tracker.snapshot("BTCUSDT", "15m").unwrap().is_none());
    }

    #[test]
    fn atr_falls_back_to_mean_range() {
        let tracker = StructureTracker::new(StructureConfig::default());
        let state = feed(&tracker, &bullish_bos_sequence());
        let atr = state.atr(14).unwrap();
        assert!(atr > 0.0 && atr < 3.0);

        let state = feed(&tracker, &synthetic(40)[20..]);
        assert!(state.atr(14).unwrap() > 0.0);
        assert_eq!(state.closes().len(), state.candles.len());
    }

    #[test]
    fn rejects_bad_current_price() {
        let tracker = StructureTracker::new(StructureConfig::default());
        let s = snap(1, 100.0, 101.0, 99.5, 100.5);
        assert!(tracker.update("BTCUSDT", "1m", &s, f64::NAN).is_err());
        assert!(tracker.keys().is_empty());
    }

    #[test]
    fn states_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("structure_states.json");

        let before = {
            let tracker = StructureTracker::with_store(StructureConfig::default(), &path);
            feed(&tracker, &bullish_bos_sequence())
        };

        let tracker = StructureTracker::with_store(StructureConfig::default(), &path);
        let after = tracker.snapshot("BTCUSDT", "1m").unwrap().unwrap();
        assert_eq!(before.trend, after.trend);
        assert_eq!(before.last_break, after.last_break);
        assert_eq!(before.swing_highs, after.swing_highs);
        assert_eq!(before.candles, after.candles);
        assert_eq!(before.bullish_zones.len(), after.bullish_zones.len());

        // Replaying the persisted tail is a no-op
        let replay = feed(&tracker, &bullish_bos_sequence()[3..]);
        assert_eq!(replay.sequence, before.sequence);
    }

    #[test]
    fn apply_snapshot_reports_whether_state_advanced() {
        let tracker = StructureTracker::new(StructureConfig::default());
        let seq = bullish_bos_sequence();
        let last = seq.last().unwrap();

        for s in &seq {
            let update = tracker.apply_snapshot("BTCUSDT", "1m", s, s.close).unwrap();
            assert!(update.applied);
        }
        let again = tracker
            .apply_snapshot("BTCUSDT", "1m", last, last.close)
            .unwrap();
        assert!(!again.applied);
        assert_eq!(again.state.sequence, seq.len() as u64);

        let older = tracker
            .apply_snapshot("BTCUSDT", "1m", &seq[0], seq[0].close)
            .unwrap();
        assert!(!older.applied);
    }

    #[test]
    fn concurrent_updates_persist_latest_state_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("structure_states.json");
        let tracker = StructureTracker::with_store(StructureConfig::default(), &path);
        let snaps = synthetic(20);
        let barrier = std::sync::Barrier::new(4);

        std::thread::scope(|scope| {
            for t in 0..4 {
                let (tracker, snaps, barrier) = (&tracker, &snaps, &barrier);
                scope.spawn(move || {
                    let symbol = format!("SYM{t}");
                    barrier.wait();
                    for s in snaps {
                        tracker.update(&symbol, "1m", s, s.close).unwrap();
                    }
                });
            }
        });

        let reloaded = StructureTracker::with_store(StructureConfig::default(), &path);
        assert_eq!(reloaded.keys().len(), 4);
        for t in 0..4 {
            let state = reloaded.snapshot(&format!("SYM{t}"), "1m").unwrap().unwrap();
            assert_eq!(state.sequence, 20);
            assert_eq!(state.last_timestamp_ms, Some(snaps[19].timestamp_unix_ms));
        }
    }
}
