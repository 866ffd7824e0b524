#[cfg(test)]
mod execution_guard_tests {
    use gate_core::{Direction, OrderBook};

    use crate::guard::{simulate_fill, ExecutionGuard};
    use crate::models::*;

    fn ladder(best_bid: f64, best_ask: f64, tick: f64, levels: usize, bid_size: f64, ask_size: f64) -> OrderBook {
        OrderBook {
            bids: (0..levels).map(|i| [best_bid - i as f64 * tick, bid_size]).collect(),
            asks: (0..levels).map(|i| [best_ask + i as f64 * tick, ask_size]).collect(),
        }
    }

    fn rank(status: ExecutionStatus) -> u8 {
        match status {
            ExecutionStatus::Rejected => 0,
            ExecutionStatus::Warning => 1,
            ExecutionStatus::Approved => 2,
        }
    }

    #[test]
    fn healthy_book_is_approved() {
        let guard = ExecutionGuard::new(ExecutionConfig::default());
        let book = ladder(100.0, 100.01, 0.01, 20, 50.0, 50.0);
        let check = guard.check("BTCUSDT", Direction::Buy, 1_000.0, &book);

        assert_eq!(check.status, ExecutionStatus::Approved);
        assert_eq!(check.tier, LiquidityTier::Major);
        assert!(check.spread_bps < 1.1);
        assert_eq!(check.depth_score, 1.0);
        assert!(check.slippage_estimate_bps.abs() < 1e-9);
        assert!((check.filled_fraction - 1.0).abs() < 1e-12);
        assert!((check.liquidity_score - 1.0).abs() < 1e-9);
        assert_eq!(check.checks.len(), 4);
        assert!(check.checks.iter().all(|c| c.passed));
    }

    #[test]
    fn shallow_or_empty_book_is_rejected() {
        let guard = ExecutionGuard::new(ExecutionConfig::default());

        let shallow = ladder(100.0, 100.01, 0.01, 5, 50.0, 50.0);
        let check = guard.check("BTCUSDT", Direction::Buy, 1_000.0, &shallow);
        assert_eq!(check.status, ExecutionStatus::Rejected);
        assert!(check.reasons[0].contains("too shallow"), "{:?}", check.reasons);
        assert!(check.checks.is_empty());

        let check = guard.check("BTCUSDT", Direction::Sell, 1_000.0, &OrderBook::default());
        assert_eq!(check.status, ExecutionStatus::Rejected);
        assert!(check.reasons[0].contains("empty"));

        let book = ladder(100.0, 100.01, 0.01, 20, 50.0, 50.0);
        let check = guard.check("BTCUSDT", Direction::Hold, 1_000.0, &book);
        assert_eq!(check.status, ExecutionStatus::Rejected);
    }

    #[test]
    fn unfillable_order_is_a_warning_with_reason() {
        let guard = ExecutionGuard::new(ExecutionConfig::default());
        let book = ladder(100.0, 100.01, 0.01, 20, 50.0, 50.0);
        let check = guard.check("BTCUSDT", Direction::Buy, 10_000_000.0, &book);

        // Spread and liquidity still pass; depth and slippage fail
        assert_eq!(check.status, ExecutionStatus::Warning);
        assert_eq!(check.passed("spread"), Some(true));
        assert_eq!(check.passed("liquidity"), Some(true));
        assert_eq!(check.passed("depth"), Some(false));
        assert_eq!(check.passed("slippage"), Some(false));
        assert!(check.filled_fraction < 0.02);
        assert!(check.reasons.iter().any(|r| r.contains("can only fill")));
    }

    #[test]
    fn every_check_failing_is_rejected() {
        let guard = ExecutionGuard::new(ExecutionConfig::default());
        // 2000 bps spread, 1000:1 size imbalance, thin asks
        let book = ladder(90.0, 110.0, 0.1, 20, 1_000.0, 1.0);
        let check = guard.check("PEPEUSDT", Direction::Buy, 10_000.0, &book);

        assert_eq!(check.tier, LiquidityTier::Alt);
        assert!(check.checks.iter().all(|c| !c.passed), "{:?}", check.checks);
        assert_eq!(check.status, ExecutionStatus::Rejected);
        assert_eq!(check.reasons.len(), 4);
    }

    #[test]
    fn widening_spread_never_improves_status() {
        let guard = ExecutionGuard::new(ExecutionConfig::default());
        let starts = [
            (ladder(100.0, 100.01, 0.01, 20, 50.0, 50.0), 1_000.0),
            (ladder(100.0, 100.01, 0.01, 20, 50.0, 50.0), 10_000_000.0),
            (ladder(100.0, 100.01, 0.01, 20, 500.0, 5.0), 1_000.0),
        ];

        for (book, notional) in starts {
            // Buys consume asks, so push bids away
            let mut previous = guard.check("ETHUSDT", Direction::Buy, notional, &book);
            for k in 1..40 {
                let mut wider = book.clone();
                for level in wider.bids.iter_mut() {
                    level[0] -= k as f64 * 0.02;
                }
                let check = guard.check("ETHUSDT", Direction::Buy, notional, &wider);
                assert!(check.spread_bps >= previous.spread_bps);
                assert!(rank(check.status) <= rank(previous.status));
                if previous.status != ExecutionStatus::Approved {
                    assert_ne!(check.status, ExecutionStatus::Approved);
                }
                previous = check;
            }

            // Sells consume bids, so push asks away
            let mut previous = guard.check("ETHUSDT", Direction::Sell, notional, &book);
            for k in 1..40 {
                let mut wider = book.clone();
                for level in wider.asks.iter_mut() {
                    level[0] += k as f64 * 0.02;
                }
                let check = guard.check("ETHUSDT", Direction::Sell, notional, &wider);
                assert!(rank(check.status) <= rank(previous.status));
                previous = check;
            }
        }
    }

    #[test]
    fn thresholds_follow_tier_and_overrides() {
        assert_eq!(symbol_tier("BTCUSDT"), LiquidityTier::Major);
        assert_eq!(symbol_tier("eth-usd"), LiquidityTier::Major);
        assert_eq!(symbol_tier("SOL/USDT:PERP"), LiquidityTier::Large);
        assert_eq!(symbol_tier("DOGEUSDC"), LiquidityTier::Large);
        assert_eq!(symbol_tier("PEPEUSDT"), LiquidityTier::Alt);

        // ~8 bps spread: too wide for a major, fine for a large cap
        let book = ladder(100.0, 100.08, 0.01, 20, 50.0, 50.0);
        let guard = ExecutionGuard::new(ExecutionConfig::default());
        assert_eq!(
            guard.check("BTCUSDT", Direction::Buy, 1_000.0, &book).passed("spread"),
            Some(false)
        );
        assert_eq!(
            guard.check("SOLUSDT", Direction::Buy, 1_000.0, &book).status,
            ExecutionStatus::Approved
        );

        let mut config = ExecutionConfig::default();
        config.symbol_overrides.insert(
            "BTCUSDT".to_string(),
            TierThresholds { max_spread_bps: 9.0, max_slippage_bps: 10.0 },
        );
        let guard = ExecutionGuard::new(config);
        assert_eq!(
            guard.check("btcusdt", Direction::Buy, 1_000.0, &book).status,
            ExecutionStatus::Approved
        );
    }

    #[test]
    fn fill_simulation_walks_the_book() {
        let asks = vec![[100.0, 1.0], [101.0, 1.0]];
        let fill = simulate_fill(&asks, 150.0);
        assert!((fill.filled_fraction - 1.0).abs() < 1e-12);
        let vwap = fill.vwap.unwrap();
        assert!(vwap > 100.0 && vwap < 101.0);
        assert!((fill.slippage_bps - (vwap - 100.0) / 100.0 * 10_000.0).abs() < 1e-9);

        let partial = simulate_fill(&asks, 402.0);
        assert!((partial.filled_fraction - 201.0 / 402.0).abs() < 1e-12);

        let empty = simulate_fill(&[], 100.0);
        assert_eq!(empty.filled_fraction, 0.0);
        assert!(empty.vwap.is_none());
    }

    #[test]
    fn execution_config_validation() {
        let mut errors = Vec::new();
        ExecutionConfig::default().validate(&mut errors);
        assert!(errors.is_empty(), "{errors:?}");

        let mut bad = ExecutionConfig {
            min_depth_levels: 0,
            min_liquidity_score: 1.5,
            ..Default::default()
        };
        bad.symbol_overrides.insert(
            "XYZUSDT".into(),
            TierThresholds { max_spread_bps: 0.0, max_slippage_bps: 5.0 },
        );
        let mut errors = Vec::new();
        bad.validate(&mut errors);
        assert_eq!(errors.len(), 3, "{errors:?}");
    }

    #[test]
    fn overrides_deserialize_from_json() {
        let config: ExecutionConfig = serde_json::from_str(
            r#"{"symbol_overrides": {"ARBUSDT": {"max_spread_bps": 15.0, "max_slippage_bps": 30.0}}}"#,
        )
        .unwrap();
        let (tier, limits) = config.thresholds_for("ARBUSDT");
        assert_eq!(tier, LiquidityTier::Alt);
        assert_eq!(limits.max_spread_bps, 15.0);
        assert_eq!(config.min_depth_levels, 10);
    }
}
