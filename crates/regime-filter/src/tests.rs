#[cfg(test)]
mod regime_filter_tests {
    use gate_core::{Direction, SignalType, VolatilityRegime};

    use crate::classifier::RegimeClassifier;
    use crate::models::*;

    fn market(atr: f64) -> MarketStats {
        MarketStats {
            symbol: "BTCUSDT".into(),
            timeframe: "15m".into(),
            atr: Some(atr),
            price: 100.0,
        }
    }

    fn warmed(config: RegimeConfig) -> RegimeClassifier {
        let classifier = RegimeClassifier::new(config);
        // ATR history spread evenly over 1.0..=2.9
        for i in 0..20 {
            classifier
                .classify(&market(1.0 + i as f64 * 0.1), &FundingStats::default(), &OiStats::default())
                .unwrap();
        }
        classifier
    }

    fn state(regime: VolatilityRegime) -> RegimeState {
        RegimeState {
            volatility_regime: regime,
            volatility_percentile: 50.0,
            atr_pct: Some(1.0),
            funding_rate: Some(0.0001),
            funding_extreme: false,
            crowded_side: None,
            open_interest_anomaly: false,
            oi_zscore: None,
            regime_score: 100.0,
            history_len: 50,
        }
    }

    fn extreme_funding(rate: f64) -> RegimeState {
        RegimeState {
            funding_rate: Some(rate),
            funding_extreme: true,
            crowded_side: Some(if rate > 0.0 { Direction::Buy } else { Direction::Sell }),
            ..state(VolatilityRegime::Normal)
        }
    }

    #[test]
    fn normal_until_history_is_warm() {
        let classifier = RegimeClassifier::new(RegimeConfig::default());
        let s = classifier
            .classify(&market(50.0), &FundingStats::default(), &OiStats::default())
            .unwrap();
        assert_eq!(s.volatility_regime, VolatilityRegime::Normal);
        assert_eq!(s.volatility_percentile, 50.0);
        assert_eq!(classifier.history_len("BTCUSDT", "15m"), 1);
    }

    #[test]
    fn percentile_bands() {
        let classifier = warmed(RegimeConfig::default());
        let none = (FundingStats::default(), OiStats::default());

        let high = classifier.classify(&market(5.0), &none.0, &none.1).unwrap();
        assert_eq!(high.volatility_regime, VolatilityRegime::High);
        assert!(high.volatility_percentile > 75.0);
        assert_eq!(high.regime_score, 70.0);

        let low = classifier.classify(&market(0.5), &none.0, &none.1).unwrap();
        assert_eq!(low.volatility_regime, VolatilityRegime::Low);

        let mid = classifier.classify(&market(1.95), &none.0, &none.1).unwrap();
        assert_eq!(mid.volatility_regime, VolatilityRegime::Normal);
    }

    #[test]
    fn history_is_bounded_per_symbol() {
        let config = RegimeConfig {
            history_window: 30,
            ..Default::default()
        };
        let classifier = warmed(config);
        for _ in 0..50 {
            classifier
                .classify(&market(2.0), &FundingStats::default(), &OiStats::default())
                .unwrap();
        }
        assert_eq!(classifier.history_len("BTCUSDT", "15m"), 30);
        assert_eq!(classifier.history_len("ETHUSDT", "15m"), 0);
    }

    #[test]
    fn extreme_funding_and_oi_anomaly() {
        let classifier = RegimeClassifier::new(RegimeConfig::default());
        for i in 0..20 {
            classifier
                .classify(
                    &market(1.0),
                    &FundingStats::default(),
                    &OiStats { open_interest: Some(1_000.0 + (i % 5) as f64) },
                )
                .unwrap();
        }
        let s = classifier
            .classify(
                &market(1.0),
                &FundingStats { rate: Some(-0.002) },
                &OiStats { open_interest: Some(5_000.0) },
            )
            .unwrap();
        assert!(s.funding_extreme);
        assert_eq!(s.crowded_side, Some(Direction::Sell));
        assert!(s.open_interest_anomaly);
        assert!(s.oi_zscore.unwrap() > 2.5);
    }

    #[test]
    fn high_regime_blocks_below_minimum() {
        let classifier = RegimeClassifier::new(RegimeConfig::default());
        let regime = state(VolatilityRegime::High);

        let d = classifier.decide(&regime, Direction::Buy, 65.0, SignalType::TrendFollowing);
        assert!(!d.allowed);
        assert_eq!(d.block, Some(RegimeBlock::BelowMinimum));
        assert_eq!(d.adjustments.min_score, 70.0);

        let d = classifier.decide(&regime, Direction::Buy, 72.0, SignalType::TrendFollowing);
        assert!(d.allowed);
        assert_eq!(d.adjustments.position_size_multiplier, 0.5);
        assert_eq!(d.adjustments.stop_multiplier, 1.5);
    }

    #[test]
    fn each_regime_has_its_own_floor() {
        let classifier = RegimeClassifier::new(RegimeConfig::default());
        let score = 62.0;
        assert!(classifier
            .decide(&state(VolatilityRegime::Normal), Direction::Sell, score, SignalType::Reversal)
            .allowed);
        assert!(!classifier
            .decide(&state(VolatilityRegime::Low), Direction::Sell, score, SignalType::Reversal)
            .allowed);
        assert!(!classifier
            .decide(&state(VolatilityRegime::High), Direction::Sell, score, SignalType::Reversal)
            .allowed);
    }

    #[test]
    fn crowded_trend_following_is_blocked() {
        let classifier = RegimeClassifier::new(RegimeConfig::default());
        let longs_crowded = extreme_funding(0.002);

        let d = classifier.decide(&longs_crowded, Direction::Buy, 95.0, SignalType::TrendFollowing);
        assert!(!d.allowed);
        assert_eq!(d.block, Some(RegimeBlock::CrowdedFunding));

        // Contrarian setups pass only above the raised floor
        let d = classifier.decide(&longs_crowded, Direction::Sell, 70.0, SignalType::TrendFollowing);
        assert!(!d.allowed);
        assert_eq!(d.block, Some(RegimeBlock::BelowMinimum));
        let d = classifier.decide(&longs_crowded, Direction::Sell, 80.0, SignalType::TrendFollowing);
        assert!(d.allowed);

        // A reversal on the crowded side is not chasing; it gets the raised floor
        let d = classifier.decide(&longs_crowded, Direction::Buy, 80.0, SignalType::Reversal);
        assert!(d.allowed);
        assert_eq!(d.adjustments.min_score, 75.0);
    }

    #[test]
    fn oi_anomaly_shrinks_size() {
        let classifier = RegimeClassifier::new(RegimeConfig::default());
        let regime = RegimeState {
            open_interest_anomaly: true,
            ..state(VolatilityRegime::Normal)
        };
        let d = classifier.decide(&regime, Direction::Buy, 80.0, SignalType::TrendFollowing);
        assert!(d.allowed);
        assert_eq!(d.adjustments.position_size_multiplier, 0.75);
    }

    #[test]
    fn hold_is_never_allowed() {
        let classifier = RegimeClassifier::new(RegimeConfig::default());
        let d = classifier.decide(&state(VolatilityRegime::Normal), Direction::Hold, 99.0, SignalType::Unclassified);
        assert!(!d.allowed);
    }

    #[test]
    fn default_config_is_valid() {
        let mut errors = Vec::new();
        RegimeConfig::default().validate(&mut errors);
        assert!(errors.is_empty(), "{errors:?}");

        let bad = RegimeConfig {
            low_percentile: 80.0,
            min_history: 500,
            ..Default::default()
        };
        let mut errors = Vec::new();
        bad.validate(&mut errors);
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn timeframes_keep_separate_histories() {
        let classifier = RegimeClassifier::new(RegimeConfig::default());
        let on = |timeframe: &str, atr: f64| MarketStats {
            timeframe: timeframe.into(),
            ..market(atr)
        };
        let none = (FundingStats::default(), OiStats::default());
        for _ in 0..25 {
            classifier.classify(&on("1h", 4.0), &none.0, &none.1).unwrap();
            classifier.classify(&on("5m", 0.4), &none.0, &none.1).unwrap();
        }
        assert_eq!(classifier.history_len("BTCUSDT", "1h"), 25);
        assert_eq!(classifier.history_len("BTCUSDT", "5m"), 25);

        // A steady 5m ATR sits mid-range against its own history only
        let steady = classifier.classify(&on("5m", 0.4), &none.0, &none.1).unwrap();
        assert_eq!(steady.volatility_regime, VolatilityRegime::Normal);
        assert_eq!(steady.volatility_percentile, 50.0);
        assert_eq!(steady.history_len, 25);
    }
}
