#[cfg(test)]
mod confluence_scorer_tests {
    use gate_core::{ConfidenceTier, Direction, OrderBook, SignalType, Trend, VolatilityRegime};
    use structure_tracker::{
        BreakKind, ImbalanceZone, LiquiditySide, LiquiditySweep, StructureBreak, StructureState,
        SwingPoint, Zone,
    };

    use crate::models::*;
    use crate::momentum::MomentumReading;
    use crate::scorer::ConfluenceScorer;

    fn bullish_structure() -> StructureState {
        let mut s = StructureState::new("BTCUSDT", "15m");
        s.trend = Trend::Bullish;
        s.last_break = Some(StructureBreak {
            kind: BreakKind::Bos,
            direction: Direction::Buy,
            break_price: 102.9,
            reference_level: 102.0,
            timestamp_ms: 4,
        });
        s.swing_lows = vec![SwingPoint { timestamp_ms: 1, price: 99.5, confirmed: true }];
        s.swing_highs = vec![
            SwingPoint { timestamp_ms: 2, price: 102.0, confirmed: true },
            SwingPoint { timestamp_ms: 5, price: 104.0, confirmed: true },
        ];
        s.bullish_zones = vec![Zone {
            price: 101.8,
            low: 100.8,
            high: 101.9,
            created_at_ms: 4,
            created_seq: 4,
            quality_score: 0.8,
        }];
        s.imbalance_zones = vec![ImbalanceZone {
            direction: Direction::Buy,
            low: 102.0,
            high: 102.4,
            filled: false,
            created_at_ms: 4,
            created_seq: 4,
        }];
        s.liquidity_sweeps = vec![LiquiditySweep {
            side: LiquiditySide::SellSide,
            level: 99.5,
            swing_timestamp_ms: 1,
            timestamp_ms: 3,
        }];
        s
    }

    fn bid_heavy_book() -> OrderBook {
        OrderBook {
            bids: (0..10).map(|i| [100.0 - i as f64 * 0.01, 4.0]).collect(),
            asks: (0..10).map(|i| [100.01 + i as f64 * 0.01, 1.0]).collect(),
        }
    }

    #[test]
    fn full_confluence_is_sharp() {
        let scorer = ConfluenceScorer::new(ScoringConfig::default());
        let structure = bullish_structure();
        let book = bid_heavy_book();
        let inputs = ConfluenceInputs {
            structure: Some(&structure),
            orderbook: Some(&book),
            volatility: Some(VolatilityRegime::Normal),
            momentum: Some(MomentumReading { rsi: Some(60.0), roc_pct: Some(2.5) }),
            funding_rate: Some(-0.0006),
            sentiment: Some(0.8),
            reference_price: 103.0,
        };
        let signal = scorer.score(&inputs);

        assert_eq!(signal.direction, Direction::Buy);
        assert_eq!(signal.signal_type, SignalType::TrendFollowing);
        // 10 + 12 + 8 + 5 + 3
        assert!((signal.breakdown.structure_score - 38.0).abs() < 1e-9);
        assert!((signal.breakdown.orderbook_score - 20.0).abs() < 1e-9);
        assert_eq!(signal.breakdown.volatility_score, 10.0);
        assert_eq!(signal.breakdown.momentum_score, 15.0);
        assert_eq!(signal.breakdown.funding_score, 10.0);
        assert!((signal.breakdown.sentiment_score - 4.0).abs() < 1e-9);
        assert!((signal.score - 97.0).abs() < 1e-9);
        assert_eq!(signal.tier, ConfidenceTier::Sharp);
        assert!(signal.missing_inputs.is_empty());

        // Reasons ranked by contribution, largest first
        assert!(signal.reasons[0].contains("order book"));
        assert!(signal.reasons.len() <= scorer.config().max_reasons);

        assert_eq!(signal.levels.support, Some(101.9));
        assert_eq!(signal.levels.resistance, Some(104.0));
    }

    #[test]
    fn missing_inputs_degrade_gracefully() {
        let scorer = ConfluenceScorer::new(ScoringConfig::default());
        let structure = bullish_structure();
        let inputs = ConfluenceInputs {
            structure: Some(&structure),
            reference_price: 103.0,
            ..Default::default()
        };
        let signal = scorer.score(&inputs);
        assert_eq!(signal.direction, Direction::Buy);
        assert_eq!(signal.score, signal.breakdown.structure_score);
        assert_eq!(
            signal.missing_inputs,
            vec!["orderbook", "volatility", "momentum", "funding", "sentiment"]
        );
        assert!(signal
            .reasons
            .last()
            .unwrap()
            .starts_with("unavailable inputs: orderbook"));
    }

    #[test]
    fn no_structure_means_hold() {
        let scorer = ConfluenceScorer::new(ScoringConfig::default());
        let book = bid_heavy_book();
        let signal = scorer.score(&ConfluenceInputs {
            orderbook: Some(&book),
            volatility: Some(VolatilityRegime::High),
            funding_rate: Some(0.0),
            sentiment: Some(1.0),
            reference_price: 100.0,
            ..Default::default()
        });
        assert_eq!(signal.direction, Direction::Hold);
        assert_eq!(signal.tier, ConfidenceTier::Discard);
        assert_eq!(signal.breakdown.orderbook_score, 0.0);
        assert_eq!(signal.breakdown.volatility_score, 3.0);
        assert!(signal.missing_inputs.contains(&"structure".to_string()));
    }

    #[test]
    fn opposing_inputs_score_nothing() {
        let scorer = ConfluenceScorer::new(ScoringConfig::default());
        let structure = bullish_structure();
        let mut book = bid_heavy_book();
        std::mem::swap(&mut book.bids, &mut book.asks);
        for l in book.bids.iter_mut() {
            l[0] -= 0.2;
        }
        book.bids.sort_by(|a, b| b[0].total_cmp(&a[0]));
        book.asks.sort_by(|a, b| a[0].total_cmp(&b[0]));

        let signal = scorer.score(&ConfluenceInputs {
            structure: Some(&structure),
            orderbook: Some(&book),
            momentum: Some(MomentumReading { rsi: Some(25.0), roc_pct: Some(-3.0) }),
            funding_rate: Some(0.002),
            sentiment: Some(-1.0),
            reference_price: 103.0,
            ..Default::default()
        });
        assert_eq!(signal.breakdown.orderbook_score, 0.0);
        assert_eq!(signal.breakdown.momentum_score, 0.0);
        assert_eq!(signal.breakdown.funding_score, 0.0);
        assert_eq!(signal.breakdown.sentiment_score, 0.0);
    }

    #[test]
    fn rsi_bands_mirror_for_sells() {
        let scorer = ConfluenceScorer::new(ScoringConfig::default());
        let mut structure = bullish_structure();
        structure.trend = Trend::Bearish;
        structure.last_break = None;

        let momentum = |rsi| ConfluenceInputs {
            structure: Some(&structure),
            momentum: Some(MomentumReading { rsi: Some(rsi), roc_pct: None }),
            reference_price: 100.0,
            ..Default::default()
        };
        assert_eq!(scorer.score(&momentum(40.0)).breakdown.momentum_score, 7.0);
        assert_eq!(scorer.score(&momentum(25.0)).breakdown.momentum_score, 4.0);
        assert_eq!(scorer.score(&momentum(15.0)).breakdown.momentum_score, 0.0);
        assert_eq!(scorer.score(&momentum(60.0)).breakdown.momentum_score, 0.0);
        assert_eq!(scorer.score(&momentum(40.0)).signal_type, SignalType::Unclassified);
    }

    #[test]
    fn funding_neutral_and_adverse() {
        let scorer = ConfluenceScorer::new(ScoringConfig::default());
        let structure = bullish_structure();
        let with_funding = |rate| ConfluenceInputs {
            structure: Some(&structure),
            funding_rate: Some(rate),
            reference_price: 103.0,
            ..Default::default()
        };
        assert_eq!(scorer.score(&with_funding(0.00005)).breakdown.funding_score, 5.0);
        let adverse = scorer.score(&with_funding(0.00025)).breakdown.funding_score;
        assert!((adverse - 2.5).abs() < 1e-9);
        let favourable = scorer.score(&with_funding(-0.00025)).breakdown.funding_score;
        assert!((favourable - 7.5).abs() < 1e-9);
    }

    #[test]
    fn score_is_clamped_sum_for_any_inputs() {
        let scorer = ConfluenceScorer::new(ScoringConfig::default());
        let config = scorer.config().clone();
        let mut bull = bullish_structure();
        bull.bullish_zones[0].quality_score = 1.0;
        let mut bear = bullish_structure();
        bear.trend = Trend::Bearish;
        let book = bid_heavy_book();

        let structures = [None, Some(&bull), Some(&bear)];
        let books = [None, Some(&book)];
        let vols = [None, Some(VolatilityRegime::Low), Some(VolatilityRegime::High)];
        let rsis = [None, Some(0.0), Some(55.0), Some(75.0), Some(100.0)];
        let rocs = [None, Some(-50.0), Some(0.5), Some(50.0)];
        let rates = [None, Some(-1.0), Some(0.0), Some(0.0003), Some(1.0)];
        let sentiments = [None, Some(-5.0), Some(0.3), Some(5.0)];

        for structure in structures {
            for orderbook in books {
                for volatility in vols {
                    for rsi in rsis {
                        for roc in rocs {
                            for funding_rate in rates {
                                for sentiment in sentiments {
                                    let signal = scorer.score(&ConfluenceInputs {
                                        structure,
                                        orderbook,
                                        volatility,
                                        momentum: Some(MomentumReading { rsi, roc_pct: roc }),
                                        funding_rate,
                                        sentiment,
                                        reference_price: 101.0,
                                    });
                                    let b = signal.breakdown;
                                    assert!((0.0..=100.0).contains(&signal.score));
                                    assert_eq!(signal.score, b.total().clamp(0.0, 100.0));
                                    assert!(b.structure_score <= config.structure_max);
                                    assert!(b.orderbook_score <= config.orderbook_max);
                                    assert!(b.volatility_score <= config.volatility_max);
                                    assert!(b.momentum_score <= config.momentum_max);
                                    assert!(b.funding_score <= config.funding_max);
                                    assert!(b.sentiment_score <= config.sentiment_max);
                                    assert!(b.funding_score >= 0.0 && b.sentiment_score >= 0.0);
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn sub_factor_points_follow_configured_caps() {
        let structure = bullish_structure();
        let inputs = ConfluenceInputs {
            structure: Some(&structure),
            momentum: Some(MomentumReading { rsi: Some(60.0), roc_pct: Some(2.5) }),
            reference_price: 103.0,
            ..Default::default()
        };
        let base = ConfluenceScorer::new(ScoringConfig::default()).score(&inputs).breakdown;
        let doubled = ConfluenceScorer::new(ScoringConfig {
            structure_max: 80.0,
            momentum_max: 30.0,
            ..ScoringConfig::default()
        })
        .score(&inputs)
        .breakdown;

        assert!((base.structure_score - 38.0).abs() < 1e-9);
        assert!((doubled.structure_score - 76.0).abs() < 1e-9);
        assert!((base.momentum_score - 15.0).abs() < 1e-9);
        assert!((doubled.momentum_score - 30.0).abs() < 1e-9);

        let halved = ConfluenceScorer::new(ScoringConfig {
            structure_max: 20.0,
            ..ScoringConfig::default()
        })
        .score(&inputs);
        assert!((halved.breakdown.structure_score - 19.0).abs() < 1e-9);
        assert!(halved.reasons.iter().any(|r| r == "BOS through 102.0000 (+6.0)"));
    }

    #[test]
    fn scoring_config_validation() {
        let mut errors = Vec::new();
        ScoringConfig::default().validate(&mut errors);
        assert!(errors.is_empty(), "{errors:?}");

        let bad = ScoringConfig {
            structure_max: 50.0,
            ..Default::default()
        };
        let mut errors = Vec::new();
        bad.validate(&mut errors);
        assert_eq!(errors.len(), 1);
    }
}
