//! Trend and trigger composition over an instance's ordered timeframes.
//!
//! Frames are passed in timeframe order: `[small, medium, large, ...]`.
//! The trend is read from medium and large, triggers from small.

use tracing::debug;

use crate::indicators::IndicatorFrame;
use crate::models::{Side, Trend};

use super::eval::evaluate;
use super::rule::{RuleConfig, RuleSet};

/// Number of timeframes needed before trend gating applies.
pub const TREND_TIMEFRAMES: usize = 3;

/// Trend and the trigger sides that fired for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub trend: Trend,
    pub triggers: Vec<Side>,
}

pub fn evaluate_all(rules: &RuleConfig, frames: &[IndicatorFrame]) -> Evaluation {
    let trend = evaluate_trend(rules, frames);
    let triggers = evaluate_triggers(rules, frames, trend);
    Evaluation { trend, triggers }
}

/// UP when every configured uptrend set on medium/large passes, DOWN
/// likewise for the downtrend family, NEUTRAL otherwise or when both hold.
pub fn evaluate_trend(rules: &RuleConfig, frames: &[IndicatorFrame]) -> Trend {
    if frames.len() < TREND_TIMEFRAMES {
        return Trend::Neutral;
    }
    let (medium, large) = (&frames[1], &frames[2]);

    let up = family_passes(
        [rules.medium.long.as_ref(), rules.large.long.as_ref()],
        [medium, large],
    );
    let down = family_passes(
        [rules.medium.short.as_ref(), rules.large.short.as_ref()],
        [medium, large],
    );

    match (up, down) {
        (true, false) => Trend::Up,
        (false, true) => Trend::Down,
        _ => Trend::Neutral,
    }
}

fn family_passes(sets: [Option<&RuleSet>; 2], frames: [&IndicatorFrame; 2]) -> bool {
    let mut configured = 0;
    for (set, frame) in sets.into_iter().zip(frames) {
        let Some(set) = set else { continue };
        configured += 1;
        if !evaluate(frame, set) {
            return false;
        }
    }
    configured > 0
}

/// Trigger sides on the smallest timeframe. An unconfigured side never fires.
/// With fewer than three timeframes there is no trend to gate on.
pub fn evaluate_triggers(rules: &RuleConfig, frames: &[IndicatorFrame], trend: Trend) -> Vec<Side> {
    let Some(small) = frames.first() else {
        return Vec::new();
    };
    let gated = frames.len() >= TREND_TIMEFRAMES;

    let candidates = [
        (Side::Buy, rules.small.long.as_ref(), &rules.gating.buy),
        (Side::Sell, rules.small.short.as_ref(), &rules.gating.sell),
    ];

    let mut fired = Vec::new();
    for (side, set, allowed) in candidates {
        let Some(set) = set else { continue };
        if gated && !allowed.contains(&trend) {
            debug!(side = %side, trend = %trend, "Trigger gated by trend");
            continue;
        }
        if evaluate(small, set) {
            fired.push(side);
        }
    }
    fired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{annotate_with, IndicatorName, IndicatorRef};
    use crate::models::Candle;
    use crate::rules::rule::{Operand, Operator, Rule, SideRules};

    fn frame(closes: &[f64]) -> IndicatorFrame {
        let candles = closes
            .iter()
            .enumerate()
            .map(|(i, c)| Candle {
                timestamp: i as i64 * 60_000,
                open: *c,
                high: *c,
                low: *c,
                close: *c,
                volume: 1.0,
            })
            .collect();
        annotate_with(candles, &[])
    }

    fn close_rule(op: Operator, value: f64) -> RuleSet {
        RuleSet::new(vec![Rule::new(
            IndicatorRef::plain(IndicatorName::Close),
            op,
            Operand::Value(value),
        )])
    }

    fn uptrend_config() -> RuleConfig {
        RuleConfig {
            small: SideRules {
                long: Some(close_rule(Operator::CrossesAbove, 100.0)),
                short: Some(close_rule(Operator::CrossesBelow, 100.0)),
            },
            medium: SideRules {
                long: Some(close_rule(Operator::GreaterThan, 50.0)),
                short: Some(close_rule(Operator::LessThan, 50.0)),
            },
            large: SideRules {
                long: Some(close_rule(Operator::GreaterThan, 50.0)),
                short: Some(close_rule(Operator::LessThan, 50.0)),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_uptrend_gates_buy() {
        let frames = [frame(&[99.0, 101.0]), frame(&[60.0]), frame(&[70.0])];
        let eval = evaluate_all(&uptrend_config(), &frames);
        assert_eq!(eval.trend, Trend::Up);
        assert_eq!(eval.triggers, vec![Side::Buy]);
    }

    #[test]
    fn test_failing_large_blocks_trigger() {
        let frames = [frame(&[99.0, 101.0]), frame(&[60.0]), frame(&[40.0])];
        let eval = evaluate_all(&uptrend_config(), &frames);
        assert_eq!(eval.trend, Trend::Neutral);
        assert!(eval.triggers.is_empty());
    }

    #[test]
    fn test_downtrend_blocks_buy_allows_sell() {
        let config = uptrend_config();
        let frames = [frame(&[101.0, 99.0]), frame(&[40.0]), frame(&[30.0])];
        let eval = evaluate_all(&config, &frames);
        assert_eq!(eval.trend, Trend::Down);
        assert_eq!(eval.triggers, vec![Side::Sell]);

        let frames = [frame(&[99.0, 101.0]), frame(&[40.0]), frame(&[30.0])];
        assert!(evaluate_all(&config, &frames).triggers.is_empty());
    }

    #[test]
    fn test_unconfigured_trend_family_is_neutral() {
        let config = RuleConfig {
            small: uptrend_config().small,
            ..Default::default()
        };
        let frames = [frame(&[99.0, 101.0]), frame(&[60.0]), frame(&[70.0])];
        assert_eq!(evaluate_trend(&config, &frames), Trend::Neutral);
        // Default gating wants UP for BUY
        assert!(evaluate_triggers(&config, &frames, Trend::Neutral).is_empty());
    }

    #[test]
    fn test_custom_gating_allows_neutral() {
        let mut config = uptrend_config();
        config.gating.buy = vec![Trend::Up, Trend::Neutral];
        let frames = [frame(&[99.0, 101.0]), frame(&[60.0]), frame(&[40.0])];
        assert_eq!(evaluate_all(&config, &frames).triggers, vec![Side::Buy]);
    }

    #[test]
    fn test_fewer_than_three_timeframes_bypass_gating() {
        let frames = [frame(&[99.0, 101.0]), frame(&[10.0])];
        let eval = evaluate_all(&uptrend_config(), &frames);
        assert_eq!(eval.trend, Trend::Neutral);
        assert_eq!(eval.triggers, vec![Side::Buy]);
    }

    #[test]
    fn test_missing_trigger_set_never_fires() {
        let config = RuleConfig::default();
        let frames = [frame(&[99.0, 101.0])];
        assert!(evaluate_triggers(&config, &frames, Trend::Neutral).is_empty());
        assert!(evaluate_triggers(&config, &[], Trend::Up).is_empty());
    }
}
