//! Rule types: an operator applied to an indicator and an operand.
//!
//! JSON shape of one rule:
//!
//! ```json
//! { "left": { "indicator": "ema", "period": 10 },
//!   "operator": "crosses_above",
//!   "right": { "indicator": "ema", "period": 20 } }
//! ```
//!
//! `right` may also be a plain number.

use serde::{Deserialize, Serialize};

use crate::indicators::{IndicatorName, IndicatorRef};
use crate::models::Trend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    GreaterThan,
    LessThan,
    Equals,
    CrossesAbove,
    CrossesBelow,
}

impl Operator {
    /// Crossing operators also read the previous row.
    pub fn needs_previous(&self) -> bool {
        matches!(self, Operator::CrossesAbove | Operator::CrossesBelow)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Value(f64),
    Indicator(IndicatorRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub left: IndicatorRef,
    pub operator: Operator,
    pub right: Operand,
}

impl Rule {
    #[cfg(test)]
    pub fn new(left: IndicatorRef, operator: Operator, right: Operand) -> Self {
        Self {
            left,
            operator,
            right,
        }
    }

    /// Indicator references on both sides.
    pub fn references(&self) -> impl Iterator<Item = IndicatorRef> {
        let right = match self.right {
            Operand::Indicator(r) => Some(r),
            Operand::Value(_) => None,
        };
        std::iter::once(self.left).chain(right)
    }
}

/// Ordered rules joined by AND.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
}

impl RuleSet {
    #[cfg(test)]
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn references(&self) -> impl Iterator<Item = IndicatorRef> + '_ {
        self.rules.iter().flat_map(Rule::references)
    }
}

/// Rule sets for one timeframe role, labeled by the side they represent.
///
/// On trend timeframes `long` is the uptrend family and `short` the downtrend
/// family; on the trigger timeframe they are the BUY and SELL triggers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SideRules {
    #[serde(default, alias = "buy", alias = "uptrend")]
    pub long: Option<RuleSet>,
    #[serde(default, alias = "sell", alias = "downtrend")]
    pub short: Option<RuleSet>,
}

/// Which trends allow each trigger side to fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendGating {
    #[serde(default = "default_buy_gate")]
    pub buy: Vec<Trend>,
    #[serde(default = "default_sell_gate")]
    pub sell: Vec<Trend>,
}

fn default_buy_gate() -> Vec<Trend> {
    vec![Trend::Up]
}

fn default_sell_gate() -> Vec<Trend> {
    vec![Trend::Down]
}

impl Default for TrendGating {
    fn default() -> Self {
        Self {
            buy: default_buy_gate(),
            sell: default_sell_gate(),
        }
    }
}

/// Per-instance rule configuration by timeframe role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Trigger rules on the smallest timeframe
    #[serde(default)]
    pub small: SideRules,
    /// Trend rules on the second timeframe
    #[serde(default, alias = "med")]
    pub medium: SideRules,
    /// Trend rules on the third timeframe
    #[serde(default)]
    pub large: SideRules,
    #[serde(default)]
    pub gating: TrendGating,
}

impl RuleConfig {
    fn all_sets(&self) -> impl Iterator<Item = &RuleSet> {
        [&self.small, &self.medium, &self.large]
            .into_iter()
            .flat_map(|s| [s.long.as_ref(), s.short.as_ref()])
            .flatten()
    }

    /// Every indicator referenced anywhere in the configuration.
    pub fn references(&self) -> Vec<IndicatorRef> {
        let mut refs: Vec<IndicatorRef> = self.all_sets().flat_map(RuleSet::references).collect();
        refs.sort();
        refs.dedup();
        refs
    }

    /// Whether any rule names an indicator the engine does not know.
    pub fn has_unknown_indicator(&self) -> bool {
        self.references()
            .iter()
            .any(|r| r.name == IndicatorName::Unknown)
    }
}
