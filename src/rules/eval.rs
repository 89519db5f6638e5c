//! Rule evaluation against the last two rows of an annotated series.
//!
//! - Comparisons read the current (last) row only
//! - Crossings also read the previous row
//! - Rules are AND-ed and short-circuit on the first `false`
//! - Any missing or undefined value fails the whole set closed

use thiserror::Error;
use tracing::warn;

use crate::indicators::{IndicatorFrame, IndicatorName, IndicatorRef};

use super::rule::{Operand, Operator, Rule, RuleSet};

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("series has {available} rows, rule needs {needed}")]
    InsufficientRows { needed: usize, available: usize },
    #[error("rule references an unknown indicator")]
    UnknownIndicator,
    #[error("indicator column {0} was not computed")]
    MissingColumn(String),
    #[error("indicator {column} is undefined at row {row}")]
    Undefined { column: String, row: usize },
}

/// Evaluate a rule set, surfacing why it could not be evaluated.
/// An empty set passes.
pub fn try_evaluate(frame: &IndicatorFrame, ruleset: &RuleSet) -> Result<bool, EvalError> {
    for rule in &ruleset.rules {
        if !evaluate_rule(frame, rule)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Fail-closed wrapper: evaluation errors are logged and count as `false`.
pub fn evaluate(frame: &IndicatorFrame, ruleset: &RuleSet) -> bool {
    match try_evaluate(frame, ruleset) {
        Ok(passed) => passed,
        Err(e) => {
            warn!(error = %e, "Rule set failed closed");
            false
        }
    }
}

fn evaluate_rule(frame: &IndicatorFrame, rule: &Rule) -> Result<bool, EvalError> {
    let needed = if rule.operator.needs_previous() { 2 } else { 1 };
    if frame.len() < needed {
        return Err(EvalError::InsufficientRows {
            needed,
            available: frame.len(),
        });
    }
    let cur = frame.len() - 1;

    let left = resolve(frame, &rule.left, cur)?;
    let right = resolve_operand(frame, &rule.right, cur)?;

    let passed = match rule.operator {
        Operator::GreaterThan => left > right,
        Operator::LessThan => left < right,
        Operator::Equals => (left - right).abs() < EPSILON,
        Operator::CrossesAbove => {
            let prev_left = resolve(frame, &rule.left, cur - 1)?;
            let prev_right = resolve_operand(frame, &rule.right, cur - 1)?;
            prev_left <= prev_right && left > right
        }
        Operator::CrossesBelow => {
            let prev_left = resolve(frame, &rule.left, cur - 1)?;
            let prev_right = resolve_operand(frame, &rule.right, cur - 1)?;
            prev_left >= prev_right && left < right
        }
    };
    Ok(passed)
}

fn resolve_operand(frame: &IndicatorFrame, operand: &Operand, row: usize) -> Result<f64, EvalError> {
    match operand {
        Operand::Value(v) => Ok(*v),
        Operand::Indicator(r) => resolve(frame, r, row),
    }
}

fn resolve(frame: &IndicatorFrame, indicator: &IndicatorRef, row: usize) -> Result<f64, EvalError> {
    if indicator.name == IndicatorName::Unknown {
        return Err(EvalError::UnknownIndicator);
    }
    let column = frame
        .column(indicator)
        .ok_or_else(|| EvalError::MissingColumn(indicator.normalized().to_string()))?;
    column
        .get(row)
        .copied()
        .flatten()
        .filter(|v| v.is_finite())
        .ok_or_else(|| EvalError::Undefined {
            column: indicator.normalized().to_string(),
            row,
        })
}
