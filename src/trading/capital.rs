//! Per-instance capital tracking and risk levels.
//!
//! Capital is `start_amount + realized_pnl`. The level is derived from
//! capital on every read by scanning the level table in order.

use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Unit the default level table is built from.
const LEVEL_BASE: Decimal = dec!(100);
const LEVEL_COUNT: u32 = 10;

/// One capital bracket, bounds inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelRange {
    pub name: String,
    pub min: Decimal,
    pub max: Decimal,
}

impl LevelRange {
    pub fn new(name: impl Into<String>, min: Decimal, max: Decimal) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }

    pub fn contains(&self, capital: Decimal) -> bool {
        self.min <= capital && capital <= self.max
    }
}

/// Level1..Level10 in steps of 100, plus two stop levels below 100.
pub fn default_levels() -> Vec<LevelRange> {
    let mut levels: Vec<LevelRange> = (1..=LEVEL_COUNT)
        .map(|i| {
            let i = Decimal::from(i);
            LevelRange::new(
                format!("Level{}", i),
                LEVEL_BASE * i,
                LEVEL_BASE * (i + Decimal::ONE) - dec!(0.01),
            )
        })
        .collect();
    levels.push(LevelRange::new("SLevel1", dec!(80), dec!(99.99)));
    levels.push(LevelRange::new("SLevel2", dec!(60), dec!(79.99)));
    levels
}

/// Resolved capital level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Level {
    Named { name: String, min: Decimal },
    /// Below every configured range: the kill switch.
    CriticalLow,
    /// Inside a gap between ranges or above all of them.
    Unknown,
}

impl Level {
    pub fn name(&self) -> &str {
        match self {
            Level::Named { name, .. } => name,
            Level::CriticalLow => "CRITICAL_LOW",
            Level::Unknown => "UNKNOWN",
        }
    }

    pub fn min(&self) -> Decimal {
        match self {
            Level::Named { min, .. } => *min,
            _ => Decimal::ZERO,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Problems found in a level table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelIssue {
    Empty,
    Inverted { name: String },
    Overlap { first: String, second: String },
    Gap { below: String, above: String, from: Decimal, to: Decimal },
}

impl fmt::Display for LevelIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelIssue::Empty => write!(f, "level table is empty"),
            LevelIssue::Inverted { name } => write!(f, "{} has min > max", name),
            LevelIssue::Overlap { first, second } => {
                write!(f, "{} overlaps {}", first, second)
            }
            LevelIssue::Gap { below, above, from, to } => {
                write!(f, "gap between {} and {}: ({}, {})", below, above, from, to)
            }
        }
    }
}

/// Report overlaps and gaps. Adjacent ranges one cent apart are contiguous.
pub fn validate_levels(levels: &[LevelRange]) -> Vec<LevelIssue> {
    if levels.is_empty() {
        return vec![LevelIssue::Empty];
    }

    let mut issues: Vec<LevelIssue> = levels
        .iter()
        .filter(|l| l.min > l.max)
        .map(|l| LevelIssue::Inverted { name: l.name.clone() })
        .collect();

    let mut sorted: Vec<&LevelRange> = levels.iter().collect();
    sorted.sort_by(|a, b| a.min.cmp(&b.min));
    for pair in sorted.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        if hi.min <= lo.max {
            issues.push(LevelIssue::Overlap {
                first: lo.name.clone(),
                second: hi.name.clone(),
            });
        } else if hi.min - lo.max > dec!(0.01) {
            issues.push(LevelIssue::Gap {
                below: lo.name.clone(),
                above: hi.name.clone(),
                from: lo.max,
                to: hi.min,
            });
        }
    }
    issues
}

/// Persisted view of an instance's capital.
#[derive(Debug, Clone, PartialEq)]
pub struct CapitalState {
    pub instance_id: i64,
    pub start_amount: Decimal,
    pub realized_pnl: Decimal,
    pub current_capital: Decimal,
    pub current_level: Level,
}

/// Capital and level arithmetic for a single instance.
#[derive(Debug, Clone)]
pub struct CapitalManager {
    instance_id: i64,
    start_amount: Decimal,
    realized_pnl: Decimal,
    levels: Vec<LevelRange>,
}

impl CapitalManager {
    pub fn new(instance_id: i64, start_amount: Decimal, levels: Option<Vec<LevelRange>>) -> Self {
        Self {
            instance_id,
            start_amount,
            realized_pnl: Decimal::ZERO,
            levels: levels.unwrap_or_else(default_levels),
        }
    }

    /// Restore realized P&L loaded from the store.
    pub fn with_realized_pnl(mut self, realized_pnl: Decimal) -> Self {
        self.realized_pnl = realized_pnl;
        self
    }

    pub fn levels(&self) -> &[LevelRange] {
        &self.levels
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    pub fn current_capital(&self) -> Decimal {
        self.start_amount + self.realized_pnl
    }

    /// Add a realized P&L delta and return the resulting level.
    pub fn apply_pnl(&mut self, delta: Decimal) -> Level {
        self.realized_pnl += delta;
        self.current_level()
    }

    /// First range in table order containing the capital. Below the lowest
    /// minimum is `CriticalLow`; anything else unmatched is `Unknown`.
    pub fn current_level(&self) -> Level {
        let capital = self.current_capital();
        if let Some(range) = self.levels.iter().find(|l| l.contains(capital)) {
            return Level::Named {
                name: range.name.clone(),
                min: range.min,
            };
        }
        match self.levels.iter().map(|l| l.min).min() {
            Some(lowest) if capital < lowest => Level::CriticalLow,
            _ => Level::Unknown,
        }
    }

    /// `risk_percent * level.min`, zero when no named level applies.
    pub fn position_size(&self, risk_percent: Decimal) -> Decimal {
        risk_percent * self.current_level().min()
    }

    pub fn is_kill_switch(&self) -> bool {
        self.current_level() == Level::CriticalLow
    }

    /// Manual reset after a kill switch: forget realized P&L.
    pub fn reset(&mut self) {
        self.realized_pnl = Decimal::ZERO;
    }

    pub fn state(&self) -> CapitalState {
        CapitalState {
            instance_id: self.instance_id,
            start_amount: self.start_amount,
            realized_pnl: self.realized_pnl,
            current_capital: self.current_capital(),
            current_level: self.current_level(),
        }
    }
}
