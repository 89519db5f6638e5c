//! Monitoring instance model and its typed strategy configuration.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::rules::RuleConfig;
use crate::trading::LevelRange;

use super::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketType {
    Spot,
    Futures,
}

impl MarketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::Spot => "Spot",
            MarketType::Futures => "Futures",
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "spot" => Ok(MarketType::Spot),
            "futures" | "future" | "swap" => Ok(MarketType::Futures),
            other => bail!("unknown market type: {}", other),
        }
    }
}

/// Lifecycle status. Only status transitions mutate a stored instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceStatus {
    Active,
    Stopped,
    Deleted,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Active => "ACTIVE",
            InstanceStatus::Stopped => "STOPPED",
            InstanceStatus::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Ok(InstanceStatus::Active),
            "STOPPED" => Ok(InstanceStatus::Stopped),
            "DELETED" => Ok(InstanceStatus::Deleted),
            other => bail!("unknown instance status: {}", other),
        }
    }
}

/// Capital settings for one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapitalConfig {
    /// Capital the instance starts trading with
    pub start_amount: Decimal,

    /// Fraction of the current level minimum risked per trade
    #[serde(default = "default_risk_percent")]
    pub risk_percent: Decimal,

    /// Level table; the default table is used when absent
    #[serde(default)]
    pub levels: Option<Vec<LevelRange>>,
}

fn default_risk_percent() -> Decimal {
    dec!(0.02)
}

impl Default for CapitalConfig {
    fn default() -> Self {
        Self {
            start_amount: dec!(150),
            risk_percent: default_risk_percent(),
            levels: None,
        }
    }
}

/// Everything stored in the `strategy_config` column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Ordered smallest first: trigger, medium trend, large trend, ...
    pub timeframes: Vec<Timeframe>,

    #[serde(default)]
    pub rules: RuleConfig,

    #[serde(default)]
    pub capital: CapitalConfig,
}

/// One independently configured monitoring unit.
#[derive(Debug, Clone)]
pub struct Instance {
    pub id: i64,
    pub name: String,
    pub exchange: String,
    pub market_type: MarketType,
    pub base_currency: String,
    pub pairs: BTreeSet<String>,
    pub strategy: StrategyConfig,
    pub status: InstanceStatus,
}

impl Instance {
    pub fn timeframes(&self) -> &[Timeframe] {
        &self.strategy.timeframes
    }

    /// Key of the shared market-data client serving this instance.
    pub fn client_key(&self) -> (String, MarketType) {
        (self.exchange.to_lowercase(), self.market_type)
    }

    pub fn validate(&self) -> Result<()> {
        if self.strategy.timeframes.is_empty() {
            bail!("instance {} has no timeframes", self.id);
        }
        if self.pairs.is_empty() {
            bail!("instance {} has no pairs", self.id);
        }
        if self.strategy.capital.start_amount <= Decimal::ZERO {
            bail!("instance {} has a non-positive start amount", self.id);
        }
        Ok(())
    }
}

/// Input document for creating an instance from the CLI.
#[derive(Debug, Clone, Deserialize)]
pub struct NewInstance {
    pub name: String,
    pub exchange: String,
    pub market_type: MarketType,
    #[serde(default = "default_base_currency")]
    pub base_currency: String,
    pub pairs: BTreeSet<String>,
    #[serde(flatten)]
    pub strategy: StrategyConfig,
}

fn default_base_currency() -> String {
    "USDT".to_string()
}
