//! Wire types for the signal review (analyze) and execution services.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{Side, TradeSignal, Trend};

/// Body of `POST /analyze`.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeRequest {
    pub symbol: String,
    pub timeframe: String,
    pub signal_type: Side,
    pub price: f64,
    pub indicators: BTreeMap<String, f64>,
    pub trend: Trend,
}

impl From<&TradeSignal> for AnalyzeRequest {
    fn from(signal: &TradeSignal) -> Self {
        Self {
            symbol: signal.symbol.clone(),
            timeframe: signal.timeframe.to_string(),
            signal_type: signal.side,
            price: signal.price,
            indicators: signal.indicators.clone(),
            trend: signal.trend,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Approve,
    Reject,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Approve => f.write_str("APPROVE"),
            Decision::Reject => f.write_str("REJECT"),
        }
    }
}

/// Response of `POST /analyze`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnalyzeResponse {
    pub decision: Decision,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// Body of `POST /trade`.
#[derive(Debug, Clone, Serialize)]
pub struct TradeRequest {
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub reason: String,
    pub agent_decision: Decision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Halted,
}

/// Response of `POST /trade`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TradeResponse {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub order_id: Option<String>,
}
