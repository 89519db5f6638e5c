//! Hands triggered signals to the review service and, on approval,
//! to the execution service.

use async_trait::async_trait;
use anyhow::Result;
use tracing::{info, warn};

use crate::models::TradeSignal;

use super::analyze_client::AnalyzeClient;
use super::execution_client::ExecutionClient;
use super::types::{AnalyzeRequest, Decision, ExecutionStatus, TradeRequest, TradeResponse};

/// What happened to a dispatched signal.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub decision: Decision,
    pub confidence: f64,
    pub reasoning: String,
    /// Present when the signal was forwarded for execution
    pub execution: Option<TradeResponse>,
}

impl DispatchOutcome {
    /// Status recorded in the `trades` table.
    pub fn trade_status(&self) -> &'static str {
        match (self.decision, &self.execution) {
            (Decision::Reject, _) => "REJECTED",
            (Decision::Approve, None) => "APPROVED",
            (Decision::Approve, Some(r)) => match r.status {
                ExecutionStatus::Success => "OPEN",
                ExecutionStatus::Failed => "FAILED",
                ExecutionStatus::Halted => "HALTED",
            },
        }
    }
}

/// Outbound boundary for triggered signals.
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn dispatch(&self, signal: &TradeSignal) -> Result<DispatchOutcome>;
}

/// HTTP implementation: `/analyze`, then `/trade` on approval when an
/// execution service is configured.
pub struct HttpSignalDispatcher {
    analyze: AnalyzeClient,
    execution: Option<ExecutionClient>,
}

impl HttpSignalDispatcher {
    pub fn new(analyze: AnalyzeClient, execution: Option<ExecutionClient>) -> Self {
        Self { analyze, execution }
    }
}

#[async_trait]
impl SignalSink for HttpSignalDispatcher {
    async fn dispatch(&self, signal: &TradeSignal) -> Result<DispatchOutcome> {
        let review = self.analyze.analyze(&AnalyzeRequest::from(signal)).await?;
        info!(
            signal_id = %signal.id,
            symbol = %signal.symbol,
            decision = %review.decision,
            confidence = review.confidence,
            "Signal reviewed"
        );

        let execution = match (review.decision, &self.execution) {
            (Decision::Approve, Some(exec)) => {
                let request = TradeRequest {
                    symbol: signal.symbol.clone(),
                    side: signal.side,
                    price: signal.price,
                    reason: review.reasoning.clone(),
                    agent_decision: review.decision,
                };
                let response = exec.submit(&request).await?;
                if response.status != ExecutionStatus::Success {
                    warn!(signal_id = %signal.id, status = ?response.status, "Execution not successful");
                }
                Some(response)
            }
            _ => None,
        };

        Ok(DispatchOutcome {
            decision: review.decision,
            confidence: review.confidence,
            reasoning: review.reasoning,
            execution,
        })
    }
}
