//! Outbound clients for the signal review and execution services.

mod analyze_client;
mod dispatcher;
mod execution_client;
mod types;

pub use analyze_client::AnalyzeClient;
pub use dispatcher::{HttpSignalDispatcher, SignalSink};
pub use execution_client::ExecutionClient;

#[cfg(test)]
pub use dispatcher::DispatchOutcome;
#[cfg(test)]
pub use types::Decision;
