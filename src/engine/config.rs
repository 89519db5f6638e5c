//! Engine configuration.

use std::time::Duration;

use serde::Serialize;

/// Engine loop configuration.
#[derive(Debug, Clone, Serialize)]
pub struct EngineConfig {
    /// SQLite URL of the shared instance/candle store
    pub database_url: String,

    /// Delay after a candle close before it is treated as final (seconds)
    pub settle_buffer_secs: u64,

    /// Sleep when no instance is active (seconds)
    pub idle_sleep_secs: u64,

    /// Candles kept per (instance, symbol, timeframe) for evaluation
    pub candle_limit: u32,

    /// Pause before the loop resumes after a crashed cycle (seconds)
    pub crash_restart_delay_secs: u64,

    /// Instances processed concurrently within one cycle
    pub concurrency: usize,

    /// Signal review service
    pub analyze_url: String,

    /// Execution service; when unset the review service forwards approvals
    pub execution_url: Option<String>,

    /// Timeout for review/execution requests (seconds)
    pub http_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:cryptomon.db".to_string(),
            settle_buffer_secs: 5,
            idle_sleep_secs: 10,
            candle_limit: 500,
            crash_restart_delay_secs: 5,
            concurrency: 4,
            analyze_url: "http://localhost:8000".to_string(),
            execution_url: None,
            http_timeout_secs: 10,
        }
    }
}

impl EngineConfig {
    pub fn settle_buffer(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.settle_buffer_secs as i64)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_secs(self.idle_sleep_secs)
    }

    pub fn crash_restart_delay(&self) -> Duration {
        Duration::from_secs(self.crash_restart_delay_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
