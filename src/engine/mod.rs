//! Orchestration engine: instance registry, candle cache, scheduling and the
//! per-cycle pipeline.

mod candle_cache;
mod config;
mod pipeline;
mod registry;
mod runner;
mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use config::EngineConfig;
pub use runner::Engine;
