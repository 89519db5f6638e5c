//! Engine loop: refresh, process due instances, sleep until the next deadline.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::{stream, FutureExt, StreamExt};
use tokio::sync::Notify;
use tracing::{debug, error, info, info_span, Instrument};

use crate::api::{AnalyzeClient, ExecutionClient, HttpSignalDispatcher, SignalSink};
use crate::db::Database;
use crate::market::{ClientFactory, DefaultClientFactory};

use super::candle_cache::CandleCache;
use super::config::EngineConfig;
use super::pipeline::{process_instance, CycleContext, InstanceReport};
use super::registry::{RefreshReport, Registry};
use super::scheduler::Scheduler;

/// Result of one engine cycle.
#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    pub refresh: RefreshReport,
    pub processed: Vec<InstanceReport>,
}

impl CycleReport {
    pub fn signals(&self) -> usize {
        self.processed.iter().map(|r| r.signals).sum()
    }
}

/// The orchestration engine.
pub struct Engine {
    config: EngineConfig,
    db: Database,
    cache: CandleCache,
    registry: Registry,
    scheduler: Scheduler,
    sink: Arc<dyn SignalSink>,

    // Shutdown signal
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl Engine {
    /// Create an engine with HTTP collaborators from the configuration.
    pub async fn new(config: EngineConfig) -> Result<Self> {
        let db = Database::new(&config.database_url).await?;

        let analyze = AnalyzeClient::new(&config.analyze_url, config.http_timeout())?;
        let execution = match &config.execution_url {
            Some(url) => Some(ExecutionClient::new(url, config.http_timeout())?),
            None => None,
        };
        let sink = Arc::new(HttpSignalDispatcher::new(analyze, execution));

        Ok(Self::with_parts(config, db, Arc::new(DefaultClientFactory), sink))
    }

    /// Assemble from explicit collaborators.
    pub fn with_parts(
        config: EngineConfig,
        db: Database,
        factory: Arc<dyn ClientFactory>,
        sink: Arc<dyn SignalSink>,
    ) -> Self {
        let cache = CandleCache::new(db.clone(), config.settle_buffer());
        let registry = Registry::new(db.clone(), cache.clone(), factory);
        let scheduler = Scheduler::new(config.settle_buffer(), config.idle_sleep());

        Self {
            config,
            db,
            cache,
            registry,
            scheduler,
            sink,
            shutdown: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Main run loop. Returns after Ctrl+C.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            concurrency = self.config.concurrency,
            candle_limit = self.config.candle_limit,
            settle_buffer_secs = self.config.settle_buffer_secs,
            "Starting engine loop"
        );

        // Register shutdown handler
        let shutdown = self.shutdown.clone();
        let wake = self.wake.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
            wake.notify_one();
        });

        while !self.shutdown.load(Ordering::SeqCst) {
            let sleep = match self.guarded_cycle(Utc::now()).await {
                Some(report) => {
                    debug!(
                        processed = report.processed.len(),
                        signals = report.signals(),
                        "Cycle complete"
                    );
                    self.scheduler.sleep_duration(Utc::now())
                }
                None => self.config.crash_restart_delay(),
            };

            debug!(sleep_ms = sleep.as_millis() as u64, "Sleeping until next deadline");
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = self.wake.notified() => {}
            }
        }

        self.registry.shutdown();
        info!("Engine stopped");
        Ok(())
    }

    /// Run one cycle, turning a panic anywhere in it into `None`.
    async fn guarded_cycle(&mut self, now: DateTime<Utc>) -> Option<CycleReport> {
        match AssertUnwindSafe(self.run_cycle(now)).catch_unwind().await {
            Ok(report) => Some(report),
            Err(_) => {
                error!(
                    delay_secs = self.config.crash_restart_delay_secs,
                    "Engine cycle crashed, restarting after delay"
                );
                None
            }
        }
    }

    /// One pass: refresh the registry, process due instances with bounded
    /// concurrency, then reschedule them.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        let refresh = self.registry.refresh().await;

        let registry = &self.registry;
        self.scheduler.retain(|id| registry.contains(id));

        let scheduler = &self.scheduler;
        let ctx = CycleContext {
            db: &self.db,
            cache: &self.cache,
            sink: self.sink.as_ref(),
            candle_limit: self.config.candle_limit,
        };
        let due: Vec<_> = self
            .registry
            .handles()
            .filter(|h| scheduler.is_due(h.instance.id, now))
            .collect();

        let processed: Vec<InstanceReport> = stream::iter(due)
            .map(|handle| {
                let instance_id = handle.instance.id;
                let span = info_span!("instance", instance_id);
                AssertUnwindSafe(process_instance(&ctx, handle, now).instrument(span))
                    .catch_unwind()
                    .map(move |result| {
                        result.unwrap_or_else(|_| {
                            error!(instance_id, "Instance processing panicked");
                            InstanceReport {
                                instance_id,
                                ..Default::default()
                            }
                        })
                    })
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for report in &processed {
            if let Some(handle) = self.registry.get(report.instance_id) {
                self.scheduler
                    .reschedule(report.instance_id, handle.instance.timeframes(), now);
            }
        }

        CycleReport { refresh, processed }
    }
}
