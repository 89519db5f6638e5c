//! One instance's work for a cycle: sync, annotate, evaluate, dispatch.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::api::SignalSink;
use crate::db::{Database, NewTrade};
use crate::indicators::{annotate_with, IndicatorFrame, IndicatorRef};
use crate::models::TradeSignal;
use crate::rules::evaluate_all;
use crate::trading::Level;

use super::candle_cache::CandleCache;
use super::registry::InstanceHandle;

/// Shared, read-only collaborators for a cycle.
pub struct CycleContext<'a> {
    pub db: &'a Database,
    pub cache: &'a CandleCache,
    pub sink: &'a dyn SignalSink,
    pub candle_limit: u32,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InstanceReport {
    pub instance_id: i64,
    pub signals: usize,
    pub suppressed: usize,
    pub skipped_symbols: usize,
}

/// Process every pair of the instance. Failures are logged per symbol and
/// never escape, so one instance cannot abort the cycle.
pub async fn process_instance(
    ctx: &CycleContext<'_>,
    handle: &InstanceHandle,
    now: DateTime<Utc>,
) -> InstanceReport {
    let instance_id = handle.instance.id;
    let mut report = InstanceReport {
        instance_id,
        ..Default::default()
    };
    let references = handle.instance.strategy.rules.references();
    let pairs: Vec<String> = handle.instance.pairs.iter().cloned().collect();

    for symbol in pairs {
        let Some(frames) = load_frames(ctx, handle, &symbol, &references, now).await else {
            report.skipped_symbols += 1;
            continue;
        };

        let evaluation = evaluate_all(&handle.instance.strategy.rules, &frames);
        debug!(
            symbol = %symbol,
            trend = %evaluation.trend,
            triggers = evaluation.triggers.len(),
            "Rules evaluated"
        );

        let trigger_frame = &frames[0];
        let Some(last) = trigger_frame.last_candle() else {
            continue;
        };
        for side in evaluation.triggers {
            let signal = TradeSignal::new(
                instance_id,
                symbol.as_str(),
                handle.instance.timeframes()[0],
                side,
                last.close,
                trigger_frame.snapshot(),
                evaluation.trend,
            );
            if dispatch(ctx, handle, &signal).await {
                report.signals += 1;
            } else {
                report.suppressed += 1;
            }
        }
    }

    match ctx.db.save_capital_snapshot(&handle.capital.state()).await {
        Ok(true) => {}
        Ok(false) => debug!(instance_id, "Realized P&L changed out of band, snapshot skipped"),
        Err(e) => warn!(instance_id, error = %e, "Failed to persist capital state"),
    }

    report
}

/// Sync and annotate every timeframe in order. `None` skips the symbol.
async fn load_frames(
    ctx: &CycleContext<'_>,
    handle: &InstanceHandle,
    symbol: &str,
    references: &[IndicatorRef],
    now: DateTime<Utc>,
) -> Option<Vec<IndicatorFrame>> {
    let instance_id = handle.instance.id;
    let mut frames = Vec::with_capacity(handle.instance.timeframes().len());

    for &timeframe in handle.instance.timeframes() {
        let candles = match ctx
            .cache
            .sync_at(
                handle.client.as_ref(),
                instance_id,
                symbol,
                timeframe,
                ctx.candle_limit,
                now,
            )
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                warn!(instance_id, symbol, timeframe = %timeframe, error = %e, "Candle sync failed");
                return None;
            }
        };
        if candles.is_empty() {
            info!(instance_id, symbol, timeframe = %timeframe, "No candles, skipping symbol");
            return None;
        }
        frames.push(annotate_with(candles, references));
    }

    Some(frames)
}

/// Dispatch unless the kill switch is active, then record the outcome.
/// Returns whether the signal left the engine.
async fn dispatch(ctx: &CycleContext<'_>, handle: &InstanceHandle, signal: &TradeSignal) -> bool {
    let instance_id = handle.instance.id;
    let level = handle.capital.current_level();

    if level == Level::CriticalLow {
        error!(
            instance_id,
            symbol = %signal.symbol,
            capital = %handle.capital.current_capital(),
            "Kill switch active, signal suppressed"
        );
        return false;
    }
    if level == Level::Unknown {
        warn!(
            instance_id,
            capital = %handle.capital.current_capital(),
            "Capital outside every level range, position size is zero"
        );
    }

    let amount = handle
        .capital
        .position_size(handle.instance.strategy.capital.risk_percent);

    info!(
        instance_id,
        signal_id = %signal.id,
        symbol = %signal.symbol,
        side = %signal.side,
        trend = %signal.trend,
        price = signal.price,
        level = %level,
        amount = %amount,
        "Signal triggered"
    );

    let (status, notes) = match ctx.sink.dispatch(signal).await {
        Ok(outcome) => (outcome.trade_status(), outcome.reasoning),
        Err(e) => {
            warn!(instance_id, signal_id = %signal.id, error = %e, "Signal dispatch failed");
            ("FAILED", e.to_string())
        }
    };

    let trade = NewTrade {
        instance_id,
        symbol: &signal.symbol,
        side: signal.side,
        amount,
        entry_price: signal.price,
        status,
        agent_notes: Some(&notes),
    };
    if let Err(e) = ctx.db.log_trade(&trade).await {
        warn!(instance_id, error = %e, "Failed to record trade");
    }

    true
}
