//! Owns the in-memory instance map and the shared market-data client pool.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::db::{Database, InstanceRecord};
use crate::market::{ClientFactory, MarketDataClient};
use crate::models::{Instance, InstanceStatus, MarketType};
use crate::trading::{validate_levels, CapitalManager};

use super::candle_cache::CandleCache;

/// A loaded instance with its capital state and market-data client.
pub struct InstanceHandle {
    pub instance: Instance,
    pub capital: CapitalManager,
    pub client: Arc<dyn MarketDataClient>,
}

/// What one `refresh()` changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub added: Vec<i64>,
    pub removed: Vec<i64>,
    pub purged: Vec<i64>,
    pub failed: Vec<i64>,
}

pub struct Registry {
    db: Database,
    cache: CandleCache,
    factory: Arc<dyn ClientFactory>,
    instances: HashMap<i64, InstanceHandle>,
    clients: HashMap<(String, MarketType), Arc<dyn MarketDataClient>>,
}

impl Registry {
    pub fn new(db: Database, cache: CandleCache, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            db,
            cache,
            factory,
            instances: HashMap::new(),
            clients: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.instances.contains_key(&id)
    }

    pub fn get(&self, id: i64) -> Option<&InstanceHandle> {
        self.instances.get(&id)
    }

    pub fn handles(&self) -> impl Iterator<Item = &InstanceHandle> {
        self.instances.values()
    }

    #[cfg(test)]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Reconcile memory with the store. Safe to call every cycle; a store
    /// read failure leaves the in-memory state untouched.
    pub async fn refresh(&mut self) -> RefreshReport {
        let mut report = RefreshReport::default();

        let records = match self.db.list_instance_records().await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "Failed to read instances, keeping current set");
                return report;
            }
        };

        let mut active = HashSet::new();
        let mut pending = Vec::new();
        for record in records {
            match record.status() {
                Ok(InstanceStatus::Deleted) => {
                    if self.purge(record.id).await {
                        report.purged.push(record.id);
                    }
                }
                Ok(InstanceStatus::Active) => {
                    active.insert(record.id);
                    pending.push(record);
                }
                Ok(InstanceStatus::Stopped) => {}
                Err(e) => warn!(instance_id = record.id, error = %e, "Unreadable instance status"),
            }
        }

        for record in pending {
            let id = record.id;
            if let Some(handle) = self.instances.get_mut(&id) {
                sync_realized_pnl(&self.db, handle).await;
                continue;
            }
            match self.load(record).await {
                Ok(handle) => {
                    info!(
                        instance_id = id,
                        name = %handle.instance.name,
                        exchange = %handle.instance.exchange,
                        pairs = handle.instance.pairs.len(),
                        "Instance loaded"
                    );
                    self.instances.insert(id, handle);
                    report.added.push(id);
                }
                Err(e) => {
                    warn!(instance_id = id, error = %e, "Failed to load instance");
                    report.failed.push(id);
                }
            }
        }

        let stale: Vec<i64> = self
            .instances
            .keys()
            .copied()
            .filter(|id| !active.contains(id))
            .collect();
        for id in stale {
            self.instances.remove(&id);
            info!(instance_id = id, "Instance no longer active, removed");
            report.removed.push(id);
        }

        report
    }

    /// Purge cached candles, then the record itself. Returns false (and
    /// retries next refresh) if either step fails.
    async fn purge(&mut self, id: i64) -> bool {
        self.instances.remove(&id);

        let candles = match self.cache.purge_instance(id).await {
            Ok(n) => n,
            Err(e) => {
                warn!(instance_id = id, error = %e, "Failed to purge candles");
                return false;
            }
        };
        if let Err(e) = self.db.delete_instance(id).await {
            warn!(instance_id = id, error = %e, "Failed to delete instance record");
            return false;
        }

        info!(instance_id = id, candles, "Deleted instance purged");
        true
    }

    async fn load(&mut self, record: InstanceRecord) -> Result<InstanceHandle> {
        let instance = record.into_instance()?;
        let client = self.client_for(&instance).await?;

        let capital_cfg = &instance.strategy.capital;
        let mut capital = CapitalManager::new(
            instance.id,
            capital_cfg.start_amount,
            capital_cfg.levels.clone(),
        );
        if let Some(stored) = self.db.load_instance_state(instance.id).await? {
            capital = capital.with_realized_pnl(stored.realized_pnl);
        }
        for issue in validate_levels(capital.levels()) {
            warn!(instance_id = instance.id, issue = %issue, "Level table issue");
        }
        if instance.strategy.rules.has_unknown_indicator() {
            warn!(instance_id = instance.id, "Rules reference unknown indicators and will fail closed");
        }

        Ok(InstanceHandle {
            instance,
            capital,
            client,
        })
    }

    /// Shared client for the instance's (exchange, market type); built and
    /// loaded once per key.
    async fn client_for(&mut self, instance: &Instance) -> Result<Arc<dyn MarketDataClient>> {
        let key = instance.client_key();
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let client = self.factory.create(&key.0, key.1).await?;
        let markets = client.load_markets().await?;
        info!(exchange = %key.0, market_type = %key.1, markets, "Market-data client ready");
        self.clients.insert(key, client.clone());
        Ok(client)
    }

    /// Drop every instance and client.
    pub fn shutdown(&mut self) {
        info!(
            instances = self.instances.len(),
            clients = self.clients.len(),
            "Registry shut down"
        );
        self.instances.clear();
        self.clients.clear();
    }
}

/// Pick up P&L applied out of band (operator CLI).
async fn sync_realized_pnl(db: &Database, handle: &mut InstanceHandle) {
    match db.load_instance_state(handle.instance.id).await {
        Ok(Some(stored)) if stored.realized_pnl != handle.capital.realized_pnl() => {
            info!(
                instance_id = handle.instance.id,
                realized_pnl = %stored.realized_pnl,
                "Realized P&L updated from store"
            );
            handle.capital = handle.capital.clone().with_realized_pnl(stored.realized_pnl);
        }
        Ok(_) => {}
        Err(e) => warn!(instance_id = handle.instance.id, error = %e, "Failed to read instance state"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{MockFactory, MockMarket};
    use crate::models::NewInstance;
    use rust_decimal_macros::dec;
    use std::sync::atomic::Ordering;

    fn doc(exchange: &str) -> NewInstance {
        serde_json::from_str(&format!(
            r#"{{
                "name": "test",
                "exchange": "{}",
                "market_type": "Spot",
                "pairs": ["BTC/USDT"],
                "timeframes": ["1h", "4h", "1d"]
            }}"#,
            exchange
        ))
        .unwrap()
    }

    async fn setup() -> (Registry, Database, Arc<MockFactory>) {
        let db = Database::in_memory().await.unwrap();
        let cache = CandleCache::new(db.clone(), chrono::Duration::seconds(5));
        let factory = Arc::new(MockFactory::new(Arc::new(MockMarket::default())));
        let registry = Registry::new(db.clone(), cache, factory.clone());
        (registry, db, factory)
    }

    #[tokio::test]
    async fn test_refresh_loads_active_and_shares_clients() {
        let (mut registry, db, factory) = setup().await;
        let a = db.insert_instance(&doc("binance")).await.unwrap();
        let b = db.insert_instance(&doc("binance")).await.unwrap();

        let report = registry.refresh().await;
        assert_eq!(report.added, vec![a, b]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.client_count(), 1);
        assert_eq!(factory.creates.load(Ordering::SeqCst), 1);

        // Idempotent: nothing changes on a second pass
        let report = registry.refresh().await;
        assert_eq!(report, RefreshReport::default());
        assert_eq!(factory.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stopped_instance_is_removed() {
        let (mut registry, db, _) = setup().await;
        let id = db.insert_instance(&doc("binance")).await.unwrap();
        registry.refresh().await;

        db.set_status(id, InstanceStatus::Stopped).await.unwrap();
        let report = registry.refresh().await;
        assert_eq!(report.removed, vec![id]);
        assert!(!registry.contains(id));
        // Still stored, only inactive
        assert!(db.get_instance_record(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_deleted_instance_is_purged() {
        let (mut registry, db, _) = setup().await;
        let id = db.insert_instance(&doc("binance")).await.unwrap();
        registry.refresh().await;

        db.set_status(id, InstanceStatus::Deleted).await.unwrap();
        let report = registry.refresh().await;
        assert_eq!(report.purged, vec![id]);
        assert!(!registry.contains(id));
        assert!(db.get_instance_record(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_read_failure_keeps_loaded_instances() {
        let (mut registry, db, _) = setup().await;
        let id = db.insert_instance(&doc("binance")).await.unwrap();
        registry.refresh().await;

        sqlx::query("ALTER TABLE instances RENAME TO instances_moved")
            .execute(db.pool())
            .await
            .unwrap();
        let report = registry.refresh().await;
        assert_eq!(report, RefreshReport::default());
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(id));
    }

    #[tokio::test]
    async fn test_unsupported_exchange_is_not_loaded() {
        let (mut registry, db, _) = setup().await;
        let id = db.insert_instance(&doc("unsupported")).await.unwrap();
        let report = registry.refresh().await;
        assert_eq!(report.failed, vec![id]);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_realized_pnl_restored_and_synced() {
        let (mut registry, db, _) = setup().await;
        let id = db.insert_instance(&doc("binance")).await.unwrap();
        let stored = CapitalManager::new(id, dec!(150), None).with_realized_pnl(dec!(70));
        db.upsert_instance_state(&stored.state()).await.unwrap();

        registry.refresh().await;
        assert_eq!(registry.get(id).unwrap().capital.current_capital(), dec!(220));

        let reset = CapitalManager::new(id, dec!(150), None);
        db.upsert_instance_state(&reset.state()).await.unwrap();
        registry.refresh().await;
        assert_eq!(registry.get(id).unwrap().capital.realized_pnl(), dec!(0));
    }
}
