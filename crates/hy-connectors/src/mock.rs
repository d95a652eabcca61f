//! Mock target store for testing.
//!
//! Keeps records in memory, emulates a client-side listing cache that is only
//! bypassed on forced refresh, and supports failure injection for create/update
//! paths including a simulated concurrent-create race.

use crate::traits::{ConnectorError, ConnectorResult, TargetRecord, TargetStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Behavior configuration for failure injection.
#[derive(Debug, Clone, Default)]
pub enum MockBehavior {
    /// Normal operation.
    #[default]
    Normal,
    /// Fail every create.
    FailCreates(ConnectorError),
    /// Fail creates whose payload `name` equals the given value.
    FailCreateForName { name: String, error: ConnectorError },
    /// Fail every update.
    FailUpdates(ConnectorError),
    /// Store the record but report a conflict, as if another process won a race.
    RaceOnCreate,
    /// Fail any call after N calls.
    FailAfter { calls: u64, error: ConnectorError },
    /// Always fail.
    AlwaysFail(ConnectorError),
}

/// Record of a store call for test verification.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub operation: String,
    pub argument: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
}

/// In-memory target store.
pub struct MockTargetStore {
    name: String,
    records: Arc<RwLock<Vec<TargetRecord>>>,
    listing_cache: Arc<RwLock<Option<Vec<TargetRecord>>>>,
    behavior: Arc<RwLock<MockBehavior>>,
    call_count: AtomicU64,
    next_id: AtomicU64,
    history: Arc<RwLock<Vec<CallRecord>>>,
}

impl MockTargetStore {
    /// Creates an empty mock store.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            records: Arc::new(RwLock::new(Vec::new())),
            listing_cache: Arc::new(RwLock::new(None)),
            behavior: Arc::new(RwLock::new(MockBehavior::Normal)),
            call_count: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            history: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Creates a mock store pre-populated with records.
    pub fn with_records(name: &str, records: Vec<TargetRecord>) -> Self {
        let mut store = Self::new(name);
        let next = records
            .iter()
            .filter_map(|r| r.id.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        store.next_id.store(next, Ordering::SeqCst);
        store.records = Arc::new(RwLock::new(records));
        store
    }

    /// Adds a record directly, bypassing behavior checks and the listing cache.
    pub async fn insert(&self, record: TargetRecord) {
        self.records.write().await.push(record);
    }

    /// Returns a copy of every stored record.
    pub async fn records(&self) -> Vec<TargetRecord> {
        self.records.read().await.clone()
    }

    /// Sets the behavior for failure injection.
    pub async fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.write().await = behavior;
    }

    /// Returns the recorded call history.
    pub async fn history(&self) -> Vec<CallRecord> {
        self.history.read().await.clone()
    }

    /// Returns how many calls of the given operation were made.
    pub async fn count_calls(&self, operation: &str) -> usize {
        self.history
            .read()
            .await
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Clears records, cache and history.
    pub async fn clear(&self) {
        self.records.write().await.clear();
        *self.listing_cache.write().await = None;
        self.history.write().await.clear();
        self.call_count.store(0, Ordering::SeqCst);
    }

    async fn check_behavior(&self) -> ConnectorResult<()> {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        let behavior = self.behavior.read().await;

        match &*behavior {
            MockBehavior::FailAfter { calls, error } if count > *calls => Err(error.clone()),
            MockBehavior::AlwaysFail(error) => Err(error.clone()),
            _ => Ok(()),
        }
    }

    async fn record_call(&self, operation: &str, argument: &str, success: bool) {
        self.history.write().await.push(CallRecord {
            operation: operation.to_string(),
            argument: argument.to_string(),
            timestamp: Utc::now(),
            success,
        });
    }

    fn allocate_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::SeqCst).to_string()
    }
}

#[async_trait]
impl TargetStore for MockTargetStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search_by_serial(&self, serial: &str) -> ConnectorResult<Option<TargetRecord>> {
        self.check_behavior().await?;
        let found = self
            .records
            .read()
            .await
            .iter()
            .find(|r| {
                r.serial
                    .as_deref()
                    .is_some_and(|s| s.eq_ignore_ascii_case(serial))
            })
            .cloned();
        self.record_call("search_by_serial", serial, true).await;
        Ok(found)
    }

    async fn search_by_tag(&self, tag: &str) -> ConnectorResult<Option<TargetRecord>> {
        self.check_behavior().await?;
        let found = self
            .records
            .read()
            .await
            .iter()
            .find(|r| r.asset_tag.as_deref() == Some(tag))
            .cloned();
        self.record_call("search_by_tag", tag, true).await;
        Ok(found)
    }

    async fn list_all(&self, refresh: bool) -> ConnectorResult<Vec<TargetRecord>> {
        self.check_behavior().await?;

        let mut cache = self.listing_cache.write().await;
        let listing = match (&*cache, refresh) {
            (Some(cached), false) => cached.clone(),
            _ => {
                let fresh = self.records.read().await.clone();
                *cache = Some(fresh.clone());
                fresh
            }
        };
        drop(cache);

        self.record_call("list_all", if refresh { "refresh" } else { "cached" }, true)
            .await;
        Ok(listing)
    }

    async fn create(&self, payload: &serde_json::Value) -> ConnectorResult<TargetRecord> {
        self.check_behavior().await?;
        let name = payload
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let behavior = self.behavior.read().await.clone();
        match behavior {
            MockBehavior::FailCreates(error) => {
                self.record_call("create", &name, false).await;
                return Err(error);
            }
            MockBehavior::FailCreateForName { name: target, error } if target == name => {
                self.record_call("create", &name, false).await;
                return Err(error);
            }
            MockBehavior::RaceOnCreate => {
                let record = TargetRecord::from_payload(self.allocate_id(), payload);
                self.records.write().await.push(record);
                self.record_call("create", &name, false).await;
                return Err(ConnectorError::Conflict(format!(
                    "{} already exists",
                    name
                )));
            }
            _ => {}
        }

        let record = TargetRecord::from_payload(self.allocate_id(), payload);
        self.records.write().await.push(record.clone());
        self.record_call("create", &name, true).await;
        Ok(record)
    }

    async fn update(
        &self,
        id: &str,
        payload: &serde_json::Value,
    ) -> ConnectorResult<TargetRecord> {
        self.check_behavior().await?;

        if let MockBehavior::FailUpdates(error) = &*self.behavior.read().await {
            self.record_call("update", id, false).await;
            return Err(error.clone());
        }

        let mut records = self.records.write().await;
        let Some(record) = records.iter_mut().find(|r| r.id == id) else {
            drop(records);
            self.record_call("update", id, false).await;
            return Err(ConnectorError::NotFound(format!("record {}", id)));
        };
        record.apply_payload(payload);
        let updated = record.clone();
        drop(records);

        self.record_call("update", id, true).await;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_search_by_serial_is_case_insensitive() {
        let store = MockTargetStore::with_records(
            "inventory",
            vec![TargetRecord::new("1").with_serial("sn-001")],
        );

        let found = store.search_by_serial("SN-001").await.unwrap();
        assert_eq!(found.map(|r| r.id), Some("1".to_string()));
        assert!(store.search_by_serial("SN-002").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_listing_cache_requires_refresh() {
        let store = MockTargetStore::new("inventory");
        assert!(store.list_all(false).await.unwrap().is_empty());

        store.insert(TargetRecord::new("5").with_name("late")).await;

        // Cached listing does not see the new record
        assert!(store.list_all(false).await.unwrap().is_empty());
        // Forced refresh does
        assert_eq!(store.list_all(true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_allocates_ids() {
        let store = MockTargetStore::with_records("inventory", vec![TargetRecord::new("9")]);

        let created = store.create(&json!({ "name": "host-a" })).await.unwrap();
        assert_eq!(created.id, "10");
        assert_eq!(store.records().await.len(), 2);
    }

    #[tokio::test]
    async fn test_race_on_create_stores_record() {
        let store = MockTargetStore::new("inventory");
        store.set_behavior(MockBehavior::RaceOnCreate).await;

        let result = store.create(&json!({ "name": "host-b" })).await;
        assert!(matches!(result, Err(ConnectorError::Conflict(_))));
        assert_eq!(store.records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_create_for_name() {
        let store = MockTargetStore::new("inventory");
        store
            .set_behavior(MockBehavior::FailCreateForName {
                name: "bad".to_string(),
                error: ConnectorError::InvalidRequest("rejected".to_string()),
            })
            .await;

        assert!(store.create(&json!({ "name": "bad" })).await.is_err());
        assert!(store.create(&json!({ "name": "good" })).await.is_ok());
        assert_eq!(store.count_calls("create").await, 2);
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = MockTargetStore::new("inventory");
        let result = store.update("404", &json!({ "name": "x" })).await;
        assert!(matches!(result, Err(ConnectorError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_fail_after() {
        let store = MockTargetStore::new("inventory");
        store
            .set_behavior(MockBehavior::FailAfter {
                calls: 1,
                error: ConnectorError::Timeout("slow".to_string()),
            })
            .await;

        assert!(store.list_all(false).await.is_ok());
        assert!(store.list_all(false).await.is_err());
    }
}
