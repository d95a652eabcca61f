//! Per-target synchronisation pipeline.
//!
//! For each canonical asset: locate it in the target, decide through the
//! target's state manager, build a payload, dispatch it, and record the result.
//! Every candidate produces exactly one outcome; a failing candidate never
//! stops the rest of the batch.

use crate::finder::{FieldMap, Finder};
use crate::models::{CanonicalAsset, SyncAction};
use crate::state::{StateError, StateManager};
use crate::static_ref::StaticReference;
use chrono::{DateTime, Utc};
use hy_connectors::{ConnectorError, TargetRecord, TargetStore};
use hy_observability::{metrics, sync_span};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Errors that stop a whole target run.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Target store error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Unknown target: {0}")]
    UnknownTarget(String),
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Turns a canonical asset into a target payload.
pub trait PayloadBuilder: Send + Sync {
    fn build(&self, asset: &CanonicalAsset, existing: Option<&TargetRecord>) -> Value;
}

/// Default builder: the canonical field map, the primary MAC as
/// `mac_address`, and mapped identifiers under `custom_fields`.
#[derive(Debug, Clone, Default)]
pub struct FlatPayloadBuilder {
    field_map: FieldMap,
}

impl FlatPayloadBuilder {
    pub fn new(field_map: FieldMap) -> Self {
        Self { field_map }
    }
}

fn display_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(display_value)
                .collect::<Vec<_>>()
                .join(", "),
        ),
        Value::Object(obj) => obj.get("name").and_then(display_value),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

impl PayloadBuilder for FlatPayloadBuilder {
    fn build(&self, asset: &CanonicalAsset, _existing: Option<&TargetRecord>) -> Value {
        let mut payload = asset.to_map();

        if let Some(mac) = asset.record.primary_mac() {
            payload.insert("mac_address".into(), Value::String(mac.to_string()));
        }

        let custom_fields: Map<String, Value> = self
            .field_map
            .iter()
            .filter_map(|(key, label)| {
                let value = asset.field(key)?;
                display_value(&value).map(|text| (label.to_string(), Value::String(text)))
            })
            .collect();
        payload.insert("custom_fields".into(), Value::Object(custom_fields));

        Value::Object(payload)
    }
}

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Created { target_id: Option<String> },
    Updated { target_id: Option<String> },
    Skipped { reason: String },
    Failed { reason: String },
}

impl SyncOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SyncOutcome::Created { .. } => "created",
            SyncOutcome::Updated { .. } => "updated",
            SyncOutcome::Skipped { .. } => "skipped",
            SyncOutcome::Failed { .. } => "failed",
        }
    }
}

/// One candidate's outcome with enough context to report it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateOutcome {
    pub name: Option<String>,
    pub key: Option<String>,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

/// Summary of one target run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    /// Target the run synchronised into.
    pub target: String,
    pub run_id: Uuid,
    /// Whether dispatch and recording were suppressed.
    pub dry_run: bool,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub outcomes: Vec<CandidateOutcome>,
    /// Total duration of the run in milliseconds.
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn new(target: impl Into<String>, dry_run: bool) -> Self {
        Self {
            target: target.into(),
            run_id: Uuid::new_v4(),
            dry_run,
            created: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            outcomes: Vec::new(),
            duration_ms: 0,
            completed_at: Utc::now(),
        }
    }

    /// Adds one candidate's outcome to the tallies.
    pub fn push(&mut self, outcome: CandidateOutcome) {
        match &outcome.outcome {
            SyncOutcome::Created { .. } => self.created += 1,
            SyncOutcome::Updated { .. } => self.updated += 1,
            SyncOutcome::Skipped { .. } => self.skipped += 1,
            SyncOutcome::Failed { .. } => self.failed += 1,
        }
        metrics::record_sync_outcome(&self.target, outcome.outcome.label());
        self.outcomes.push(outcome);
    }

    /// Number of candidates processed.
    pub fn total(&self) -> u64 {
        self.created + self.updated + self.skipped + self.failed
    }

    /// Returns the total number of changes made.
    pub fn total_changes(&self) -> u64 {
        self.created + self.updated
    }

    /// Returns whether the run completed without failures.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    /// Failed candidates and their reasons.
    pub fn failures(&self) -> impl Iterator<Item = (&CandidateOutcome, &str)> {
        self.outcomes.iter().filter_map(|o| match &o.outcome {
            SyncOutcome::Failed { reason } => Some((o, reason.as_str())),
            _ => None,
        })
    }
}

/// Totals across several target runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub reports: Vec<SyncReport>,
}

impl RunSummary {
    pub fn push(&mut self, report: SyncReport) {
        self.reports.push(report);
    }

    pub fn created(&self) -> u64 {
        self.reports.iter().map(|r| r.created).sum()
    }

    pub fn updated(&self) -> u64 {
        self.reports.iter().map(|r| r.updated).sum()
    }

    pub fn skipped(&self) -> u64 {
        self.reports.iter().map(|r| r.skipped).sum()
    }

    pub fn failed(&self) -> u64 {
        self.reports.iter().map(|r| r.failed).sum()
    }

    pub fn total_changes(&self) -> u64 {
        self.reports.iter().map(SyncReport::total_changes).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.reports.iter().all(SyncReport::is_clean)
    }

    pub fn report(&self, target: &str) -> Option<&SyncReport> {
        self.reports.iter().find(|r| r.target == target)
    }
}

/// Synchronises canonical assets into one target.
pub struct TargetSync {
    store: Arc<dyn TargetStore>,
    state: StateManager,
    static_ref: Arc<StaticReference>,
    field_map: FieldMap,
    finder: Option<Finder>,
    builder: Box<dyn PayloadBuilder>,
    dry_run: bool,
}

impl TargetSync {
    /// Builds the pipeline. Targets whose policy uses the finder load their
    /// listing snapshot here, before any lookup runs.
    pub async fn new(
        store: Arc<dyn TargetStore>,
        state: StateManager,
        static_ref: Arc<StaticReference>,
        field_map: FieldMap,
    ) -> SyncResult<Self> {
        let finder = if state.policy().uses_finder() {
            Some(Finder::load(store.clone(), static_ref.clone(), field_map.clone()).await?)
        } else {
            None
        };

        Ok(Self {
            builder: Box::new(FlatPayloadBuilder::new(field_map.clone())),
            store,
            state,
            static_ref,
            field_map,
            finder,
            dry_run: false,
        })
    }

    pub fn with_builder(mut self, builder: Box<dyn PayloadBuilder>) -> Self {
        self.builder = builder;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn target(&self) -> &str {
        self.state.target()
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// Processes a batch and saves the ledger once at the end.
    pub async fn run(&mut self, assets: &[CanonicalAsset]) -> SyncResult<SyncReport> {
        let span = sync_span!(
            self.state.target(),
            assets = assets.len(),
            dry_run = self.dry_run
        );
        self.run_batch(assets).instrument(span).await
    }

    async fn run_batch(&mut self, assets: &[CanonicalAsset]) -> SyncResult<SyncReport> {
        let started = Instant::now();
        let mut report = SyncReport::new(self.state.target(), self.dry_run);

        for asset in assets {
            let outcome = self.sync_one(asset).await;
            report.push(outcome);
        }

        if !self.dry_run {
            self.state.save()?;
        }

        let elapsed = started.elapsed();
        report.duration_ms = elapsed.as_millis() as u64;
        metrics::record_sync_duration(&report.target, elapsed.as_secs_f64());
        report.completed_at = Utc::now();

        info!(
            store = %report.target,
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failed,
            "Target sync complete"
        );
        Ok(report)
    }

    async fn sync_one(&mut self, asset: &CanonicalAsset) -> CandidateOutcome {
        let name = asset.name().map(String::from);

        let found = match &self.finder {
            Some(finder) => match finder.find(&asset.record).await {
                Ok(found) => found.map(|m| m.record),
                Err(e) => {
                    warn!(store = %self.state.target(), name = ?name, error = %e, "Lookup failed");
                    return CandidateOutcome {
                        name,
                        key: None,
                        outcome: SyncOutcome::Failed {
                            reason: format!("lookup failed: {}", e),
                        },
                    };
                }
            },
            None => None,
        };

        let decision = self.state.check(asset, found.as_ref());
        debug!(
            store = %self.state.target(),
            name = ?name,
            action = %decision.action,
            reason = %decision.reason,
            "Checked candidate"
        );

        let key = decision.key.clone();
        let outcome = match (decision.action, key.as_deref()) {
            (SyncAction::Skip, _) | (_, None) => SyncOutcome::Skipped {
                reason: decision.reason,
            },
            (SyncAction::Create, Some(_)) if self.dry_run => {
                SyncOutcome::Created { target_id: None }
            }
            (SyncAction::Update, Some(_)) if self.dry_run => SyncOutcome::Updated {
                target_id: decision.target_id,
            },
            (SyncAction::Create, Some(key)) => self.create(key, asset).await,
            (SyncAction::Update, Some(key)) => match decision.target_id {
                Some(id) => {
                    self.update(key, asset, &id, decision.existing_record.as_ref())
                        .await
                }
                None => self.create(key, asset).await,
            },
        };

        CandidateOutcome { name, key, outcome }
    }

    async fn create(&mut self, key: &str, asset: &CanonicalAsset) -> SyncOutcome {
        let payload = self.builder.build(asset, None);

        let error = match self.store.create(&payload).await {
            Ok(created) => {
                self.state
                    .record(key, asset, SyncAction::Create, Some(created.id.clone()));
                return SyncOutcome::Created {
                    target_id: Some(created.id),
                };
            }
            Err(e) => e,
        };

        if !error.may_indicate_race() {
            return SyncOutcome::Failed {
                reason: error.to_string(),
            };
        }

        warn!(
            store = %self.state.target(),
            key,
            error = %error,
            "Create failed, re-checking against a fresh listing"
        );

        let rematch = match self.relookup(asset).await {
            Ok(found) => found,
            Err(e) => {
                return SyncOutcome::Failed {
                    reason: format!("{}; re-lookup failed: {}", error, e),
                }
            }
        };

        match rematch {
            Some(existing) => {
                let id = existing.id.clone();
                self.update(key, asset, &id, Some(&existing)).await
            }
            None => SyncOutcome::Failed {
                reason: error.to_string(),
            },
        }
    }

    async fn relookup(
        &mut self,
        asset: &CanonicalAsset,
    ) -> Result<Option<TargetRecord>, ConnectorError> {
        let found = match self.finder.as_mut() {
            Some(finder) => {
                finder.refresh().await?;
                finder.find(&asset.record).await?
            }
            None => {
                let finder = Finder::load_fresh(
                    self.store.clone(),
                    self.static_ref.clone(),
                    self.field_map.clone(),
                )
                .await?;
                finder.find(&asset.record).await?
            }
        };
        Ok(found.map(|m| m.record))
    }

    async fn update(
        &mut self,
        key: &str,
        asset: &CanonicalAsset,
        id: &str,
        existing: Option<&TargetRecord>,
    ) -> SyncOutcome {
        let payload = self.builder.build(asset, existing);

        match self.store.update(id, &payload).await {
            Ok(updated) => {
                self.state
                    .record(key, asset, SyncAction::Update, Some(updated.id.clone()));
                SyncOutcome::Updated {
                    target_id: Some(updated.id),
                }
            }
            Err(e) => SyncOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Classification, DeviceRecord, DeviceType};
    use crate::state::{Ledger, PolicyKind};
    use hy_connectors::{MockBehavior, MockTargetStore};
    use serde_json::json;
    use std::collections::BTreeSet;

    fn asset(value: Value) -> CanonicalAsset {
        let record = DeviceRecord::from_raw(value.as_object().unwrap());
        CanonicalAsset {
            primary_source: record.source.clone(),
            sources: BTreeSet::from([record.source.clone()]),
            record,
            classification: Classification {
                device_type: DeviceType::Laptop,
                category: "Laptops".to_string(),
                cloud_provider: None,
            },
        }
    }

    async fn pipeline(store: Arc<MockTargetStore>, kind: PolicyKind) -> TargetSync {
        let statics = Arc::new(StaticReference::default());
        let state = StateManager::new(
            kind.as_str(),
            kind.policy(),
            Ledger::in_memory(),
            statics.clone(),
        );
        TargetSync::new(store, state, statics, FieldMap::default())
            .await
            .unwrap()
    }

    #[test]
    fn test_sync_report_counters() {
        let mut report = SyncReport::new("inventory", false);
        report.push(CandidateOutcome {
            name: None,
            key: Some("serial:A".into()),
            outcome: SyncOutcome::Created { target_id: Some("1".into()) },
        });
        report.push(CandidateOutcome {
            name: None,
            key: None,
            outcome: SyncOutcome::Failed { reason: "boom".into() },
        });

        assert_eq!(report.total(), 2);
        assert_eq!(report.total_changes(), 1);
        assert!(!report.is_clean());
        assert_eq!(report.failures().next().map(|(_, r)| r), Some("boom"));
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = CandidateOutcome {
            name: Some("host-a".into()),
            key: Some("serial:A".into()),
            outcome: SyncOutcome::Skipped { reason: "unchanged".into() },
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["outcome"], "skipped");
        assert_eq!(value["reason"], "unchanged");
    }

    #[test]
    fn test_flat_payload_maps_custom_fields() {
        let a = asset(json!({
            "name": "host-a",
            "serial": "SN1",
            "mac_addresses": "aa:bb:cc:dd:ee:01, aa:bb:cc:dd:ee:02",
            "last_seen_ip": "10.0.0.1"
        }));
        let payload = FlatPayloadBuilder::default().build(&a, None);

        assert_eq!(payload["name"], "host-a");
        assert_eq!(payload["mac_address"], "AA:BB:CC:DD:EE:01");
        assert_eq!(payload["custom_fields"]["Last Seen IP"], "10.0.0.1");
        assert_eq!(
            payload["custom_fields"]["MAC Addresses"],
            "AA:BB:CC:DD:EE:01, AA:BB:CC:DD:EE:02"
        );
    }

    #[tokio::test]
    async fn test_dry_run_dispatches_nothing() {
        let store = Arc::new(MockTargetStore::new("siem"));
        let mut sync = pipeline(store.clone(), PolicyKind::Siem).await.with_dry_run(true);

        let report = sync.run(&[asset(json!({ "serial": "SN1" }))]).await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(store.count_calls("create").await, 0);
        assert!(sync.state().ledger().is_empty());
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_batch() {
        let store = Arc::new(MockTargetStore::new("siem"));
        store
            .set_behavior(MockBehavior::FailCreateForName {
                name: "bad-host".into(),
                error: ConnectorError::InvalidRequest("rejected".into()),
            })
            .await;
        let mut sync = pipeline(store.clone(), PolicyKind::Siem).await;

        let report = sync
            .run(&[
                asset(json!({ "serial": "S1", "name": "bad-host" })),
                asset(json!({ "serial": "S2", "name": "good-host" })),
            ])
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.created, 1);
        assert_eq!(sync.state().ledger().len(), 1);
    }

    #[tokio::test]
    async fn test_create_race_becomes_update() {
        let store = Arc::new(MockTargetStore::new("inventory"));
        store.set_behavior(MockBehavior::RaceOnCreate).await;
        let mut sync = pipeline(store.clone(), PolicyKind::Inventory).await;

        let report = sync
            .run(&[asset(json!({ "mac_addresses": "aa:bb:cc:dd:ee:ff", "name": "host-a" }))])
            .await
            .unwrap();

        assert_eq!(report.failed, 0);
        assert_eq!(report.updated, 1);
        assert_eq!(store.count_calls("update").await, 1);
        assert_eq!(store.records().await.len(), 1);
    }
}
