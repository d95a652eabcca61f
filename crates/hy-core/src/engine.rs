//! Per-run engine context.
//!
//! Built once from [`EngineConfig`]; owns every lookup table the pipeline
//! needs so that nothing is hydrated lazily mid-run.

use crate::classify::Classifier;
use crate::config::{ConfigResult, EngineConfig, TargetConfig};
use crate::merger::Merger;
use crate::models::{CanonicalAsset, DeviceRecord, RawRecord};
use crate::normalize::Normalizer;
use crate::state::{Ledger, StateManager};
use crate::static_ref::StaticReference;
use crate::sync::{RunSummary, SyncError, SyncResult, TargetSync};
use hy_connectors::TargetStore;
use hy_observability::metrics;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Identity resolution and synchronisation for one run.
pub struct ReconciliationEngine {
    normalizer: Normalizer,
    classifier: Classifier,
    static_ref: Arc<StaticReference>,
    merger: Merger,
    targets: BTreeMap<String, TargetConfig>,
    dry_run: bool,
}

impl ReconciliationEngine {
    /// Builds the engine. Rule tables are validated here.
    pub fn from_config(config: EngineConfig) -> ConfigResult<Self> {
        let static_ref = StaticReference::new(
            &config.static_reference.ip_map,
            config.static_reference.scopes,
        );

        Ok(Self {
            normalizer: Normalizer::new(config.rules.vendor.clone()),
            classifier: Classifier::new(config.rules)?,
            static_ref: Arc::new(static_ref),
            merger: Merger::new(config.source_priorities),
            targets: config.targets,
            dry_run: config.dry_run,
        })
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn merger(&self) -> &Merger {
        &self.merger
    }

    pub fn static_reference(&self) -> Arc<StaticReference> {
        self.static_ref.clone()
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Normalises each record and applies the static reference tables.
    pub fn prepare_records(&self, batch: &[RawRecord]) -> Vec<DeviceRecord> {
        batch
            .iter()
            .map(|raw| {
                let mut record = self.normalizer.normalize(raw);
                if self.static_ref.resolve(&mut record) {
                    debug!(
                        source = %record.source,
                        name = ?record.best_hostname(),
                        "Resolved record against static map"
                    );
                }
                record
            })
            .collect()
    }

    /// Turns a raw batch into canonical assets.
    ///
    /// Records are normalised, resolved against the static tables and merged
    /// across sources; each merged record is then classified.
    #[instrument(skip_all, fields(records = batch.len()))]
    pub fn prepare(&self, batch: &[RawRecord]) -> Vec<CanonicalAsset> {
        let records = self.prepare_records(batch);

        let assets: Vec<CanonicalAsset> = self
            .merger
            .merge(&records)
            .into_iter()
            .map(|merged| {
                let classification = self.classifier.classify(&merged.record);
                CanonicalAsset {
                    record: merged.record,
                    sources: merged.sources,
                    primary_source: merged.primary_source,
                    classification,
                }
            })
            .collect();

        metrics::record_prepared_batch(batch.len(), assets.len());
        info!(
            records = batch.len(),
            assets = assets.len(),
            "Prepared canonical assets"
        );
        assets
    }

    /// Builds the sync pipeline for one configured target.
    pub async fn target_sync(
        &self,
        name: &str,
        store: Arc<dyn TargetStore>,
    ) -> SyncResult<TargetSync> {
        let target = self
            .targets
            .get(name)
            .ok_or_else(|| SyncError::UnknownTarget(name.to_string()))?;

        let ledger = match &target.state_file {
            Some(path) => Ledger::load(path)?,
            None => Ledger::in_memory(),
        };
        let state = StateManager::new(
            name,
            target.policy.policy(),
            ledger,
            self.static_ref.clone(),
        );

        Ok(TargetSync::new(store, state, self.static_ref.clone(), target.field_map.clone())
            .await?
            .with_dry_run(self.dry_run))
    }

    /// Prepares a batch and synchronises it into every enabled target that
    /// has a store.
    #[instrument(skip_all, fields(records = batch.len(), targets = stores.len()))]
    pub async fn run(
        &self,
        batch: &[RawRecord],
        stores: &BTreeMap<String, Arc<dyn TargetStore>>,
    ) -> SyncResult<RunSummary> {
        let assets = self.prepare(batch);
        let mut summary = RunSummary::default();

        for (name, target) in &self.targets {
            if !target.enabled {
                debug!(target_name = %name, "Target disabled");
                continue;
            }
            let Some(store) = stores.get(name) else {
                warn!(target_name = %name, "No store configured for target");
                continue;
            };

            let mut sync = self.target_sync(name, store.clone()).await?;
            summary.push(sync.run(&assets).await?);
        }

        info!(
            created = summary.created(),
            updated = summary.updated(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            "Run complete"
        );
        Ok(summary)
    }
}
