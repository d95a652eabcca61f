//! Per-target synchronisation state.
//!
//! A [`StateManager`] decides create, update or skip for each candidate in one
//! target, using that target's [`TargetPolicy`] for identity, change detection
//! and eligibility, and a [`Ledger`] for what was last sent.

pub mod fingerprint;
pub mod ledger;
pub mod policy;

pub use fingerprint::fingerprint;
pub use ledger::{Ledger, LedgerEntry};
pub use policy::{InventoryPolicy, MonitoringPolicy, PolicyKind, SiemPolicy};

use crate::merger::identifier_keys;
use crate::models::{CanonicalAsset, DeviceRecord, MatchResult, SyncAction};
use crate::static_ref::StaticReference;
use chrono::Utc;
use hy_connectors::TargetRecord;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors from state persistence.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("State file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Rules that differ between downstream targets.
pub trait TargetPolicy: Send + Sync {
    fn kind(&self) -> PolicyKind;

    /// Target-specific identity key, or `None` when no usable identifier exists.
    fn identity_key(
        &self,
        asset: &CanonicalAsset,
        static_ref: &StaticReference,
    ) -> Option<String>;

    /// Fields whose change warrants an update. Never provenance or timestamps.
    fn change_fields(&self) -> &[&'static str];

    /// Identity-independent gate. `Err` carries the skip reason.
    fn eligibility(
        &self,
        _asset: &CanonicalAsset,
        _static_ref: &StaticReference,
    ) -> Result<(), String> {
        Ok(())
    }

    /// Whether an unknown candidate may be created.
    fn creation_allowed(&self, _asset: &CanonicalAsset, _static_ref: &StaticReference) -> bool {
        true
    }

    /// Whether existing records are located through the finder.
    fn uses_finder(&self) -> bool {
        false
    }
}

/// Strong identifiers of a record as `kind:value` keys.
pub fn strong_identifiers(record: &DeviceRecord) -> BTreeSet<String> {
    identifier_keys(record)
        .into_iter()
        .filter(|key| !key.starts_with("hostname:"))
        .collect()
}

/// Create/update/skip decisions for one target.
pub struct StateManager {
    target: String,
    policy: Box<dyn TargetPolicy>,
    ledger: Ledger,
    static_ref: Arc<StaticReference>,
}

impl StateManager {
    pub fn new(
        target: impl Into<String>,
        policy: Box<dyn TargetPolicy>,
        ledger: Ledger,
        static_ref: Arc<StaticReference>,
    ) -> Self {
        Self {
            target: target.into(),
            policy,
            ledger,
            static_ref,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn policy(&self) -> &dyn TargetPolicy {
        self.policy.as_ref()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Resolves the key a candidate is tracked under.
    ///
    /// A computed key already in the ledger wins. Otherwise an entry recorded
    /// with any of the candidate's strong identifiers, or with the matched
    /// target record, is reused before a new key is minted.
    pub fn resolve_key(
        &self,
        asset: &CanonicalAsset,
        found: Option<&TargetRecord>,
    ) -> Option<String> {
        let computed = self.policy.identity_key(asset, &self.static_ref);
        if let Some(key) = computed.as_deref() {
            if self.ledger.get(key).is_some() {
                return computed;
            }
        }

        let identifiers = strong_identifiers(&asset.record);
        if let Some(key) = self.ledger.key_for_identifiers(&identifiers) {
            debug!(target_name = %self.target, key, "Reconciled candidate by identifier");
            return Some(key.to_string());
        }

        if let Some(record) = found {
            let by_target_id = self
                .ledger
                .entries()
                .find(|(_, entry)| entry.target_id.as_deref() == Some(record.id.as_str()))
                .map(|(key, _)| key.clone());
            if by_target_id.is_some() {
                return by_target_id;
            }
        }

        computed
    }

    /// Decides what to do with a candidate.
    ///
    /// `found` is the record the finder located in the target, if any.
    pub fn check(&self, asset: &CanonicalAsset, found: Option<&TargetRecord>) -> MatchResult {
        if let Err(reason) = self.policy.eligibility(asset, &self.static_ref) {
            return MatchResult::skip(None, reason);
        }

        let Some(key) = self.resolve_key(asset, found) else {
            if !self.policy.creation_allowed(asset, &self.static_ref) {
                return MatchResult::skip(None, "insufficient data");
            }
            return MatchResult::skip(None, "no suitable identifier");
        };

        let current = fingerprint(asset, self.policy.change_fields());

        match (self.ledger.get(&key), found) {
            (Some(entry), found) => {
                let target_id = found
                    .map(|r| r.id.clone())
                    .or_else(|| entry.target_id.clone());
                if entry.fingerprint == current {
                    let mut result = MatchResult::skip(Some(key), "unchanged");
                    result.target_id = target_id;
                    result.with_existing(found.cloned())
                } else {
                    MatchResult::update(key, target_id, "fields changed")
                        .with_existing(found.cloned())
                }
            }
            (None, Some(record)) => MatchResult::update(
                key,
                Some(record.id.clone()),
                format!("found existing record {}", record.id),
            )
            .with_existing(Some(record.clone())),
            (None, None) => {
                if self.policy.creation_allowed(asset, &self.static_ref) {
                    MatchResult::create(key, "new asset")
                } else {
                    MatchResult::skip(Some(key), "insufficient data")
                }
            }
        }
    }

    /// Records that an action was taken for `key`.
    pub fn record(
        &mut self,
        key: &str,
        asset: &CanonicalAsset,
        action: SyncAction,
        target_id: Option<String>,
    ) {
        let mut identifiers = strong_identifiers(&asset.record);
        identifiers.insert(key.to_string());

        self.ledger.upsert(
            key,
            LedgerEntry {
                fingerprint: fingerprint(asset, self.policy.change_fields()),
                last_action: action,
                updated_at: Utc::now(),
                target_id,
                name: asset.name().map(String::from),
                identifiers,
            },
        );
    }

    /// Persists the ledger if anything was recorded.
    pub fn save(&mut self) -> StateResult<bool> {
        self.ledger.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Classification, DeviceType};
    use crate::static_ref::StaticEntry;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

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

    fn manager(kind: PolicyKind) -> StateManager {
        StateManager::new(
            kind.as_str(),
            kind.policy(),
            Ledger::in_memory(),
            Arc::new(StaticReference::default()),
        )
    }

    #[test]
    fn test_create_then_skip_then_update() {
        let mut state = manager(PolicyKind::Siem);
        let first = asset(json!({ "serial": "SN1", "name": "host-a", "last_seen_ip": "10.0.0.1" }));

        let result = state.check(&first, None);
        assert_eq!(result.action, SyncAction::Create);
        let key = result.key.unwrap();
        assert_eq!(key, "serial:SN1");

        state.record(&key, &first, SyncAction::Create, Some("100".to_string()));
        let again = state.check(&first, None);
        assert_eq!(again.action, SyncAction::Skip);
        assert_eq!(again.reason, "unchanged");
        assert_eq!(again.target_id.as_deref(), Some("100"));

        let moved = asset(json!({ "serial": "SN1", "name": "host-a", "last_seen_ip": "10.0.0.2" }));
        let changed = state.check(&moved, None);
        assert_eq!(changed.action, SyncAction::Update);
        assert_eq!(changed.target_id.as_deref(), Some("100"));
    }

    #[test]
    fn test_timestamp_only_change_is_skipped() {
        let mut state = manager(PolicyKind::Siem);
        let first = asset(json!({ "serial": "SN1", "name": "host-a", "last_seen": "2024-01-01" }));
        state.record("serial:SN1", &first, SyncAction::Create, None);

        let later = asset(json!({ "serial": "SN1", "name": "host-a", "last_seen": "2024-02-01" }));
        assert!(state.check(&later, None).is_skip());
    }

    #[test]
    fn test_no_identifier_is_skipped() {
        let state = manager(PolicyKind::Siem);
        let anonymous = asset(json!({ "name": "Device-10.0.0.7" }));

        let result = state.check(&anonymous, None);
        assert!(result.is_skip());
        assert_eq!(result.reason, "no suitable identifier");
        assert!(result.key.is_none());
    }

    #[test]
    fn test_cross_identifier_reconciliation() {
        let mut state = manager(PolicyKind::Siem);

        // First seen by MAC only
        let by_mac = asset(json!({ "mac_addresses": "aa:bb:cc:dd:ee:ff", "name": "host-a" }));
        let first = state.check(&by_mac, None);
        let key = first.key.unwrap();
        assert_eq!(key, "mac:AA:BB:CC:DD:EE:FF");
        state.record(&key, &by_mac, SyncAction::Create, Some("7".to_string()));

        // Later reported with a serial as well
        let with_serial = asset(json!({
            "serial": "SN9",
            "mac_addresses": "aa:bb:cc:dd:ee:ff",
            "name": "host-a",
            "last_seen_ip": "10.0.0.3"
        }));
        let result = state.check(&with_serial, None);
        assert_eq!(result.key.as_deref(), Some("mac:AA:BB:CC:DD:EE:FF"));
        assert_eq!(result.action, SyncAction::Update);
        state.record(&key, &with_serial, SyncAction::Update, None);

        // And finally by serial alone
        let serial_only = asset(json!({ "serial": "SN9", "name": "host-a" }));
        let result = state.check(&serial_only, None);
        assert_eq!(result.key.as_deref(), Some("mac:AA:BB:CC:DD:EE:FF"));
        assert_eq!(result.target_id.as_deref(), Some("7"));
    }

    #[test]
    fn test_found_record_without_state_is_updated() {
        let state = manager(PolicyKind::Inventory);
        let candidate = asset(json!({ "serial": "SN1", "name": "host-a" }));
        let existing = TargetRecord::new("55").with_serial("SN1");

        let result = state.check(&candidate, Some(&existing));
        assert_eq!(result.action, SyncAction::Update);
        assert_eq!(result.target_id.as_deref(), Some("55"));
        assert!(result.existing_record.is_some());
    }

    #[test]
    fn test_insufficient_candidate_is_not_created() {
        let state = manager(PolicyKind::Inventory);
        let bare = asset(json!({ "last_seen_ip": "10.0.0.4", "name": "Device-10.0.0.4" }));

        let result = state.check(&bare, None);
        assert!(result.is_skip());
        assert_eq!(result.reason, "insufficient data");
        assert!(result.key.is_none());
    }

    #[test]
    fn test_static_ip_candidate_without_hostname_is_created() {
        let mut ip_map = BTreeMap::new();
        ip_map.insert(
            "10.0.5.30".to_string(),
            StaticEntry {
                device_type: Some("Printer".to_string()),
                ..Default::default()
            },
        );
        let state = StateManager::new(
            "inventory",
            PolicyKind::Inventory.policy(),
            Ledger::in_memory(),
            Arc::new(StaticReference::new(&ip_map, Vec::new())),
        );
        let bare = asset(json!({ "last_seen_ip": "10.0.5.30", "name": "Device-10.0.5.30" }));

        let result = state.check(&bare, None);
        assert_eq!(result.action, SyncAction::Create);
        assert_eq!(result.key.as_deref(), Some("ip:10.0.5.30"));
    }

    #[test]
    fn test_ineligible_candidate_is_skipped() {
        let state = manager(PolicyKind::Monitoring);
        let no_ip = asset(json!({ "serial": "SN1", "name": "host-a" }));

        let result = state.check(&no_ip, None);
        assert!(result.is_skip());
        assert_eq!(result.reason, "no live IP address");
    }
}
