//! Existing-record lookup against one target store.
//!
//! The finder walks an ordered list of [`Strategy`] values and stops at the
//! first hit. Indexed lookups (serial, asset tag) go to the store; every other
//! strategy scans a listing snapshot taken once when the finder is built.

use crate::models::{DeviceRecord, Platform};
use crate::normalize::mac::{parse_mac_list, MacAddress};
use crate::normalize::text::{is_placeholder_name, short_hostname, text_eq};
use crate::static_ref::StaticReference;
use hy_connectors::{ConnectorResult, TargetRecord, TargetStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Maps internal field keys to a store's custom-field labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMap(BTreeMap<String, String>);

impl Default for FieldMap {
    fn default() -> Self {
        Self(
            [
                ("mac_addresses", "MAC Addresses"),
                ("wifi_mac", "Wi-Fi MAC"),
                ("ethernet_mac", "Ethernet MAC"),
                ("dns_hostname", "DNS Hostname"),
                ("last_seen_ip", "Last Seen IP"),
                ("intune_device_id", "Intune Device ID"),
                ("azure_ad_id", "Azure AD Device ID"),
                ("teams_device_id", "Teams Device ID"),
            ]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        )
    }
}

impl FieldMap {
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self(labels)
    }

    /// Label for an internal key. Unmapped keys are used as their own label.
    pub fn label<'a>(&'a self, key: &'a str) -> &'a str {
        self.0.get(key).map(String::as_str).unwrap_or(key)
    }

    /// Reads a mapped custom field from a target record.
    pub fn get<'r>(&self, record: &'r TargetRecord, key: &str) -> Option<&'r str> {
        record.custom_field(self.label(key))
    }

    /// Iterates over `(internal key, label)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// One way of locating an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Serial,
    AssetTag,
    StaticHostname,
    Mac,
    Hostname,
    LastSeenIp,
    PlatformId,
}

impl Strategy {
    /// Cheapest and strongest first.
    pub const DEFAULT_ORDER: [Strategy; 7] = [
        Strategy::Serial,
        Strategy::AssetTag,
        Strategy::StaticHostname,
        Strategy::Mac,
        Strategy::Hostname,
        Strategy::LastSeenIp,
        Strategy::PlatformId,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Serial => "serial",
            Strategy::AssetTag => "asset_tag",
            Strategy::StaticHostname => "static_hostname",
            Strategy::Mac => "mac",
            Strategy::Hostname => "hostname",
            Strategy::LastSeenIp => "last_seen_ip",
            Strategy::PlatformId => "platform_id",
        }
    }

    /// Weak strategies only run for candidates with sufficient identity.
    pub fn requires_sufficient_identity(&self) -> bool {
        matches!(
            self,
            Strategy::Mac | Strategy::Hostname | Strategy::PlatformId
        )
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A located record and the strategy that found it.
#[derive(Debug, Clone, PartialEq)]
pub struct FinderMatch {
    pub strategy: Strategy,
    pub record: TargetRecord,
}

/// Looks up candidates in one target store.
pub struct Finder {
    store: Arc<dyn TargetStore>,
    static_ref: Arc<StaticReference>,
    field_map: FieldMap,
    strategies: Vec<Strategy>,
    snapshot: Vec<TargetRecord>,
}

impl Finder {
    /// Builds a finder and loads the listing snapshot.
    ///
    /// The snapshot is complete before the first lookup; a failed listing
    /// fails construction rather than producing partial results.
    pub async fn load(
        store: Arc<dyn TargetStore>,
        static_ref: Arc<StaticReference>,
        field_map: FieldMap,
    ) -> ConnectorResult<Self> {
        Self::build(store, static_ref, field_map, false).await
    }

    /// Builds a finder from a listing that bypasses any client-side cache.
    pub async fn load_fresh(
        store: Arc<dyn TargetStore>,
        static_ref: Arc<StaticReference>,
        field_map: FieldMap,
    ) -> ConnectorResult<Self> {
        Self::build(store, static_ref, field_map, true).await
    }

    async fn build(
        store: Arc<dyn TargetStore>,
        static_ref: Arc<StaticReference>,
        field_map: FieldMap,
        refresh: bool,
    ) -> ConnectorResult<Self> {
        let snapshot = store.list_all(refresh).await?;
        info!(
            store = store.name(),
            records = snapshot.len(),
            "Loaded existing records for matching"
        );

        Ok(Self {
            store,
            static_ref,
            field_map,
            strategies: Strategy::DEFAULT_ORDER.to_vec(),
            snapshot,
        })
    }

    /// Replaces the strategy order.
    pub fn with_strategies(mut self, strategies: Vec<Strategy>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    pub fn snapshot_len(&self) -> usize {
        self.snapshot.len()
    }

    /// Replaces the snapshot with a forced-refresh listing.
    pub async fn refresh(&mut self) -> ConnectorResult<()> {
        self.snapshot = self.store.list_all(true).await?;
        debug!(
            store = self.store.name(),
            records = self.snapshot.len(),
            "Refreshed existing records"
        );
        Ok(())
    }

    /// Runs the strategy chain and returns the first match.
    pub async fn find(&self, candidate: &DeviceRecord) -> ConnectorResult<Option<FinderMatch>> {
        let sufficient = candidate.has_sufficient_identity();

        for strategy in &self.strategies {
            if strategy.requires_sufficient_identity() && !sufficient {
                continue;
            }

            let found = match strategy {
                Strategy::Serial => match candidate.serial.as_deref() {
                    Some(serial) => self.store.search_by_serial(serial).await?,
                    None => None,
                },
                Strategy::AssetTag => match candidate.asset_tag.as_deref() {
                    Some(tag) => self.store.search_by_tag(tag).await?,
                    None => None,
                },
                Strategy::StaticHostname => self.by_static_hostname(candidate),
                Strategy::Mac => self.by_mac(candidate),
                Strategy::Hostname => self.by_hostname(candidate),
                Strategy::LastSeenIp => self.by_ip(candidate),
                Strategy::PlatformId => self.by_platform_id(candidate),
            };

            if let Some(record) = found {
                debug!(
                    store = self.store.name(),
                    strategy = %strategy,
                    id = %record.id,
                    "Found existing record"
                );
                return Ok(Some(FinderMatch {
                    strategy: *strategy,
                    record,
                }));
            }
        }

        Ok(None)
    }

    fn by_static_hostname(&self, candidate: &DeviceRecord) -> Option<TargetRecord> {
        let trusted = self.static_ref.trusted_hostname(candidate)?;
        self.snapshot
            .iter()
            .find(|r| r.name.as_deref().is_some_and(|n| text_eq(n, trusted)))
            .cloned()
    }

    fn by_mac(&self, candidate: &DeviceRecord) -> Option<TargetRecord> {
        let wanted = candidate.all_macs();
        if wanted.is_empty() {
            return None;
        }

        self.snapshot
            .iter()
            .find(|record| !self.record_macs(record).is_disjoint(&wanted))
            .cloned()
    }

    fn record_macs(&self, record: &TargetRecord) -> BTreeSet<MacAddress> {
        let mut macs = record
            .mac_address
            .as_deref()
            .map(parse_mac_list)
            .unwrap_or_default();
        for key in ["mac_addresses", "wifi_mac", "ethernet_mac"] {
            if let Some(value) = self.field_map.get(record, key) {
                macs.extend(parse_mac_list(value));
            }
        }
        macs
    }

    fn by_hostname(&self, candidate: &DeviceRecord) -> Option<TargetRecord> {
        let hostname = candidate.best_hostname()?;
        if is_placeholder_name(hostname) {
            return None;
        }
        let wanted = short_hostname(hostname);
        if wanted.is_empty() {
            return None;
        }

        self.snapshot
            .iter()
            .find(|record| {
                let by_name = record
                    .name
                    .as_deref()
                    .is_some_and(|n| text_eq(&short_hostname(n), &wanted));
                let by_dns = self
                    .field_map
                    .get(record, "dns_hostname")
                    .is_some_and(|h| text_eq(&short_hostname(h), &wanted));
                by_name || by_dns
            })
            .cloned()
    }

    fn by_ip(&self, candidate: &DeviceRecord) -> Option<TargetRecord> {
        let ip = candidate.last_seen_ip.as_deref()?.trim();
        self.snapshot
            .iter()
            .find(|record| self.field_map.get(record, "last_seen_ip") == Some(ip))
            .cloned()
    }

    fn by_platform_id(&self, candidate: &DeviceRecord) -> Option<TargetRecord> {
        Platform::ALL.iter().find_map(|platform| {
            let wanted = candidate.platform_id(*platform)?.trim();
            self.snapshot
                .iter()
                .find(|record| {
                    self.field_map
                        .get(record, platform.field())
                        .is_some_and(|v| v.eq_ignore_ascii_case(wanted))
                })
                .cloned()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::static_ref::StaticEntry;
    use hy_connectors::MockTargetStore;
    use serde_json::{json, Value};

    fn record(value: Value) -> DeviceRecord {
        DeviceRecord::from_raw(value.as_object().unwrap())
    }

    fn existing() -> Vec<TargetRecord> {
        vec![
            TargetRecord::new("1")
                .with_name("CORP-LAPTOP-9")
                .with_serial("SN123"),
            TargetRecord::new("2")
                .with_name("printer-2f")
                .with_custom_field("MAC Addresses", "AA:BB:CC:00:00:01, aa-bb-cc-00-00-02"),
            TargetRecord::new("3")
                .with_name("Device-10.0.0.50")
                .with_custom_field("Last Seen IP", "10.0.0.50"),
            TargetRecord::new("4")
                .with_name("room-panel")
                .with_custom_field("Teams Device ID", "TEAMS-ABC"),
            TargetRecord::new("5")
                .with_name("something-else")
                .with_custom_field("DNS Hostname", "WEB01.corp.local"),
            TargetRecord::new("6").with_name("Reception Kiosk"),
        ]
    }

    async fn finder(static_ref: StaticReference) -> (Arc<MockTargetStore>, Finder) {
        let store = Arc::new(MockTargetStore::with_records("inventory", existing()));
        let finder = Finder::load(store.clone(), Arc::new(static_ref), FieldMap::default())
            .await
            .unwrap();
        (store, finder)
    }

    async fn find(finder: &Finder, candidate: Value) -> Option<(Strategy, String)> {
        finder
            .find(&record(candidate))
            .await
            .unwrap()
            .map(|m| (m.strategy, m.record.id))
    }

    #[tokio::test]
    async fn test_serial_uses_indexed_lookup() {
        let (store, finder) = finder(StaticReference::default()).await;
        let hit = find(&finder, json!({ "serial": "sn123" })).await;
        assert_eq!(hit, Some((Strategy::Serial, "1".to_string())));
        assert_eq!(store.count_calls("search_by_serial").await, 1);
    }

    #[tokio::test]
    async fn test_mac_intersection_reads_custom_fields() {
        let (_, finder) = finder(StaticReference::default()).await;
        let hit = find(&finder, json!({ "wifi_mac": "aabbcc000002" })).await;
        assert_eq!(hit, Some((Strategy::Mac, "2".to_string())));
    }

    #[tokio::test]
    async fn test_hostname_compares_short_names() {
        let (_, finder) = finder(StaticReference::default()).await;
        let hit = find(&finder, json!({ "dns_hostname": "web01.other.domain" })).await;
        assert_eq!(hit, Some((Strategy::Hostname, "5".to_string())));

        let hit = find(&finder, json!({ "name": "CORP-LAPTOP-9.corp.local" })).await;
        assert_eq!(hit, Some((Strategy::Hostname, "1".to_string())));

        // Punctuation differences in human-entered names are ignored
        let hit = find(&finder, json!({ "name": "Printer 2F" })).await;
        assert_eq!(hit, Some((Strategy::Hostname, "2".to_string())));
    }

    #[tokio::test]
    async fn test_platform_id_is_case_insensitive() {
        let (_, finder) = finder(StaticReference::default()).await;
        let hit = find(&finder, json!({ "teams_device_id": "teams-abc" })).await;
        assert_eq!(hit, Some((Strategy::PlatformId, "4".to_string())));
    }

    #[tokio::test]
    async fn test_bare_ip_only_matches_by_ip() {
        let (_, finder) = finder(StaticReference::default()).await;

        let hit = find(
            &finder,
            json!({ "last_seen_ip": "10.0.0.50", "name": "Device-10.0.0.50" }),
        )
        .await;
        assert_eq!(hit, Some((Strategy::LastSeenIp, "3".to_string())));

        let miss = find(
            &finder,
            json!({ "last_seen_ip": "10.0.0.51", "name": "Device-10.0.0.51" }),
        )
        .await;
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_weak_strategies_gated_for_insufficient_candidates() {
        let (_, finder) = finder(StaticReference::default()).await;
        let finder = finder.with_strategies(vec![Strategy::Hostname]);

        // A placeholder name is not a usable identity
        let miss = find(&finder, json!({ "name": "Device-10.0.0.50" })).await;
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_static_hostname_match() {
        let mut ip_map = BTreeMap::new();
        ip_map.insert(
            "10.0.5.20".to_string(),
            StaticEntry {
                host_name: Some("reception-kiosk".to_string()),
                ..Default::default()
            },
        );
        let (_, finder) = finder(StaticReference::new(&ip_map, Vec::new())).await;

        let hit = find(&finder, json!({ "last_seen_ip": "10.0.5.20" })).await;
        assert_eq!(hit, Some((Strategy::StaticHostname, "6".to_string())));
    }

    #[tokio::test]
    async fn test_snapshot_is_stable_until_refresh() {
        let (store, mut finder) = finder(StaticReference::default()).await;
        store
            .insert(TargetRecord::new("7").with_custom_field("MAC Addresses", "11:22:33:44:55:66"))
            .await;

        let candidate = json!({ "mac_addresses": "11:22:33:44:55:66" });
        assert!(find(&finder, candidate.clone()).await.is_none());

        finder.refresh().await.unwrap();
        assert_eq!(
            find(&finder, candidate).await,
            Some((Strategy::Mac, "7".to_string()))
        );
    }
}
