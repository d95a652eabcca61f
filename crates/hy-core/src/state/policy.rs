//! Per-target identity, change and eligibility rules.

use super::TargetPolicy;
use crate::models::{CanonicalAsset, Platform};
use crate::normalize::text::is_placeholder_name;
use crate::static_ref::StaticReference;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Built-in policies, selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    Inventory,
    Monitoring,
    Siem,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Inventory => "inventory",
            PolicyKind::Monitoring => "monitoring",
            PolicyKind::Siem => "siem",
        }
    }

    pub fn policy(&self) -> Box<dyn TargetPolicy> {
        match self {
            PolicyKind::Inventory => Box::new(InventoryPolicy),
            PolicyKind::Monitoring => Box::new(MonitoringPolicy),
            PolicyKind::Siem => Box::new(SiemPolicy),
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn serial_key(asset: &CanonicalAsset) -> Option<String> {
    let serial = asset.record.serial.as_deref()?.trim();
    (!serial.is_empty()).then(|| format!("serial:{}", serial.to_uppercase()))
}

fn tag_key(asset: &CanonicalAsset) -> Option<String> {
    let tag = asset.record.asset_tag.as_deref()?.trim();
    (!tag.is_empty()).then(|| format!("tag:{}", tag))
}

fn platform_key(asset: &CanonicalAsset, platform: Platform) -> Option<String> {
    let id = asset.record.platform_id(platform)?.trim();
    (!id.is_empty()).then(|| format!("{}:{}", platform.key_prefix(), id))
}

fn mac_key(asset: &CanonicalAsset) -> Option<String> {
    asset.record.primary_mac().map(|mac| format!("mac:{}", mac))
}

fn ip_key(asset: &CanonicalAsset) -> Option<String> {
    asset.record.ip().map(|ip| format!("ip:{}", ip))
}

fn name_key(asset: &CanonicalAsset) -> Option<String> {
    let name = asset.name()?.trim();
    (!is_placeholder_name(name)).then(|| format!("name:{}", name))
}

/// Asset-management store. Lookups go through the finder; creating requires
/// a usable identity or a statically mapped IP.
#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryPolicy;

impl TargetPolicy for InventoryPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Inventory
    }

    fn identity_key(
        &self,
        asset: &CanonicalAsset,
        static_ref: &StaticReference,
    ) -> Option<String> {
        serial_key(asset)
            .or_else(|| tag_key(asset))
            .or_else(|| platform_key(asset, Platform::Intune))
            .or_else(|| platform_key(asset, Platform::AzureAd))
            .or_else(|| mac_key(asset))
            .or_else(|| name_key(asset))
            .or_else(|| {
                static_ref
                    .is_static(&asset.record)
                    .then(|| ip_key(asset))
                    .flatten()
            })
    }

    fn change_fields(&self) -> &[&'static str] {
        &[
            "name",
            "serial",
            "asset_tag",
            "manufacturer",
            "model",
            "os_platform",
            "dns_hostname",
            "last_seen_ip",
            "mac_addresses",
            "wifi_mac",
            "ethernet_mac",
            "device_type",
            "category",
            "location",
            "intune_device_id",
            "azure_ad_id",
            "teams_device_id",
        ]
    }

    fn creation_allowed(&self, asset: &CanonicalAsset, static_ref: &StaticReference) -> bool {
        asset.record.has_sufficient_identity() || static_ref.is_static(&asset.record)
    }

    fn uses_finder(&self) -> bool {
        true
    }
}

const UNMONITORED_CATEGORIES: &[&str] = &["Mobile Phones", "Tablets"];

/// Monitoring system. Only devices with a live IP are eligible, and handheld
/// devices only when their IP is statically mapped.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonitoringPolicy;

impl TargetPolicy for MonitoringPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Monitoring
    }

    fn identity_key(
        &self,
        asset: &CanonicalAsset,
        _static_ref: &StaticReference,
    ) -> Option<String> {
        mac_key(asset)
            .or_else(|| ip_key(asset))
            .or_else(|| name_key(asset))
    }

    fn change_fields(&self) -> &[&'static str] {
        &["name", "last_seen_ip", "device_type", "category", "location"]
    }

    fn eligibility(
        &self,
        asset: &CanonicalAsset,
        static_ref: &StaticReference,
    ) -> Result<(), String> {
        if asset.record.ip().is_none() {
            return Err("no live IP address".to_string());
        }
        let category = asset.classification.category.as_str();
        if UNMONITORED_CATEGORIES
            .iter()
            .any(|c| c.eq_ignore_ascii_case(category))
            && !static_ref.is_static(&asset.record)
        {
            return Err(format!("category {} is not monitored", category));
        }
        Ok(())
    }
}

/// Security event pipeline. State lives only in the ledger.
#[derive(Debug, Clone, Copy, Default)]
pub struct SiemPolicy;

impl TargetPolicy for SiemPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Siem
    }

    fn identity_key(
        &self,
        asset: &CanonicalAsset,
        _static_ref: &StaticReference,
    ) -> Option<String> {
        serial_key(asset)
            .or_else(|| platform_key(asset, Platform::Intune))
            .or_else(|| platform_key(asset, Platform::AzureAd))
            .or_else(|| mac_key(asset))
            .or_else(|| name_key(asset))
    }

    fn change_fields(&self) -> &[&'static str] {
        &[
            "name",
            "last_seen_ip",
            "nmap_open_ports",
            "nmap_os_guess",
            "intune_compliance",
            "manufacturer",
            "model",
            "primary_user_email",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Classification, DeviceRecord, DeviceType};
    use crate::static_ref::StaticEntry;
    use serde_json::{json, Value};
    use std::collections::{BTreeMap, BTreeSet};

    fn asset(value: Value, device_type: DeviceType, category: &str) -> CanonicalAsset {
        let record = DeviceRecord::from_raw(value.as_object().unwrap());
        CanonicalAsset {
            primary_source: record.source.clone(),
            sources: BTreeSet::from([record.source.clone()]),
            record,
            classification: Classification {
                device_type,
                category: category.to_string(),
                cloud_provider: None,
            },
        }
    }

    #[test]
    fn test_inventory_identity_priority() {
        let statics = StaticReference::default();
        let full = asset(
            json!({
                "serial": "sn1",
                "asset_tag": "T-9",
                "intune_device_id": "abc",
                "mac_addresses": "aa:bb:cc:dd:ee:ff",
                "name": "host-a"
            }),
            DeviceType::Laptop,
            "Laptops",
        );
        assert_eq!(
            InventoryPolicy.identity_key(&full, &statics).as_deref(),
            Some("serial:SN1")
        );

        let mac_only = asset(
            json!({ "mac_addresses": "aa:bb:cc:dd:ee:ff", "name": "host-a" }),
            DeviceType::Laptop,
            "Laptops",
        );
        assert_eq!(
            InventoryPolicy.identity_key(&mac_only, &statics).as_deref(),
            Some("mac:AA:BB:CC:DD:EE:FF")
        );

        let placeholder = asset(
            json!({ "name": "Device-10.0.0.4", "last_seen_ip": "10.0.0.4" }),
            DeviceType::OtherDevice,
            "Other Assets",
        );
        assert!(InventoryPolicy
            .identity_key(&placeholder, &statics)
            .is_none());

        let mut ip_map = BTreeMap::new();
        ip_map.insert("10.0.0.4".to_string(), StaticEntry::default());
        let statics = StaticReference::new(&ip_map, Vec::new());
        assert_eq!(
            InventoryPolicy
                .identity_key(&placeholder, &statics)
                .as_deref(),
            Some("ip:10.0.0.4")
        );
    }

    #[test]
    fn test_monitoring_identity_falls_back_to_ip() {
        let a = asset(
            json!({ "name": "Device-10.0.0.4", "last_seen_ip": "10.0.0.4" }),
            DeviceType::OtherDevice,
            "Other Assets",
        );
        assert_eq!(
            MonitoringPolicy
                .identity_key(&a, &StaticReference::default())
                .as_deref(),
            Some("ip:10.0.0.4")
        );
    }

    #[test]
    fn test_monitoring_eligibility() {
        let statics = StaticReference::default();

        let no_ip = asset(json!({ "name": "srv" }), DeviceType::Server, "Servers");
        assert!(MonitoringPolicy.eligibility(&no_ip, &statics).is_err());

        let phone = asset(
            json!({ "name": "phone", "last_seen_ip": "10.0.0.8" }),
            DeviceType::MobilePhone,
            "Mobile Phones",
        );
        assert!(MonitoringPolicy.eligibility(&phone, &statics).is_err());

        let mut ip_map = BTreeMap::new();
        ip_map.insert("10.0.0.8".to_string(), StaticEntry::default());
        let statics = StaticReference::new(&ip_map, Vec::new());
        assert!(MonitoringPolicy.eligibility(&phone, &statics).is_ok());
    }

    #[test]
    fn test_inventory_creation_gate() {
        let statics = StaticReference::default();
        let bare = asset(
            json!({ "last_seen_ip": "10.0.0.4" }),
            DeviceType::OtherDevice,
            "Other Assets",
        );
        assert!(!InventoryPolicy.creation_allowed(&bare, &statics));

        let mut ip_map = BTreeMap::new();
        ip_map.insert("10.0.0.4".to_string(), StaticEntry::default());
        let statics = StaticReference::new(&ip_map, Vec::new());
        assert!(InventoryPolicy.creation_allowed(&bare, &statics));
    }

    #[test]
    fn test_policy_kind_from_yaml() {
        let kind: PolicyKind = serde_yaml::from_str("monitoring").unwrap();
        assert_eq!(kind, PolicyKind::Monitoring);
        assert_eq!(kind.policy().kind(), PolicyKind::Monitoring);
    }
}
