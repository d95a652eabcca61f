//! Static reference data: trusted per-IP overrides and IP-range locations.
//!
//! Both tables are operator-maintained and read-only for the duration of a
//! run. Malformed entries never raise; they simply never match.

use crate::models::{DeviceRecord, Labeled};
use crate::normalize::text::non_empty;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::{debug, warn};

/// Trusted fields for one statically assigned IP.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticEntry {
    pub device_type: Option<String>,
    pub category: Option<String>,
    /// Definitive display name for the device.
    pub host_name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    #[serde(alias = "os")]
    pub os_platform: Option<String>,
    /// Free-text service description, comma separated.
    pub services: Option<String>,
    pub location: Option<String>,
    pub placement: Option<String>,
}

/// An inclusive IP range mapped to a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpScope {
    pub start_ip: String,
    pub end_ip: String,
    pub location: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl IpScope {
    /// Returns true when `ip` lies within the scope.
    ///
    /// Unparseable or mixed-family bounds never match.
    pub fn contains(&self, ip: IpAddr) -> bool {
        let (Ok(start), Ok(end)) = (
            self.start_ip.trim().parse::<IpAddr>(),
            self.end_ip.trim().parse::<IpAddr>(),
        ) else {
            return false;
        };

        match (start, end, ip) {
            (IpAddr::V4(s), IpAddr::V4(e), IpAddr::V4(ip)) => {
                (u32::from(s)..=u32::from(e)).contains(&u32::from(ip))
            }
            (IpAddr::V6(s), IpAddr::V6(e), IpAddr::V6(ip)) => {
                (u128::from(s)..=u128::from(e)).contains(&u128::from(ip))
            }
            _ => false,
        }
    }
}

/// Static reference tables supplied at start-up.
#[derive(Debug, Clone, Default)]
pub struct StaticReference {
    ip_map: BTreeMap<IpAddr, StaticEntry>,
    scopes: Vec<IpScope>,
}

impl StaticReference {
    /// Builds the lookup tables. IP-map keys that do not parse are dropped.
    pub fn new(ip_map: &BTreeMap<String, StaticEntry>, scopes: Vec<IpScope>) -> Self {
        let ip_map = ip_map
            .iter()
            .filter_map(|(ip, entry)| match ip.trim().parse::<IpAddr>() {
                Ok(addr) => Some((addr, entry.clone())),
                Err(_) => {
                    warn!(ip = %ip, "Ignoring static map entry with invalid IP");
                    None
                }
            })
            .collect();
        Self { ip_map, scopes }
    }

    /// Returns the static entry for an IP.
    pub fn entry(&self, ip: IpAddr) -> Option<&StaticEntry> {
        self.ip_map.get(&ip)
    }

    /// Returns true when the record's IP is statically mapped.
    pub fn is_static(&self, record: &DeviceRecord) -> bool {
        record.ip().is_some_and(|ip| self.ip_map.contains_key(&ip))
    }

    /// Returns the trusted hostname for the record's IP, if the static entry names one.
    pub fn trusted_hostname(&self, record: &DeviceRecord) -> Option<&str> {
        let entry = self.entry(record.ip()?)?;
        entry.host_name.as_deref().and_then(non_empty)
    }

    /// Returns the location of the first scope containing `ip`.
    pub fn location_for(&self, ip: IpAddr) -> Option<&str> {
        self.scopes
            .iter()
            .find(|scope| scope.contains(ip))
            .map(|scope| scope.location.as_str())
    }

    /// Overlays trusted data onto a record.
    ///
    /// Non-empty static fields overwrite the record's values. A record that
    /// still has no location afterwards takes the location of its IP scope.
    /// Returns true when the IP map matched.
    pub fn resolve(&self, record: &mut DeviceRecord) -> bool {
        let Some(ip) = record.ip() else {
            return false;
        };

        let matched = match self.ip_map.get(&ip) {
            Some(entry) => {
                apply_entry(record, entry);
                debug!(ip = %ip, source = %record.source, "Applied static mapping");
                true
            }
            None => false,
        };

        if record.location.is_none() {
            if let Some(location) = self.location_for(ip) {
                record.location = Some(location.to_string());
            }
        }

        matched
    }
}

fn apply_entry(record: &mut DeviceRecord, entry: &StaticEntry) {
    let pick = |value: &Option<String>| value.as_deref().and_then(non_empty).map(String::from);

    if let Some(v) = pick(&entry.device_type) {
        record.device_type = Some(v);
    }
    if let Some(v) = pick(&entry.category) {
        record.category = Some(v);
    }
    if let Some(v) = pick(&entry.host_name) {
        record.host_name = Some(v);
    }
    if let Some(v) = pick(&entry.manufacturer) {
        record.manufacturer = Some(Labeled::Scalar(v));
    }
    if let Some(v) = pick(&entry.model) {
        record.model = Some(Labeled::Scalar(v));
    }
    if let Some(v) = pick(&entry.os_platform) {
        record.os_platform = Some(v);
    }
    if let Some(v) = pick(&entry.services) {
        record.services = v
            .split(',')
            .filter_map(non_empty)
            .map(str::to_lowercase)
            .collect();
    }
    if let Some(v) = pick(&entry.location) {
        record.location = Some(v);
    }
    if let Some(v) = pick(&entry.placement) {
        record.placement = Some(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reference() -> StaticReference {
        let mut ip_map = BTreeMap::new();
        ip_map.insert(
            "192.168.1.1".to_string(),
            StaticEntry {
                device_type: Some("Firewall".into()),
                category: Some("Firewalls".into()),
                host_name: Some("Edge Gateway".into()),
                manufacturer: Some("Cisco".into()),
                model: Some("Meraki MX85".into()),
                placement: Some("Server Room".into()),
                services: Some("".into()),
                ..Default::default()
            },
        );
        ip_map.insert("not-an-ip".to_string(), StaticEntry::default());

        let scopes = vec![
            IpScope {
                start_ip: "192.168.200.bad".into(),
                end_ip: "192.168.200.150".into(),
                location: "Odense".into(),
                notes: None,
            },
            IpScope {
                start_ip: "192.168.1.1".into(),
                end_ip: "192.168.1.150".into(),
                location: "Glostrup".into(),
                notes: None,
            },
        ];
        StaticReference::new(&ip_map, scopes)
    }

    fn record(value: serde_json::Value) -> DeviceRecord {
        DeviceRecord::from_raw(value.as_object().unwrap())
    }

    #[test]
    fn test_static_entry_overrides_fields() {
        let reference = reference();
        let mut rec = record(json!({
            "source": "nmap",
            "last_seen_ip": "192.168.1.1",
            "dns_hostname": "_gateway",
            "manufacturer": "Cisco Meraki",
            "services": "https"
        }));

        assert!(reference.resolve(&mut rec));
        assert_eq!(rec.device_type.as_deref(), Some("Firewall"));
        assert_eq!(rec.host_name.as_deref(), Some("Edge Gateway"));
        assert_eq!(rec.manufacturer_text(), "Cisco");
        assert_eq!(rec.placement.as_deref(), Some("Server Room"));
        // Empty static values leave reported data alone
        assert_eq!(rec.services, vec!["https"]);
        // Location comes from the scope
        assert_eq!(rec.location.as_deref(), Some("Glostrup"));
        assert!(reference.is_static(&rec));
        assert_eq!(reference.trusted_hostname(&rec), Some("Edge Gateway"));
    }

    #[test]
    fn test_scope_location_without_static_entry() {
        let reference = reference();
        let mut rec = record(json!({ "last_seen_ip": "192.168.1.77" }));

        assert!(!reference.resolve(&mut rec));
        assert_eq!(rec.location.as_deref(), Some("Glostrup"));
    }

    #[test]
    fn test_malformed_scope_never_matches() {
        let reference = reference();
        assert_eq!(reference.location_for("192.168.200.60".parse().unwrap()), None);
        assert_eq!(reference.location_for("10.0.0.1".parse().unwrap()), None);
    }

    #[test]
    fn test_record_without_ip_is_untouched() {
        let reference = reference();
        let mut rec = record(json!({ "name": "laptop-1" }));
        let before = rec.clone();

        assert!(!reference.resolve(&mut rec));
        assert_eq!(rec, before);
    }

    #[test]
    fn test_existing_location_is_kept() {
        let reference = reference();
        let mut rec = record(json!({ "last_seen_ip": "192.168.1.60", "location": "Remote" }));
        reference.resolve(&mut rec);
        assert_eq!(rec.location.as_deref(), Some("Remote"));
    }
}
