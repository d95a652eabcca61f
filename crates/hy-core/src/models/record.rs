//! Normalised device records.
//!
//! A [`DeviceRecord`] is one source's description of a device after
//! ingestion: known fields are typed, MACs are canonical, and everything the
//! engine does not interpret is carried in `attributes` untouched.

use crate::normalize::mac::{macs_from_value, MacAddress};
use crate::normalize::text::{is_placeholder_name, non_empty, short_hostname};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;

/// Attributes exactly as reported by one source.
pub type RawRecord = Map<String, Value>;

/// Source tag used when a record carries none.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// A manufacturer or model value, which sources report either as plain text
/// or as an object with a name and a model number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Labeled {
    Scalar(String),
    Named {
        name: String,
        #[serde(default)]
        number: String,
    },
}

impl Labeled {
    /// Reads a labeled value from raw JSON.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => non_empty(s).map(|s| Labeled::Scalar(s.to_string())),
            Value::Number(n) => Some(Labeled::Scalar(n.to_string())),
            Value::Object(obj) => {
                let text = |key: &str| {
                    obj.get(key)
                        .and_then(Value::as_str)
                        .and_then(non_empty)
                        .map(String::from)
                };
                let number = text("model_number").or_else(|| text("number"));
                match (text("name"), number) {
                    (Some(name), number) => Some(Labeled::Named {
                        name,
                        number: number.unwrap_or_default(),
                    }),
                    (None, Some(number)) => Some(Labeled::Scalar(number)),
                    (None, None) => None,
                }
            }
            _ => None,
        }
    }

    /// Returns the display text.
    pub fn text(&self) -> &str {
        match self {
            Labeled::Scalar(s) => s,
            Labeled::Named { name, .. } => name,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Labeled::Scalar(s) => Value::String(s.clone()),
            Labeled::Named { name, number } => {
                let mut obj = Map::new();
                obj.insert("name".into(), Value::String(name.clone()));
                if !number.is_empty() {
                    obj.insert("model_number".into(), Value::String(number.clone()));
                }
                Value::Object(obj)
            }
        }
    }
}

impl fmt::Display for Labeled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// Platform that issues its own device identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Mobile-device-management service.
    Intune,
    /// Directory service.
    AzureAd,
    /// Collaboration-hardware inventory.
    Teams,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Intune, Platform::AzureAd, Platform::Teams];

    /// Record field carrying this platform's device ID.
    pub fn field(&self) -> &'static str {
        match self {
            Platform::Intune => "intune_device_id",
            Platform::AzureAd => "azure_ad_id",
            Platform::Teams => "teams_device_id",
        }
    }

    /// Prefix used in identifier keys.
    pub fn key_prefix(&self) -> &'static str {
        match self {
            Platform::Intune => "intune",
            Platform::AzureAd => "azure",
            Platform::Teams => "teams",
        }
    }
}

/// Raw keys folded into typed fields, with their accepted aliases.
const NAME_KEYS: &[&str] = &["name", "deviceName"];
const DNS_KEYS: &[&str] = &["dns_hostname", "hostname"];
const SERIAL_KEYS: &[&str] = &["serial", "serial_number", "serialNumber"];
const OS_KEYS: &[&str] = &["os_platform", "operating_system", "operatingSystem"];
const IP_KEYS: &[&str] = &["last_seen_ip", "ip", "ip_address"];
const MAC_LIST_KEYS: &[&str] = &["mac_addresses", "mac_address", "mac"];
const SERVICE_KEYS: &[&str] = &["services", "nmap_services"];
const SOURCE_KEYS: &[&str] = &["_source", "source", "_sources"];

const CONSUMED_KEYS: &[&[&str]] = &[
    NAME_KEYS,
    DNS_KEYS,
    SERIAL_KEYS,
    OS_KEYS,
    IP_KEYS,
    MAC_LIST_KEYS,
    SERVICE_KEYS,
    SOURCE_KEYS,
    &[
        "host_name",
        "asset_tag",
        "manufacturer",
        "model",
        "wifi_mac",
        "ethernet_mac",
        "intune_device_id",
        "azure_ad_id",
        "teams_device_id",
        "device_type",
        "category",
        "location",
        "placement",
        "last_seen",
    ],
];

/// One source's normalised description of a device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceRecord {
    /// Source tag (`nmap`, `intune`, `teams`, ...).
    pub source: String,
    pub name: Option<String>,
    pub dns_hostname: Option<String>,
    /// Trusted display name, normally set from the static reference map.
    pub host_name: Option<String>,
    pub serial: Option<String>,
    pub asset_tag: Option<String>,
    pub manufacturer: Option<Labeled>,
    pub model: Option<Labeled>,
    pub os_platform: Option<String>,
    pub last_seen_ip: Option<String>,
    pub mac_addresses: BTreeSet<MacAddress>,
    pub wifi_mac: Option<MacAddress>,
    pub ethernet_mac: Option<MacAddress>,
    /// Open service names, lowercase.
    pub services: Vec<String>,
    pub platform_ids: BTreeMap<Platform, String>,
    /// Device type asserted by trusted data; short-circuits classification.
    pub device_type: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
    pub placement: Option<String>,
    pub last_seen: Option<String>,
    /// Fields the engine does not interpret.
    pub attributes: BTreeMap<String, Value>,
}

/// Returns true for values treated as absent: null, blank or `Unknown`
/// strings, empty arrays and empty objects.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed.is_empty() || trimmed == "Unknown"
        }
        Value::Array(items) => items.is_empty(),
        Value::Object(obj) => obj.is_empty(),
        _ => false,
    }
}

fn first_text(raw: &RawRecord, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match raw.get(*key) {
        Some(Value::String(s)) => non_empty(s).map(String::from),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn services_from_value(value: &Value) -> Vec<String> {
    let items: Vec<String> = match value {
        Value::String(s) => s.split([',', ';', '\n']).map(String::from).collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    };
    items
        .iter()
        .filter_map(|s| non_empty(s))
        .map(str::to_lowercase)
        .collect()
}

impl DeviceRecord {
    /// Ingests a raw record.
    ///
    /// Missing keys are tolerated. Manufacturer/model objects become
    /// [`Labeled::Named`]; MAC strings are split and canonicalised, with
    /// invalid values dropped.
    pub fn from_raw(raw: &RawRecord) -> Self {
        let source = first_text(raw, SOURCE_KEYS).unwrap_or_else(|| UNKNOWN_SOURCE.to_string());
        Self::from_map(&source, raw)
    }

    /// Builds a record from a field map, using `source` as its tag.
    pub fn from_map(source: &str, raw: &RawRecord) -> Self {
        let mac_addresses = MAC_LIST_KEYS
            .iter()
            .filter_map(|key| raw.get(*key))
            .flat_map(macs_from_value)
            .collect();
        let single_mac = |key: &str| {
            raw.get(key)
                .map(macs_from_value)
                .and_then(|macs| macs.into_iter().next())
        };

        let services = SERVICE_KEYS
            .iter()
            .filter_map(|key| raw.get(*key))
            .flat_map(services_from_value)
            .fold(Vec::new(), |mut acc, svc| {
                if !acc.contains(&svc) {
                    acc.push(svc);
                }
                acc
            });

        let platform_ids = Platform::ALL
            .iter()
            .filter_map(|p| first_text(raw, &[p.field()]).map(|id| (*p, id)))
            .collect();

        let attributes = raw
            .iter()
            .filter(|(key, value)| {
                !CONSUMED_KEYS.iter().any(|group| group.contains(&key.as_str()))
                    && !value.is_null()
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Self {
            source: source.to_string(),
            name: first_text(raw, NAME_KEYS),
            dns_hostname: first_text(raw, DNS_KEYS),
            host_name: first_text(raw, &["host_name"]),
            serial: first_text(raw, SERIAL_KEYS),
            asset_tag: first_text(raw, &["asset_tag"]),
            manufacturer: raw.get("manufacturer").and_then(Labeled::from_value),
            model: raw.get("model").and_then(Labeled::from_value),
            os_platform: first_text(raw, OS_KEYS),
            last_seen_ip: first_text(raw, IP_KEYS),
            mac_addresses,
            wifi_mac: single_mac("wifi_mac"),
            ethernet_mac: single_mac("ethernet_mac"),
            services,
            platform_ids,
            device_type: first_text(raw, &["device_type"]),
            category: first_text(raw, &["category"]),
            location: first_text(raw, &["location"]),
            placement: first_text(raw, &["placement"]),
            last_seen: first_text(raw, &["last_seen"]),
            attributes,
        }
    }

    /// Renders the record as a flat field map under canonical key names.
    ///
    /// Absent fields are omitted. The source tag is not included.
    pub fn to_map(&self) -> RawRecord {
        let mut map = Map::new();
        let mut put_text = |key: &str, value: &Option<String>| {
            if let Some(v) = value {
                map.insert(key.to_string(), Value::String(v.clone()));
            }
        };

        put_text("name", &self.name);
        put_text("dns_hostname", &self.dns_hostname);
        put_text("host_name", &self.host_name);
        put_text("serial", &self.serial);
        put_text("asset_tag", &self.asset_tag);
        put_text("os_platform", &self.os_platform);
        put_text("last_seen_ip", &self.last_seen_ip);
        put_text("wifi_mac", &self.wifi_mac.as_ref().map(|m| m.to_string()));
        put_text(
            "ethernet_mac",
            &self.ethernet_mac.as_ref().map(|m| m.to_string()),
        );
        put_text("device_type", &self.device_type);
        put_text("category", &self.category);
        put_text("location", &self.location);
        put_text("placement", &self.placement);
        put_text("last_seen", &self.last_seen);
        for (platform, id) in &self.platform_ids {
            put_text(platform.field(), &Some(id.clone()));
        }

        if let Some(manufacturer) = &self.manufacturer {
            map.insert("manufacturer".into(), manufacturer.to_value());
        }
        if let Some(model) = &self.model {
            map.insert("model".into(), model.to_value());
        }
        if !self.mac_addresses.is_empty() {
            map.insert(
                "mac_addresses".into(),
                Value::Array(
                    self.mac_addresses
                        .iter()
                        .map(|m| Value::String(m.to_string()))
                        .collect(),
                ),
            );
        }
        if !self.services.is_empty() {
            map.insert(
                "services".into(),
                Value::Array(self.services.iter().cloned().map(Value::String).collect()),
            );
        }
        for (key, value) in &self.attributes {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
        map
    }

    /// Returns one field by canonical key.
    pub fn field_value(&self, key: &str) -> Option<Value> {
        self.to_map().remove(key).filter(|v| !is_empty_value(v))
    }

    /// Returns the manufacturer display text, or an empty string.
    pub fn manufacturer_text(&self) -> &str {
        self.manufacturer.as_ref().map(Labeled::text).unwrap_or("")
    }

    /// Returns the model display text, or an empty string.
    pub fn model_text(&self) -> &str {
        self.model.as_ref().map(Labeled::text).unwrap_or("")
    }

    /// Returns the OS string, or an empty string.
    pub fn os_text(&self) -> &str {
        self.os_platform.as_deref().unwrap_or("")
    }

    /// Returns the most trusted hostname-like value: the static display name,
    /// then the DNS hostname, then the reported name.
    pub fn best_hostname(&self) -> Option<&str> {
        self.host_name
            .as_deref()
            .or(self.dns_hostname.as_deref())
            .or(self.name.as_deref())
    }

    /// Short lowercase hostname used for hostname-based rules.
    pub fn short_name(&self) -> String {
        self.dns_hostname
            .as_deref()
            .or(self.name.as_deref())
            .or(self.host_name.as_deref())
            .map(short_hostname)
            .unwrap_or_default()
    }

    /// Parses the last seen IP.
    pub fn ip(&self) -> Option<IpAddr> {
        self.last_seen_ip.as_deref()?.trim().parse().ok()
    }

    /// Every MAC the record carries, across all MAC fields.
    pub fn all_macs(&self) -> BTreeSet<MacAddress> {
        let mut macs = self.mac_addresses.clone();
        macs.extend(self.wifi_mac.iter().cloned());
        macs.extend(self.ethernet_mac.iter().cloned());
        macs
    }

    /// Primary MAC: the first of `mac_addresses`, else Wi-Fi, else Ethernet.
    pub fn primary_mac(&self) -> Option<&MacAddress> {
        self.mac_addresses
            .iter()
            .next()
            .or(self.wifi_mac.as_ref())
            .or(self.ethernet_mac.as_ref())
    }

    /// Returns a platform-issued device ID.
    pub fn platform_id(&self, platform: Platform) -> Option<&str> {
        self.platform_ids.get(&platform).map(String::as_str)
    }

    /// Returns true when the record carries enough identifying data to be
    /// matched by weak strategies or created in a target.
    pub fn has_sufficient_identity(&self) -> bool {
        let real = |v: &Option<String>| v.as_deref().is_some_and(|s| !is_placeholder_name(s));
        self.serial.is_some()
            || !self.all_macs().is_empty()
            || !self.platform_ids.is_empty()
            || real(&self.dns_hostname)
            || real(&self.host_name)
            || real(&self.name)
            || self.asset_tag.is_some()
    }
}
