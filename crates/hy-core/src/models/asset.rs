//! Classification and canonical asset models.

use super::record::{DeviceRecord, RawRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Category assigned when a device type has no mapping.
pub const DEFAULT_CATEGORY: &str = "Other Assets";

/// Category forced for devices hosted by a recognised cloud provider.
pub const CLOUD_CATEGORY: &str = "Cloud Resources";

/// Kind of device, as determined by the classifier or asserted by trusted data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceType {
    Server,
    VirtualMachine,
    Desktop,
    Laptop,
    MobilePhone,
    Tablet,
    Firewall,
    Switch,
    Router,
    AccessPoint,
    NetworkDevice,
    Printer,
    DomainController,
    DatabaseServer,
    StorageDevice,
    WebServer,
    IotDevice,
    OtherDevice,
    /// Device type named by trusted data that the classifier does not produce.
    Custom(String),
}

impl DeviceType {
    const NAMED: [DeviceType; 18] = [
        DeviceType::Server,
        DeviceType::VirtualMachine,
        DeviceType::Desktop,
        DeviceType::Laptop,
        DeviceType::MobilePhone,
        DeviceType::Tablet,
        DeviceType::Firewall,
        DeviceType::Switch,
        DeviceType::Router,
        DeviceType::AccessPoint,
        DeviceType::NetworkDevice,
        DeviceType::Printer,
        DeviceType::DomainController,
        DeviceType::DatabaseServer,
        DeviceType::StorageDevice,
        DeviceType::WebServer,
        DeviceType::IotDevice,
        DeviceType::OtherDevice,
    ];

    /// Returns the display name.
    pub fn as_str(&self) -> &str {
        match self {
            DeviceType::Server => "Server",
            DeviceType::VirtualMachine => "Virtual Machine",
            DeviceType::Desktop => "Desktop",
            DeviceType::Laptop => "Laptop",
            DeviceType::MobilePhone => "Mobile Phone",
            DeviceType::Tablet => "Tablet",
            DeviceType::Firewall => "Firewall",
            DeviceType::Switch => "Switch",
            DeviceType::Router => "Router",
            DeviceType::AccessPoint => "Access Point",
            DeviceType::NetworkDevice => "Network Device",
            DeviceType::Printer => "Printer",
            DeviceType::DomainController => "Domain Controller",
            DeviceType::DatabaseServer => "Database Server",
            DeviceType::StorageDevice => "Storage Device",
            DeviceType::WebServer => "Web Server",
            DeviceType::IotDevice => "IoT Devices",
            DeviceType::OtherDevice => "Other Device",
            DeviceType::Custom(name) => name.as_str(),
        }
    }

    /// Parses a display name case-insensitively. Unknown names become `Custom`.
    pub fn parse(name: &str) -> Self {
        let trimmed = name.trim();
        Self::NAMED
            .iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(trimmed))
            .cloned()
            .unwrap_or_else(|| match trimmed.to_lowercase().as_str() {
                "iot device" => DeviceType::IotDevice,
                "windows server" | "linux server" => DeviceType::Server,
                "windows workstation" | "linux workstation" | "macos device" => {
                    DeviceType::Desktop
                }
                _ => DeviceType::Custom(trimmed.to_string()),
            })
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<String> for DeviceType {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<DeviceType> for String {
    fn from(value: DeviceType) -> Self {
        value.as_str().to_string()
    }
}

/// Derived classification of a device. Recomputable, never persisted alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub device_type: DeviceType,
    pub category: String,
    /// Named cloud provider, or `None` for on-premises devices.
    pub cloud_provider: Option<String>,
}

impl Classification {
    /// Returns true when the device runs at a recognised cloud provider.
    pub fn is_cloud(&self) -> bool {
        self.cloud_provider.is_some()
    }
}

/// The merged, deduplicated representation of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalAsset {
    /// Merged fields, tagged with the primary source.
    pub record: DeviceRecord,
    /// Every source that contributed to this asset.
    pub sources: BTreeSet<String>,
    /// Highest-priority contributing source.
    pub primary_source: String,
    pub classification: Classification,
}

impl CanonicalAsset {
    /// Display name: the trusted static name, else the reported name, else
    /// the DNS hostname.
    pub fn name(&self) -> Option<&str> {
        self.record
            .host_name
            .as_deref()
            .or(self.record.name.as_deref())
            .or(self.record.dns_hostname.as_deref())
    }

    /// Returns one field by canonical key, including classification fields.
    pub fn field(&self, key: &str) -> Option<Value> {
        match key {
            "device_type" => Some(Value::String(
                self.classification.device_type.to_string(),
            )),
            "category" => Some(Value::String(self.classification.category.clone())),
            "cloud_provider" => self
                .classification
                .cloud_provider
                .clone()
                .map(Value::String),
            "name" => self.name().map(|n| Value::String(n.to_string())),
            _ => self.record.field_value(key),
        }
    }

    /// Flat field map with provenance and classification, as handed to
    /// payload builders.
    pub fn to_map(&self) -> RawRecord {
        let mut map = self.record.to_map();
        if let Some(name) = self.name() {
            map.insert("name".into(), Value::String(name.to_string()));
        }
        map.insert(
            "device_type".into(),
            Value::String(self.classification.device_type.to_string()),
        );
        map.insert(
            "category".into(),
            Value::String(self.classification.category.clone()),
        );
        if let Some(provider) = &self.classification.cloud_provider {
            map.insert("cloud_provider".into(), Value::String(provider.clone()));
        }
        map.insert(
            "_source".into(),
            Value::String(self.primary_source.clone()),
        );
        map.insert(
            "_sources".into(),
            Value::Array(self.sources.iter().cloned().map(Value::String).collect()),
        );
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_type_parse_and_display() {
        assert_eq!(DeviceType::parse("access point"), DeviceType::AccessPoint);
        assert_eq!(DeviceType::parse("IoT Device"), DeviceType::IotDevice);
        assert_eq!(DeviceType::parse("Windows Server"), DeviceType::Server);
        assert_eq!(DeviceType::parse("UPS"), DeviceType::Custom("UPS".into()));
        assert_eq!(DeviceType::MobilePhone.to_string(), "Mobile Phone");
    }

    #[test]
    fn test_device_type_serde_as_string() {
        let json = serde_json::to_string(&DeviceType::VirtualMachine).unwrap();
        assert_eq!(json, "\"Virtual Machine\"");
        let parsed: DeviceType = serde_json::from_str("\"Switch\"").unwrap();
        assert_eq!(parsed, DeviceType::Switch);
    }
}
