//! Classifier rule tables.
//!
//! Rules are plain, versioned data. The built-in tables are returned by
//! [`RuleSet::default`]; deployments may replace them from configuration.
//! [`RuleSet::validate`] must pass before a table set is used.

use crate::normalize::vendor::VendorRules;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Current rule table format version.
pub const RULESET_VERSION: u32 = 1;

/// Errors raised by rule table validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("Unsupported rule set version: {0}")]
    UnsupportedVersion(u32),

    #[error("Network device order is empty")]
    EmptyNetworkOrder,

    #[error("Rule table '{0}' has no keywords")]
    EmptyKeywords(String),

    #[error("Duplicate device type in {table}: {device_type}")]
    DuplicateDeviceType { table: String, device_type: String },
}

/// Result type for rule operations.
pub type RuleResult<T> = Result<T, RuleError>;

fn words(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn network_rule(
    device_type: &str,
    vendors: &[&str],
    models: &[&str],
    prefixes: &[&str],
) -> NetworkDeviceRule {
    NetworkDeviceRule {
        device_type: device_type.to_string(),
        vendors: words(vendors),
        model_keywords: words(models),
        hostname_prefixes: words(prefixes),
    }
}

fn service_rule(device_type: &str, match_kind: MatchKind, keywords: &[&str]) -> ServiceRule {
    ServiceRule {
        device_type: device_type.to_string(),
        match_kind,
        keywords: words(keywords),
    }
}

/// One network device type, evaluated in table order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDeviceRule {
    pub device_type: String,
    #[serde(default)]
    pub vendors: Vec<String>,
    #[serde(default)]
    pub model_keywords: Vec<String>,
    /// Short-hostname prefixes, followed by a digit, separator or end.
    #[serde(default)]
    pub hostname_prefixes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMachineRules {
    pub vendors: Vec<String>,
    pub model_keywords: Vec<String>,
    /// Hostnames always treated as virtual machines, compared exactly.
    #[serde(default)]
    pub hostnames: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IotRules {
    pub manufacturer_keywords: Vec<String>,
    pub model_keywords: Vec<String>,
    pub hostname_keywords: Vec<String>,
    pub os_keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IosRules {
    pub os_keywords: Vec<String>,
    pub tablet_keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AndroidRules {
    pub os_keywords: Vec<String>,
    pub iot_keywords: Vec<String>,
    pub tablet_keywords: Vec<String>,
    pub tablet_vendors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputerRules {
    pub laptop_hostname_keywords: Vec<String>,
    pub desktop_hostname_keywords: Vec<String>,
    pub laptop_keywords: Vec<String>,
    pub desktop_keywords: Vec<String>,
    /// Vendor → model-number prefixes identifying laptops.
    #[serde(default)]
    pub laptop_model_prefixes: BTreeMap<String, Vec<String>>,
    /// Vendor → model-number prefixes identifying desktops.
    #[serde(default)]
    pub desktop_model_prefixes: BTreeMap<String, Vec<String>>,
    pub desktop_os_keywords: Vec<String>,
    /// OS families that default to Desktop when nothing else matches.
    pub default_desktop_os: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRules {
    pub os_keywords: Vec<String>,
    pub model_keywords: Vec<String>,
    pub hostname_keywords: Vec<String>,
}

/// How a service rule's keywords combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// Every keyword must be present.
    All,
    /// At least one keyword must be present.
    Any,
}

/// Open-service rule, evaluated in table order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRule {
    pub device_type: String,
    #[serde(rename = "match")]
    pub match_kind: MatchKind,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericOsRules {
    pub server_models: Vec<String>,
    pub desktop_models: Vec<String>,
    pub os_families: Vec<String>,
}

/// A cloud-provider matcher. Every non-empty keyword list must match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudMatcher {
    pub provider: String,
    #[serde(default)]
    pub manufacturer_keywords: Vec<String>,
    #[serde(default)]
    pub model_keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudRules {
    /// Manufacturers that never match a cloud provider.
    pub excluded_manufacturers: Vec<String>,
    pub matchers: Vec<CloudMatcher>,
}

/// Complete classifier configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    pub version: u32,
    /// Network device types in priority order.
    pub network: Vec<NetworkDeviceRule>,
    pub virtual_machine: VirtualMachineRules,
    pub iot: IotRules,
    pub ios: IosRules,
    pub android: AndroidRules,
    pub computer: ComputerRules,
    pub server: ServerRules,
    /// Service rules in priority order.
    pub services: Vec<ServiceRule>,
    pub generic_os: GenericOsRules,
    /// Device type → category.
    pub categories: BTreeMap<String, String>,
    pub cloud: CloudRules,
    pub vendor: VendorRules,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            version: RULESET_VERSION,
            network: vec![
                network_rule(
                    "Firewall",
                    &["cisco", "meraki", "fortinet", "palo alto", "sonicwall", "juniper", "checkpoint", "sophos"],
                    &["firewall", "asa", "srx", "pa-", "mx", "security gateway", "firepower"],
                    &["fw", "firewall"],
                ),
                network_rule(
                    "Switch",
                    &["cisco", "juniper", "aruba", "hp", "dell", "meraki", "ubiquiti", "d-link", "netgear", "tp-link"],
                    &["switch", "catalyst", "nexus", "comware", "procurve", "ex", "ms", "edgeswitch", "dgs", "sg", "tl-sg", "usw"],
                    &["sw", "switch"],
                ),
                network_rule(
                    "Router",
                    &["cisco", "juniper", "mikrotik", "ubiquiti", "netgear", "tp-link"],
                    &["router", "isr", "asr", "edgerouter"],
                    &["rtr", "router"],
                ),
                network_rule(
                    "Access Point",
                    &["cisco", "meraki", "aruba", "ubiquiti", "ruckus", "tp-link", "unifi"],
                    &["access point", "ap", "aironet", "unifi", "mr", "wap"],
                    &["ap"],
                ),
            ],
            virtual_machine: VirtualMachineRules {
                vendors: words(&["vmware", "virtualbox", "qemu", "microsoft corporation"]),
                model_keywords: words(&["virtual machine", "vm"]),
                hostnames: Vec::new(),
            },
            iot: IotRules {
                manufacturer_keywords: words(&["yealink"]),
                model_keywords: words(&[
                    "iot", "meetingbar", "roompanel", "ctp", "ctp18", "a20", "a30", "poly", "core2kit",
                ]),
                hostname_keywords: words(&["meetingbar", "roompanel", "ctp", "poly"]),
                os_keywords: words(&["iot", "androidaosp"]),
            },
            ios: IosRules {
                os_keywords: words(&["ios"]),
                tablet_keywords: words(&["ipad", "ipad pro", "ipad air", "ipad mini"]),
            },
            android: AndroidRules {
                os_keywords: words(&["android"]),
                iot_keywords: words(&["meetingbar", "roompanel", "ctp"]),
                tablet_keywords: words(&["tablet", "tab"]),
                tablet_vendors: words(&["samsung", "lenovo", "huawei"]),
            },
            computer: ComputerRules {
                laptop_hostname_keywords: words(&["laptop"]),
                desktop_hostname_keywords: words(&["pc", "desktop"]),
                laptop_keywords: words(&[
                    "laptop", "notebook", "book", "zenbook", "vivobook", "thinkpad", "latitude",
                    "xps", "precision", "elitebook", "probook", "spectre", "envy",
                    "surface laptop", "studiobook", "proart", "macbook",
                ]),
                desktop_keywords: words(&[
                    "desktop", "workstation", "station", "studio", "thinkcentre", "ideacentre",
                    "thinkstation", "neo", "tower", "sff", "tiny", "all-in-one", "aio", "m70s",
                    "m70t", "m70q", "m90s", "m90t", "m90q", "m75s", "m75t", "m75q", "p320",
                    "p520", "p360", "p340", "imac", "mac mini", "mac studio", "mac pro",
                    "z840", "z640", "z440", "z240", "z620",
                ]),
                laptop_model_prefixes: BTreeMap::from([(
                    "lenovo".to_string(),
                    words(&["20", "21", "40"]),
                )]),
                desktop_model_prefixes: BTreeMap::from([(
                    "lenovo".to_string(),
                    words(&["10", "11", "12", "30"]),
                )]),
                desktop_os_keywords: words(&["desktop", "windows workstation", "linux workstation"]),
                default_desktop_os: words(&["windows", "mac"]),
            },
            server: ServerRules {
                os_keywords: words(&["windows server", "esxi"]),
                model_keywords: words(&["server"]),
                hostname_keywords: words(&[
                    "zabbix", "ubuntu", "veeam", "vcenter", "esx", "dc", "filesrvr", "terminal",
                    "consult",
                ]),
            },
            services: vec![
                service_rule("Domain Controller", MatchKind::All, &["domain", "ldap", "kerberos"]),
                service_rule("Printer", MatchKind::Any, &["ipp", "jetdirect", "printer", "cups", "lpr"]),
                service_rule(
                    "Database Server",
                    MatchKind::Any,
                    &["mysql", "mssql", "postgresql", "oracle", "mongodb"],
                ),
                service_rule(
                    "Storage Device",
                    MatchKind::Any,
                    &["nfs", "smb", "cifs", "iscsi", "netapp", "synology"],
                ),
                service_rule("Web Server", MatchKind::Any, &["http", "https", "nginx", "apache", "iis"]),
                service_rule("Network Device", MatchKind::Any, &["snmp"]),
            ],
            generic_os: GenericOsRules {
                server_models: words(&["windows server", "linux server"]),
                desktop_models: words(&["windows workstation", "linux workstation", "macos device"]),
                os_families: words(&["windows", "linux", "macos", "mac os"]),
            },
            categories: [
                ("Server", "Servers"),
                ("Domain Controller", "Servers"),
                ("Database Server", "Servers"),
                ("Web Server", "Servers"),
                ("Switch", "Switches"),
                ("Router", "Routers"),
                ("Firewall", "Firewalls"),
                ("Access Point", "Access Points"),
                ("Network Device", "Network Devices"),
                ("Printer", "Printers"),
                ("Storage Device", "Storage Devices"),
                ("Laptop", "Laptops"),
                ("Desktop", "Desktops"),
                ("Tablet", "Tablets"),
                ("Mobile Phone", "Mobile Phones"),
                ("Virtual Machine", "Virtual Machines (On-Premises)"),
                ("IoT Devices", "IoT Devices"),
            ]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
            cloud: CloudRules {
                excluded_manufacturers: words(&["yealink"]),
                matchers: vec![
                    CloudMatcher {
                        provider: "Azure".into(),
                        manufacturer_keywords: words(&["microsoft corporation"]),
                        model_keywords: words(&["virtual machine"]),
                    },
                    CloudMatcher {
                        provider: "AWS".into(),
                        manufacturer_keywords: words(&["amazon", "aws"]),
                        model_keywords: Vec::new(),
                    },
                    CloudMatcher {
                        provider: "AWS".into(),
                        manufacturer_keywords: Vec::new(),
                        model_keywords: words(&["amazon ec2"]),
                    },
                    CloudMatcher {
                        provider: "GCP".into(),
                        manufacturer_keywords: words(&["google"]),
                        model_keywords: words(&["compute engine"]),
                    },
                ],
            },
            vendor: VendorRules::default(),
        }
    }
}

fn require(table: &str, keywords: &[String]) -> RuleResult<()> {
    if keywords.iter().all(|k| k.trim().is_empty()) {
        return Err(RuleError::EmptyKeywords(table.to_string()));
    }
    Ok(())
}

impl RuleSet {
    /// Checks that every table the classifier relies on is usable.
    pub fn validate(&self) -> RuleResult<()> {
        if self.version == 0 || self.version > RULESET_VERSION {
            return Err(RuleError::UnsupportedVersion(self.version));
        }
        if self.network.is_empty() {
            return Err(RuleError::EmptyNetworkOrder);
        }

        let mut seen = Vec::new();
        for rule in &self.network {
            let key = rule.device_type.to_lowercase();
            if seen.contains(&key) {
                return Err(RuleError::DuplicateDeviceType {
                    table: "network".to_string(),
                    device_type: rule.device_type.clone(),
                });
            }
            seen.push(key);

            let mut all = rule.model_keywords.clone();
            all.extend(rule.hostname_prefixes.iter().cloned());
            require(&format!("network.{}", rule.device_type), &all)?;
        }

        require("virtual_machine.model_keywords", &self.virtual_machine.model_keywords)?;
        require("ios.os_keywords", &self.ios.os_keywords)?;
        require("android.os_keywords", &self.android.os_keywords)?;
        require("server.os_keywords", &self.server.os_keywords)?;
        require("generic_os.os_families", &self.generic_os.os_families)?;
        for rule in &self.services {
            require(&format!("services.{}", rule.device_type), &rule.keywords)?;
        }
        for matcher in &self.cloud.matchers {
            let mut all = matcher.manufacturer_keywords.clone();
            all.extend(matcher.model_keywords.iter().cloned());
            require(&format!("cloud.{}", matcher.provider), &all)?;
        }
        if self.categories.is_empty() {
            return Err(RuleError::EmptyKeywords("categories".to_string()));
        }
        Ok(())
    }

    /// Looks up the category for a device type, case-insensitively.
    pub fn category_for(&self, device_type: &str) -> Option<&str> {
        self.categories
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(device_type))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules_validate() {
        let rules = RuleSet::default();
        assert!(rules.validate().is_ok());
        let order: Vec<&str> = rules.network.iter().map(|r| r.device_type.as_str()).collect();
        assert_eq!(order, vec!["Firewall", "Switch", "Router", "Access Point"]);
    }

    #[test]
    fn test_empty_network_order_rejected() {
        let rules = RuleSet {
            network: Vec::new(),
            ..Default::default()
        };
        assert_eq!(rules.validate(), Err(RuleError::EmptyNetworkOrder));
    }

    #[test]
    fn test_empty_service_keywords_rejected() {
        let mut rules = RuleSet::default();
        rules.services[1].keywords = vec!["  ".to_string()];
        assert_eq!(
            rules.validate(),
            Err(RuleError::EmptyKeywords("services.Printer".to_string()))
        );
    }

    #[test]
    fn test_duplicate_network_type_rejected() {
        let mut rules = RuleSet::default();
        let dup = rules.network[0].clone();
        rules.network.push(dup);
        assert!(matches!(
            rules.validate(),
            Err(RuleError::DuplicateDeviceType { .. })
        ));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
version: 1
services:
  - device_type: Printer
    match: any
    keywords: [ipp]
"#;
        let rules: RuleSet = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rules.services.len(), 1);
        assert_eq!(rules.network.len(), 4);
        assert!(rules.validate().is_ok());
    }

    #[test]
    fn test_category_lookup() {
        let rules = RuleSet::default();
        assert_eq!(rules.category_for("access point"), Some("Access Points"));
        assert_eq!(rules.category_for("Hovercraft"), None);
    }
}
