//! Rule-based device classification.
//!
//! [`Classifier::classify`] is a pure function of a record and the rule
//! tables. Detectors run in a fixed priority order and the first one that
//! recognises the device wins. The chain always ends in a defined fallback,
//! so classification never fails.

pub mod rules;

pub use rules::{MatchKind, RuleError, RuleResult, RuleSet};

use crate::models::{
    Classification, DeviceRecord, DeviceType, CLOUD_CATEGORY, DEFAULT_CATEGORY,
};
use crate::normalize::text::{contains_any, non_empty};
use tracing::debug;

/// Signature shared by every detector in the chain.
pub type Detector = fn(&DeviceRecord, &RuleSet) -> Option<DeviceType>;

/// Detector chain in priority order.
pub const DETECTORS: &[(&str, Detector)] = &[
    ("virtual_machine", detect_virtual_machine),
    ("iot", detect_iot),
    ("network", detect_network_device),
    ("ios", detect_ios),
    ("android", detect_android),
    ("computer", detect_computer),
    ("server", detect_server),
    ("services", detect_by_services),
    ("generic_os", detect_generic_os),
];

/// Classifies normalised records.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: RuleSet,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            rules: RuleSet::default(),
        }
    }
}

impl Classifier {
    /// Creates a classifier from validated rules.
    pub fn new(rules: RuleSet) -> RuleResult<Self> {
        rules.validate()?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Computes `{device_type, category, cloud_provider}` for a record.
    pub fn classify(&self, record: &DeviceRecord) -> Classification {
        let device_type = self.device_type(record);
        let cloud_provider = cloud_provider(record, &self.rules);

        let category = if cloud_provider.is_some() {
            CLOUD_CATEGORY.to_string()
        } else {
            record
                .category
                .as_deref()
                .and_then(non_empty)
                .or_else(|| self.rules.category_for(device_type.as_str()))
                .unwrap_or(DEFAULT_CATEGORY)
                .to_string()
        };

        Classification {
            device_type,
            category,
            cloud_provider,
        }
    }

    /// Determines the device type alone.
    pub fn device_type(&self, record: &DeviceRecord) -> DeviceType {
        if let Some(asserted) = record.device_type.as_deref().and_then(non_empty) {
            return DeviceType::parse(asserted);
        }

        for (name, detector) in DETECTORS {
            if let Some(device_type) = detector(record, &self.rules) {
                debug!(
                    detector = *name,
                    device_type = %device_type,
                    source = %record.source,
                    "Classified device"
                );
                return device_type;
            }
        }
        DeviceType::OtherDevice
    }
}

fn lower(s: &str) -> String {
    s.to_lowercase()
}

/// Returns true when the short hostname starts with `prefix` followed by a
/// digit, a separator, or nothing.
fn hostname_has_prefix(short_name: &str, prefix: &str) -> bool {
    let prefix = lower(prefix.trim());
    if prefix.is_empty() {
        return false;
    }
    match short_name.strip_prefix(prefix.as_str()) {
        Some(rest) => rest
            .chars()
            .next()
            .map_or(true, |c| c.is_ascii_digit() || matches!(c, '-' | '_' | '.' | ' ')),
        None => false,
    }
}

fn detect_virtual_machine(record: &DeviceRecord, rules: &RuleSet) -> Option<DeviceType> {
    let vm = &rules.virtual_machine;
    let by_vendor = contains_any(record.manufacturer_text(), &vm.vendors)
        && contains_any(record.model_text(), &vm.model_keywords);

    let by_hostname = [&record.dns_hostname, &record.name]
        .iter()
        .filter_map(|v| v.as_deref())
        .any(|host| {
            let host = lower(host.trim());
            vm.hostnames.iter().any(|h| lower(h) == host)
        });

    (by_vendor || by_hostname).then_some(DeviceType::VirtualMachine)
}

fn detect_iot(record: &DeviceRecord, rules: &RuleSet) -> Option<DeviceType> {
    let iot = &rules.iot;
    let hit = contains_any(record.manufacturer_text(), &iot.manufacturer_keywords)
        || contains_any(record.model_text(), &iot.model_keywords)
        || contains_any(record.os_text(), &iot.os_keywords)
        || contains_any(&record.short_name(), &iot.hostname_keywords);
    hit.then_some(DeviceType::IotDevice)
}

fn detect_network_device(record: &DeviceRecord, rules: &RuleSet) -> Option<DeviceType> {
    let short_name = record.short_name();

    let by_hostname = rules.network.iter().find(|rule| {
        rule.hostname_prefixes
            .iter()
            .any(|p| hostname_has_prefix(&short_name, p))
    });
    if let Some(rule) = by_hostname {
        return Some(DeviceType::parse(&rule.device_type));
    }

    rules
        .network
        .iter()
        .find(|rule| {
            contains_any(record.manufacturer_text(), &rule.vendors)
                && contains_any(record.model_text(), &rule.model_keywords)
        })
        .map(|rule| DeviceType::parse(&rule.device_type))
}

fn detect_ios(record: &DeviceRecord, rules: &RuleSet) -> Option<DeviceType> {
    if !contains_any(record.os_text(), &rules.ios.os_keywords) {
        return None;
    }
    let tablet = contains_any(record.model_text(), &rules.ios.tablet_keywords)
        || contains_any(&record.short_name(), &rules.ios.tablet_keywords);
    Some(if tablet {
        DeviceType::Tablet
    } else {
        DeviceType::MobilePhone
    })
}

fn detect_android(record: &DeviceRecord, rules: &RuleSet) -> Option<DeviceType> {
    let android = &rules.android;
    if !contains_any(record.os_text(), &android.os_keywords) {
        return None;
    }
    let model = record.model_text();
    if contains_any(model, &android.iot_keywords) {
        return Some(DeviceType::IotDevice);
    }
    if contains_any(model, &android.tablet_keywords)
        || contains_any(record.manufacturer_text(), &android.tablet_vendors)
    {
        return Some(DeviceType::Tablet);
    }
    Some(DeviceType::MobilePhone)
}

fn has_model_prefix(
    record: &DeviceRecord,
    prefixes: &std::collections::BTreeMap<String, Vec<String>>,
) -> bool {
    let manufacturer = lower(record.manufacturer_text());
    let model = lower(record.model_text().trim());
    prefixes.iter().any(|(vendor, list)| {
        manufacturer.contains(&lower(vendor)) && list.iter().any(|p| model.starts_with(p.as_str()))
    })
}

fn detect_computer(record: &DeviceRecord, rules: &RuleSet) -> Option<DeviceType> {
    let computer = &rules.computer;
    let short_name = record.short_name();
    let model = record.model_text();
    let os = record.os_text();

    if contains_any(&short_name, &computer.laptop_hostname_keywords) {
        return Some(DeviceType::Laptop);
    }
    if contains_any(&short_name, &computer.desktop_hostname_keywords) {
        return Some(DeviceType::Desktop);
    }

    if contains_any(model, &computer.laptop_keywords)
        || has_model_prefix(record, &computer.laptop_model_prefixes)
    {
        return Some(DeviceType::Laptop);
    }
    if contains_any(model, &computer.desktop_keywords)
        || has_model_prefix(record, &computer.desktop_model_prefixes)
    {
        return Some(DeviceType::Desktop);
    }

    if contains_any(os, &computer.desktop_os_keywords) {
        return Some(DeviceType::Desktop);
    }

    // Server operating systems fall through to the server detector.
    let server_like = contains_any(os, &rules.server.os_keywords)
        || contains_any(model, &rules.server.model_keywords);
    if !server_like && contains_any(os, &computer.default_desktop_os) {
        return Some(DeviceType::Desktop);
    }
    None
}

fn detect_server(record: &DeviceRecord, rules: &RuleSet) -> Option<DeviceType> {
    let server = &rules.server;
    let hit = contains_any(record.os_text(), &server.os_keywords)
        || contains_any(record.model_text(), &server.model_keywords)
        || contains_any(&record.short_name(), &server.hostname_keywords);
    hit.then_some(DeviceType::Server)
}

fn detect_by_services(record: &DeviceRecord, rules: &RuleSet) -> Option<DeviceType> {
    if record.services.is_empty() {
        return None;
    }
    let joined = record.services.join(" ");

    rules
        .services
        .iter()
        .find(|rule| match rule.match_kind {
            MatchKind::All => rule
                .keywords
                .iter()
                .all(|k| crate::normalize::contains_keyword(&joined, k)),
            MatchKind::Any => contains_any(&joined, &rule.keywords),
        })
        .map(|rule| DeviceType::parse(&rule.device_type))
}

fn detect_generic_os(record: &DeviceRecord, rules: &RuleSet) -> Option<DeviceType> {
    let generic = &rules.generic_os;
    let model = record.model_text();

    if contains_any(model, &generic.server_models) {
        return Some(DeviceType::Server);
    }
    if contains_any(model, &generic.desktop_models) {
        return Some(DeviceType::Desktop);
    }
    contains_any(record.os_text(), &generic.os_families).then_some(DeviceType::Desktop)
}

/// Names the cloud provider hosting a device, or `None` for on-premises.
pub fn cloud_provider(record: &DeviceRecord, rules: &RuleSet) -> Option<String> {
    let manufacturer = record.manufacturer_text();
    let model = record.model_text();

    if contains_any(manufacturer, &rules.cloud.excluded_manufacturers) {
        return None;
    }

    rules
        .cloud
        .matchers
        .iter()
        .find(|m| {
            let manufacturer_ok = m.manufacturer_keywords.is_empty()
                || contains_any(manufacturer, &m.manufacturer_keywords);
            let model_ok = m.model_keywords.is_empty() || contains_any(model, &m.model_keywords);
            let has_terms = !(m.manufacturer_keywords.is_empty() && m.model_keywords.is_empty());
            has_terms && manufacturer_ok && model_ok
        })
        .map(|m| m.provider.clone())
}
