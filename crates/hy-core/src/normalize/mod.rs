//! Field normalisation.
//!
//! Canonicalises MAC addresses, corrects manufacturer/model values reported
//! from network-chip OUIs, and provides the text comparison helpers used
//! throughout the engine. Everything here is pure.

pub mod mac;
pub mod text;
pub mod vendor;

pub use mac::{normalize_mac, parse_mac_list, MacAddress};
pub use text::{
    contains_any, contains_keyword, is_generic_name, is_placeholder_name,
    normalize_for_comparison, short_hostname,
};
pub use vendor::{VendorCorrection, VendorRules};

use crate::models::{DeviceRecord, Labeled, RawRecord};
use tracing::debug;

/// Applies record-level hygiene to freshly ingested data.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    vendor_rules: VendorRules,
}

impl Normalizer {
    pub fn new(vendor_rules: VendorRules) -> Self {
        Self { vendor_rules }
    }

    /// Ingests a raw record and corrects its manufacturer/model.
    pub fn normalize(&self, raw: &RawRecord) -> DeviceRecord {
        let mut record = DeviceRecord::from_raw(raw);
        self.correct_vendor(&mut record);
        record
    }

    /// Rewrites a NIC-vendor or aliased manufacturer in place.
    pub fn correct_vendor(&self, record: &mut DeviceRecord) {
        let Some(manufacturer) = record.manufacturer.as_ref().map(|m| m.text().to_string())
        else {
            return;
        };
        let model = record.model_text().to_string();

        let Some(corrected) = self.vendor_rules.correct(&manufacturer, &model) else {
            return;
        };

        debug!(
            source = %record.source,
            from = %manufacturer,
            to = %corrected.manufacturer,
            "Corrected manufacturer"
        );
        record.manufacturer = Some(Labeled::Scalar(corrected.manufacturer));
        if corrected.model != model {
            record.model = match record.model.take() {
                Some(Labeled::Named { number, .. }) => Some(Labeled::Named {
                    name: corrected.model,
                    number,
                }),
                _ if corrected.model.is_empty() => None,
                _ => Some(Labeled::Scalar(corrected.model)),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_corrects_nic_vendor() {
        let raw = json!({
            "source": "nmap",
            "manufacturer": "Intel Corporate",
            "model": "Latitude 5520",
            "mac_addresses": "aa-bb-cc-dd-ee-ff"
        });
        let record = Normalizer::default().normalize(raw.as_object().unwrap());

        assert_eq!(record.manufacturer_text(), "Dell");
        assert_eq!(record.model_text(), "Latitude 5520");
        assert_eq!(record.all_macs().len(), 1);
    }

    #[test]
    fn test_normalize_keeps_nested_model_number() {
        let raw = json!({
            "manufacturer": { "name": "Hewlett-Packard" },
            "model": { "name": "Hewlett-Packard ProBook 450", "model_number": "2X7Y" }
        });
        let record = Normalizer::default().normalize(raw.as_object().unwrap());

        assert_eq!(record.manufacturer_text(), "HP");
        assert_eq!(
            record.model,
            Some(Labeled::Named {
                name: "ProBook 450".into(),
                number: "2X7Y".into()
            })
        );
    }
}
