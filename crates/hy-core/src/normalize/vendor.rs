//! Manufacturer/model hygiene.
//!
//! Network scanners report the vendor of a device's network chip (from the
//! MAC OUI) as its manufacturer. This module maps such values back to the
//! device OEM where the model string allows it, and applies a small table of
//! fixed vendor rewrites.

use super::text::{contains_keyword, normalize_for_comparison};
use serde::{Deserialize, Serialize};

/// Manufacturer used when a NIC vendor cannot be mapped to an OEM.
pub const GENERIC_MANUFACTURER: &str = "Generic";

/// A fixed vendor rewrite, checked before NIC-vendor correction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorRewrite {
    /// Lowercase substring of the reported manufacturer.
    pub vendor: String,
    /// Manufacturer to report instead.
    pub manufacturer: String,
    /// Text removed from the model, case-insensitively.
    #[serde(default)]
    pub strip_from_model: Option<String>,
}

/// Model keyword that reveals the device OEM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OemKeyword {
    pub keyword: String,
    pub manufacturer: String,
}

/// Tables driving manufacturer/model correction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorRules {
    #[serde(default)]
    pub rewrites: Vec<VendorRewrite>,
    /// Lowercase substrings identifying network-chip vendors.
    #[serde(default)]
    pub nic_vendors: Vec<String>,
    /// Keywords searched in the model, in order.
    #[serde(default)]
    pub oem_keywords: Vec<OemKeyword>,
}

impl Default for VendorRules {
    fn default() -> Self {
        let rewrite = |vendor: &str, manufacturer: &str, strip: Option<&str>| VendorRewrite {
            vendor: vendor.to_string(),
            manufacturer: manufacturer.to_string(),
            strip_from_model: strip.map(String::from),
        };
        let oem = |keyword: &str, manufacturer: &str| OemKeyword {
            keyword: keyword.to_string(),
            manufacturer: manufacturer.to_string(),
        };

        Self {
            rewrites: vec![
                rewrite("lcfc", "Lenovo", None),
                rewrite("hewlett-packard", "HP", Some("Hewlett-Packard")),
                rewrite("hewlett packard", "HP", Some("Hewlett Packard")),
                rewrite("dell inc", "Dell", Some("Dell Inc.")),
                rewrite("apple inc", "Apple", None),
            ],
            nic_vendors: [
                "intel corporate",
                "realtek",
                "liteon",
                "lite-on",
                "azurewave",
                "hon hai",
                "murata",
                "qualcomm",
                "broadcom",
                "mediatek",
                "rivet networks",
                "universal global scientific",
            ]
            .iter()
            .map(|v| v.to_string())
            .collect(),
            oem_keywords: vec![
                oem("lenovo", "Lenovo"),
                oem("thinkpad", "Lenovo"),
                oem("thinkcentre", "Lenovo"),
                oem("dell", "Dell"),
                oem("latitude", "Dell"),
                oem("optiplex", "Dell"),
                oem("precision", "Dell"),
                oem("hp", "HP"),
                oem("elitebook", "HP"),
                oem("probook", "HP"),
                oem("elitedesk", "HP"),
                oem("surface", "Microsoft"),
                oem("macbook", "Apple"),
                oem("imac", "Apple"),
                oem("asus", "ASUS"),
                oem("acer", "Acer"),
            ],
        }
    }
}

/// Result of manufacturer/model correction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorCorrection {
    pub manufacturer: String,
    pub model: String,
}

impl VendorRules {
    /// Returns true when the manufacturer is a known network-chip vendor.
    pub fn is_nic_vendor(&self, manufacturer: &str) -> bool {
        let normalized = normalize_for_comparison(manufacturer);
        self.nic_vendors
            .iter()
            .any(|v| normalized.contains(&normalize_for_comparison(v)))
    }

    /// Corrects a manufacturer/model pair.
    ///
    /// Returns `None` when no rule applies and both values stay as reported.
    pub fn correct(&self, manufacturer: &str, model: &str) -> Option<VendorCorrection> {
        let lowered = manufacturer.to_lowercase();
        let normalized = normalize_for_comparison(manufacturer);

        // Exact spellings first, so the matching rule's model prefix is stripped.
        if let Some(rule) = self
            .rewrites
            .iter()
            .find(|r| lowered.contains(r.vendor.as_str()))
            .or_else(|| {
                self.rewrites
                    .iter()
                    .find(|r| normalized.contains(&normalize_for_comparison(&r.vendor)))
            })
        {
            let model = match &rule.strip_from_model {
                Some(strip) => strip_case_insensitive(model, strip),
                None => model.trim().to_string(),
            };
            return Some(VendorCorrection {
                manufacturer: rule.manufacturer.clone(),
                model,
            });
        }

        if !self.is_nic_vendor(manufacturer) {
            return None;
        }

        let oem = self
            .oem_keywords
            .iter()
            .find(|k| contains_keyword(model, &k.keyword))
            .map(|k| k.manufacturer.clone())
            .unwrap_or_else(|| GENERIC_MANUFACTURER.to_string());

        Some(VendorCorrection {
            manufacturer: oem,
            model: model.to_string(),
        })
    }
}

fn strip_case_insensitive(text: &str, needle: &str) -> String {
    let lowered = text.to_lowercase();
    let needle_lower = needle.to_lowercase();
    match lowered.find(&needle_lower) {
        // Lowercasing can change byte lengths outside ASCII; only slice when it did not.
        Some(idx) if lowered.len() == text.len() => {
            let mut out = String::with_capacity(text.len());
            out.push_str(&text[..idx]);
            out.push_str(&text[idx + needle_lower.len()..]);
            out.split_whitespace().collect::<Vec<_>>().join(" ")
        }
        _ => text.trim().to_string(),
    }
}
