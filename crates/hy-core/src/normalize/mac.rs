//! MAC address canonicalisation.
//!
//! Every MAC value entering the engine is rendered as uppercase,
//! colon-separated hex pairs (`AA:BB:CC:DD:EE:FF`). Anything that does not
//! reduce to exactly twelve hex digits is rejected rather than passed through.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Separators between MAC values in a multi-valued string.
static MAC_LIST_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s,;]+").unwrap());

/// A MAC address in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(String);

impl MacAddress {
    /// Parses and canonicalises a single MAC value.
    pub fn parse(raw: &str) -> Option<Self> {
        normalize_mac(raw).map(Self)
    }

    /// Returns the canonical textual form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MacAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid MAC address '{}'", value))
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.0
    }
}

/// Normalises a single MAC address string.
///
/// Strips `:`, `-`, `.` and whitespace, then requires exactly twelve hex
/// digits. Returns `None` for anything else.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let clean: String = raw
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.') && !c.is_whitespace())
        .collect();

    if clean.len() != 12 || !clean.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let upper = clean.to_ascii_uppercase();
    let groups: Vec<&str> = (0..12).step_by(2).map(|i| &upper[i..i + 2]).collect();
    Some(groups.join(":"))
}

/// Extracts every valid MAC from a string that may hold several.
///
/// Values may be separated by newlines, commas, semicolons or whitespace and
/// may carry an interface label such as `ETHERNET:` or `wifi:`. Invalid
/// tokens are dropped and duplicates collapse.
pub fn parse_mac_list(raw: &str) -> BTreeSet<MacAddress> {
    MAC_LIST_SEPARATOR
        .split(raw.trim())
        .filter(|token| !token.is_empty())
        .filter_map(|token| MacAddress::parse(strip_interface_label(token)))
        .collect()
}

/// Extracts MACs from a JSON value holding either a string or a list of strings.
pub fn macs_from_value(value: &serde_json::Value) -> BTreeSet<MacAddress> {
    match value {
        serde_json::Value::String(s) => parse_mac_list(s),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .flat_map(parse_mac_list)
            .collect(),
        _ => BTreeSet::new(),
    }
}

fn strip_interface_label(token: &str) -> &str {
    match token.split_once(':') {
        Some((label, rest))
            if !(label.len() == 2 && label.chars().all(|c| c.is_ascii_hexdigit())) =>
        {
            rest
        }
        _ => token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_mac_equivalent_forms() {
        let expected = Some("AA:BB:CC:DD:EE:FF".to_string());
        assert_eq!(normalize_mac("aa-bb-cc-dd-ee-ff"), expected);
        assert_eq!(normalize_mac("AABBCCDDEEFF"), expected);
        assert_eq!(normalize_mac("aabb.ccdd.eeff"), expected);
        assert_eq!(normalize_mac(" aa:bb:cc:dd:ee:ff "), expected);
    }

    #[test]
    fn test_normalize_mac_rejects_invalid() {
        assert_eq!(normalize_mac(""), None);
        assert_eq!(normalize_mac("AA:BB:CC:DD:EE"), None);
        assert_eq!(normalize_mac("AA:BB:CC:DD:EE:FF:00"), None);
        assert_eq!(normalize_mac("GG:BB:CC:DD:EE:FF"), None);
        assert_eq!(normalize_mac("not a mac"), None);
    }

    #[test]
    fn test_parse_mac_list_with_labels_and_duplicates() {
        let macs = parse_mac_list(
            "ETHERNET:aa:bb:cc:dd:ee:ff\nwifi:11-22-33-44-55-66; AABBCCDDEEFF, garbage",
        );
        let rendered: Vec<&str> = macs.iter().map(|m| m.as_str()).collect();
        assert_eq!(rendered, vec!["11:22:33:44:55:66", "AA:BB:CC:DD:EE:FF"]);
    }

    #[test]
    fn test_macs_from_value_array() {
        let macs = macs_from_value(&json!(["aa:bb:cc:dd:ee:ff", "bad", null]));
        assert_eq!(macs.len(), 1);
        assert!(macs_from_value(&json!(42)).is_empty());
    }

    #[test]
    fn test_mac_address_serde() {
        let mac = MacAddress::parse("aabbccddeeff").unwrap();
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"AA:BB:CC:DD:EE:FF\"");
        let parsed: MacAddress = serde_json::from_str("\"aa-bb-cc-dd-ee-ff\"").unwrap();
        assert_eq!(parsed, mac);
        assert!(serde_json::from_str::<MacAddress>("\"zz\"").is_err());
    }
}
