//! Target store trait definitions for Hydra.
//!
//! A target store is any downstream asset or monitoring system that canonical
//! assets are synchronised into. The reconciliation core only needs a small
//! contract from it: two indexed lookups, a full listing with a forced-refresh
//! mode, and create/update.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur when talking to a target store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The store rejected a create because an equivalent entity already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConnectorError {
    /// Returns whether a failed create may have been caused by another process
    /// creating the same entity concurrently.
    ///
    /// Ambiguous failures (timeouts, generic request failures) are included
    /// because the entity may have been written before the error surfaced.
    pub fn may_indicate_race(&self) -> bool {
        matches!(
            self,
            ConnectorError::Conflict(_)
                | ConnectorError::RequestFailed(_)
                | ConnectorError::Timeout(_)
        )
    }
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// A record as it exists in a target store.
///
/// Custom fields are keyed by the store's own field labels. Mapping internal
/// identifier names to those labels is the caller's concern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRecord {
    /// Store-assigned identifier.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Asset tag, if the store tracks one.
    #[serde(default)]
    pub asset_tag: Option<String>,
    /// Serial number.
    #[serde(default)]
    pub serial: Option<String>,
    /// Built-in MAC address field.
    #[serde(default)]
    pub mac_address: Option<String>,
    /// Store-specific custom fields, keyed by label.
    #[serde(default)]
    pub custom_fields: BTreeMap<String, String>,
}

impl TargetRecord {
    /// Creates a new record with only an ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Sets the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the serial number.
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Sets the asset tag.
    pub fn with_asset_tag(mut self, tag: impl Into<String>) -> Self {
        self.asset_tag = Some(tag.into());
        self
    }

    /// Sets the built-in MAC address field.
    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        self.mac_address = Some(mac.into());
        self
    }

    /// Adds a custom field value.
    pub fn with_custom_field(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_fields.insert(label.into(), value.into());
        self
    }

    /// Returns a non-empty custom field value by label.
    pub fn custom_field(&self, label: &str) -> Option<&str> {
        self.custom_fields
            .get(label)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Builds a record from a flat JSON payload.
    ///
    /// Recognised keys are `name`, `asset_tag`, `serial`, `mac_address` and a
    /// `custom_fields` object of string values. Other keys are ignored.
    pub fn from_payload(id: impl Into<String>, payload: &serde_json::Value) -> Self {
        let text = |key: &str| {
            payload
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
        };

        let custom_fields = payload
            .get("custom_fields")
            .and_then(|v| v.as_object())
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|(k, v)| match v {
                        serde_json::Value::String(s) => Some((k.clone(), s.clone())),
                        serde_json::Value::Null => None,
                        other => Some((k.clone(), other.to_string())),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id: id.into(),
            name: text("name"),
            asset_tag: text("asset_tag"),
            serial: text("serial"),
            mac_address: text("mac_address"),
            custom_fields,
        }
    }

    /// Overlays a flat JSON payload onto this record, keeping the ID.
    pub fn apply_payload(&mut self, payload: &serde_json::Value) {
        let patch = Self::from_payload(self.id.clone(), payload);
        if patch.name.is_some() {
            self.name = patch.name;
        }
        if patch.asset_tag.is_some() {
            self.asset_tag = patch.asset_tag;
        }
        if patch.serial.is_some() {
            self.serial = patch.serial;
        }
        if patch.mac_address.is_some() {
            self.mac_address = patch.mac_address;
        }
        self.custom_fields.extend(patch.custom_fields);
    }
}

/// Downstream asset or monitoring store.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Returns the store name used in logs and reports.
    fn name(&self) -> &str;

    /// Looks up a record by serial number using the store's index.
    async fn search_by_serial(&self, serial: &str) -> ConnectorResult<Option<TargetRecord>>;

    /// Looks up a record by asset tag using the store's index.
    async fn search_by_tag(&self, tag: &str) -> ConnectorResult<Option<TargetRecord>>;

    /// Lists every record in the store.
    ///
    /// When `refresh` is true any client-side cache must be bypassed.
    async fn list_all(&self, refresh: bool) -> ConnectorResult<Vec<TargetRecord>>;

    /// Creates a record from a built payload.
    async fn create(&self, payload: &serde_json::Value) -> ConnectorResult<TargetRecord>;

    /// Updates an existing record from a built payload.
    async fn update(&self, id: &str, payload: &serde_json::Value)
        -> ConnectorResult<TargetRecord>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_from_payload() {
        let payload = json!({
            "name": "CORP-LAPTOP-9",
            "serial": "SN123",
            "asset_tag": "  ",
            "custom_fields": {
                "MAC Addresses": "AA:BB:CC:DD:EE:FF",
                "Open Ports": 3,
                "Notes": null
            }
        });

        let record = TargetRecord::from_payload("42", &payload);

        assert_eq!(record.id, "42");
        assert_eq!(record.name.as_deref(), Some("CORP-LAPTOP-9"));
        assert_eq!(record.serial.as_deref(), Some("SN123"));
        assert!(record.asset_tag.is_none());
        assert_eq!(
            record.custom_field("MAC Addresses"),
            Some("AA:BB:CC:DD:EE:FF")
        );
        assert_eq!(record.custom_field("Open Ports"), Some("3"));
        assert!(record.custom_field("Notes").is_none());
    }

    #[test]
    fn test_apply_payload_keeps_unset_fields() {
        let mut record = TargetRecord::new("7")
            .with_name("old-name")
            .with_serial("SN1")
            .with_custom_field("Last Seen IP", "10.0.0.1");

        record.apply_payload(&json!({
            "name": "new-name",
            "custom_fields": { "Last Seen IP": "10.0.0.2" }
        }));

        assert_eq!(record.id, "7");
        assert_eq!(record.name.as_deref(), Some("new-name"));
        assert_eq!(record.serial.as_deref(), Some("SN1"));
        assert_eq!(record.custom_field("Last Seen IP"), Some("10.0.0.2"));
    }

    #[test]
    fn test_race_classification() {
        assert!(ConnectorError::Conflict("dup".into()).may_indicate_race());
        assert!(ConnectorError::Timeout("slow".into()).may_indicate_race());
        assert!(!ConnectorError::InvalidRequest("bad".into()).may_indicate_race());
        assert!(!ConnectorError::RateLimited(30).may_indicate_race());
    }
}
