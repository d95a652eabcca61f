//! Content fingerprints over a fixed field subset.

use crate::models::CanonicalAsset;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Hashes the non-empty values of `fields`, in key order.
///
/// Absent fields are left out rather than hashed as null, so adding a field to
/// a policy does not change the fingerprint of assets that never carry it.
pub fn fingerprint(asset: &CanonicalAsset, fields: &[&str]) -> String {
    let relevant: BTreeMap<&str, Value> = fields
        .iter()
        .filter_map(|field| asset.field(field).map(|value| (*field, value)))
        .collect();

    let canonical: Map<String, Value> = relevant
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(Value::Object(canonical).to_string().as_bytes());
    hex::encode(hasher.finalize())
}
