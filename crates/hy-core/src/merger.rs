//! Cross-source record merging.
//!
//! Records that share any identifier key (serial, platform device ID, MAC,
//! or a meaningful short hostname) are clustered as connected components of
//! an identifier-sharing graph, then each cluster is collapsed field by field
//! in ascending source priority.

use crate::models::{is_empty_value, DeviceRecord, Platform, RawRecord, UNKNOWN_SOURCE};
use crate::normalize::text::{is_generic_name, is_placeholder_name, short_hostname};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Minimum short-hostname length used as a merge key.
const MIN_HOSTNAME_KEY_LEN: usize = 4;

/// Numeric source ranks; higher wins field conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourcePriorities(BTreeMap<String, u32>);

impl Default for SourcePriorities {
    fn default() -> Self {
        Self(
            [
                ("microsoft365", 4),
                ("intune", 3),
                ("teams", 3),
                ("nmap", 2),
                (UNKNOWN_SOURCE, 1),
            ]
            .iter()
            .map(|(s, p)| (s.to_string(), *p))
            .collect(),
        )
    }
}

impl SourcePriorities {
    pub fn new(ranks: BTreeMap<String, u32>) -> Self {
        Self(ranks)
    }

    /// Rank of a source. Unlisted sources rank with `unknown`.
    pub fn rank(&self, source: &str) -> u32 {
        self.0
            .get(source)
            .or_else(|| self.0.get(UNKNOWN_SOURCE))
            .copied()
            .unwrap_or(1)
    }

    /// Sets the rank of one source.
    pub fn set(&mut self, source: impl Into<String>, rank: u32) {
        self.0.insert(source.into(), rank);
    }
}

/// One collapsed cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecord {
    /// Merged fields, tagged with the primary source.
    pub record: DeviceRecord,
    pub sources: BTreeSet<String>,
    pub primary_source: String,
    /// Batch indices of the records that formed this cluster, ascending.
    pub members: Vec<usize>,
}

/// Extracts the identifier keys a record can be clustered on.
pub fn identifier_keys(record: &DeviceRecord) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();

    if let Some(serial) = record.serial.as_deref() {
        let serial = serial.trim();
        if !serial.is_empty() {
            keys.insert(format!("serial:{}", serial.to_uppercase()));
        }
    }
    for platform in Platform::ALL {
        if let Some(id) = record.platform_id(platform) {
            keys.insert(format!("{}:{}", platform.key_prefix(), id.trim()));
        }
    }
    for mac in record.all_macs() {
        keys.insert(format!("mac:{}", mac));
    }

    let hostname = record
        .dns_hostname
        .as_deref()
        .or(record.name.as_deref())
        .unwrap_or_default();
    if !is_placeholder_name(hostname) {
        let short = short_hostname(hostname);
        if short.chars().count() >= MIN_HOSTNAME_KEY_LEN {
            keys.insert(format!("hostname:{}", short));
        }
    }

    keys
}

/// Clusters and collapses records from one batch.
#[derive(Debug, Clone, Default)]
pub struct Merger {
    priorities: SourcePriorities,
}

impl Merger {
    pub fn new(priorities: SourcePriorities) -> Self {
        Self { priorities }
    }

    pub fn priorities(&self) -> &SourcePriorities {
        &self.priorities
    }

    /// Groups batch indices into clusters of records sharing any identifier.
    ///
    /// Clusters are returned in order of their lowest member index, members
    /// ascending.
    pub fn cluster(&self, records: &[DeviceRecord]) -> Vec<Vec<usize>> {
        let keys: Vec<BTreeSet<String>> = records.iter().map(identifier_keys).collect();

        let mut index: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, record_keys) in keys.iter().enumerate() {
            for key in record_keys {
                index.entry(key.as_str()).or_default().push(idx);
            }
        }

        let mut visited = vec![false; records.len()];
        let mut clusters = Vec::new();

        for seed in 0..records.len() {
            if visited[seed] {
                continue;
            }
            let mut cluster = Vec::new();
            let mut stack = vec![seed];

            while let Some(current) = stack.pop() {
                if visited[current] {
                    continue;
                }
                visited[current] = true;
                cluster.push(current);

                for key in &keys[current] {
                    if let Some(neighbours) = index.get(key.as_str()) {
                        stack.extend(neighbours.iter().copied().filter(|n| !visited[*n]));
                    }
                }
            }

            cluster.sort_unstable();
            clusters.push(cluster);
        }

        clusters
    }

    /// Clusters and collapses a batch.
    pub fn merge(&self, records: &[DeviceRecord]) -> Vec<MergedRecord> {
        let merged: Vec<MergedRecord> = self
            .cluster(records)
            .into_iter()
            .map(|members| {
                let group: Vec<&DeviceRecord> = members.iter().map(|i| &records[*i]).collect();
                let mut result = self.collapse(&group);
                result.members = members;
                result
            })
            .collect();

        debug!(
            input = records.len(),
            output = merged.len(),
            "Merged record batch"
        );
        merged
    }

    /// Collapses one cluster into a single record.
    ///
    /// Members are overlaid in ascending priority, so higher-priority sources
    /// overwrite lower ones field by field. Equal priorities keep their given
    /// order, so the later member wins. A generic `name` never replaces a
    /// meaningful one.
    pub fn collapse(&self, group: &[&DeviceRecord]) -> MergedRecord {
        let mut ordered: Vec<&DeviceRecord> = group.to_vec();
        ordered.sort_by_key(|r| self.priorities.rank(&r.source));

        let mut merged = RawRecord::new();
        let mut sources = BTreeSet::new();

        for record in &ordered {
            sources.insert(record.source.clone());

            for (key, value) in record.to_map() {
                if is_empty_value(&value) {
                    continue;
                }
                if key == "name" && !keeps_name(&merged, &value) {
                    continue;
                }
                merged.insert(key, value);
            }
        }

        // Highest rank wins; among equals, the last processed.
        let primary_source = ordered
            .iter()
            .rev()
            .max_by_key(|r| self.priorities.rank(&r.source))
            .map(|r| r.source.clone())
            .unwrap_or_else(|| UNKNOWN_SOURCE.to_string());

        MergedRecord {
            record: DeviceRecord::from_map(&primary_source, &merged),
            sources,
            primary_source,
            members: Vec::new(),
        }
    }
}

fn keeps_name(merged: &RawRecord, incoming: &Value) -> bool {
    let incoming = incoming.as_str().unwrap_or_default();
    let existing = merged
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default();
    !(is_generic_name(incoming) && !is_generic_name(existing))
}
