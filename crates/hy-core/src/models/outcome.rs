//! Per-target decisions.

use hy_connectors::TargetRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What to do with a candidate in one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Create,
    Update,
    Skip,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncAction::Create => write!(f, "create"),
            SyncAction::Update => write!(f, "update"),
            SyncAction::Skip => write!(f, "skip"),
        }
    }
}

/// Result of checking a candidate against a target's state.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub action: SyncAction,
    /// ID of the matched entity in the target store, when known.
    pub target_id: Option<String>,
    /// The matched record as found in the target store.
    pub existing_record: Option<TargetRecord>,
    /// Identity key under which the candidate is tracked, if one was derived.
    pub key: Option<String>,
    pub reason: String,
}

impl MatchResult {
    pub fn create(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            action: SyncAction::Create,
            target_id: None,
            existing_record: None,
            key: Some(key.into()),
            reason: reason.into(),
        }
    }

    pub fn update(
        key: impl Into<String>,
        target_id: Option<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            action: SyncAction::Update,
            target_id,
            existing_record: None,
            key: Some(key.into()),
            reason: reason.into(),
        }
    }

    pub fn skip(key: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            action: SyncAction::Skip,
            target_id: None,
            existing_record: None,
            key,
            reason: reason.into(),
        }
    }

    /// Attaches the matched target record.
    pub fn with_existing(mut self, record: Option<TargetRecord>) -> Self {
        if self.target_id.is_none() {
            self.target_id = record.as_ref().map(|r| r.id.clone());
        }
        self.existing_record = record;
        self
    }

    pub fn is_skip(&self) -> bool {
        self.action == SyncAction::Skip
    }
}
