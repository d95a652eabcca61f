//! # hy-core
//!
//! Identity resolution and synchronisation-state engine for Hydra.
//!
//! This crate turns device records reported by several discovery sources into
//! canonical assets (normalisation, static overrides, classification,
//! cross-source merging) and decides per downstream target whether each asset
//! must be created, updated or skipped.

pub mod classify;
pub mod config;
pub mod engine;
pub mod finder;
pub mod merger;
pub mod models;
pub mod normalize;
pub mod state;
pub mod static_ref;
pub mod sync;

pub use classify::rules::{RuleError, RuleSet};
pub use classify::Classifier;
pub use config::{load_config, ConfigError, EngineConfig, TargetConfig};
pub use engine::ReconciliationEngine;
pub use finder::{FieldMap, Finder, FinderMatch, Strategy};
pub use merger::{MergedRecord, Merger, SourcePriorities};
pub use models::{
    CanonicalAsset, Classification, DeviceRecord, DeviceType, Labeled, MatchResult, Platform,
    RawRecord, SyncAction,
};
pub use normalize::{normalize_mac, MacAddress, Normalizer};
pub use state::{
    Ledger, LedgerEntry, PolicyKind, StateError, StateManager, TargetPolicy,
};
pub use static_ref::{IpScope, StaticEntry, StaticReference};
pub use sync::{
    CandidateOutcome, FlatPayloadBuilder, PayloadBuilder, RunSummary, SyncError, SyncOutcome,
    SyncReport, TargetSync,
};
