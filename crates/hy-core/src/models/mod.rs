//! Data models for device records, canonical assets and per-target decisions.

pub mod asset;
pub mod outcome;
pub mod record;

pub use asset::{CanonicalAsset, Classification, DeviceType, CLOUD_CATEGORY, DEFAULT_CATEGORY};
pub use outcome::{MatchResult, SyncAction};
pub use record::{is_empty_value, DeviceRecord, Labeled, Platform, RawRecord, UNKNOWN_SOURCE};
