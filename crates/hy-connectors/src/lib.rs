//! # hy-connectors
//!
//! Target store contract for Hydra.
//!
//! This crate defines the interface the reconciliation core uses to look up,
//! create and update records in downstream asset and monitoring stores, along
//! with an in-memory mock store for tests.

pub mod mock;
pub mod traits;

pub use mock::{CallRecord, MockBehavior, MockTargetStore};
pub use traits::{ConnectorError, ConnectorResult, TargetRecord, TargetStore};
