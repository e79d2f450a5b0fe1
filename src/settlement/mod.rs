//! Settlement tracking for submitted transfers
//!
//! This module provides:
//! - The canonical settlement state model and per-transfer record
//! - The indexer collaborator and its HTTP client
//! - Cancellable per-transfer poll tasks with a live update stream

pub mod indexer;
pub mod state;
pub mod tracker;

pub use indexer::{CctxIndexer, Indexer, OutboundLeg, SettlementQueryResult};
pub use state::{LegRoute, SettlementRecord, SettlementState};
pub use tracker::{CancelHandle, SettlementHandle, SettlementTracker, TransferOutcome};
