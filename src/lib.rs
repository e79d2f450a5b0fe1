//! Hubroute - stablecoin transfers routed through a hub chain
//!
//! Converts between pool tokens and the hub's LP stablecoin, deposits from
//! external chains into the hub and withdraws back out, then follows each
//! transfer until the cross-chain indexer reports it settled.

pub mod action;
pub mod amount;
pub mod approval;
pub mod chain;
pub mod config;
pub mod coordination;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod settlement;
pub mod tx;

pub use action::{ActionKind, Destination, TransferAction, ValidAction};
pub use amount::AmountBounds;
pub use coordination::{Execution, TransferOrchestrator};
pub use pool::{ContractReader, PoolSnapshot, TokenBalance};
pub use error::{SubmissionStage, TransferError, TransferResult, ValidationError};
pub use settlement::{
    CancelHandle, Indexer, SettlementHandle, SettlementRecord, SettlementState, SettlementTracker,
    TransferOutcome,
};
pub use tx::Signer;
