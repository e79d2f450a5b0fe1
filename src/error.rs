//! Error types for hub-routed transfers

use crate::settlement::SettlementState;

use ethers::types::H256;
use thiserror::Error;

/// A rejected transfer request. Nothing has been submitted to any chain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Which transaction of an `execute` call failed to land
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStage {
    Approval,
    Action,
}

impl std::fmt::Display for SubmissionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionStage::Approval => f.write_str("approval"),
            SubmissionStage::Action => f.write_str("action"),
        }
    }
}

/// Main error type for transfer orchestration
#[derive(Error, Debug)]
pub enum TransferError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Invalid amount {amount:?}: {reason}")]
    InvalidAmount { amount: String, reason: String },

    #[error("Invalid slippage {bps} bps, expected a value in [0, 10000)")]
    InvalidSlippage { bps: u32 },

    #[error("{stage} transaction failed{}: {reason}", .tx_hash.map(|h| format!(" ({:?})", h)).unwrap_or_default())]
    SubmissionFailed {
        stage: SubmissionStage,
        tx_hash: Option<H256>,
        reason: String,
    },

    #[error("Indexer unavailable: {0}")]
    IndexerUnavailable(String),

    #[error("Outcome unknown for origin tx {origin_tx:?}; re-query it later")]
    UnknownOutcome { origin_tx: H256 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("Chain {chain_id} not found")]
    ChainNotFound { chain_id: u64 },

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Nonce error for chain {chain_id}: {message}")]
    Nonce { chain_id: u64, message: String },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransferError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        TransferError::Validation(ValidationError::new(field, reason))
    }

    /// Check if the failed operation may be retried as-is.
    ///
    /// Submissions are never retried automatically; that decision belongs to the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::ChainConnection { .. }
                | TransferError::Timeout { .. }
                | TransferError::IndexerUnavailable(_)
        )
    }

    /// Whether value may already have left the user's account
    pub fn funds_moved(&self) -> bool {
        match self {
            TransferError::SubmissionFailed { stage, tx_hash, .. } => {
                *stage == SubmissionStage::Action && tx_hash.is_some()
            }
            TransferError::UnknownOutcome { .. } => true,
            _ => false,
        }
    }

    /// Terminal status a caller should display for this error, if any
    pub fn settlement_state(&self) -> Option<SettlementState> {
        match self {
            TransferError::SubmissionFailed { .. } => Some(SettlementState::Failed),
            _ => None,
        }
    }
}

/// Result type for transfer operations
pub type TransferResult<T> = Result<T, TransferError>;
