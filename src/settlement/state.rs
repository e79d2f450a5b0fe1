//! Canonical settlement status and the per-transfer record

use super::indexer::SettlementQueryResult;

use chrono::{DateTime, Utc};
use ethers::types::H256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Progress of one transfer. Ordered by progress, not by time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementState {
    Submitted,
    Confirming,
    Processing,
    Settled,
    Failed,
}

impl SettlementState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SettlementState::Settled | SettlementState::Failed)
    }

    fn progress(&self) -> u8 {
        match self {
            SettlementState::Submitted => 0,
            SettlementState::Confirming => 1,
            SettlementState::Processing => 2,
            SettlementState::Settled => 3,
            SettlementState::Failed => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementState::Submitted => "submitted",
            SettlementState::Confirming => "confirming",
            SettlementState::Processing => "processing",
            SettlementState::Settled => "settled",
            SettlementState::Failed => "failed",
        }
    }
}

impl fmt::Display for SettlementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the outbound leg of a cross-chain transfer executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegRoute {
    /// External chain -> hub. The outbound leg is the hub transaction.
    IntoHub,
    /// Hub -> external chain. The origin transaction is the hub transaction.
    OutOfHub,
}

/// Everything known about one tracked transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementRecord {
    pub origin_tx_id: H256,
    pub state: SettlementState,
    pub hub_tx_id: Option<String>,
    pub destination_tx_id: Option<String>,
    /// Raw cross-chain status last reported by the indexer
    pub indexer_status: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub poll_count: u64,
    pub terminal: bool,
}

impl SettlementRecord {
    pub fn new(origin_tx_id: H256, route: LegRoute) -> Self {
        let hub_tx_id = match route {
            LegRoute::OutOfHub => Some(format!("{:?}", origin_tx_id)),
            LegRoute::IntoHub => None,
        };

        Self {
            origin_tx_id,
            state: SettlementState::Submitted,
            hub_tx_id,
            destination_tx_id: None,
            indexer_status: None,
            failure_reason: None,
            created_at: Utc::now(),
            last_polled_at: None,
            poll_count: 0,
            terminal: false,
        }
    }

    /// A single-chain action whose inclusion is its settlement
    pub fn settled_locally(origin_tx_id: H256) -> Self {
        let mut record = Self::new(origin_tx_id, LegRoute::OutOfHub);
        record.state = SettlementState::Settled;
        record.terminal = true;
        record
    }

    /// The origin transaction reverted or never made it into a block
    pub fn failed(origin_tx_id: H256, reason: impl Into<String>) -> Self {
        let mut record = Self::new(origin_tx_id, LegRoute::IntoHub);
        record.hub_tx_id = None;
        record.state = SettlementState::Failed;
        record.failure_reason = Some(reason.into());
        record.terminal = true;
        record
    }

    pub(crate) fn note_poll(&mut self, at: DateTime<Utc>) {
        if self.terminal {
            return;
        }
        self.poll_count += 1;
        self.last_polled_at = Some(at);
    }

    /// Fold one indexer answer into the record. Returns whether anything a caller
    /// would see changed.
    ///
    /// States only move forward and ids are never cleared, so a lagging indexer
    /// replica cannot make the transfer look less advanced than already observed.
    pub(crate) fn observe(&mut self, result: Option<&SettlementQueryResult>, route: LegRoute) -> bool {
        if self.terminal {
            return false;
        }
        let Some(result) = result else {
            return false;
        };

        let mut changed = false;

        if self.indexer_status.as_deref() != Some(result.status.as_str()) {
            self.indexer_status = Some(result.status.clone());
            changed = true;
        }

        if let Some(hash) = result.outbound_hash() {
            let slot = match route {
                LegRoute::IntoHub => &mut self.hub_tx_id,
                LegRoute::OutOfHub => &mut self.destination_tx_id,
            };
            if slot.is_none() {
                *slot = Some(hash.to_string());
                changed = true;
            }
        }

        if let Some(next) = result.settlement_state() {
            if next.progress() > self.state.progress() {
                self.state = next;
                self.terminal = next.is_terminal();
                changed = true;
            }
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::indexer::OutboundLeg;

    fn result(status: &str, finalization: &str, hash: Option<&str>) -> SettlementQueryResult {
        SettlementQueryResult {
            cctx_index: "0xabc".to_string(),
            status: status.to_string(),
            status_message: String::new(),
            outbound_legs: vec![OutboundLeg {
                hash: hash.map(str::to_string),
                finalization_status: finalization.to_string(),
                receiver_chain_id: Some(8453),
            }],
        }
    }

    #[test]
    fn test_no_record_leaves_state_alone() {
        let mut record = SettlementRecord::new(H256::repeat_byte(1), LegRoute::IntoHub);
        assert!(!record.observe(None, LegRoute::IntoHub));
        assert_eq!(record.state, SettlementState::Submitted);
        assert!(!record.terminal);
    }

    #[test]
    fn test_progression_and_ids() {
        let origin = H256::repeat_byte(2);
        let mut record = SettlementRecord::new(origin, LegRoute::OutOfHub);
        assert_eq!(record.hub_tx_id, Some(format!("{:?}", origin)));

        assert!(record.observe(Some(&result("PendingOutbound", "NotFinalized", None)), LegRoute::OutOfHub));
        assert_eq!(record.state, SettlementState::Confirming);

        assert!(record.observe(Some(&result("PendingOutbound", "Executed", Some("0xdest"))), LegRoute::OutOfHub));
        assert_eq!(record.state, SettlementState::Processing);
        assert_eq!(record.destination_tx_id.as_deref(), Some("0xdest"));

        assert!(record.observe(Some(&result("OutboundMined", "Executed", Some("0xdest"))), LegRoute::OutOfHub));
        assert_eq!(record.state, SettlementState::Settled);
        assert!(record.terminal);
    }

    #[test]
    fn test_state_never_regresses() {
        let mut record = SettlementRecord::new(H256::repeat_byte(3), LegRoute::IntoHub);
        record.observe(Some(&result("PendingOutbound", "Executed", Some("0xhub"))), LegRoute::IntoHub);
        assert_eq!(record.state, SettlementState::Processing);

        let changed = record.observe(Some(&result("PendingOutbound", "NotFinalized", None)), LegRoute::IntoHub);
        assert!(!changed);
        assert_eq!(record.state, SettlementState::Processing);
        assert_eq!(record.hub_tx_id.as_deref(), Some("0xhub"));
    }

    #[test]
    fn test_terminal_record_is_absorbing() {
        let mut record = SettlementRecord::new(H256::repeat_byte(4), LegRoute::IntoHub);
        record.observe(Some(&result("OutboundMined", "Executed", Some("0xhub"))), LegRoute::IntoHub);
        let frozen = record.clone();

        record.note_poll(Utc::now());
        assert!(!record.observe(Some(&result("Aborted", "NotFinalized", Some("0xother"))), LegRoute::IntoHub));
        assert_eq!(record, frozen);
    }

    #[test]
    fn test_failed_record() {
        let record = SettlementRecord::failed(H256::repeat_byte(5), "reverted");
        assert_eq!(record.state, SettlementState::Failed);
        assert!(record.terminal);
        assert_eq!(record.failure_reason.as_deref(), Some("reverted"));
    }
}
