//! Cross-chain transaction indexer: the collaborator trait and its HTTP client

use super::state::SettlementState;
use crate::config::IndexerConfig;
use crate::error::{TransferError, TransferResult};

use async_trait::async_trait;
use ethers::types::H256;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Indexer status once the outbound leg is mined on its destination chain
pub const STATUS_OUTBOUND_MINED: &str = "OutboundMined";
/// Outbound finalization flag for a leg that executed but is not yet mined
pub const FINALIZATION_EXECUTED: &str = "Executed";

/// One outbound leg as reported by the indexer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundLeg {
    pub hash: Option<String>,
    pub finalization_status: String,
    pub receiver_chain_id: Option<u64>,
}

impl OutboundLeg {
    pub fn is_executed(&self) -> bool {
        self.finalization_status == FINALIZATION_EXECUTED
    }
}

/// What the indexer knows about a transfer keyed by its origin transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementQueryResult {
    pub cctx_index: String,
    pub status: String,
    pub status_message: String,
    pub outbound_legs: Vec<OutboundLeg>,
}

impl SettlementQueryResult {
    /// Canonical state implied by this answer, or `None` while no outbound leg exists
    pub fn settlement_state(&self) -> Option<SettlementState> {
        let leg = self.outbound_legs.first()?;

        if self.status == STATUS_OUTBOUND_MINED {
            Some(SettlementState::Settled)
        } else if leg.is_executed() {
            Some(SettlementState::Processing)
        } else {
            Some(SettlementState::Confirming)
        }
    }

    /// Hash of the first outbound leg, once the indexer has one
    pub fn outbound_hash(&self) -> Option<&str> {
        self.outbound_legs.first().and_then(|leg| leg.hash.as_deref())
    }
}

/// Looks up cross-chain settlement by origin transaction
#[async_trait]
pub trait Indexer: Send + Sync {
    /// `Ok(None)` while the origin transaction is not indexed yet
    async fn lookup_by_origin_tx(&self, origin_tx: H256) -> TransferResult<Option<SettlementQueryResult>>;
}

#[derive(Debug, Deserialize)]
struct CctxResponse {
    #[serde(rename = "CrossChainTxs", default)]
    cross_chain_txs: Vec<RawCctx>,
}

#[derive(Debug, Deserialize)]
struct RawCctx {
    #[serde(default)]
    index: String,
    cctx_status: RawCctxStatus,
    #[serde(default)]
    outbound_params: Vec<RawOutbound>,
}

#[derive(Debug, Deserialize)]
struct RawCctxStatus {
    status: String,
    #[serde(default)]
    status_message: String,
}

#[derive(Debug, Deserialize)]
struct RawOutbound {
    #[serde(default)]
    hash: String,
    #[serde(default)]
    tx_finalization_status: String,
    #[serde(rename = "receiver_chainId", default)]
    receiver_chain_id: String,
}

impl CctxResponse {
    fn into_result(self) -> Option<SettlementQueryResult> {
        let cctx = self.cross_chain_txs.into_iter().next()?;

        let outbound_legs = cctx
            .outbound_params
            .into_iter()
            .map(|leg| OutboundLeg {
                hash: Some(leg.hash).filter(|h| !h.is_empty()),
                finalization_status: leg.tx_finalization_status,
                receiver_chain_id: leg.receiver_chain_id.parse().ok(),
            })
            .collect();

        Some(SettlementQueryResult {
            cctx_index: cctx.index,
            status: cctx.cctx_status.status,
            status_message: cctx.cctx_status.status_message,
            outbound_legs,
        })
    }
}

/// Parse an `inboundHashToCctxData` body
pub fn parse_cctx_response(body: &str) -> TransferResult<Option<SettlementQueryResult>> {
    let response: CctxResponse = serde_json::from_str(body)
        .map_err(|e| TransferError::IndexerUnavailable(format!("malformed indexer response: {}", e)))?;
    Ok(response.into_result())
}

/// HTTP client for the hub chain's cross-chain transaction endpoint
#[derive(Debug, Clone)]
pub struct CctxIndexer {
    client: reqwest::Client,
    base_url: String,
}

impl CctxIndexer {
    pub fn new(config: &IndexerConfig) -> TransferResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| TransferError::Config(format!("indexer client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, origin_tx: H256) -> String {
        format!(
            "{}/zeta-chain/crosschain/inboundHashToCctxData/{:?}",
            self.base_url, origin_tx
        )
    }
}

#[async_trait]
impl Indexer for CctxIndexer {
    async fn lookup_by_origin_tx(&self, origin_tx: H256) -> TransferResult<Option<SettlementQueryResult>> {
        let url = self.url_for(origin_tx);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TransferError::IndexerUnavailable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("Indexer has no record for {:?} yet", origin_tx);
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransferError::IndexerUnavailable(format!(
                "{} from indexer: {}",
                status, body
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| TransferError::IndexerUnavailable(e.to_string()))?;

        parse_cctx_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINED: &str = r#"{
        "CrossChainTxs": [{
            "index": "0x6b1c1d0e4f0b5f0a1c0d",
            "cctx_status": {"status": "OutboundMined", "status_message": ""},
            "outbound_params": [{
                "receiver": "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed",
                "receiver_chainId": "8453",
                "hash": "0x9f2c0000000000000000000000000000000000000000000000000000000000aa",
                "tx_finalization_status": "Executed"
            }]
        }]
    }"#;

    #[test]
    fn test_parse_mined() {
        let result = parse_cctx_response(MINED).unwrap().unwrap();
        assert_eq!(result.status, "OutboundMined");
        assert_eq!(result.outbound_legs.len(), 1);
        assert_eq!(result.outbound_legs[0].receiver_chain_id, Some(8453));
        assert_eq!(result.settlement_state(), Some(SettlementState::Settled));
        assert!(result.outbound_hash().unwrap().starts_with("0x9f2c"));
    }

    #[test]
    fn test_parse_pending_without_hash() {
        let body = r#"{"CrossChainTxs":[{"index":"0x1","cctx_status":{"status":"PendingOutbound"},
            "outbound_params":[{"hash":"","tx_finalization_status":"NotFinalized","receiver_chainId":"7000"}]}]}"#;
        let result = parse_cctx_response(body).unwrap().unwrap();
        assert_eq!(result.outbound_hash(), None);
        assert_eq!(result.settlement_state(), Some(SettlementState::Confirming));
    }

    #[test]
    fn test_executed_leg_is_processing() {
        let body = r#"{"CrossChainTxs":[{"cctx_status":{"status":"PendingOutbound"},
            "outbound_params":[{"hash":"0x01","tx_finalization_status":"Executed"}]}]}"#;
        let result = parse_cctx_response(body).unwrap().unwrap();
        assert_eq!(result.settlement_state(), Some(SettlementState::Processing));
    }

    #[test]
    fn test_empty_answers_mean_no_record() {
        assert!(parse_cctx_response(r#"{"CrossChainTxs":[]}"#).unwrap().is_none());
        assert!(parse_cctx_response("{}").unwrap().is_none());

        let no_legs = r#"{"CrossChainTxs":[{"cctx_status":{"status":"PendingInbound"}}]}"#;
        let result = parse_cctx_response(no_legs).unwrap().unwrap();
        assert_eq!(result.settlement_state(), None);
    }

    #[test]
    fn test_malformed_body_is_unavailability() {
        let err = parse_cctx_response("<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, TransferError::IndexerUnavailable(_)));
    }

    #[test]
    fn test_url_uses_full_hash() {
        let indexer = CctxIndexer::new(&IndexerConfig {
            base_url: "https://indexer.example/lcd/v1/public/".to_string(),
            request_timeout_ms: 1_000,
        })
        .unwrap();
        let url = indexer.url_for(H256::repeat_byte(0x11));
        assert_eq!(
            url,
            format!(
                "https://indexer.example/lcd/v1/public/zeta-chain/crosschain/inboundHashToCctxData/0x{}",
                "11".repeat(32)
            )
        );
    }
}
