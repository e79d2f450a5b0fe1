//! Waiting for a sent transaction to be included and confirmed
//!
//! A receipt only counts once the chain head is `confirmation_blocks` deep past
//! it (the including block is the first confirmation). A receipt that vanishes
//! after being seen was reorged out, and the wait starts over.

use crate::chain::ChainProvider;
use crate::error::TransferResult;

use ethers::types::{TransactionReceipt, H256, U64};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A transaction that made it into a block with enough confirmations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InclusionReceipt {
    pub tx_hash: H256,
    pub block_number: u64,
    /// `false` when the transaction reverted
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Pending,
    Confirming { block: u64, confirmations: u64 },
    Done(InclusionReceipt),
}

/// Where one receipt stands relative to the chain head
fn assess(receipt: Option<&TransactionReceipt>, head: u64, required: u64) -> Progress {
    let Some(receipt) = receipt else {
        return Progress::Pending;
    };
    let Some(block) = receipt.block_number.map(|b| b.as_u64()) else {
        return Progress::Pending;
    };

    let success = receipt.status == Some(U64::from(1));
    let confirmations = head.saturating_sub(block) + 1;

    // a revert cannot become a success by waiting
    if !success || confirmations >= required {
        return Progress::Done(InclusionReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: block,
            success,
        });
    }

    Progress::Confirming {
        block,
        confirmations,
    }
}

/// Polls one chain for receipts
pub struct InclusionWatcher {
    chain_id: u64,
    confirmation_blocks: u64,
    provider: Arc<ChainProvider>,
    poll_interval: Duration,
}

impl InclusionWatcher {
    pub fn new(provider: Arc<ChainProvider>, poll_interval: Duration) -> Self {
        Self {
            chain_id: provider.chain_id(),
            confirmation_blocks: provider.confirmation_blocks().max(1),
            provider,
            poll_interval,
        }
    }

    /// Wait until `tx_hash` is confirmed or known to have reverted.
    ///
    /// Transient RPC errors are retried; callers bound the wait with a timeout.
    pub async fn wait(&self, tx_hash: H256) -> TransferResult<InclusionReceipt> {
        let started = Instant::now();
        let mut seen_in: Option<u64> = None;

        loop {
            match self.poll(tx_hash).await {
                Ok(Progress::Done(receipt)) => {
                    info!(
                        "Transaction {:?} included on chain {} in block {} (success: {})",
                        tx_hash, self.chain_id, receipt.block_number, receipt.success
                    );
                    crate::metrics::record_inclusion_latency(
                        self.chain_id,
                        started.elapsed().as_secs_f64(),
                    );
                    return Ok(receipt);
                }
                Ok(Progress::Confirming {
                    block,
                    confirmations,
                }) => {
                    seen_in = Some(block);
                    debug!(
                        "Transaction {:?} has {} / {} confirmations on chain {}",
                        tx_hash, confirmations, self.confirmation_blocks, self.chain_id
                    );
                }
                Ok(Progress::Pending) => {
                    if let Some(block) = seen_in.take() {
                        warn!(
                            "Reorg detected: tx {:?} no longer in block {} on chain {}",
                            tx_hash, block, self.chain_id
                        );
                    }
                }
                Err(e) if e.is_retryable() => {
                    warn!("Receipt lookup for {:?} failed, retrying: {}", tx_hash, e);
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn poll(&self, tx_hash: H256) -> TransferResult<Progress> {
        let receipt = self.provider.get_transaction_receipt(tx_hash).await?;
        if receipt.is_none() {
            return Ok(Progress::Pending);
        }
        let head = self.provider.get_block_number().await?;
        Ok(assess(receipt.as_ref(), head, self.confirmation_blocks))
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}
