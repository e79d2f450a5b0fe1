//! Nonce management for reliable transaction submission
//!
//! Handles:
//! - Local nonce sequencing so an approval and its action never collide
//! - Release of a nonce whose send failed
//! - Dropping a broadcast nonce nobody waits on any more
//! - Resync with the chain after "nonce too low"

use crate::chain::ChainProvider;
use crate::error::{TransferError, TransferResult};

use dashmap::DashMap;
use ethers::prelude::*;
use ethers::types::{Address, BlockNumber};
use std::collections::BTreeSet;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Per-chain nonce state
#[derive(Debug, Default)]
struct ChainNonceState {
    /// Next nonce to hand out
    current: u64,
    /// Nonces handed out and not yet confirmed or released
    pending: BTreeSet<u64>,
}

impl ChainNonceState {
    fn allocate(&mut self) -> u64 {
        let nonce = self.current;
        self.current += 1;
        self.pending.insert(nonce);
        nonce
    }

    fn release(&mut self, nonce: u64) {
        self.pending.remove(&nonce);
        // only the most recent nonce can be reused without leaving a gap
        if nonce + 1 == self.current {
            self.current = nonce;
        }
    }

    fn confirm(&mut self, nonce: u64) {
        self.pending.remove(&nonce);
    }

    fn sync(&mut self, on_chain: u64) {
        self.pending.retain(|n| *n >= on_chain);
        if self.current < on_chain {
            self.current = on_chain;
        }
    }
}

/// Manages nonces for one wallet across chains
#[derive(Debug)]
pub struct NonceManager {
    wallet_address: Address,
    chain_state: DashMap<u64, Mutex<ChainNonceState>>,
}

impl NonceManager {
    pub fn new(wallet_address: Address) -> Self {
        Self {
            wallet_address,
            chain_state: DashMap::new(),
        }
    }

    /// Initialize nonce for a chain from its pending transaction count
    pub async fn init_chain(&self, provider: &ChainProvider) -> TransferResult<()> {
        let chain_id = provider.chain_id();
        let on_chain_nonce = self.fetch_nonce(provider).await?;

        self.chain_state.insert(
            chain_id,
            Mutex::new(ChainNonceState {
                current: on_chain_nonce,
                pending: BTreeSet::new(),
            }),
        );
        debug!("Initialized nonce for chain {}: {}", chain_id, on_chain_nonce);

        Ok(())
    }

    /// Get the next nonce for a chain, initializing it on first use
    pub async fn get_nonce(&self, provider: &ChainProvider) -> TransferResult<u64> {
        let chain_id = provider.chain_id();
        if !self.chain_state.contains_key(&chain_id) {
            self.init_chain(provider).await?;
        }

        let state = self.state(chain_id)?;
        let nonce = state.lock().await.allocate();

        debug!("Allocated nonce {} for chain {}", nonce, chain_id);
        Ok(nonce)
    }

    /// The transaction using `nonce` was mined
    pub async fn confirm_nonce(&self, chain_id: u64, nonce: u64) -> TransferResult<()> {
        self.state(chain_id)?.lock().await.confirm(nonce);
        Ok(())
    }

    /// The transaction using `nonce` never reached the mempool
    pub async fn release_nonce(&self, chain_id: u64, nonce: u64) -> TransferResult<()> {
        self.state(chain_id)?.lock().await.release(nonce);
        debug!("Released nonce {} on chain {}", nonce, chain_id);
        Ok(())
    }

    /// Stop tracking a broadcast nonce whose inclusion is no longer awaited.
    ///
    /// Unlike `release_nonce` this never rewinds, since the transaction may still land.
    pub async fn forget_nonce(&self, chain_id: u64, nonce: u64) -> TransferResult<()> {
        self.state(chain_id)?.lock().await.confirm(nonce);
        warn!(
            "Stopped tracking nonce {} on chain {}, its transaction may still land",
            nonce, chain_id
        );
        Ok(())
    }

    /// Sync nonces with on-chain state
    pub async fn sync(&self, provider: &ChainProvider) -> TransferResult<()> {
        let chain_id = provider.chain_id();
        let on_chain_nonce = self.fetch_nonce(provider).await?;

        let state = self.state(chain_id)?;
        let mut state = state.lock().await;
        if state.current != on_chain_nonce {
            warn!(
                "Nonce drift on chain {}: local {}, chain {}",
                chain_id, state.current, on_chain_nonce
            );
        }
        state.sync(on_chain_nonce);

        Ok(())
    }

    pub async fn pending_count(&self, chain_id: u64) -> usize {
        match self.chain_state.get(&chain_id) {
            Some(state) => state.lock().await.pending.len(),
            None => 0,
        }
    }

    fn state(
        &self,
        chain_id: u64,
    ) -> TransferResult<dashmap::mapref::one::Ref<'_, u64, Mutex<ChainNonceState>>> {
        self.chain_state.get(&chain_id).ok_or(TransferError::Nonce {
            chain_id,
            message: "Chain not initialized".to_string(),
        })
    }

    /// Fetch nonce from chain, counting transactions still in the mempool
    async fn fetch_nonce(&self, provider: &ChainProvider) -> TransferResult<u64> {
        let nonce = provider
            .http()
            .get_transaction_count(self.wallet_address, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| TransferError::Nonce {
                chain_id: provider.chain_id(),
                message: e.to_string(),
            })?;

        Ok(nonce.as_u64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_sequential() {
        let mut state = ChainNonceState {
            current: 5,
            ..Default::default()
        };
        assert_eq!(state.allocate(), 5);
        assert_eq!(state.allocate(), 6);
        assert_eq!(state.pending.len(), 2);
    }

    #[test]
    fn test_release_reuses_only_latest() {
        let mut state = ChainNonceState::default();
        let first = state.allocate();
        let second = state.allocate();

        state.release(first);
        assert_eq!(state.current, 2);

        state.release(second);
        assert_eq!(state.current, 1);
        assert_eq!(state.allocate(), 1);
    }

    #[test]
    fn test_sync_moves_forward_and_drops_mined() {
        let mut state = ChainNonceState::default();
        state.allocate();
        state.allocate();
        state.confirm(0);

        state.sync(4);
        assert_eq!(state.current, 4);
        assert!(state.pending.is_empty());

        state.sync(2);
        assert_eq!(state.current, 4);
    }

    #[tokio::test]
    async fn test_forget_keeps_sequence() {
        let manager = NonceManager::new(Address::zero());
        manager.chain_state.insert(
            7000,
            Mutex::new(ChainNonceState {
                current: 3,
                ..Default::default()
            }),
        );
        let nonce = manager.state(7000).unwrap().lock().await.allocate();
        assert_eq!(manager.pending_count(7000).await, 1);

        manager.forget_nonce(7000, nonce).await.unwrap();
        assert_eq!(manager.pending_count(7000).await, 0);
        assert_eq!(manager.state(7000).unwrap().lock().await.current, 4);
    }

    #[tokio::test]
    async fn test_uninitialized_chain_is_an_error() {
        let manager = NonceManager::new(Address::zero());
        let err = manager.release_nonce(8453, 0).await.unwrap_err();
        assert!(matches!(err, TransferError::Nonce { chain_id: 8453, .. }));
        assert_eq!(manager.pending_count(8453).await, 0);
    }
}
