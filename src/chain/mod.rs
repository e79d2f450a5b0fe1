//! Chain module - RPC access to the hub and the external chains
//!
//! This module provides:
//! - Multi-RPC provider management with automatic failover
//! - Receipt and confirmation watching with reorg detection
//! - A registry of connections keyed by chain ID

pub mod inclusion;
pub mod provider;

pub use inclusion::{InclusionReceipt, InclusionWatcher};
pub use provider::{ChainProvider, GasPrice};

use crate::config::Settings;
use crate::error::{TransferError, TransferResult};

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Receipt polling cadence while waiting for inclusion
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Manages connections to the hub and every enabled external chain
pub struct ChainManager {
    /// Chain providers indexed by chain ID
    providers: DashMap<u64, Arc<ChainProvider>>,
    /// Inclusion watchers indexed by chain ID
    watchers: DashMap<u64, Arc<InclusionWatcher>>,
}

impl ChainManager {
    /// Create a chain manager for all configured chains
    pub fn new(settings: &Settings) -> TransferResult<Self> {
        let manager = Self {
            providers: DashMap::new(),
            watchers: DashMap::new(),
        };

        let hub = &settings.hub;
        manager.register(ChainProvider::new(
            hub.chain_id,
            &hub.name,
            &hub.rpc_urls,
            hub.confirmation_blocks,
        )?);

        for (name, chain_config) in settings.enabled_chains() {
            info!(
                "Initializing chain {} (ID: {})",
                name, chain_config.chain_id
            );
            manager.register(ChainProvider::new(
                chain_config.chain_id,
                &chain_config.name,
                &chain_config.rpc_urls,
                chain_config.confirmation_blocks,
            )?);
        }

        Ok(manager)
    }

    fn register(&self, provider: ChainProvider) {
        let chain_id = provider.chain_id();
        let provider = Arc::new(provider);
        let watcher = InclusionWatcher::new(provider.clone(), RECEIPT_POLL_INTERVAL);

        self.providers.insert(chain_id, provider);
        self.watchers.insert(chain_id, Arc::new(watcher));
    }

    /// Get provider for a specific chain
    pub fn get_provider(&self, chain_id: u64) -> TransferResult<Arc<ChainProvider>> {
        self.providers
            .get(&chain_id)
            .map(|p| p.clone())
            .ok_or(TransferError::ChainNotFound { chain_id })
    }

    /// Get the inclusion watcher for a specific chain
    pub fn get_inclusion_watcher(&self, chain_id: u64) -> TransferResult<Arc<InclusionWatcher>> {
        self.watchers
            .get(&chain_id)
            .map(|w| w.clone())
            .ok_or(TransferError::ChainNotFound { chain_id })
    }

    /// Health check for all chains
    pub async fn health_check(&self) -> Vec<(u64, bool)> {
        let providers: Vec<_> = self.providers.iter().map(|e| e.value().clone()).collect();
        let mut results = Vec::new();

        for provider in providers {
            let healthy = provider.health_check().await;
            results.push((provider.chain_id(), healthy));

            crate::metrics::record_chain_health(provider.chain_id(), healthy);
        }

        results
    }

    /// Get all connected chain IDs
    pub fn connected_chains(&self) -> Vec<u64> {
        let mut chains: Vec<u64> = self.providers.iter().map(|e| *e.key()).collect();
        chains.sort_unstable();
        chains
    }
}
