//! HTTP access to one chain through an ordered list of RPC endpoints

use crate::error::{TransferError, TransferResult};

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

/// RPC endpoints for one chain; requests rotate to the next endpoint on failure
#[derive(Debug)]
pub struct ChainProvider {
    chain_id: u64,
    name: String,
    confirmation_blocks: u64,
    endpoints: Vec<Provider<Http>>,
    active: AtomicUsize,
}

impl ChainProvider {
    /// Fails only when none of `rpc_urls` parses
    pub fn new(
        chain_id: u64,
        name: &str,
        rpc_urls: &[String],
        confirmation_blocks: u64,
    ) -> TransferResult<Self> {
        let endpoints: Vec<Provider<Http>> = rpc_urls
            .iter()
            .filter_map(|url| match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    debug!("Chain {} endpoint {}", chain_id, url);
                    Some(provider.interval(Duration::from_millis(500)))
                }
                Err(e) => {
                    warn!("Skipping RPC url {} for chain {}: {}", url, chain_id, e);
                    None
                }
            })
            .collect();

        if endpoints.is_empty() {
            return Err(TransferError::ChainConnection {
                chain_id,
                message: format!("none of {} RPC urls is usable", rpc_urls.len()),
            });
        }

        Ok(Self {
            chain_id,
            name: name.to_string(),
            confirmation_blocks,
            endpoints,
            active: AtomicUsize::new(0),
        })
    }

    /// Endpoint requests currently go to
    pub fn http(&self) -> &Provider<Http> {
        &self.endpoints[self.active.load(Ordering::Relaxed) % self.endpoints.len()]
    }

    pub fn failover(&self) {
        let count = self.endpoints.len();
        if count < 2 {
            return;
        }
        let next = (self.active.load(Ordering::Relaxed) + 1) % count;
        self.active.store(next, Ordering::Relaxed);
        warn!("Chain {} switching to RPC endpoint {}", self.chain_id, next);
    }

    /// Run `op` against each provider in turn until one answers
    async fn with_failover<T, F, Fut>(&self, what: &str, op: F) -> TransferResult<T>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = String::new();

        for _ in 0..self.endpoints.len() {
            match op(self.http().clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("{} failed on chain {}: {}", what, self.chain_id, e);
                    last_error = e.to_string();
                    self.failover();
                }
            }
        }

        Err(TransferError::ChainConnection {
            chain_id: self.chain_id,
            message: format!("{}: all providers failed, last error: {}", what, last_error),
        })
    }

    /// Latest block height
    pub async fn get_block_number(&self) -> TransferResult<u64> {
        self.with_failover("eth_blockNumber", |p| async move {
            p.get_block_number().await.map(|b| b.as_u64())
        })
        .await
    }

    pub async fn get_transaction_receipt(&self, tx_hash: H256) -> TransferResult<Option<TransactionReceipt>> {
        self.with_failover("eth_getTransactionReceipt", |p| async move {
            p.get_transaction_receipt(tx_hash).await
        })
        .await
    }

    /// Read-only contract call against the latest block
    pub async fn call(&self, to: Address, data: Bytes) -> TransferResult<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();

        // a revert is an answer, not a transport failure
        self.http()
            .call(&tx, None)
            .await
            .map_err(|e| TransferError::Contract(format!("eth_call to {:?}: {}", to, e)))
    }

    pub async fn estimate_gas(&self, tx: &TypedTransaction) -> TransferResult<U256> {
        self.http()
            .estimate_gas(tx, None)
            .await
            .map_err(|e| TransferError::Contract(format!("gas estimation: {}", e)))
    }

    /// Current fee quote, EIP-1559 where the chain supports it
    pub async fn get_gas_price(&self) -> TransferResult<GasPrice> {
        match self.http().estimate_eip1559_fees(None).await {
            Ok((max_fee_per_gas, max_priority_fee_per_gas)) => Ok(GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            }),
            Err(e) => {
                debug!(
                    "EIP-1559 fee estimation unavailable on chain {} ({}), using legacy price",
                    self.chain_id, e
                );
                let price = self
                    .with_failover("eth_gasPrice", |p| async move { p.get_gas_price().await })
                    .await?;
                Ok(GasPrice::Legacy(price))
            }
        }
    }

    /// Whether any endpoint answers `eth_blockNumber`
    pub async fn health_check(&self) -> bool {
        let healthy = self.get_block_number().await;
        if let Err(e) = &healthy {
            error!("Chain {} ({}) is unreachable: {}", self.chain_id, self.name, e);
        }
        healthy.is_ok()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn confirmation_blocks(&self) -> u64 {
        self.confirmation_blocks
    }
}

/// Fee quote for a new transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_a_valid_url() {
        let err = ChainProvider::new(8453, "Base", &["not a url".to_string()], 1).unwrap_err();
        assert!(matches!(err, TransferError::ChainConnection { chain_id: 8453, .. }));
    }

    #[test]
    fn test_failover_rotates() {
        let urls = vec![
            "http://127.0.0.1:1".to_string(),
            "http://127.0.0.1:2".to_string(),
        ];
        let provider = ChainProvider::new(7000, "zetachain", &urls, 1).unwrap();
        assert_eq!(provider.active.load(Ordering::Relaxed), 0);
        provider.failover();
        assert_eq!(provider.active.load(Ordering::Relaxed), 1);
        provider.failover();
        assert_eq!(provider.active.load(Ordering::Relaxed), 0);
    }
}
