//! Gas limit and fee estimation with safety buffers

use crate::chain::{ChainProvider, GasPrice};
use crate::error::TransferResult;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::U256;
use tracing::debug;

/// Buffered gas limits and fees
#[derive(Debug, Clone)]
pub struct GasEstimator {
    gas_limit_buffer_percent: u64,
    fee_buffer_percent: u64,
}

impl GasEstimator {
    pub fn new(gas_limit_buffer_percent: u64) -> Self {
        Self {
            gas_limit_buffer_percent,
            fee_buffer_percent: 10,
        }
    }

    /// `eth_estimateGas` plus the configured buffer
    pub async fn estimate_gas_limit(
        &self,
        provider: &ChainProvider,
        tx: &TypedTransaction,
    ) -> TransferResult<U256> {
        let estimate = provider.estimate_gas(tx).await?;
        let limit = self.buffer_limit(estimate);
        debug!(
            "Gas limit for chain {}: {} (estimate {})",
            provider.chain_id(),
            limit,
            estimate
        );
        Ok(limit)
    }

    /// Node fee quote plus the fee buffer
    pub async fn get_gas_price(&self, provider: &ChainProvider) -> TransferResult<GasPrice> {
        let gas_price = self.buffer_price(provider.get_gas_price().await?);
        debug!("Gas price for chain {}: {:?}", provider.chain_id(), gas_price);
        Ok(gas_price)
    }

    fn buffer_limit(&self, estimate: U256) -> U256 {
        estimate + estimate * self.gas_limit_buffer_percent / 100
    }

    fn buffer_price(&self, gas_price: GasPrice) -> GasPrice {
        let pct = self.fee_buffer_percent;
        match gas_price {
            GasPrice::Legacy(price) => GasPrice::Legacy(price + price * pct / 100),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => GasPrice::Eip1559 {
                max_fee_per_gas: max_fee_per_gas + max_fee_per_gas * pct / 100,
                max_priority_fee_per_gas: max_priority_fee_per_gas
                    + max_priority_fee_per_gas * pct / 100,
            },
        }
    }

    /// Most the sender can be charged, in wei
    pub fn calculate_cost(gas_limit: U256, gas_price: &GasPrice) -> U256 {
        match gas_price {
            GasPrice::Legacy(price) => gas_limit * *price,
            GasPrice::Eip1559 { max_fee_per_gas, .. } => gas_limit * *max_fee_per_gas,
        }
    }
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::new(20)
    }
}
