//! Read-only views of the hub pool and of a wallet's hub token balances

use crate::amount::{from_base_units, rescale, BPS_DENOMINATOR};
use crate::chain::ChainProvider;
use crate::config::HubConfig;
use crate::error::{TransferError, TransferResult};
use crate::tx::{decode_uint, encode_balance_of, encode_pool_balance, encode_virtual_price};

use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256, U512};
use futures::future::{join_all, try_join_all};
use serde::Serialize;
use tracing::{debug, warn};

/// Precision of the virtual price and of normalized pool balances
const NORMALIZED_DECIMALS: u8 = 18;

/// Anything that can answer an `eth_call`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContractReader: Send + Sync {
    async fn call(&self, to: Address, data: Bytes) -> TransferResult<Bytes>;
}

#[async_trait]
impl ContractReader for ChainProvider {
    async fn call(&self, to: Address, data: Bytes) -> TransferResult<Bytes> {
        ChainProvider::call(self, to, data).await
    }
}

/// One coin held by the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolAsset {
    pub symbol: String,
    pub index: u8,
    #[serde(skip)]
    pub raw_balance: U256,
    pub balance: String,
    /// Share of total pool liquidity, floored
    pub share_bps: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub pool: Address,
    pub virtual_price: String,
    pub total_liquidity: String,
    pub assets: Vec<PoolAsset>,
}

/// A wallet's holding of one hub token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenBalance {
    pub symbol: String,
    pub token: Address,
    #[serde(skip)]
    pub raw: U256,
    pub balance: String,
    /// Set when the read failed; the balance then shows zero
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Read the pool's virtual price and every coin reserve.
///
/// Any failed read fails the snapshot, since the shares would be wrong.
pub async fn read_pool(reader: &dyn ContractReader, hub: &HubConfig) -> TransferResult<PoolSnapshot> {
    let pool = hub.pool_address;

    let virtual_price = decode_uint(&reader.call(pool, encode_virtual_price()).await?)?;
    let balances = try_join_all(hub.pool_tokens.iter().map(|token| async move {
        let data = reader.call(pool, encode_pool_balance(token.index)).await?;
        decode_uint(&data)
    }))
    .await?;

    let mut normalized = Vec::with_capacity(balances.len());
    let mut total = U256::zero();
    for (token, balance) in hub.pool_tokens.iter().zip(&balances) {
        let value = rescale(*balance, token.decimals, NORMALIZED_DECIMALS)?;
        total = total
            .checked_add(value)
            .ok_or_else(|| TransferError::Contract("pool balances overflow 256 bits".to_string()))?;
        normalized.push(value);
    }

    let mut assets: Vec<PoolAsset> = hub
        .pool_tokens
        .iter()
        .zip(balances)
        .zip(normalized)
        .map(|((token, raw_balance), value)| PoolAsset {
            symbol: token.symbol.clone(),
            index: token.index,
            raw_balance,
            balance: from_base_units(raw_balance, token.decimals),
            share_bps: share_bps(value, total),
        })
        .collect();
    assets.sort_by_key(|asset| asset.index);

    debug!(
        "Pool {:?}: virtual price {}, {} coins",
        pool,
        virtual_price,
        assets.len()
    );

    Ok(PoolSnapshot {
        pool,
        virtual_price: from_base_units(virtual_price, NORMALIZED_DECIMALS),
        total_liquidity: from_base_units(total, NORMALIZED_DECIMALS),
        assets,
    })
}

/// Read `owner`'s LP and pool token balances.
///
/// A token whose read fails is reported at zero with its error; non-zero
/// holdings sort first, then by symbol.
pub async fn read_wallet_balances(
    reader: &dyn ContractReader,
    hub: &HubConfig,
    owner: Address,
) -> Vec<TokenBalance> {
    let tokens = std::iter::once((&hub.lp_token.symbol, hub.lp_token.address, hub.lp_token.decimals)).chain(
        hub.pool_tokens
            .iter()
            .map(|t| (&t.symbol, t.address, t.decimals)),
    );

    let mut balances = join_all(tokens.map(|(symbol, token, decimals)| async move {
        let read = match reader.call(token, encode_balance_of(owner)).await {
            Ok(data) => decode_uint(&data),
            Err(e) => Err(e),
        };
        match read {
            Ok(raw) => TokenBalance {
                symbol: symbol.clone(),
                token,
                raw,
                balance: from_base_units(raw, decimals),
                error: None,
            },
            Err(e) => {
                warn!("Balance of {} for {:?} unavailable: {}", symbol, owner, e);
                TokenBalance {
                    symbol: symbol.clone(),
                    token,
                    raw: U256::zero(),
                    balance: "0".to_string(),
                    error: Some(e.to_string()),
                }
            }
        }
    }))
    .await;

    balances.sort_by(|a, b| {
        a.raw
            .is_zero()
            .cmp(&b.raw.is_zero())
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    balances
}

fn share_bps(value: U256, total: U256) -> u32 {
    if total.is_zero() {
        return 0;
    }
    let share = value.full_mul(U256::from(BPS_DENOMINATOR)) / U512::from(total);
    share.low_u32()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_settings;

    use mockall::predicate::eq;

    fn returns(value: u64) -> TransferResult<Bytes> {
        Ok(ethers::abi::encode(&[ethers::abi::Token::Uint(U256::from(value))]).into())
    }

    fn units(value: u64, zeros: usize) -> U256 {
        U256::from(value) * U256::exp10(zeros)
    }

    #[tokio::test]
    async fn test_pool_snapshot_normalizes_reserves() {
        let mut hub = test_settings().hub;
        hub.pool_tokens[1].decimals = 9;
        let pool = hub.pool_address;

        let mut reader = MockContractReader::new();
        reader
            .expect_call()
            .with(eq(pool), eq(encode_virtual_price()))
            .times(1)
            .returning(|_, _| Ok(ethers::abi::encode(&[ethers::abi::Token::Uint(units(1_002, 15))]).into()));
        // 300 ARB, 100 SOL at 9 decimals, 100 BASE, 0 AVAX
        for (index, balance) in [(0u8, 300_000_000u64), (1, 100_000_000_000), (2, 100_000_000), (3, 0)] {
            reader
                .expect_call()
                .with(eq(pool), eq(encode_pool_balance(index)))
                .times(1)
                .returning(move |_, _| returns(balance));
        }

        let snapshot = read_pool(&reader, &hub).await.unwrap();

        assert_eq!(snapshot.virtual_price, "1.002");
        assert_eq!(snapshot.total_liquidity, "500");
        let shares: Vec<_> = snapshot.assets.iter().map(|a| (a.symbol.as_str(), a.share_bps)).collect();
        assert_eq!(
            shares,
            vec![("USDC.ARB", 6_000), ("USDC.SOL", 2_000), ("USDC.BASE", 2_000), ("USDC.AVAX", 0)]
        );
        assert_eq!(snapshot.assets[1].balance, "100");
        assert_eq!(snapshot.assets[1].raw_balance, U256::from(100_000_000_000u64));
    }

    #[tokio::test]
    async fn test_empty_pool_has_no_shares() {
        let hub = test_settings().hub;
        let mut reader = MockContractReader::new();
        reader.expect_call().returning(|_, _| returns(0));

        let snapshot = read_pool(&reader, &hub).await.unwrap();
        assert_eq!(snapshot.total_liquidity, "0");
        assert!(snapshot.assets.iter().all(|a| a.share_bps == 0));
    }

    #[tokio::test]
    async fn test_failed_reserve_read_fails_snapshot() {
        let hub = test_settings().hub;
        let mut reader = MockContractReader::new();
        reader.expect_call().returning(|_, data| {
            if data == encode_pool_balance(2) {
                Err(TransferError::Contract("execution reverted".to_string()))
            } else {
                returns(1)
            }
        });

        assert!(matches!(read_pool(&reader, &hub).await, Err(TransferError::Contract(_))));
    }

    #[tokio::test]
    async fn test_wallet_balances_sort_and_keep_errors() {
        let hub = test_settings().hub;
        let owner = Address::repeat_byte(0x77);
        let lp = hub.lp_token.address;
        let arb = hub.pool_tokens[0].address;
        let avax = hub.pool_tokens[3].address;

        let mut reader = MockContractReader::new();
        reader
            .expect_call()
            .withf(move |_, data| *data == encode_balance_of(owner))
            .times(5)
            .returning(move |token, _| {
                if token == lp {
                    Ok(ethers::abi::encode(&[ethers::abi::Token::Uint(units(25, 17))]).into())
                } else if token == arb {
                    returns(1_500_000)
                } else if token == avax {
                    Err(TransferError::Contract("eth_call failed".to_string()))
                } else {
                    returns(0)
                }
            });

        let balances = read_wallet_balances(&reader, &hub, owner).await;

        let order: Vec<_> = balances.iter().map(|b| b.symbol.as_str()).collect();
        assert_eq!(order, vec!["USDC.4", "USDC.ARB", "USDC.AVAX", "USDC.BASE", "USDC.SOL"]);
        assert_eq!(balances[0].balance, "2.5");
        assert_eq!(balances[1].balance, "1.5");
        assert_eq!(balances[2].balance, "0");
        assert!(balances[2].error.as_deref().unwrap().contains("eth_call failed"));
        assert!(balances[3].error.is_none());
    }

    #[test]
    fn test_share_bps_floors() {
        assert_eq!(share_bps(U256::one(), U256::from(3u64)), 3_333);
        assert_eq!(share_bps(U256::MAX, U256::MAX), 10_000);
        assert_eq!(share_bps(U256::one(), U256::zero()), 0);
    }
}
