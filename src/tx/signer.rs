//! The wallet collaborator: reads allowances and quotes, signs and sends
//! transactions, and waits for them to land

use super::calls::{decode_uint, encode_allowance, encode_calc_withdraw_one_coin, ContractCall};
use super::gas::GasEstimator;
use super::nonce::NonceManager;
use crate::chain::{ChainProvider, GasPrice, InclusionReceipt, InclusionWatcher};
use crate::error::{TransferError, TransferResult};

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer as WalletSigner};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Upper bound on one `eth_sendRawTransaction` round trip
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// A wallet connected to exactly one chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Signer: Send + Sync {
    /// Chain this signer is connected to
    fn chain_id(&self) -> u64;

    fn address(&self) -> Address;

    /// ERC-20 allowance of this wallet towards `spender`
    async fn get_allowance(&self, token: Address, spender: Address) -> TransferResult<U256>;

    /// Broadcast `approve(spender, amount)` and return its hash without waiting
    async fn send_approval(&self, token: Address, spender: Address, amount: U256) -> TransferResult<H256>;

    /// Broadcast `call` to `contract` and return its hash without waiting
    async fn send_action(&self, contract: Address, call: ContractCall) -> TransferResult<H256>;

    /// Resolves once the transaction is confirmed or known to have reverted
    async fn await_inclusion(&self, tx_hash: H256) -> TransferResult<InclusionReceipt>;

    /// Pool quote for burning `burn_amount` LP into the coin at `index`
    async fn quote_remove_one_coin(&self, pool: Address, burn_amount: U256, index: u8) -> TransferResult<U256>;
}

/// Load the signing key from the named environment variable
pub fn load_wallet(private_key_env: &str) -> TransferResult<LocalWallet> {
    let key = std::env::var(private_key_env).map_err(|_| {
        TransferError::Wallet(format!("No wallet configured. Set {}", private_key_env))
    })?;

    key.trim()
        .trim_start_matches("0x")
        .parse::<LocalWallet>()
        .map_err(|e| TransferError::Wallet(format!("Invalid private key: {}", e)))
}

/// A sent transaction's nonce, forgotten if the wait for it is abandoned
struct PendingNonce {
    nonce_manager: Arc<NonceManager>,
    chain_id: u64,
    nonce: Option<u64>,
}

impl PendingNonce {
    async fn confirm(mut self) -> TransferResult<()> {
        match self.nonce.take() {
            Some(nonce) => self.nonce_manager.confirm_nonce(self.chain_id, nonce).await,
            None => Ok(()),
        }
    }
}

impl Drop for PendingNonce {
    fn drop(&mut self) {
        let Some(nonce) = self.nonce.take() else {
            return;
        };
        let nonce_manager = self.nonce_manager.clone();
        let chain_id = self.chain_id;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = nonce_manager.forget_nonce(chain_id, nonce).await {
                        warn!("Could not forget nonce {} on chain {}: {}", nonce, chain_id, e);
                    }
                });
            }
            Err(_) => warn!("Nonce {} on chain {} left pending without a runtime", nonce, chain_id),
        }
    }
}

/// Signs locally and sends raw transactions through a `ChainProvider`
pub struct EvmSigner {
    wallet: LocalWallet,
    provider: Arc<ChainProvider>,
    watcher: Arc<InclusionWatcher>,
    nonce_manager: Arc<NonceManager>,
    gas_estimator: GasEstimator,
    /// Sent transactions whose nonce is still pending
    in_flight: DashMap<H256, u64>,
}

impl EvmSigner {
    pub fn new(
        wallet: LocalWallet,
        provider: Arc<ChainProvider>,
        watcher: Arc<InclusionWatcher>,
        nonce_manager: Arc<NonceManager>,
        gas_estimator: GasEstimator,
    ) -> Self {
        let wallet = wallet.with_chain_id(provider.chain_id());
        info!(
            "Signer {:?} connected to chain {} ({})",
            wallet.address(),
            provider.chain_id(),
            provider.name()
        );

        Self {
            wallet,
            provider,
            watcher,
            nonce_manager,
            gas_estimator,
            in_flight: DashMap::new(),
        }
    }

    /// Sign and broadcast `data` to `to`, sequencing the nonce locally
    async fn send(&self, to: Address, data: Bytes, label: &str) -> TransferResult<H256> {
        let chain_id = self.provider.chain_id();
        let nonce = self.nonce_manager.get_nonce(&self.provider).await?;

        match self.sign_and_send(to, data, nonce).await {
            Ok(tx_hash) => {
                info!(
                    "{} sent on chain {}: {:?} (nonce {})",
                    label, chain_id, tx_hash, nonce
                );
                self.in_flight.insert(tx_hash, nonce);
                debug!(
                    "{} nonces pending on chain {}",
                    self.nonce_manager.pending_count(chain_id).await,
                    chain_id
                );
                Ok(tx_hash)
            }
            Err(e) => {
                self.nonce_manager.release_nonce(chain_id, nonce).await?;
                if matches!(e, TransferError::Nonce { .. }) {
                    warn!("Nonce too low on chain {}, syncing", chain_id);
                    self.nonce_manager.sync(&self.provider).await?;
                }
                Err(e)
            }
        }
    }

    async fn sign_and_send(&self, to: Address, data: Bytes, nonce: u64) -> TransferResult<H256> {
        let chain_id = self.provider.chain_id();
        let (mut tx, fee) = self.build_tx(to, data, nonce).await?;

        let gas_limit = self.gas_estimator.estimate_gas_limit(&self.provider, &tx).await?;
        tx.set_gas(gas_limit);
        debug!(
            "Nonce {} on chain {} costs at most {} wei",
            nonce,
            chain_id,
            GasEstimator::calculate_cost(gas_limit, &fee)
        );

        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| TransferError::Wallet(e.to_string()))?;
        let raw = tx.rlp_signed(&signature);

        let result = timeout(SEND_TIMEOUT, self.provider.http().send_raw_transaction(raw)).await;

        match result {
            Ok(Ok(pending_tx)) => Ok(pending_tx.tx_hash()),
            Ok(Err(e)) => {
                let error_msg = e.to_string();
                if error_msg.contains("nonce too low") {
                    Err(TransferError::Nonce {
                        chain_id,
                        message: error_msg,
                    })
                } else {
                    Err(TransferError::Contract(error_msg))
                }
            }
            Err(_) => Err(TransferError::Timeout {
                operation: "send transaction".to_string(),
            }),
        }
    }

    async fn build_tx(
        &self,
        to: Address,
        data: Bytes,
        nonce: u64,
    ) -> TransferResult<(TypedTransaction, GasPrice)> {
        let chain_id = self.provider.chain_id();
        let from = self.wallet.address();
        let fee = self.gas_estimator.get_gas_price(&self.provider).await?;

        let tx = match fee.clone() {
            GasPrice::Legacy(price) => TypedTransaction::Legacy(
                TransactionRequest::new()
                    .from(from)
                    .to(to)
                    .data(data)
                    .nonce(nonce)
                    .gas_price(price)
                    .chain_id(chain_id),
            ),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => TypedTransaction::Eip1559(
                Eip1559TransactionRequest::new()
                    .from(from)
                    .to(to)
                    .data(data)
                    .nonce(nonce)
                    .max_fee_per_gas(max_fee_per_gas)
                    .max_priority_fee_per_gas(max_priority_fee_per_gas)
                    .chain_id(chain_id),
            ),
        };

        Ok((tx, fee))
    }
}

#[async_trait]
impl Signer for EvmSigner {
    fn chain_id(&self) -> u64 {
        self.provider.chain_id()
    }

    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn get_allowance(&self, token: Address, spender: Address) -> TransferResult<U256> {
        let data = self
            .provider
            .call(token, encode_allowance(self.wallet.address(), spender))
            .await?;
        let allowance = decode_uint(&data)?;
        debug!(
            "Allowance of {:?} on token {:?} for {:?}: {}",
            self.wallet.address(),
            token,
            spender,
            allowance
        );
        Ok(allowance)
    }

    async fn send_approval(&self, token: Address, spender: Address, amount: U256) -> TransferResult<H256> {
        let call = ContractCall::Approve { spender, amount };
        self.send(token, call.encode(), "approve").await
    }

    async fn send_action(&self, contract: Address, call: ContractCall) -> TransferResult<H256> {
        self.send(contract, call.encode(), call.name()).await
    }

    async fn await_inclusion(&self, tx_hash: H256) -> TransferResult<InclusionReceipt> {
        // taken out up front so a cancelled or failed wait cannot leave it behind
        let pending = self.in_flight.remove(&tx_hash).map(|(_, nonce)| PendingNonce {
            nonce_manager: self.nonce_manager.clone(),
            chain_id: self.provider.chain_id(),
            nonce: Some(nonce),
        });

        let receipt = self.watcher.wait(tx_hash).await?;
        if let Some(pending) = pending {
            pending.confirm().await?;
        }
        Ok(receipt)
    }

    async fn quote_remove_one_coin(&self, pool: Address, burn_amount: U256, index: u8) -> TransferResult<U256> {
        let data = self
            .provider
            .call(pool, encode_calc_withdraw_one_coin(burn_amount, index))
            .await?;
        decode_uint(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // well-known development key
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_load_wallet_from_env() {
        std::env::set_var("HUBROUTE_TEST_SIGNER_KEY", DEV_KEY);
        let wallet = load_wallet("HUBROUTE_TEST_SIGNER_KEY").unwrap();
        assert_eq!(
            format!("{:?}", wallet.address()),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[test]
    fn test_load_wallet_errors() {
        let missing = load_wallet("HUBROUTE_TEST_SIGNER_KEY_UNSET").unwrap_err();
        assert!(missing.to_string().contains("HUBROUTE_TEST_SIGNER_KEY_UNSET"));

        std::env::set_var("HUBROUTE_TEST_SIGNER_KEY_BAD", "not-a-key");
        let bad = load_wallet("HUBROUTE_TEST_SIGNER_KEY_BAD").unwrap_err();
        assert!(matches!(bad, TransferError::Wallet(_)));
    }

    fn unreachable_signer() -> EvmSigner {
        let provider = Arc::new(
            ChainProvider::new(8453, "Base", &["http://127.0.0.1:1".to_string()], 1).unwrap(),
        );
        let watcher = Arc::new(InclusionWatcher::new(provider.clone(), Duration::from_secs(1)));
        let wallet: LocalWallet = DEV_KEY.parse().unwrap();
        let nonces = Arc::new(NonceManager::new(wallet.address()));

        EvmSigner::new(wallet, provider, watcher, nonces, GasEstimator::default())
    }

    #[tokio::test]
    async fn test_signer_binds_wallet_to_chain() {
        let signer = unreachable_signer();
        assert_eq!(Signer::chain_id(&signer), 8453);
        assert_eq!(signer.wallet.chain_id(), 8453);
    }

    #[tokio::test]
    async fn test_abandoned_wait_releases_in_flight_entry() {
        let signer = unreachable_signer();
        let tx_hash = H256::repeat_byte(0x42);
        signer.in_flight.insert(tx_hash, 7);

        let waited = timeout(Duration::from_millis(50), signer.await_inclusion(tx_hash)).await;

        assert!(!matches!(waited, Ok(Ok(_))));
        assert!(signer.in_flight.is_empty());
    }
}
