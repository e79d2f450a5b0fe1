//! Transaction submission: calldata, signing, nonce sequencing and gas

mod calls;
mod gas;
mod nonce;
mod signer;

pub use calls::{
    decode_uint, encode_address, encode_allowance, encode_balance_of, encode_calc_withdraw_one_coin,
    encode_pool_balance, encode_virtual_price, ContractCall, RevertOptions,
};
pub use gas::GasEstimator;
pub use nonce::NonceManager;
pub use signer::{load_wallet, EvmSigner, Signer};

#[cfg(test)]
pub use signer::MockSigner;
