//! Calldata for the pool, gateway, withdrawer and ERC-20 contracts

use crate::error::{TransferError, TransferResult};

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::id;

const APPROVE: &str = "approve(address,uint256)";
const ALLOWANCE: &str = "allowance(address,address)";
const ADD_LIQUIDITY: &str = "add_liquidity(uint256[],uint256,address)";
const REMOVE_LIQUIDITY_ONE_COIN: &str = "remove_liquidity_one_coin(uint256,int128,uint256,address)";
const CALC_WITHDRAW_ONE_COIN: &str = "calc_withdraw_one_coin(uint256,int128)";
const GET_VIRTUAL_PRICE: &str = "get_virtual_price()";
const POOL_BALANCES: &str = "balances(uint256)";
const BALANCE_OF: &str = "balanceOf(address)";
const DEPOSIT_AND_CALL: &str =
    "depositAndCall(address,uint256,address,bytes,(address,bool,address,bytes,uint256))";
const WITHDRAW_TO_CHAIN: &str = "withdrawToChain(uint256,bytes,uint256,uint256,uint256)";

/// Where a failed cross-chain deposit sends the funds back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertOptions {
    pub revert_address: Address,
    pub call_on_revert: bool,
    pub abort_address: Address,
    pub revert_message: Bytes,
    pub on_revert_gas_limit: U256,
}

impl RevertOptions {
    /// Refund to `sender` without a revert callback
    pub fn refund_to(sender: Address, on_revert_gas_limit: u64) -> Self {
        Self {
            revert_address: sender,
            call_on_revert: false,
            abort_address: sender,
            revert_message: Bytes::default(),
            on_revert_gas_limit: U256::from(on_revert_gas_limit),
        }
    }

    fn into_token(self) -> Token {
        Token::Tuple(vec![
            Token::Address(self.revert_address),
            Token::Bool(self.call_on_revert),
            Token::Address(self.abort_address),
            Token::Bytes(self.revert_message.to_vec()),
            Token::Uint(self.on_revert_gas_limit),
        ])
    }
}

/// A state-changing contract call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    Approve {
        spender: Address,
        amount: U256,
    },
    /// Pool: deposit coins, mint LP
    AddLiquidity {
        amounts: Vec<U256>,
        min_mint_amount: U256,
        receiver: Address,
    },
    /// Pool: burn LP for a single coin
    RemoveLiquidityOneCoin {
        burn_amount: U256,
        index: u8,
        min_received: U256,
        receiver: Address,
    },
    /// Gateway on an external chain
    DepositAndCall {
        receiver: Address,
        amount: U256,
        asset: Address,
        payload: Bytes,
        revert_options: RevertOptions,
    },
    /// Hub withdrawer
    WithdrawToChain {
        target_chain_id: u64,
        recipient: Address,
        amount: U256,
        min_amount_out: U256,
        max_swap_amount: U256,
    },
}

impl ContractCall {
    /// Pool deposit of `amount` at `index` out of `pool_size` coins
    pub fn add_liquidity(
        pool_size: usize,
        index: u8,
        amount: U256,
        min_mint_amount: U256,
        receiver: Address,
    ) -> TransferResult<Self> {
        let slot = usize::from(index);
        if slot >= pool_size {
            return Err(TransferError::Config(format!(
                "pool index {} out of range for {} coins",
                index, pool_size
            )));
        }
        let mut amounts = vec![U256::zero(); pool_size];
        amounts[slot] = amount;

        Ok(ContractCall::AddLiquidity {
            amounts,
            min_mint_amount,
            receiver,
        })
    }

    pub fn signature(&self) -> &'static str {
        match self {
            ContractCall::Approve { .. } => APPROVE,
            ContractCall::AddLiquidity { .. } => ADD_LIQUIDITY,
            ContractCall::RemoveLiquidityOneCoin { .. } => REMOVE_LIQUIDITY_ONE_COIN,
            ContractCall::DepositAndCall { .. } => DEPOSIT_AND_CALL,
            ContractCall::WithdrawToChain { .. } => WITHDRAW_TO_CHAIN,
        }
    }

    /// Function name without the argument list
    pub fn name(&self) -> &'static str {
        let signature = self.signature();
        signature.split('(').next().unwrap_or(signature)
    }

    pub fn encode(&self) -> Bytes {
        let tokens = match self.clone() {
            ContractCall::Approve { spender, amount } => {
                vec![Token::Address(spender), Token::Uint(amount)]
            }
            ContractCall::AddLiquidity {
                amounts,
                min_mint_amount,
                receiver,
            } => vec![
                Token::Array(amounts.into_iter().map(Token::Uint).collect()),
                Token::Uint(min_mint_amount),
                Token::Address(receiver),
            ],
            ContractCall::RemoveLiquidityOneCoin {
                burn_amount,
                index,
                min_received,
                receiver,
            } => vec![
                Token::Uint(burn_amount),
                Token::Int(U256::from(index)),
                Token::Uint(min_received),
                Token::Address(receiver),
            ],
            ContractCall::DepositAndCall {
                receiver,
                amount,
                asset,
                payload,
                revert_options,
            } => vec![
                Token::Address(receiver),
                Token::Uint(amount),
                Token::Address(asset),
                Token::Bytes(payload.to_vec()),
                revert_options.into_token(),
            ],
            ContractCall::WithdrawToChain {
                target_chain_id,
                recipient,
                amount,
                min_amount_out,
                max_swap_amount,
            } => vec![
                Token::Uint(U256::from(target_chain_id)),
                Token::Bytes(encode_address(recipient).to_vec()),
                Token::Uint(amount),
                Token::Uint(min_amount_out),
                Token::Uint(max_swap_amount),
            ],
        };

        with_selector(self.signature(), &tokens)
    }
}

fn with_selector(signature: &str, tokens: &[Token]) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend(abi::encode(tokens));
    data.into()
}

/// `abi.encode(address)`, the payload both the converter and the withdrawer expect
pub fn encode_address(address: Address) -> Bytes {
    abi::encode(&[Token::Address(address)]).into()
}

pub fn encode_allowance(owner: Address, spender: Address) -> Bytes {
    with_selector(ALLOWANCE, &[Token::Address(owner), Token::Address(spender)])
}

pub fn encode_calc_withdraw_one_coin(burn_amount: U256, index: u8) -> Bytes {
    with_selector(
        CALC_WITHDRAW_ONE_COIN,
        &[Token::Uint(burn_amount), Token::Int(U256::from(index))],
    )
}

/// LP value in underlying coins, 18 decimals
pub fn encode_virtual_price() -> Bytes {
    with_selector(GET_VIRTUAL_PRICE, &[])
}

/// Pool reserve of the coin at `index`
pub fn encode_pool_balance(index: u8) -> Bytes {
    with_selector(POOL_BALANCES, &[Token::Uint(U256::from(index))])
}

pub fn encode_balance_of(owner: Address) -> Bytes {
    with_selector(BALANCE_OF, &[Token::Address(owner)])
}

/// Decode a single `uint256` return value
pub fn decode_uint(data: &[u8]) -> TransferResult<U256> {
    let mut tokens = abi::decode(&[ParamType::Uint(256)], data)
        .map_err(|e| TransferError::Contract(format!("undecodable uint256 return: {}", e)))?;

    match tokens.pop() {
        Some(Token::Uint(value)) => Ok(value),
        other => Err(TransferError::Contract(format!(
            "unexpected return value {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn word(data: &[u8], n: usize) -> &[u8] {
        &data[4 + 32 * n..4 + 32 * (n + 1)]
    }

    #[test]
    fn test_known_selectors() {
        let approve = ContractCall::Approve {
            spender: addr(1),
            amount: U256::one(),
        };
        assert_eq!(&approve.encode()[..4], &[0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(&encode_allowance(addr(1), addr(2))[..4], &[0xdd, 0x62, 0xed, 0x3e]);
        assert_eq!(approve.name(), "approve");
    }

    #[test]
    fn test_read_calls() {
        let price = encode_virtual_price();
        assert_eq!(price.as_ref(), &[0xbb, 0x7b, 0x8b, 0x80]);

        let balance = encode_pool_balance(3);
        assert_eq!(&balance[..4], &[0x49, 0x03, 0xb0, 0xd1]);
        assert_eq!(U256::from_big_endian(word(&balance, 0)), U256::from(3u64));

        let owned = encode_balance_of(addr(0xcd));
        assert_eq!(&owned[..4], &[0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(&word(&owned, 0)[12..], addr(0xcd).as_bytes());
    }

    #[test]
    fn test_add_liquidity_places_amount_at_index() {
        let call = ContractCall::add_liquidity(4, 2, U256::from(500u64), U256::from(7u64), addr(9)).unwrap();
        match &call {
            ContractCall::AddLiquidity { amounts, .. } => {
                assert_eq!(amounts, &vec![U256::zero(), U256::zero(), U256::from(500u64), U256::zero()]);
            }
            other => panic!("unexpected {:?}", other),
        }

        let decoded = abi::decode(
            &[
                ParamType::Array(Box::new(ParamType::Uint(256))),
                ParamType::Uint(256),
                ParamType::Address,
            ],
            &call.encode()[4..],
        )
        .unwrap();
        assert_eq!(decoded[1], Token::Uint(U256::from(7u64)));
        assert_eq!(decoded[2], Token::Address(addr(9)));

        assert!(ContractCall::add_liquidity(4, 4, U256::one(), U256::zero(), addr(9)).is_err());
    }

    #[test]
    fn test_remove_liquidity_index_is_signed_word() {
        let call = ContractCall::RemoveLiquidityOneCoin {
            burn_amount: U256::from(10u64),
            index: 3,
            min_received: U256::from(9u64),
            receiver: addr(4),
        };
        let data = call.encode();
        assert_eq!(data.len(), 4 + 32 * 4);
        assert_eq!(U256::from_big_endian(word(&data, 1)), U256::from(3u64));
        assert_eq!(U256::from_big_endian(word(&data, 2)), U256::from(9u64));
    }

    #[test]
    fn test_withdraw_recipient_is_abi_encoded_bytes() {
        let call = ContractCall::WithdrawToChain {
            target_chain_id: 8453,
            recipient: addr(0xaa),
            amount: U256::from(100u64),
            min_amount_out: U256::from(80u64),
            max_swap_amount: U256::from(10u64),
        };
        let decoded = abi::decode(
            &[
                ParamType::Uint(256),
                ParamType::Bytes,
                ParamType::Uint(256),
                ParamType::Uint(256),
                ParamType::Uint(256),
            ],
            &call.encode()[4..],
        )
        .unwrap();

        assert_eq!(decoded[0], Token::Uint(U256::from(8453u64)));
        assert_eq!(decoded[1], Token::Bytes(encode_address(addr(0xaa)).to_vec()));
        assert_eq!(decoded[3], Token::Uint(U256::from(80u64)));
        assert_eq!(decoded[4], Token::Uint(U256::from(10u64)));
    }

    #[test]
    fn test_deposit_and_call_round_trips_revert_options() {
        let sender = addr(0x11);
        let call = ContractCall::DepositAndCall {
            receiver: addr(0x22),
            amount: U256::from(1_000_000u64),
            asset: addr(0x33),
            payload: encode_address(addr(0x44)),
            revert_options: RevertOptions::refund_to(sender, 100_000),
        };
        let decoded = abi::decode(
            &[
                ParamType::Address,
                ParamType::Uint(256),
                ParamType::Address,
                ParamType::Bytes,
                ParamType::Tuple(vec![
                    ParamType::Address,
                    ParamType::Bool,
                    ParamType::Address,
                    ParamType::Bytes,
                    ParamType::Uint(256),
                ]),
            ],
            &call.encode()[4..],
        )
        .unwrap();

        assert_eq!(
            decoded[4],
            Token::Tuple(vec![
                Token::Address(sender),
                Token::Bool(false),
                Token::Address(sender),
                Token::Bytes(vec![]),
                Token::Uint(U256::from(100_000u64)),
            ])
        );
    }

    #[test]
    fn test_decode_uint() {
        let encoded = abi::encode(&[Token::Uint(U256::from(500u64))]);
        assert_eq!(decode_uint(&encoded).unwrap(), U256::from(500u64));
        assert!(matches!(decode_uint(&[1, 2, 3]), Err(TransferError::Contract(_))));
    }
}
