//! Maps a validated action onto the contracts and tokens that carry it out

use crate::action::{ActionKind, ValidAction};
use crate::config::{HubConfig, PoolTokenConfig, Settings, TokenConfig};
use crate::error::ValidationError;
use crate::settlement::LegRoute;

use ethers::types::Address;
use std::collections::HashMap;

/// A token the wallet spends or receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRef {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
}

impl From<&TokenConfig> for TokenRef {
    fn from(token: &TokenConfig) -> Self {
        Self {
            symbol: token.symbol.clone(),
            address: token.address,
            decimals: token.decimals,
        }
    }
}

impl From<&PoolTokenConfig> for TokenRef {
    fn from(token: &PoolTokenConfig) -> Self {
        Self {
            symbol: token.symbol.clone(),
            address: token.address,
            decimals: token.decimals,
        }
    }
}

/// Kind-specific contract parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePlan {
    Convert {
        pool_size: usize,
        index: u8,
    },
    Redeem {
        index: u8,
    },
    Deposit {
        /// Hub contract receiving the deposit and minting the LP token
        converter: Address,
    },
    Withdraw {
        target_chain_id: u64,
    },
}

/// Everything needed to submit one action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub kind: ActionKind,
    /// Chain the action transaction is sent on
    pub chain_id: u64,
    /// Token spent by the action
    pub source: TokenRef,
    /// Token the bounds are denominated in
    pub output: TokenRef,
    /// Contract the action calls, also the approval spender
    pub contract: Address,
    pub plan: RoutePlan,
    /// `None` when inclusion on the origin chain is the settlement
    pub settlement: Option<LegRoute>,
}

#[derive(Debug, Clone)]
struct ExternalChain {
    gateway: Address,
    usdc: TokenRef,
}

/// Resolves actions against the configured hub, pool and external chains
#[derive(Debug, Clone)]
pub struct RouteTable {
    hub: HubConfig,
    chains: HashMap<u64, ExternalChain>,
}

fn same_symbol(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

impl RouteTable {
    pub fn from_settings(settings: &Settings) -> Self {
        let chains = settings
            .enabled_chains()
            .into_iter()
            .map(|(_, chain)| {
                (
                    chain.chain_id,
                    ExternalChain {
                        gateway: chain.gateway_address,
                        usdc: TokenRef::from(&chain.usdc),
                    },
                )
            })
            .collect();

        Self {
            hub: settings.hub.clone(),
            chains,
        }
    }

    fn lp_token(&self) -> TokenRef {
        TokenRef::from(&self.hub.lp_token)
    }

    fn pool_token(&self, symbol: &str) -> Option<&PoolTokenConfig> {
        self.hub
            .pool_tokens
            .iter()
            .find(|t| same_symbol(&t.symbol, symbol))
    }

    fn require_hub_origin(&self, action: &ValidAction) -> Result<(), ValidationError> {
        if action.origin_chain() != self.hub.chain_id {
            return Err(ValidationError::new(
                "origin_chain",
                format!(
                    "{} runs on the hub chain {}, not {}",
                    action.kind(),
                    self.hub.chain_id,
                    action.origin_chain()
                ),
            ));
        }
        Ok(())
    }

    fn require_lp_source(&self, action: &ValidAction) -> Result<TokenRef, ValidationError> {
        let lp = self.lp_token();
        if !same_symbol(action.source_token(), &lp.symbol) {
            return Err(ValidationError::new(
                "source_token",
                format!("{} spends {}, not {}", action.kind(), lp.symbol, action.source_token()),
            ));
        }
        Ok(lp)
    }

    pub fn resolve(&self, action: &ValidAction) -> Result<Route, ValidationError> {
        match action.kind() {
            ActionKind::Convert => self.resolve_convert(action),
            ActionKind::Redeem => self.resolve_redeem(action),
            ActionKind::Deposit => self.resolve_deposit(action),
            ActionKind::Withdraw => self.resolve_withdraw(action),
        }
    }

    fn resolve_convert(&self, action: &ValidAction) -> Result<Route, ValidationError> {
        self.require_hub_origin(action)?;

        let source = self.pool_token(action.source_token()).ok_or_else(|| {
            ValidationError::new(
                "source_token",
                format!("{} is not held by the pool", action.source_token()),
            )
        })?;

        let lp = self.lp_token();
        let target = action.target_token().unwrap_or_default();
        if !same_symbol(target, &lp.symbol) {
            return Err(ValidationError::new(
                "destination",
                format!("convert mints {}, not {}", lp.symbol, target),
            ));
        }

        Ok(Route {
            kind: ActionKind::Convert,
            chain_id: self.hub.chain_id,
            source: TokenRef::from(source),
            output: lp,
            contract: self.hub.pool_address,
            plan: RoutePlan::Convert {
                pool_size: self.hub.pool_tokens.len(),
                index: source.index,
            },
            settlement: None,
        })
    }

    fn resolve_redeem(&self, action: &ValidAction) -> Result<Route, ValidationError> {
        self.require_hub_origin(action)?;
        let lp = self.require_lp_source(action)?;

        let target = action.target_token().unwrap_or_default();
        let output = self.pool_token(target).ok_or_else(|| {
            ValidationError::new("destination", format!("{} is not held by the pool", target))
        })?;

        Ok(Route {
            kind: ActionKind::Redeem,
            chain_id: self.hub.chain_id,
            source: lp,
            output: TokenRef::from(output),
            contract: self.hub.pool_address,
            plan: RoutePlan::Redeem {
                index: output.index,
            },
            settlement: None,
        })
    }

    fn resolve_deposit(&self, action: &ValidAction) -> Result<Route, ValidationError> {
        let chain = self.chains.get(&action.origin_chain()).ok_or_else(|| {
            ValidationError::new(
                "origin_chain",
                format!("chain {} is not an enabled external chain", action.origin_chain()),
            )
        })?;

        if !same_symbol(action.source_token(), &chain.usdc.symbol) {
            return Err(ValidationError::new(
                "source_token",
                format!(
                    "deposits from chain {} spend {}, not {}",
                    action.origin_chain(),
                    chain.usdc.symbol,
                    action.source_token()
                ),
            ));
        }

        if action.target_chain() != Some(self.hub.chain_id) {
            return Err(ValidationError::new(
                "destination",
                format!("deposits land on the hub chain {}", self.hub.chain_id),
            ));
        }

        Ok(Route {
            kind: ActionKind::Deposit,
            chain_id: action.origin_chain(),
            source: chain.usdc.clone(),
            output: self.lp_token(),
            contract: chain.gateway,
            plan: RoutePlan::Deposit {
                converter: self.hub.converter_address,
            },
            settlement: Some(LegRoute::IntoHub),
        })
    }

    fn resolve_withdraw(&self, action: &ValidAction) -> Result<Route, ValidationError> {
        self.require_hub_origin(action)?;
        let lp = self.require_lp_source(action)?;

        let target_chain_id = action.target_chain().unwrap_or_default();
        if !self.chains.contains_key(&target_chain_id) {
            return Err(ValidationError::new(
                "destination",
                format!("chain {} is not an enabled external chain", target_chain_id),
            ));
        }

        // the withdrawer swaps LP into the pool token bridged from the target chain
        let output = self
            .hub
            .pool_tokens
            .iter()
            .find(|t| t.source_chain_id == Some(target_chain_id))
            .ok_or_else(|| {
                ValidationError::new(
                    "destination",
                    format!("no pool token is bridged from chain {}", target_chain_id),
                )
            })?;

        Ok(Route {
            kind: ActionKind::Withdraw,
            chain_id: self.hub.chain_id,
            source: lp,
            output: TokenRef::from(output),
            contract: self.hub.withdrawer_address,
            plan: RoutePlan::Withdraw { target_chain_id },
            settlement: Some(LegRoute::OutOfHub),
        })
    }
}
