//! Transfer orchestration: bounds, approval, action, then settlement tracking

use super::routes::{Route, RoutePlan, RouteTable};
use crate::action::{ActionKind, TransferAction, ValidAction};
use crate::amount::{proportional_allocation, rescale, to_base_units, AmountBounds};
use crate::approval::needs_approval;
use crate::config::{OrchestratorConfig, Settings};
use crate::error::{SubmissionStage, TransferError, TransferResult, ValidationError};
use crate::settlement::{Indexer, LegRoute, SettlementHandle, SettlementRecord, SettlementTracker};
use crate::tx::{encode_address, ContractCall, RevertOptions, Signer};

use ethers::types::{Address, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// What one `execute` call did, plus the live settlement handle
pub struct Execution {
    pub kind: ActionKind,
    pub bounds: AmountBounds,
    /// `None` when the existing allowance already covered the amount
    pub approval_tx: Option<H256>,
    pub origin_tx: H256,
    pub handle: SettlementHandle,
}

/// Drives one action from bounds to a settlement handle
pub struct TransferOrchestrator {
    routes: RouteTable,
    tracker: SettlementTracker,
    inclusion_timeout: Duration,
    on_revert_gas_limit: u64,
}

impl TransferOrchestrator {
    pub fn new(routes: RouteTable, tracker: SettlementTracker, config: &OrchestratorConfig) -> Self {
        Self {
            routes,
            tracker,
            inclusion_timeout: config.inclusion_timeout(),
            on_revert_gas_limit: config.on_revert_gas_limit,
        }
    }

    pub fn from_settings(settings: &Settings, indexer: Arc<dyn Indexer>) -> Self {
        Self::new(
            RouteTable::from_settings(settings),
            SettlementTracker::new(indexer, settings.tracker.poll_interval()),
            &settings.orchestrator,
        )
    }

    /// Validate, then `execute`
    pub async fn submit(&self, action: TransferAction, signer: &dyn Signer) -> TransferResult<Execution> {
        let action = action.validate()?;
        self.execute(&action, signer).await
    }

    /// Run one transfer.
    ///
    /// `Err` means the action transaction was never broadcast, except for
    /// `UnknownOutcome`. Once it is broadcast the result is a handle, whose
    /// record is `Failed` if the transaction reverted or was not included in time.
    pub async fn execute(&self, action: &ValidAction, signer: &dyn Signer) -> TransferResult<Execution> {
        if signer.chain_id() != action.origin_chain() {
            return Err(ValidationError::new(
                "origin_chain",
                format!(
                    "signer is connected to chain {}, action starts on {}",
                    signer.chain_id(),
                    action.origin_chain()
                ),
            )
            .into());
        }

        let route = self.routes.resolve(action)?;
        let base_units = to_base_units(action.amount(), route.source.decimals)?;
        let local_output = self.local_expected_output(&route, action, base_units)?;

        let approval_tx = self.ensure_allowance(&route, base_units, signer).await?;

        // pool quotes are read only once the approval is mined so the bound matches the pool state
        let expected_output = match local_output {
            Some(output) => output,
            None => self.quote_redeem(&route, base_units, signer).await?,
        };
        let bounds = AmountBounds::new(base_units, expected_output, action.slippage_bps())?;
        let call = self.build_call(&route, action, &bounds, signer.address())?;

        info!(
            "Executing {} of {} {} on chain {} (min output {} {})",
            route.kind,
            action.amount(),
            route.source.symbol,
            route.chain_id,
            bounds.min_output,
            route.output.symbol
        );

        let origin_tx = signer
            .send_action(route.contract, call)
            .await
            .map_err(|e| submission_failed(SubmissionStage::Action, None, e.to_string()))?;
        crate::metrics::record_transfer_submitted(route.kind.name());

        let handle = match timeout(self.inclusion_timeout, signer.await_inclusion(origin_tx)).await {
            Ok(Ok(receipt)) if receipt.success => self.track_included(&route, origin_tx),
            Ok(Ok(receipt)) => {
                warn!("{} transaction {:?} reverted in block {}", route.kind, origin_tx, receipt.block_number);
                SettlementHandle::finished(SettlementRecord::failed(
                    origin_tx,
                    format!("reverted in block {}", receipt.block_number),
                ))
            }
            Ok(Err(e)) => {
                warn!("Lost track of broadcast {} transaction {:?}: {}", route.kind, origin_tx, e);
                return Err(TransferError::UnknownOutcome { origin_tx });
            }
            Err(_) => {
                warn!(
                    "{} transaction {:?} not included within {:?}",
                    route.kind, origin_tx, self.inclusion_timeout
                );
                SettlementHandle::finished(SettlementRecord::failed(
                    origin_tx,
                    format!("not included within {:?}", self.inclusion_timeout),
                ))
            }
        };

        Ok(Execution {
            kind: route.kind,
            bounds,
            approval_tx,
            origin_tx,
            handle,
        })
    }

    /// Re-attach to a cross-chain transfer by its origin transaction
    pub fn track(&self, origin_tx: H256, kind: ActionKind) -> TransferResult<SettlementHandle> {
        let leg = match kind {
            ActionKind::Deposit => LegRoute::IntoHub,
            ActionKind::Withdraw => LegRoute::OutOfHub,
            ActionKind::Convert | ActionKind::Redeem => {
                return Err(TransferError::validation(
                    "kind",
                    format!("{} settles on inclusion and has nothing to track", kind),
                ))
            }
        };
        Ok(self.tracker.start(origin_tx, leg))
    }

    fn track_included(&self, route: &Route, origin_tx: H256) -> SettlementHandle {
        match route.settlement {
            Some(leg) => self.tracker.start(origin_tx, leg),
            None => {
                info!("{} settled with {:?}", route.kind, origin_tx);
                crate::metrics::record_settlement(crate::settlement::SettlementState::Settled, 0.0);
                SettlementHandle::finished(SettlementRecord::settled_locally(origin_tx))
            }
        }
    }

    /// Expected output for routes that need no chain read; `None` for a redeem
    fn local_expected_output(
        &self,
        route: &Route,
        action: &ValidAction,
        base_units: U256,
    ) -> TransferResult<Option<U256>> {
        let output = match route.plan {
            RoutePlan::Convert { .. } | RoutePlan::Deposit { .. } => {
                rescale(base_units, route.source.decimals, route.output.decimals)?
            }
            RoutePlan::Redeem { .. } => return Ok(None),
            RoutePlan::Withdraw { .. } => {
                let reserve = proportional_allocation(base_units, action.gas_reserve_bps())?;
                rescale(base_units - reserve, route.source.decimals, route.output.decimals)?
            }
        };
        Ok(Some(output))
    }

    async fn quote_redeem(&self, route: &Route, base_units: U256, signer: &dyn Signer) -> TransferResult<U256> {
        let RoutePlan::Redeem { index } = route.plan else {
            return Err(TransferError::validation("kind", format!("{} has no pool quote", route.kind)));
        };
        let quote = signer
            .quote_remove_one_coin(route.contract, base_units, index)
            .await?;
        debug!("Pool quotes {} {} for {} LP", quote, route.output.symbol, base_units);
        Ok(quote)
    }

    fn build_call(
        &self,
        route: &Route,
        action: &ValidAction,
        bounds: &AmountBounds,
        sender: Address,
    ) -> TransferResult<ContractCall> {
        let call = match route.plan {
            RoutePlan::Convert { pool_size, index } => ContractCall::add_liquidity(
                pool_size,
                index,
                bounds.base_units,
                bounds.min_output,
                action.recipient(),
            )?,
            RoutePlan::Redeem { index } => ContractCall::RemoveLiquidityOneCoin {
                burn_amount: bounds.base_units,
                index,
                min_received: bounds.min_output,
                receiver: action.recipient(),
            },
            RoutePlan::Deposit { converter } => {
                // the gateway takes no output bound; min_output is informational here
                ContractCall::DepositAndCall {
                    receiver: converter,
                    amount: bounds.base_units,
                    asset: route.source.address,
                    payload: encode_address(action.recipient()),
                    revert_options: RevertOptions::refund_to(sender, self.on_revert_gas_limit),
                }
            }
            RoutePlan::Withdraw { target_chain_id } => ContractCall::WithdrawToChain {
                target_chain_id,
                recipient: action.recipient(),
                amount: bounds.base_units,
                min_amount_out: bounds.min_output,
                max_swap_amount: proportional_allocation(bounds.base_units, action.gas_reserve_bps())?,
            },
        };

        Ok(call)
    }

    /// Approve exactly `amount` when the allowance falls short, and wait for it
    async fn ensure_allowance(
        &self,
        route: &Route,
        amount: U256,
        signer: &dyn Signer,
    ) -> TransferResult<Option<H256>> {
        let token = route.source.address;
        let spender = route.contract;
        let allowance = signer.get_allowance(token, spender).await?;

        if !needs_approval(allowance, amount) {
            debug!("Allowance {} covers {}, skipping approval", allowance, amount);
            crate::metrics::record_approval(route.chain_id, false);
            return Ok(None);
        }

        let approval_tx = signer
            .send_approval(token, spender, amount)
            .await
            .map_err(|e| submission_failed(SubmissionStage::Approval, None, e.to_string()))?;
        crate::metrics::record_approval(route.chain_id, true);

        match timeout(self.inclusion_timeout, signer.await_inclusion(approval_tx)).await {
            Ok(Ok(receipt)) if receipt.success => Ok(Some(approval_tx)),
            Ok(Ok(receipt)) => Err(submission_failed(
                SubmissionStage::Approval,
                Some(approval_tx),
                format!("reverted in block {}", receipt.block_number),
            )),
            Ok(Err(e)) => Err(submission_failed(
                SubmissionStage::Approval,
                Some(approval_tx),
                e.to_string(),
            )),
            Err(_) => Err(submission_failed(
                SubmissionStage::Approval,
                Some(approval_tx),
                format!("not included within {:?}", self.inclusion_timeout),
            )),
        }
    }
}

fn submission_failed(stage: SubmissionStage, tx_hash: Option<H256>, reason: String) -> TransferError {
    TransferError::SubmissionFailed {
        stage,
        tx_hash,
        reason,
    }
}
