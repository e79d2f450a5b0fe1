//! End-to-end transfer flows against in-memory chain and indexer fakes

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hubroute::chain::InclusionReceipt;
use hubroute::config::Settings;
use hubroute::settlement::{OutboundLeg, SettlementQueryResult};
use hubroute::tx::ContractCall;
use hubroute::{
    Indexer, SettlementState, Signer, TransferAction, TransferError, TransferOrchestrator,
    TransferOutcome, TransferResult,
};

const CONFIG: &str = r#"
[hub]
chain_id = 7000
name = "zetachain"
rpc_urls = ["http://127.0.0.1:8545"]
pool_address = "0x1000000000000000000000000000000000000001"
withdrawer_address = "0x1000000000000000000000000000000000000002"
converter_address = "0x1000000000000000000000000000000000000003"
lp_token = { symbol = "USDC.4", address = "0x1000000000000000000000000000000000000001", decimals = 18 }

[[hub.pool_tokens]]
symbol = "USDC.BASE"
address = "0x2000000000000000000000000000000000000002"
decimals = 6
index = 0
source_chain_id = 8453

[[hub.pool_tokens]]
symbol = "USDC.ARB"
address = "0x2000000000000000000000000000000000000001"
decimals = 6
index = 1
source_chain_id = 42161

[chains.base]
chain_id = 8453
name = "Base"
rpc_urls = ["http://127.0.0.1:8546"]
gateway_address = "0x3000000000000000000000000000000000000002"
usdc = { symbol = "USDC", address = "0x4000000000000000000000000000000000000002", decimals = 6 }

[indexer]
base_url = "http://127.0.0.1:1317"

[tracker]
poll_interval_ms = 10000

[orchestrator]
inclusion_timeout_secs = 30
"#;

const RECIPIENT: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

/// Wallet fake: fixed allowance, every send gets the next hash
struct FakeSigner {
    chain_id: u64,
    allowance: U256,
    /// Action receipts never arrive
    stall_actions: bool,
    log: Mutex<Vec<String>>,
    next_hash: Mutex<u8>,
    actions: Mutex<Vec<H256>>,
}

impl FakeSigner {
    fn new(chain_id: u64, allowance: U256) -> Self {
        Self {
            chain_id,
            allowance,
            stall_actions: false,
            log: Mutex::new(Vec::new()),
            next_hash: Mutex::new(0),
            actions: Mutex::new(Vec::new()),
        }
    }

    fn hash(&self) -> H256 {
        let mut next = self.next_hash.lock().unwrap();
        *next += 1;
        H256::repeat_byte(*next)
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl Signer for FakeSigner {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn address(&self) -> Address {
        Address::repeat_byte(0x77)
    }

    async fn get_allowance(&self, _token: Address, _spender: Address) -> TransferResult<U256> {
        self.record("allowance".to_string());
        Ok(self.allowance)
    }

    async fn send_approval(&self, _token: Address, _spender: Address, amount: U256) -> TransferResult<H256> {
        self.record(format!("approve {}", amount));
        Ok(self.hash())
    }

    async fn send_action(&self, _contract: Address, call: ContractCall) -> TransferResult<H256> {
        self.record(call.name().to_string());
        let hash = self.hash();
        self.actions.lock().unwrap().push(hash);
        Ok(hash)
    }

    async fn await_inclusion(&self, tx_hash: H256) -> TransferResult<InclusionReceipt> {
        self.record(format!("wait {:?}", tx_hash));
        let is_action = self.actions.lock().unwrap().contains(&tx_hash);
        if is_action && self.stall_actions {
            std::future::pending::<()>().await;
        }
        Ok(InclusionReceipt {
            tx_hash,
            block_number: 42,
            success: true,
        })
    }

    async fn quote_remove_one_coin(&self, _pool: Address, _burn_amount: U256, _index: u8) -> TransferResult<U256> {
        Err(TransferError::Internal("not a redeem test".to_string()))
    }
}

type Answer = TransferResult<Option<SettlementQueryResult>>;

/// Replays a script, then keeps failing like an unreachable indexer
struct ScriptedIndexer {
    script: Mutex<VecDeque<Answer>>,
    lookups: Mutex<Vec<H256>>,
}

impl ScriptedIndexer {
    fn new(script: Vec<Answer>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            lookups: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Indexer for ScriptedIndexer {
    async fn lookup_by_origin_tx(&self, origin_tx: H256) -> Answer {
        self.lookups.lock().unwrap().push(origin_tx);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransferError::IndexerUnavailable("connection refused".to_string())))
    }
}

fn cctx(status: &str, finalization: &str, hash: Option<&str>) -> Answer {
    Ok(Some(SettlementQueryResult {
        cctx_index: "0xcctx".to_string(),
        status: status.to_string(),
        status_message: String::new(),
        outbound_legs: vec![OutboundLeg {
            hash: hash.map(str::to_string),
            finalization_status: finalization.to_string(),
            receiver_chain_id: Some(7000),
        }],
    }))
}

fn orchestrator(indexer: Arc<ScriptedIndexer>) -> TransferOrchestrator {
    let settings = Settings::from_toml_str(CONFIG).unwrap();
    TransferOrchestrator::from_settings(&settings, indexer)
}

#[tokio::test(start_paused = true)]
async fn deposit_approves_then_settles_through_the_indexer() {
    let indexer = ScriptedIndexer::new(vec![
        Ok(None),
        Err(TransferError::IndexerUnavailable("502 Bad Gateway".to_string())),
        cctx("PendingOutbound", "NotFinalized", None),
        cctx("PendingOutbound", "Executed", Some("0xhub")),
        cctx("OutboundMined", "Executed", Some("0xhub")),
    ]);
    let signer = FakeSigner::new(8453, U256::zero());

    let action = TransferAction::deposit(8453, "USDC", 7000, "100", RECIPIENT).with_slippage_bps(50);
    let mut execution = orchestrator(indexer.clone()).submit(action, &signer).await.unwrap();

    let approval = execution.approval_tx.expect("allowance of zero needs an approval");
    assert_eq!(
        signer.log(),
        vec![
            "allowance".to_string(),
            "approve 100000000".to_string(),
            format!("wait {:?}", approval),
            "depositAndCall".to_string(),
            format!("wait {:?}", execution.origin_tx),
        ]
    );
    assert_eq!(execution.bounds.base_units, U256::from(100_000_000u64));

    let states: Vec<SettlementState> = execution
        .handle
        .updates()
        .map(|record| record.state)
        .collect()
        .await;
    assert_eq!(
        states,
        vec![
            SettlementState::Confirming,
            SettlementState::Processing,
            SettlementState::Settled
        ]
    );

    let outcome = execution.handle.wait().await;
    let record = outcome.record();
    assert!(matches!(outcome, TransferOutcome::Settled(_)));
    assert_eq!(record.origin_tx_id, execution.origin_tx);
    assert_eq!(record.hub_tx_id.as_deref(), Some("0xhub"));
    assert_eq!(record.poll_count, 5);
    assert!(indexer
        .lookups
        .lock()
        .unwrap()
        .iter()
        .all(|tx| *tx == execution.origin_tx));
}

#[tokio::test(start_paused = true)]
async fn action_never_included_is_failed_not_tracked() {
    let indexer = ScriptedIndexer::new(vec![]);
    let mut signer = FakeSigner::new(7000, U256::MAX);
    signer.stall_actions = true;

    let action = TransferAction::withdraw(7000, "USDC.4", 8453, "5", RECIPIENT, 1_000);
    let execution = orchestrator(indexer.clone()).submit(action, &signer).await.unwrap();

    assert_eq!(execution.approval_tx, None);
    let record = execution.handle.snapshot();
    assert_eq!(record.state, SettlementState::Failed);
    assert!(record.failure_reason.unwrap().contains("not included"));
    assert!(indexer.lookups.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn indexer_outage_past_the_deadline_is_unknown() {
    let indexer = ScriptedIndexer::new(vec![Ok(None)]);
    let signer = FakeSigner::new(7000, U256::MAX);

    let action = TransferAction::withdraw(7000, "USDC.4", 8453, "5", RECIPIENT, 500);
    let execution = orchestrator(indexer).submit(action, &signer).await.unwrap();

    let outcome = execution.handle.wait_for(Duration::from_secs(60)).await;
    match outcome {
        TransferOutcome::Unknown(record) => {
            assert_eq!(record.state, SettlementState::Submitted);
            assert_eq!(record.hub_tx_id, Some(format!("{:?}", execution.origin_tx)));
            assert!(record.failure_reason.is_none());
            assert!(record.poll_count >= 6);
        }
        other => panic!("expected unknown outcome, got {:?}", other),
    }
}

#[tokio::test]
async fn invalid_actions_never_reach_the_signer() {
    let indexer = ScriptedIndexer::new(vec![]);
    let signer = FakeSigner::new(7000, U256::MAX);

    let action = TransferAction::convert(7000, "USDC.BASE", "USDC.4", "1.0000001", RECIPIENT);
    let err = orchestrator(indexer).submit(action, &signer).await.err().unwrap();

    assert!(matches!(err, TransferError::InvalidAmount { .. }));
    assert!(signer.log().is_empty());
}
