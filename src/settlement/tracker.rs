//! Settlement tracking: one cancellable poll task per origin transaction

use super::indexer::Indexer;
use super::state::{LegRoute, SettlementRecord, SettlementState};

use chrono::Utc;
use ethers::types::H256;
use futures::Stream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Callback fired once when a transfer settles
pub type OnSettled = Box<dyn FnOnce(&SettlementRecord) + Send + 'static>;

/// Final word on a tracked transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Settled(SettlementRecord),
    Failed(SettlementRecord),
    /// Tracking stopped before a terminal state. The transfer may still settle;
    /// re-query by origin tx id later.
    Unknown(SettlementRecord),
}

impl TransferOutcome {
    fn from_record(record: SettlementRecord) -> Self {
        match record.state {
            SettlementState::Settled => TransferOutcome::Settled(record),
            SettlementState::Failed => TransferOutcome::Failed(record),
            _ => TransferOutcome::Unknown(record),
        }
    }

    pub fn record(&self) -> &SettlementRecord {
        match self {
            TransferOutcome::Settled(r) | TransferOutcome::Failed(r) | TransferOutcome::Unknown(r) => r,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TransferOutcome::Settled(_) => "settled",
            TransferOutcome::Failed(_) => "failed",
            TransferOutcome::Unknown(_) => "unknown",
        }
    }
}

/// Stops the watch, never the transfer. Cloneable so a signal handler can hold one.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Idempotent
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Caller's view of one tracked transfer
pub struct SettlementHandle {
    id: Uuid,
    origin_tx: H256,
    snapshot: watch::Receiver<SettlementRecord>,
    updates: mpsc::UnboundedReceiver<SettlementRecord>,
    cancel: CancelHandle,
    task: Option<JoinHandle<()>>,
}

impl SettlementHandle {
    /// Handle for a record that is already terminal; nothing is polled
    pub fn finished(record: SettlementRecord) -> Self {
        let origin_tx = record.origin_tx_id;
        let (_snapshot_tx, snapshot) = watch::channel(record.clone());
        let (updates_tx, updates) = mpsc::unbounded_channel();
        let _ = updates_tx.send(record);
        let (cancel_tx, _) = watch::channel(false);

        Self {
            id: Uuid::new_v4(),
            origin_tx,
            snapshot,
            updates,
            cancel: CancelHandle {
                tx: Arc::new(cancel_tx),
            },
            task: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn origin_tx_id(&self) -> H256 {
        self.origin_tx
    }

    /// Latest record, including poll bookkeeping
    pub fn snapshot(&self) -> SettlementRecord {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> SettlementState {
        self.snapshot.borrow().state
    }

    /// Next visible change (state or a newly learned tx id), in order.
    /// `None` once tracking has ended and every update was consumed.
    pub async fn next_update(&mut self) -> Option<SettlementRecord> {
        self.updates.recv().await
    }

    /// The update sequence as a stream
    pub fn updates(&mut self) -> impl Stream<Item = SettlementRecord> + '_ {
        futures::stream::poll_fn(move |cx| self.updates.poll_recv(cx))
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn canceller(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Wait until tracking ends, by reaching a terminal state or by cancellation
    pub async fn wait(mut self) -> TransferOutcome {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Settlement tracker {} ended abnormally: {}", self.id, e);
            }
        }
        TransferOutcome::from_record(self.snapshot())
    }

    /// Like `wait`, but gives up after `deadline`: tracking is cancelled and the
    /// outcome is `Unknown` unless the transfer finished in time.
    pub async fn wait_for(self, deadline: Duration) -> TransferOutcome {
        let cancel = self.canceller();
        let waiting = self.wait();
        tokio::pin!(waiting);

        tokio::select! {
            outcome = &mut waiting => outcome,
            _ = tokio::time::sleep(deadline) => {
                warn!("Tracking deadline of {:?} elapsed, cancelling", deadline);
                cancel.cancel();
                waiting.await
            }
        }
    }
}

/// Starts poll tasks against a shared indexer
#[derive(Clone)]
pub struct SettlementTracker {
    indexer: Arc<dyn Indexer>,
    poll_interval: Duration,
}

impl SettlementTracker {
    pub fn new(indexer: Arc<dyn Indexer>, poll_interval: Duration) -> Self {
        Self {
            indexer,
            poll_interval,
        }
    }

    /// Begin tracking. The first poll fires immediately.
    ///
    /// Only the origin tx id is needed, so tracking can be re-derived after a restart.
    pub fn start(&self, origin_tx: H256, route: LegRoute) -> SettlementHandle {
        self.spawn(origin_tx, route, None)
    }

    pub fn start_with_callback(
        &self,
        origin_tx: H256,
        route: LegRoute,
        on_settled: impl FnOnce(&SettlementRecord) + Send + 'static,
    ) -> SettlementHandle {
        self.spawn(origin_tx, route, Some(Box::new(on_settled)))
    }

    fn spawn(&self, origin_tx: H256, route: LegRoute, on_settled: Option<OnSettled>) -> SettlementHandle {
        let id = Uuid::new_v4();
        let record = SettlementRecord::new(origin_tx, route);

        let (snapshot_tx, snapshot) = watch::channel(record.clone());
        let (updates_tx, updates) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let poll = PollLoop {
            id,
            indexer: self.indexer.clone(),
            poll_interval: self.poll_interval,
            route,
            record,
            snapshot_tx,
            updates_tx,
            cancel_rx,
            on_settled,
        };

        info!(
            "Tracking settlement of {:?} ({:?}, every {:?}) as {}",
            origin_tx, route, self.poll_interval, id
        );
        let task = tokio::spawn(poll.run());

        SettlementHandle {
            id,
            origin_tx,
            snapshot,
            updates,
            cancel: CancelHandle {
                tx: Arc::new(cancel_tx),
            },
            task: Some(task),
        }
    }
}

struct PollLoop {
    id: Uuid,
    indexer: Arc<dyn Indexer>,
    poll_interval: Duration,
    route: LegRoute,
    record: SettlementRecord,
    snapshot_tx: watch::Sender<SettlementRecord>,
    updates_tx: mpsc::UnboundedSender<SettlementRecord>,
    cancel_rx: watch::Receiver<bool>,
    on_settled: Option<OnSettled>,
}

/// Resolves once cancellation is requested or every handle is gone
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

impl PollLoop {
    async fn run(mut self) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let origin_tx = self.record.origin_tx_id;

        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut self.cancel_rx) => break,
                _ = ticker.tick() => {}
            }

            let lookup = tokio::select! {
                biased;
                _ = cancelled(&mut self.cancel_rx) => break,
                res = self.indexer.lookup_by_origin_tx(origin_tx) => res,
            };

            // a response that raced a cancel is dropped unseen
            if *self.cancel_rx.borrow() {
                break;
            }

            self.record.note_poll(Utc::now());
            let changed = match lookup {
                Ok(result) => {
                    crate::metrics::record_indexer_poll(if result.is_some() { "record" } else { "empty" });
                    self.record.observe(result.as_ref(), self.route)
                }
                Err(e) => {
                    crate::metrics::record_indexer_poll("error");
                    warn!(
                        "Indexer lookup for {:?} failed (poll {}), state stays {}: {}",
                        origin_tx, self.record.poll_count, self.record.state, e
                    );
                    false
                }
            };

            self.snapshot_tx.send_replace(self.record.clone());

            if changed {
                info!(
                    "Settlement {} of {:?} is now {} (indexer status {:?})",
                    self.id,
                    origin_tx,
                    self.record.state,
                    self.record.indexer_status
                );
                let _ = self.updates_tx.send(self.record.clone());
            } else {
                debug!(
                    "Settlement {} unchanged after poll {}",
                    self.id, self.record.poll_count
                );
            }

            if self.record.terminal {
                let elapsed = (Utc::now() - self.record.created_at)
                    .to_std()
                    .unwrap_or_default();
                crate::metrics::record_settlement(self.record.state, elapsed.as_secs_f64());

                if self.record.state == SettlementState::Settled {
                    if let Some(callback) = self.on_settled.take() {
                        callback(&self.record);
                    }
                }
                break;
            }
        }

        if !self.record.terminal {
            info!(
                "Stopped tracking {:?} in state {} after {} polls",
                origin_tx, self.record.state, self.record.poll_count
            );
        }
    }
}
