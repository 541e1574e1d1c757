//! Event ingestion, resync and the reconcile worker
//!
//! Watch tasks translate RunnerPool watch events into enqueues on a bounded
//! channel; a dedicated worker drains the channel and runs reconciles
//! strictly sequentially, one pool at a time. That single consumer is the
//! sole serialization mechanism of the whole operator - no two reconciles
//! ever run concurrently, which makes the read-then-act window in the engine
//! safe without per-object locks.
//!
//! Producers only enqueue; an awaited send on a full channel backpressures
//! the watch task, which is accepted, not an error. A periodic resync
//! re-enqueues every known pool, so failed reconciles are retried without
//! the watch having to fire again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher;
use kube::ResourceExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::controller::{reconcile, Context};
use crate::crd::RunnerPool;

/// Base delay after the first consecutive failure of a pool
const BACKOFF_BASE: Duration = Duration::from_secs(5);

/// Upper bound on the per-pool retry delay
const BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Map a watch event to the pool to enqueue, if any
///
/// Adds and updates enqueue; deletes do not - owned pods are garbage
/// collected through the ownership cascade, there is nothing to reconcile.
fn enqueued(event: watcher::Event<RunnerPool>) -> Option<Arc<RunnerPool>> {
    match event {
        watcher::Event::Apply(pool) | watcher::Event::InitApply(pool) => {
            debug!(pool = %pool.name_any(), "runner pool changed, enqueueing");
            Some(Arc::new(pool))
        }
        watcher::Event::Delete(pool) => {
            info!(
                pool = %pool.name_any(),
                "runner pool deleted, owned pods follow via garbage collection"
            );
            None
        }
        watcher::Event::Init | watcher::Event::InitDone => None,
    }
}

/// Consume the RunnerPool watch stream and feed the reconcile queue
///
/// Returns when the stream ends or the worker side of the queue is gone.
pub async fn run_pool_watch<S>(stream: S, tx: mpsc::Sender<Arc<RunnerPool>>)
where
    S: Stream<Item = Result<watcher::Event<RunnerPool>, watcher::Error>>,
{
    futures::pin_mut!(stream);
    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => {
                if let Some(pool) = enqueued(event) {
                    if tx.send(pool).await.is_err() {
                        return;
                    }
                }
            }
            Err(err) => warn!(error = %err, "runner pool watch error"),
        }
    }
}

/// Drain the pod watch stream to keep the reflector store warm
///
/// No business logic is triggered from pod events; the stream exists only so
/// the reflector applies them to the store the [`Context`] pod index reads.
pub async fn run_pod_watch<S>(stream: S)
where
    S: Stream<Item = Result<watcher::Event<Pod>, watcher::Error>>,
{
    futures::pin_mut!(stream);
    while let Some(event) = stream.next().await {
        if let Err(err) = event {
            warn!(error = %err, "pod watch error");
        }
    }
}

/// Periodically re-enqueue every known pool
///
/// This is the retry path for failed reconciles and the convergence path for
/// pools whose pods were mutated out-of-band.
pub async fn run_resync(
    store: Store<RunnerPool>,
    tx: mpsc::Sender<Arc<RunnerPool>>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    // interval fires immediately; the initial listing already enqueued
    // everything, so skip the first tick
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let pools = store.state();
        debug!(count = pools.len(), "resyncing runner pools");
        for pool in pools {
            if tx.send(pool).await.is_err() {
                return;
            }
        }
    }
}

/// Delay before the nth consecutive retry of a failing pool
fn backoff_delay(consecutive: u32) -> Duration {
    let exp = consecutive.saturating_sub(1).min(16);
    BACKOFF_BASE
        .saturating_mul(1u32 << exp)
        .min(BACKOFF_MAX)
}

struct FailureState {
    consecutive: u32,
    retry_at: Instant,
}

/// Per-pool failure bookkeeping for bounded retry backoff
///
/// Without it a persistent configuration error (bad credential reference,
/// unreachable registration service) would hammer the external API once per
/// resync per pool. A pool inside its backoff window is skipped; success
/// clears its entry. Skipping is safe because the scheduled retry re-fetches
/// the pool from the store, so spec changes made during the window are not
/// lost with the skipped deliveries.
#[derive(Default)]
struct FailureTracker {
    entries: HashMap<String, FailureState>,
}

impl FailureTracker {
    /// Record a failure and return the delay before the next attempt
    fn failure(&mut self, uid: &str) -> Duration {
        let consecutive = self
            .entries
            .get(uid)
            .map(|state| state.consecutive + 1)
            .unwrap_or(1);
        let delay = backoff_delay(consecutive);
        self.entries.insert(
            uid.to_string(),
            FailureState {
                consecutive,
                retry_at: Instant::now() + delay,
            },
        );
        delay
    }

    fn in_backoff(&self, uid: &str) -> bool {
        self.entries
            .get(uid)
            .map(|state| Instant::now() < state.retry_at)
            .unwrap_or(false)
    }

    fn clear(&mut self, uid: &str) {
        self.entries.remove(uid);
    }
}

/// The single reconcile worker
///
/// Owns the receive side of the queue, a sender used only to schedule
/// delayed re-enqueues after failures, and the pool store the retries
/// re-fetch from.
pub struct ReconcileWorker {
    rx: mpsc::Receiver<Arc<RunnerPool>>,
    tx: mpsc::Sender<Arc<RunnerPool>>,
    ctx: Arc<Context>,
    pools: Store<RunnerPool>,
    failures: FailureTracker,
}

impl ReconcileWorker {
    /// Create a worker over the given queue ends, context and pool store
    pub fn new(
        rx: mpsc::Receiver<Arc<RunnerPool>>,
        tx: mpsc::Sender<Arc<RunnerPool>>,
        ctx: Arc<Context>,
        pools: Store<RunnerPool>,
    ) -> Self {
        Self {
            rx,
            tx,
            ctx,
            pools,
            failures: FailureTracker::default(),
        }
    }

    /// Drain the queue for the lifetime of the process
    ///
    /// A failed reconcile for one pool never blocks others: the error is
    /// logged, a delayed retry is scheduled, and the loop moves on.
    pub async fn run(mut self) {
        info!("reconcile worker started");
        while let Some(pool) = self.rx.recv().await {
            self.process(pool).await;
        }
    }

    async fn process(&mut self, pool: Arc<RunnerPool>) {
        let Some(uid) = pool.uid() else {
            warn!(pool = %pool.name_any(), "runner pool without uid, skipping");
            return;
        };

        if self.failures.in_backoff(&uid) {
            debug!(pool = %pool.name_any(), "pool in retry backoff, skipping");
            return;
        }

        match reconcile(pool.clone(), self.ctx.clone()).await {
            Ok(()) => self.failures.clear(&uid),
            Err(err) => {
                error!(pool = %pool.name_any(), error = %err, "reconcile failed");
                let delay = self.failures.failure(&uid);
                debug!(pool = %pool.name_any(), ?delay, "scheduling retry");
                let tx = self.tx.clone();
                let pools = self.pools.clone();
                let key = ObjectRef::from_obj(pool.as_ref());
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    // Re-fetch so a spec fixed during the window is what gets
                    // retried, not the snapshot captured at failure time. A
                    // pool gone from the store was deleted; nothing to retry.
                    if let Some(current) = pools.get(&key) {
                        let _ = tx.send(current).await;
                    }
                });
            }
        }
    }
}
