//! Global concurrency cap, per-tenant wait queues, and the fairness dispatcher.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use super::key::RateKey;
use super::quota::Quota;
use super::store::ConfigStore;
use super::verdict::{RejectReason, Verdict};

/// Worker invoked by the dispatcher for each dequeued request.
///
/// The dispatcher calls `process` while holding a slot on the request's
/// behalf; it releases the slot and signals the completion handle itself,
/// so implementations only compute the verdict.
#[async_trait]
pub trait QueueWorker: Send + Sync {
    async fn process(&self, key: RateKey, quota: Quota) -> Verdict;
}

/// A request parked in a tenant queue, waiting for a slot.
///
/// Born when the facade fails to acquire an immediate slot, dead once the
/// dispatcher (or a shutdown drain) delivers a verdict to its handle.
pub struct PendingRequest {
    pub key: RateKey,
    pub quota: Quota,
    /// Monotonic seconds at which the request was parked
    pub enqueued_at: f64,
    reply: oneshot::Sender<Verdict>,
}

impl PendingRequest {
    /// Create a pending request and the handle its verdict arrives on.
    pub fn new(key: RateKey, quota: Quota, enqueued_at: f64) -> (Self, oneshot::Receiver<Verdict>) {
        let (reply, rx) = oneshot::channel();
        (
            Self {
                key,
                quota,
                enqueued_at,
                reply,
            },
            rx,
        )
    }

    /// Deliver the terminal verdict. A caller that stopped waiting is ignored.
    fn complete(self, verdict: Verdict) {
        let _ = self.reply.send(verdict);
    }
}

/// Outcome of an enqueue attempt. Rejections are also delivered through
/// the pending request's completion handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    QueueFull,
    ShuttingDown,
}

/// Tenant queues plus the round-robin rotation over tenants that
/// currently have queued work.
///
/// Invariant: a tenant appears in `rotation` exactly once iff its queue is
/// non-empty. Tenants enter at the back on first enqueue to an empty queue
/// and leave when their queue drains, so a re-appearing tenant rejoins at
/// the back of the rotation.
#[derive(Default)]
struct QueueState {
    queues: HashMap<String, VecDeque<PendingRequest>>,
    rotation: VecDeque<String>,
}

/// Tracks global in-flight work and buffers overflow per tenant.
///
/// The in-flight counter is bounded by the store's `max_global_concurrent`
/// and each tenant queue by `max_tenant_queue_size`; both caps are
/// re-read from the store on every decision, so administrative updates
/// apply to the next admission without shrinking the in-flight set.
///
/// Lock order: the in-flight counter is advanced first (atomically), then
/// the queue-state lock; the window locks are only taken by workers after
/// both are released.
pub struct LoadManager {
    store: Arc<ConfigStore>,
    in_flight: AtomicUsize,
    state: Mutex<QueueState>,
    work_available: Notify,
    shutting_down: AtomicBool,
}

impl LoadManager {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self {
            store,
            in_flight: AtomicUsize::new(0),
            state: Mutex::new(QueueState::default()),
            work_available: Notify::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Atomically claim a processing slot if the global cap allows it.
    pub fn try_acquire_slot(&self) -> bool {
        let cap = self.store.global_limits().max_global_concurrent;
        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if current >= cap {
                return false;
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Return a slot and wake the dispatcher.
    pub fn release_slot(&self) {
        self.decrement_in_flight();
        self.work_available.notify_one();
    }

    /// Decrement without waking the dispatcher; used by the dispatcher to
    /// hand back a slot it claimed while the queues turned out empty.
    fn decrement_in_flight(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Park a request on its tenant's queue.
    ///
    /// Rejections (queue at capacity, shutdown in progress) are delivered
    /// through the request's completion handle before this returns.
    pub fn enqueue(&self, pending: PendingRequest) -> EnqueueOutcome {
        let tenant = pending.key.tenant_id.clone();
        let max_queue = self.store.global_limits().max_tenant_queue_size;

        let mut state = self.state.lock();

        // Checked under the lock so nothing slips in behind the shutdown drain.
        if self.shutting_down.load(Ordering::Acquire) {
            drop(state);
            warn!(tenant = %tenant, "Enqueue refused, shutting down");
            pending.complete(Verdict::rejected(RejectReason::ShuttingDown));
            return EnqueueOutcome::ShuttingDown;
        }

        let depth = state.queues.get(&tenant).map_or(0, VecDeque::len);
        if depth >= max_queue {
            drop(state);
            debug!(tenant = %tenant, depth = depth, "Tenant queue full");
            pending.complete(Verdict::rejected(RejectReason::QueueFull));
            return EnqueueOutcome::QueueFull;
        }

        let QueueState { queues, rotation } = &mut *state;
        queues.entry(tenant.clone()).or_default().push_back(pending);
        if depth == 0 {
            rotation.push_back(tenant.clone());
        }
        drop(state);

        trace!(tenant = %tenant, depth = depth + 1, "Request queued");
        self.work_available.notify_one();
        EnqueueOutcome::Enqueued
    }

    /// Pop the head of the next tenant's queue, round-robin.
    fn next_pending(&self) -> Option<PendingRequest> {
        let mut state = self.state.lock();
        let QueueState { queues, rotation } = &mut *state;

        let tenant = rotation.pop_front()?;
        let queue = queues.get_mut(&tenant)?;
        let pending = queue.pop_front();
        if queue.is_empty() {
            queues.remove(&tenant);
        } else {
            rotation.push_back(tenant);
        }
        pending
    }

    /// Start the dispatcher task that drains queues into `worker`.
    pub fn spawn_dispatcher(self: &Arc<Self>, worker: Arc<dyn QueueWorker>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            debug!("Dispatcher started");
            loop {
                // Register for wakeups before scanning, so a signal that
                // arrives mid-scan is not lost.
                let wakeup = manager.work_available.notified();

                if manager.shutting_down.load(Ordering::Acquire) {
                    manager.drain_on_shutdown();
                    debug!("Dispatcher stopped");
                    return;
                }

                loop {
                    if !manager.try_acquire_slot() {
                        break;
                    }
                    let Some(pending) = manager.next_pending() else {
                        manager.decrement_in_flight();
                        break;
                    };
                    Self::spawn_worker(manager.clone(), worker.clone(), pending);
                }

                wakeup.await;
            }
        })
    }

    /// Run one dequeued request on its own task, under the slot the
    /// dispatcher acquired. The slot is released and the handle signaled
    /// even if the worker panics.
    fn spawn_worker(manager: Arc<LoadManager>, worker: Arc<dyn QueueWorker>, pending: PendingRequest) {
        tokio::spawn(async move {
            let PendingRequest { key, quota, reply, .. } = pending;
            let log_key = key.clone();

            let job = tokio::spawn(async move { worker.process(key, quota).await });
            let verdict = match job.await {
                Ok(verdict) => verdict,
                Err(err) => {
                    error!(key = %log_key, error = %err, "Queued worker failed");
                    Verdict::rejected(RejectReason::Internal)
                }
            };

            manager.release_slot();
            let _ = reply.send(verdict);
        });
    }

    /// Reject everything still queued with `shutting_down`.
    fn drain_on_shutdown(&self) {
        let drained: Vec<PendingRequest> = {
            let mut state = self.state.lock();
            state.rotation.clear();
            state.queues.drain().flat_map(|(_, queue)| queue).collect()
        };

        if !drained.is_empty() {
            warn!(count = drained.len(), "Rejecting queued requests on shutdown");
        }
        for pending in drained {
            pending.complete(Verdict::rejected(RejectReason::ShuttingDown));
        }
    }

    /// Flag shutdown and wake the dispatcher so it drains and exits.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.work_available.notify_one();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Wait until all in-flight work has released its slot.
    pub async fn wait_idle(&self) {
        loop {
            let wakeup = self.work_available.notified();
            if self.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            wakeup.await;
        }
    }

    /// Current global in-flight count.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Number of requests waiting on a tenant's queue.
    pub fn queue_depth(&self, tenant: &str) -> usize {
        self.state.lock().queues.get(tenant).map_or(0, VecDeque::len)
    }

    /// Number of tenants currently holding queued work.
    pub fn queued_tenants(&self) -> usize {
        self.state.lock().rotation.len()
    }
}
