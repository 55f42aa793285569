//! Core rate limiter facade.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, TurnstileError};

use super::clock::{Clock, SystemClock};
use super::key::RateKey;
use super::load::{LoadManager, PendingRequest, QueueWorker};
use super::quota::Quota;
use super::store::ConfigStore;
use super::verdict::Verdict;
use super::window::{WindowDecision, WindowRegistry};

/// Read-only view of a key's rate state, with the reset time in
/// wall-clock seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateStatus {
    pub remaining: u32,
    pub reset_at: f64,
    pub current_usage: u32,
}

/// Map a window decision onto a verdict, converting the monotonic reset
/// time into wall-clock seconds for the caller.
fn processed_verdict(decision: WindowDecision, now: f64, clock: &dyn Clock) -> Verdict {
    Verdict::Processed {
        allowed: decision.allowed,
        remaining: decision.remaining,
        reset_at: clock.wall_now() + (decision.reset_at - now),
    }
}

/// Dispatcher worker that runs the window check for dequeued requests.
struct WindowWorker {
    registry: Arc<WindowRegistry>,
    clock: Arc<dyn Clock>,
}

#[async_trait]
impl QueueWorker for WindowWorker {
    async fn process(&self, key: RateKey, quota: Quota) -> Verdict {
        let now = self.clock.now();
        let decision = self.registry.check_and_consume(&key, quota, now);
        trace!(key = %key, allowed = decision.allowed, "Processed after queue");
        processed_verdict(decision, now, self.clock.as_ref())
    }
}

/// Top-level entry point combining the config store, window registry, and
/// load manager.
///
/// Safe to share across tasks; callers block only while waiting for a
/// queued request's completion handle.
pub struct RateLimiter {
    store: Arc<ConfigStore>,
    registry: Arc<WindowRegistry>,
    load: Arc<LoadManager>,
    clock: Arc<dyn Clock>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Create a rate limiter on the system clock and start its dispatcher.
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock::new()))
    }

    /// Create a rate limiter on an injected clock. Must be called from
    /// within a tokio runtime.
    pub fn with_clock(store: Arc<ConfigStore>, clock: Arc<dyn Clock>) -> Self {
        let registry = Arc::new(WindowRegistry::new());
        let load = Arc::new(LoadManager::new(store.clone()));
        let worker = Arc::new(WindowWorker {
            registry: registry.clone(),
            clock: clock.clone(),
        });
        let dispatcher = load.spawn_dispatcher(worker);

        Self {
            store,
            registry,
            load,
            clock,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Decide whether a request is admitted now, after queueing, or not at
    /// all.
    ///
    /// With a free slot the window is consulted synchronously. Otherwise
    /// the request parks on its tenant's queue and this call resolves when
    /// the dispatcher delivers the verdict (or rejects it on queue
    /// overflow or shutdown).
    pub async fn check_and_consume(
        &self,
        tenant_id: &str,
        client_id: &str,
        action_type: &str,
        fallback: Option<Quota>,
    ) -> Result<Verdict> {
        let key = RateKey::new(tenant_id, client_id, action_type)?;
        let quota = self
            .store
            .resolve(tenant_id, client_id, action_type, fallback)?;

        if self.load.try_acquire_slot() {
            let now = self.clock.now();
            let decision = self.registry.check_and_consume(&key, quota, now);
            self.load.release_slot();
            trace!(key = %key, allowed = decision.allowed, "Processed immediately");
            return Ok(processed_verdict(decision, now, self.clock.as_ref()));
        }

        debug!(key = %key, "Global cap saturated, queueing");
        let (pending, verdict_rx) = PendingRequest::new(key, quota, self.clock.now());
        self.load.enqueue(pending);

        verdict_rx.await.map_err(|_| {
            TurnstileError::Internal("completion handle dropped without a verdict".to_string())
        })
    }

    /// Report remaining capacity without consuming. Never enqueues and
    /// never acquires a slot.
    pub fn status(
        &self,
        tenant_id: &str,
        client_id: &str,
        action_type: &str,
        fallback: Option<Quota>,
    ) -> Result<RateStatus> {
        let key = RateKey::new(tenant_id, client_id, action_type)?;
        let quota = self
            .store
            .resolve(tenant_id, client_id, action_type, fallback)?;

        let now = self.clock.now();
        let status = self.registry.peek(&key, quota, now);
        Ok(RateStatus {
            remaining: status.remaining,
            reset_at: self.clock.wall_now() + (status.reset_at - now),
            current_usage: status.current_usage,
        })
    }

    /// The quota configuration store.
    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// The load manager, for queue observability.
    pub fn load(&self) -> &LoadManager {
        &self.load
    }

    /// Drain and stop the engine.
    ///
    /// Queued requests receive `Rejected{shutting_down}`, the dispatcher
    /// exits, and in-flight work is awaited to completion.
    pub async fn shutdown(&self) {
        info!("Rate limiter shutting down");
        self.load.begin_shutdown();

        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "Dispatcher task failed during shutdown");
            }
        }

        self.load.wait_idle().await;
        info!("Rate limiter stopped");
    }
}
