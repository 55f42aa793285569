//! Sliding-window log registry.

use std::collections::VecDeque;

use dashmap::DashMap;
use tracing::{debug, trace};

use super::key::RateKey;
use super::quota::Quota;

/// Outcome of a consuming window check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowDecision {
    /// Whether the request was admitted
    pub allowed: bool,
    /// Admits left in the window after this decision
    pub remaining: u32,
    /// Monotonic seconds at which capacity frees up (denied) or the
    /// window fully resets (admitted)
    pub reset_at: f64,
}

/// Read-only view of a key's window state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStatus {
    pub remaining: u32,
    pub reset_at: f64,
    /// Admits currently retained in the window
    pub current_usage: u32,
}

/// Log of admit timestamps for one rate key.
///
/// Timestamps are monotonic seconds, non-decreasing from front to back.
/// After any operation at time `t` with window `W`, every retained
/// timestamp `s` satisfies `t - W < s <= t`.
#[derive(Debug, Default)]
struct SlidingLog {
    timestamps: VecDeque<f64>,
}

impl SlidingLog {
    /// Drop timestamps that have left the window. A timestamp exactly `W`
    /// seconds old is expired.
    fn evict(&mut self, now: f64, window_seconds: f64) {
        let window_start = now - window_seconds;
        while let Some(&oldest) = self.timestamps.front() {
            if oldest > window_start {
                break;
            }
            self.timestamps.pop_front();
        }
    }

    fn len(&self) -> u32 {
        self.timestamps.len() as u32
    }

    fn oldest(&self) -> Option<f64> {
        self.timestamps.front().copied()
    }
}

/// Registry of sliding-window logs, one per rate key.
///
/// Logs are created lazily on first consuming reference and never
/// destroyed; entries evict themselves as the window slides. Concurrent
/// operations on the same key serialize on the map's per-entry guard.
pub struct WindowRegistry {
    logs: DashMap<RateKey, SlidingLog>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self {
            logs: DashMap::new(),
        }
    }

    /// Check whether an admit fits the quota at `now` and, if so, record it.
    ///
    /// Admitted decisions report the remaining capacity after the new
    /// entry and a reset at `now + window`. Denied decisions report the
    /// time the oldest retained admit exits the window.
    pub fn check_and_consume(&self, key: &RateKey, quota: Quota, now: f64) -> WindowDecision {
        let mut log = self.logs.entry(key.clone()).or_default();
        log.evict(now, quota.window_seconds());

        if log.len() < quota.max_requests() {
            log.timestamps.push_back(now);
            let decision = WindowDecision {
                allowed: true,
                remaining: quota.max_requests() - log.len(),
                reset_at: now + quota.window_seconds(),
            };
            trace!(key = %key, remaining = decision.remaining, "Request admitted");
            decision
        } else {
            let oldest = log.oldest().unwrap_or(now);
            debug!(key = %key, quota = %quota, "Quota exhausted");
            WindowDecision {
                allowed: false,
                remaining: 0,
                reset_at: oldest + quota.window_seconds(),
            }
        }
    }

    /// Report window state at `now` without recording an admit.
    ///
    /// Never creates a log: an unseen key reports a full window.
    pub fn peek(&self, key: &RateKey, quota: Quota, now: f64) -> WindowStatus {
        match self.logs.get_mut(key) {
            Some(mut log) => {
                log.evict(now, quota.window_seconds());
                let usage = log.len();
                let remaining = quota.max_requests().saturating_sub(usage);
                let reset_at = if remaining > 0 {
                    now + quota.window_seconds()
                } else {
                    log.oldest().unwrap_or(now) + quota.window_seconds()
                };
                WindowStatus {
                    remaining,
                    reset_at,
                    current_usage: usage,
                }
            }
            None => WindowStatus {
                remaining: quota.max_requests(),
                reset_at: now + quota.window_seconds(),
                current_usage: 0,
            },
        }
    }

    /// Number of keys with a materialized log.
    pub fn tracked_keys(&self) -> usize {
        self.logs.len()
    }
}

impl Default for WindowRegistry {
    fn default() -> Self {
        Self::new()
    }
}
