//! Rate-limit verdicts delivered to callers.

/// Why a request was rejected without a quota decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The tenant's wait queue was at capacity while the global cap was saturated
    QueueFull,
    /// The request was queued and drained during shutdown
    ShuttingDown,
    /// A worker failed; the slot was released and the failure contained
    Internal,
}

impl RejectReason {
    /// Stable label used in responses and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::QueueFull => "queue_full",
            RejectReason::ShuttingDown => "shutting_down",
            RejectReason::Internal => "internal",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of a rate-limit decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// The window was consulted; `allowed` carries the quota decision.
    Processed {
        allowed: bool,
        remaining: u32,
        /// Wall-clock seconds at which the window frees up (or fully resets)
        reset_at: f64,
    },
    /// Intermediate state while a request waits in a tenant queue.
    /// Never a terminal engine result.
    Queued,
    /// The request was turned away without consulting the window.
    Rejected { reason: RejectReason },
}

impl Verdict {
    pub fn rejected(reason: RejectReason) -> Self {
        Verdict::Rejected { reason }
    }

    /// Transport-facing status label.
    pub fn status_label(&self) -> &'static str {
        match self {
            Verdict::Processed { .. } => "processed",
            Verdict::Queued => "queued",
            Verdict::Rejected { .. } => "rejected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_labels() {
        let processed = Verdict::Processed {
            allowed: true,
            remaining: 4,
            reset_at: 60.0,
        };
        assert_eq!(processed.status_label(), "processed");
        assert_eq!(Verdict::Queued.status_label(), "queued");
        assert_eq!(
            Verdict::rejected(RejectReason::QueueFull).status_label(),
            "rejected"
        );
    }

    #[test]
    fn test_reject_reason_labels() {
        assert_eq!(RejectReason::QueueFull.as_str(), "queue_full");
        assert_eq!(RejectReason::ShuttingDown.as_str(), "shutting_down");
        assert_eq!(RejectReason::Internal.as_str(), "internal");
    }
}
