//! Rate limiting logic and state management.

mod limiter;
mod clock;
mod key;
mod load;
mod quota;
mod store;
mod verdict;
mod window;

pub use limiter::{RateLimiter, RateStatus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use key::RateKey;
pub use load::{EnqueueOutcome, LoadManager, PendingRequest, QueueWorker};
pub use quota::{Quota, QuotaError};
pub use store::{ConfigSnapshot, ConfigStore, GlobalLimits, QuotaView, TenantSnapshot};
pub use verdict::{RejectReason, Verdict};
pub use window::{WindowDecision, WindowRegistry, WindowStatus};
