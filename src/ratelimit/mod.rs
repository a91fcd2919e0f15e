//! Rate limiting logic: policies, keys, the admission gate and its retry policy.

mod gate;
mod key;
mod policy;
mod retry;

pub use gate::{AdmissionGate, Decision, ExpiryMode};
pub use key::{CallArgs, JsonFieldKeyBuilder, KeyBuilder, RateLimitKey, RequestContext};
pub use policy::{Policy, DEFAULT_MAX_COUNT, DEFAULT_WINDOW, MAX_WINDOW};
pub use retry::{RetryScheduler, DEFAULT_RETRY_DELAY};
