// Rate governance: per-provider admission control and retry policy
pub mod backoff;
pub mod governor;

pub use backoff::{ErrorClass, NextAction, RetryPolicy};
pub use governor::{Admission, QuotaToken, RateGovernor};
