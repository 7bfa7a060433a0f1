// SPDX-License-Identifier: Apache-2.0

//! Client-side admission control for quota-limited LLM APIs.
//!
//! Providers limit each model both in calls per minute and in tokens per
//! minute. A [`RateLimiter`] keeps one token bucket per model for each of
//! those two dimensions and makes callers wait until a call fits under both,
//! so the provider never has to reject it.
//!
//! ```no_run
//! use quota_gate::{Context, Provider, RateLimiter};
//!
//! # async fn call() -> Result<(), quota_gate::Error> {
//! let limiter = RateLimiter::new(Provider::Azure);
//! limiter.wait(&Context::background(), "gpt-4", 1_200).await?;
//! // issue the request
//! # Ok(())
//! # }
//! ```
//!
//! State lives in memory, per limiter instance. Nothing is persisted or
//! shared between processes.

mod config;
mod context;
mod error;
mod limiter;
mod quota;
mod registry;
mod tokenbucket;

pub use config::{QuotaOverride, RateLimiterConfig};
pub use context::Context;
pub use error::{BoxError, Error, Result};
pub use limiter::{AdmissionControl, RateLimiter, UnitCost};
pub use quota::{models, Dimension, Provider, Quota, QuotaTable};
pub use registry::GateRegistry;
pub use tokenbucket::{Limit, TokenBucket};
