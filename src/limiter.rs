// SPDX-License-Identifier: Apache-2.0

//! The admission facade: one request-count gate and one unit-count gate per resource key.

use crate::context::Context;
use crate::error::{BoxError, Error, Result};
use crate::quota::{Dimension, Provider, Quota, QuotaTable};
use crate::registry::GateRegistry;
use crate::tokenbucket::TokenBucket;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Prices a request in consumable units (for LLM APIs, tokens).
pub trait UnitCost {
    /// Returns the units this request will consume.
    ///
    /// # Errors
    ///
    /// Fails when the request's target cannot be priced, e.g. an unknown model.
    fn units(&self) -> std::result::Result<i64, BoxError>;
}

impl<T: UnitCost + ?Sized> UnitCost for &T {
    fn units(&self) -> std::result::Result<i64, BoxError> {
        (**self).units()
    }
}

/// Admission control as seen by a transport layer.
#[async_trait]
pub trait AdmissionControl: Send + Sync {
    /// Waits until `units` may be spent on one call to `resource`.
    async fn wait(&self, ctx: &Context, resource: &str, units: u64) -> Result<()>;

    /// Prices `request` and waits until it may be issued against `resource`.
    async fn wait_for_request(
        &self,
        ctx: &Context,
        resource: &str,
        request: &(dyn UnitCost + Sync),
    ) -> Result<()>;
}

/// Client-side rate limiter for a quota-limited API.
///
/// Every call is charged one unit against the request gate for its resource
/// key, then its cost against the unit gate. The two charges are separate:
/// a call that clears the request gate but is cancelled at the unit gate
/// keeps its request charge.
///
/// Cloning is cheap and clones share all gates.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    registry: Arc<GateRegistry>,
    max_wait: Option<Duration>,
}

impl RateLimiter {
    /// Creates a limiter enforcing the published quotas of `provider`.
    pub fn new(provider: Provider) -> Self {
        Self::with_table(QuotaTable::for_provider(provider))
    }

    /// Creates a limiter enforcing a custom quota table.
    pub fn with_table(table: QuotaTable) -> Self {
        Self {
            registry: Arc::new(GateRegistry::new(table)),
            max_wait: None,
        }
    }

    /// Bounds every wait by `max_wait`, on top of the caller's own deadline.
    #[must_use]
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Returns the provider whose quotas are enforced.
    pub fn provider(&self) -> Provider {
        self.registry.table().provider()
    }

    /// Returns the quota enforced for `resource`.
    pub fn quota_for(&self, resource: &str) -> Quota {
        self.registry.table().lookup(resource)
    }

    /// Returns the bucket gating `dimension` for `resource`, creating it if needed.
    pub fn gate(&self, dimension: Dimension, resource: &str) -> Arc<TokenBucket> {
        self.registry.gate_for(dimension, resource)
    }

    /// Returns the number of resource keys seen so far.
    pub fn tracked_resources(&self) -> usize {
        self.registry.len(Dimension::Requests)
    }

    /// Waits until a call costing `units` may be issued against `resource`.
    ///
    /// Takes one unit from the request gate, then `units` from the unit gate.
    /// The unit gate is skipped when `units` is zero or the request gate fails.
    ///
    /// # Errors
    ///
    /// - `Error::QuotaExceedsCapacity` if `units` exceeds the per-minute unit quota.
    /// - `Error::Cancelled` or `Error::DeadlineExceeded` when `ctx` ends first.
    pub async fn wait(&self, ctx: &Context, resource: &str, units: u64) -> Result<()> {
        let registry = &self.registry;
        if !registry.table().is_limited() {
            return Ok(());
        }

        let scoped;
        let ctx = match self.max_wait {
            Some(max_wait) => {
                scoped = ctx.child_with_timeout(max_wait);
                &scoped
            }
            None => ctx,
        };

        registry
            .gate_for(Dimension::Requests, resource)
            .acquire(ctx, 1)
            .await?;
        if units == 0 {
            return Ok(());
        }

        trace!(resource, units, "request admitted, charging units");
        registry
            .gate_for(Dimension::Units, resource)
            .acquire(ctx, units)
            .await
    }

    /// Prices `request` with its estimator and waits for admission.
    ///
    /// # Errors
    ///
    /// - `Error::CostEstimation` if the estimator fails.
    /// - `Error::InvalidArgument` if the estimator reports a negative cost.
    /// - Anything [`RateLimiter::wait`] returns.
    pub async fn wait_for_request<R>(&self, ctx: &Context, resource: &str, request: &R) -> Result<()>
    where
        R: UnitCost + ?Sized,
    {
        let units = request
            .units()
            .map_err(|source| Error::CostEstimation { source })?;
        let units = u64::try_from(units).map_err(|_| {
            Error::invalid_argument("units", format!("estimator returned a negative cost {units}"))
        })?;
        self.wait(ctx, resource, units).await
    }
}

#[async_trait]
impl AdmissionControl for RateLimiter {
    async fn wait(&self, ctx: &Context, resource: &str, units: u64) -> Result<()> {
        RateLimiter::wait(self, ctx, resource, units).await
    }

    async fn wait_for_request(
        &self,
        ctx: &Context,
        resource: &str,
        request: &(dyn UnitCost + Sync),
    ) -> Result<()> {
        RateLimiter::wait_for_request(self, ctx, resource, request).await
    }
}
