// SPDX-License-Identifier: Apache-2.0

//! Lazily populated map from resource key to token bucket, one per dimension.

use crate::quota::{Dimension, QuotaTable};
use crate::tokenbucket::TokenBucket;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

type Buckets = RwLock<HashMap<String, Arc<TokenBucket>>>;

/// Get-or-create registry of buckets for both dimensions.
///
/// Entries are never evicted. The map grows with the number of distinct
/// resource keys seen, which in practice is the handful of models in use.
#[derive(Debug)]
pub struct GateRegistry {
    table: QuotaTable,
    requests: Buckets,
    units: Buckets,
    /// Shared by every key whose dimension is not limited.
    disabled: Arc<TokenBucket>,
}

impl GateRegistry {
    /// Creates an empty registry sized by `table`.
    pub fn new(table: QuotaTable) -> Self {
        Self {
            table,
            requests: RwLock::default(),
            units: RwLock::default(),
            disabled: Arc::new(TokenBucket::unlimited()),
        }
    }

    /// Returns the quota table backing this registry.
    pub fn table(&self) -> &QuotaTable {
        &self.table
    }

    /// Returns the bucket gating `dimension` for `resource`, creating it on first use.
    ///
    /// Concurrent first use of a key yields the same bucket for every caller.
    pub fn gate_for(&self, dimension: Dimension, resource: &str) -> Arc<TokenBucket> {
        let buckets = self.buckets(dimension);

        if let Some(bucket) = buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource)
        {
            return Arc::clone(bucket);
        }

        let capacity = self.table.lookup(resource).limit(dimension);
        let mut buckets = buckets.write().unwrap_or_else(PoisonError::into_inner);
        // Re-checked under the write lock: a racing caller may have installed one.
        let bucket = buckets.entry(resource.to_owned()).or_insert_with(|| {
            debug!(
                resource,
                %dimension,
                capacity,
                provider = %self.table.provider(),
                "creating quota gate"
            );
            if capacity == 0 {
                Arc::clone(&self.disabled)
            } else {
                Arc::new(TokenBucket::per_minute(capacity))
            }
        });
        Arc::clone(bucket)
    }

    /// Returns how many keys have a bucket for `dimension`.
    pub fn len(&self, dimension: Dimension) -> usize {
        self.buckets(dimension)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if no key has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.len(Dimension::Requests) == 0 && self.len(Dimension::Units) == 0
    }

    fn buckets(&self, dimension: Dimension) -> &Buckets {
        match dimension {
            Dimension::Requests => &self.requests,
            Dimension::Units => &self.units,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::{models, Provider, Quota};
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_starts_empty() {
        let registry = GateRegistry::new(QuotaTable::for_provider(Provider::Azure));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_bucket_sized_from_table() {
        let registry = GateRegistry::new(QuotaTable::for_provider(Provider::Azure));
        let requests = registry.gate_for(Dimension::Requests, models::GPT4);
        let units = registry.gate_for(Dimension::Units, models::GPT4);
        assert_eq!(requests.capacity(), 18);
        assert_eq!(units.capacity(), 10_000);

        let default = registry.gate_for(Dimension::Units, "unlisted");
        assert_eq!(default.capacity(), 120_000);
        assert_eq!(registry.len(Dimension::Units), 2);
        assert_eq!(registry.len(Dimension::Requests), 1);
    }

    #[test]
    fn test_same_bucket_on_repeat_lookup() {
        let registry = GateRegistry::new(QuotaTable::for_provider(Provider::OpenAi));
        let first = registry.gate_for(Dimension::Requests, models::GPT4);
        assert!(first.try_acquire(10).unwrap());
        let second = registry.gate_for(Dimension::Requests, models::GPT4);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.available().floor(), 190.0);
    }

    #[test]
    fn test_dimensions_are_independent() {
        let registry = GateRegistry::new(QuotaTable::for_provider(Provider::OpenAi));
        let requests = registry.gate_for(Dimension::Requests, models::GPT4);
        let units = registry.gate_for(Dimension::Units, models::GPT4);
        assert!(!Arc::ptr_eq(&requests, &units));
    }

    #[test]
    fn test_disabled_dimension_uses_pass_through_bucket() {
        let table = QuotaTable::for_provider(Provider::Custom)
            .with_override("local", Quota::new(60, 0))
            .unwrap();
        let registry = GateRegistry::new(table);
        assert!(registry.gate_for(Dimension::Requests, "local").is_limited());
        let units = registry.gate_for(Dimension::Units, "local");
        assert!(!units.is_limited());
        assert!(units.try_acquire(1_000_000).unwrap());
        assert!(!registry.gate_for(Dimension::Requests, "other").is_limited());
    }

    #[test]
    fn test_concurrent_first_use_installs_one_bucket() {
        let start = Instant::now();
        let registry = Arc::new(GateRegistry::new(QuotaTable::for_provider(Provider::Azure)));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let bucket = registry.gate_for(Dimension::Requests, models::GPT3_DOT5_TURBO);
                    assert!(bucket.try_acquire(1).unwrap());
                    bucket
                })
            })
            .collect();
        let buckets: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for bucket in &buckets[1..] {
            assert!(Arc::ptr_eq(&buckets[0], bucket));
        }
        assert_eq!(registry.len(Dimension::Requests), 1);
        // Every thread's charge landed on the one surviving bucket. The clock
        // is real here, so allow for 5 units per second of refill.
        let refill = 5.0 * start.elapsed().as_secs_f64();
        assert!(buckets[0].available() <= 300.0 - 16.0 + refill + 1e-6);
    }
}
