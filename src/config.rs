// SPDX-License-Identifier: Apache-2.0

//! Configuration for the rate limiter.

use crate::error::Error;
use crate::limiter::RateLimiter;
use crate::quota::{Provider, Quota, QuotaTable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimiterConfig {
    /// When false the surrounding client never consults a limiter.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Selects the published quota table.
    #[serde(default)]
    pub provider: Provider,

    /// Upper bound on any single wait. If not set, only the caller's
    /// context bounds the wait.
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_wait: Option<Duration>,

    /// Replacements for entries of the published table.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<QuotaOverride>,
}

/// Quota replacement for one resource key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct QuotaOverride {
    /// Resource key (model or deployment name).
    pub resource: String,

    /// Calls per minute; absent keeps the published value.
    #[serde(default)]
    pub requests_per_minute: Option<u64>,

    /// Units per minute; absent keeps the published value.
    #[serde(default)]
    pub units_per_minute: Option<u64>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            provider: Provider::default(),
            max_wait: None,
            overrides: Vec::new(),
        }
    }
}

impl RateLimiterConfig {
    /// Create a configuration enforcing the quotas of `provider`.
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            ..Self::default()
        }
    }

    /// Set the maximum wait.
    #[must_use]
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Parses a YAML (or JSON) document.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the document is malformed or fails validation.
    pub fn from_yaml_str(input: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(input)
            .map_err(|e| Error::config_error(format!("YAML error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values no limiter can honor.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` describing the first problem found.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_wait == Some(Duration::ZERO) {
            return Err(Error::config_error("max_wait must be greater than zero"));
        }
        for (index, entry) in self.overrides.iter().enumerate() {
            if entry.resource.is_empty() {
                return Err(Error::config_error(format!(
                    "overrides[{index}]: resource must not be empty"
                )));
            }
            if self.overrides[..index]
                .iter()
                .any(|previous| previous.resource == entry.resource)
            {
                return Err(Error::config_error(format!(
                    "overrides[{index}]: duplicate resource `{}`",
                    entry.resource
                )));
            }
        }
        Ok(())
    }

    /// Builds the quota table: published values with overrides applied.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if validation fails.
    pub fn quota_table(&self) -> Result<QuotaTable, Error> {
        self.validate()?;
        self.overrides
            .iter()
            .try_fold(QuotaTable::for_provider(self.provider), |table, entry| {
                let published = table.lookup(&entry.resource);
                let quota = Quota::new(
                    entry
                        .requests_per_minute
                        .unwrap_or(published.requests_per_minute),
                    entry.units_per_minute.unwrap_or(published.units_per_minute),
                );
                table.with_override(&entry.resource, quota)
            })
    }
}

impl RateLimiter {
    /// Builds a limiter from configuration, or `None` when limiting is disabled.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the configuration is invalid.
    pub fn from_config(config: &RateLimiterConfig) -> Result<Option<Self>, Error> {
        if !config.enabled {
            return Ok(None);
        }
        let limiter = RateLimiter::with_table(config.quota_table()?);
        Ok(Some(match config.max_wait {
            Some(max_wait) => limiter.with_max_wait(max_wait),
            None => limiter,
        }))
    }
}

fn default_enabled() -> bool {
    true
}
