// SPDX-License-Identifier: Apache-2.0

//! Published per-minute quotas, keyed by provider and model.
//!
//! This is the only place that knows about individual models. Numbers come
//! from the providers' quota documentation:
//! - <https://learn.microsoft.com/en-us/azure/cognitive-services/openai/quotas-limits#quotas-and-limits-reference>
//! - <https://platform.openai.com/docs/guides/rate-limits/overview>

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Well-known model identifiers.
pub mod models {
    /// `davinci`
    pub const GPT3_DAVINCI: &str = "davinci";
    /// `text-embedding-ada-002`
    pub const TEXT_EMBEDDING_ADA_002: &str = "text-embedding-ada-002";
    /// `gpt-3.5-turbo`
    pub const GPT3_DOT5_TURBO: &str = "gpt-3.5-turbo";
    /// `gpt-3.5-turbo-0301`
    pub const GPT3_DOT5_TURBO_0301: &str = "gpt-3.5-turbo-0301";
    /// `gpt-3.5-turbo-0613`
    pub const GPT3_DOT5_TURBO_0613: &str = "gpt-3.5-turbo-0613";
    /// `gpt-3.5-turbo-16k`
    pub const GPT3_DOT5_TURBO_16K: &str = "gpt-3.5-turbo-16k";
    /// `gpt-3.5-turbo-16k-0613`
    pub const GPT3_DOT5_TURBO_16K_0613: &str = "gpt-3.5-turbo-16k-0613";
    /// `gpt-4`
    pub const GPT4: &str = "gpt-4";
    /// `gpt-4-0314`
    pub const GPT4_0314: &str = "gpt-4-0314";
    /// `gpt-4-32k`
    pub const GPT4_32K: &str = "gpt-4-32k";
    /// `gpt-4-32k-0314`
    pub const GPT4_32K_0314: &str = "gpt-4-32k-0314";
    /// `gpt-4-turbo-preview`
    pub const GPT4_TURBO_PREVIEW: &str = "gpt-4-turbo-preview";
}

use models::*;

/// Which quota table governs a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// The hosted OpenAI API.
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    /// Azure OpenAI authenticated with an API key.
    Azure,
    /// Azure OpenAI authenticated with Azure AD. Shares the Azure quotas.
    AzureAd,
    /// A custom or self-hosted deployment with no known quotas.
    Custom,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::OpenAi => "openai",
            Provider::Azure => "azure",
            Provider::AzureAd => "azure_ad",
            Provider::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// Per-minute limits for one resource key. Zero disables a dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quota {
    /// Calls admitted per minute.
    pub requests_per_minute: u64,
    /// Consumed units (tokens) admitted per minute.
    pub units_per_minute: u64,
}

impl Quota {
    /// Both dimensions disabled.
    pub const UNLIMITED: Quota = Quota::new(0, 0);

    /// Creates a quota from per-minute limits.
    pub const fn new(requests_per_minute: u64, units_per_minute: u64) -> Self {
        Self {
            requests_per_minute,
            units_per_minute,
        }
    }

    /// Returns the limit for one dimension.
    pub fn limit(&self, dimension: Dimension) -> u64 {
        match dimension {
            Dimension::Requests => self.requests_per_minute,
            Dimension::Units => self.units_per_minute,
        }
    }
}

/// One of the two independently gated resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    /// Number of calls.
    Requests,
    /// Number of consumed units.
    Units,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Requests => f.write_str("requests"),
            Dimension::Units => f.write_str("units"),
        }
    }
}

const AZURE_DEFAULT: Quota = Quota::new(300, 120_000);

const AZURE_QUOTAS: &[(&str, Quota)] = &[
    (GPT3_DAVINCI, Quota::new(120, 40_000)),
    (GPT3_DOT5_TURBO, Quota::new(300, 120_000)),
    (GPT3_DOT5_TURBO_0301, Quota::new(300, 120_000)),
    (GPT4, Quota::new(18, 10_000)),
    (GPT4_32K, Quota::new(18, 32_000)),
];

const OPENAI_DEFAULT: Quota = Quota::new(3_500, 350_000);

const OPENAI_QUOTAS: &[(&str, Quota)] = &[
    (GPT3_DAVINCI, Quota::new(3_500, 350_000)),
    (TEXT_EMBEDDING_ADA_002, Quota::new(3_500, 350_000 * 200)),
    (GPT3_DOT5_TURBO, Quota::new(3_500, 90_000)),
    (GPT3_DOT5_TURBO_0301, Quota::new(3_500, 90_000)),
    (GPT3_DOT5_TURBO_0613, Quota::new(3_500, 90_000)),
    (GPT3_DOT5_TURBO_16K, Quota::new(2_000, 180_000)),
    (GPT3_DOT5_TURBO_16K_0613, Quota::new(2_000, 180_000)),
    (GPT4, Quota::new(200, 10_000)),
    (GPT4_0314, Quota::new(200, 10_000)),
    (GPT4_32K, Quota::new(20, 150_000)),
    (GPT4_32K_0314, Quota::new(20, 150_000)),
    (GPT4_TURBO_PREVIEW, Quota::new(500, 150_000)),
];

const NO_QUOTAS: &[(&str, Quota)] = &[];

/// Resolves the quota for a resource key.
///
/// Lookup order: exact key, then the provider default. A custom provider
/// has neither and resolves every key to [`Quota::UNLIMITED`].
#[derive(Debug, Clone)]
pub struct QuotaTable {
    provider: Provider,
    entries: HashMap<String, Quota>,
    default: Option<Quota>,
}

impl QuotaTable {
    /// Builds the published table for `provider`.
    pub fn for_provider(provider: Provider) -> Self {
        let (entries, default) = match provider {
            Provider::OpenAi => (OPENAI_QUOTAS, Some(OPENAI_DEFAULT)),
            Provider::Azure | Provider::AzureAd => (AZURE_QUOTAS, Some(AZURE_DEFAULT)),
            Provider::Custom => (NO_QUOTAS, None),
        };
        Self {
            provider,
            entries: entries
                .iter()
                .map(|(key, quota)| ((*key).to_owned(), *quota))
                .collect(),
            default,
        }
    }

    /// Returns the provider this table was built for.
    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Returns false when no key can ever be limited.
    pub fn is_limited(&self) -> bool {
        self.default.is_some() || !self.entries.is_empty()
    }

    /// Returns the quota governing `resource`.
    pub fn lookup(&self, resource: &str) -> Quota {
        self.entries
            .get(resource)
            .copied()
            .or(self.default)
            .unwrap_or(Quota::UNLIMITED)
    }

    /// Replaces the quota for `resource`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if `resource` is empty.
    pub fn with_override(mut self, resource: &str, quota: Quota) -> Result<Self, Error> {
        if resource.is_empty() {
            return Err(Error::invalid_argument(
                "resource",
                "quota overrides need a resource key",
            ));
        }
        let _ = self.entries.insert(resource.to_owned(), quota);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let table = QuotaTable::for_provider(Provider::Azure);
        assert_eq!(table.lookup(GPT4), Quota::new(18, 10_000));
        assert_eq!(table.lookup(GPT3_DOT5_TURBO), Quota::new(300, 120_000));

        let table = QuotaTable::for_provider(Provider::OpenAi);
        assert_eq!(table.lookup(GPT4_TURBO_PREVIEW), Quota::new(500, 150_000));
        assert_eq!(
            table.lookup(TEXT_EMBEDDING_ADA_002).units_per_minute,
            70_000_000
        );
    }

    #[test]
    fn test_default_for_unknown_key() {
        let table = QuotaTable::for_provider(Provider::Azure);
        assert_eq!(table.lookup("my-deployment"), Quota::new(300, 120_000));

        let table = QuotaTable::for_provider(Provider::OpenAi);
        assert_eq!(table.lookup("my-model"), Quota::new(3_500, 350_000));
    }

    #[test]
    fn test_azure_ad_shares_azure_table() {
        let azure = QuotaTable::for_provider(Provider::Azure);
        let azure_ad = QuotaTable::for_provider(Provider::AzureAd);
        for key in [GPT3_DAVINCI, GPT4, GPT4_32K, "other"] {
            assert_eq!(azure.lookup(key), azure_ad.lookup(key));
        }
    }

    #[test]
    fn test_custom_provider_is_unlimited() {
        let table = QuotaTable::for_provider(Provider::Custom);
        assert!(!table.is_limited());
        assert_eq!(table.lookup(GPT4), Quota::UNLIMITED);
    }

    #[test]
    fn test_override_replaces_entry() {
        let table = QuotaTable::for_provider(Provider::OpenAi)
            .with_override(GPT4, Quota::new(10_000, 2_000_000))
            .unwrap();
        assert_eq!(table.lookup(GPT4), Quota::new(10_000, 2_000_000));
        assert_eq!(table.lookup(GPT4_0314), Quota::new(200, 10_000));

        assert!(QuotaTable::for_provider(Provider::OpenAi)
            .with_override("", Quota::UNLIMITED)
            .is_err());
    }

    #[test]
    fn test_provider_serde_names() {
        let provider: Provider = serde_yaml::from_str("openai").unwrap();
        assert_eq!(provider, Provider::OpenAi);
        let provider: Provider = serde_yaml::from_str("azure_ad").unwrap();
        assert_eq!(provider, Provider::AzureAd);
        assert_eq!(Provider::Custom.to_string(), "custom");
    }
}
