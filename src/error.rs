// SPDX-License-Identifier: Apache-2.0

//! Errors for the quota gate crate.

/// Boxed error returned by external collaborators such as cost estimators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur when waiting for admission.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A caller supplied a value the limiter cannot act on.
    #[error("Invalid argument `{argument}`: {reason}")]
    InvalidArgument {
        /// Name of the offending argument.
        argument: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The request can never be admitted because it is larger than the bucket.
    #[error("Quota exceeds capacity: requested {requested} > capacity {capacity}")]
    QuotaExceedsCapacity {
        /// Requested units.
        requested: u64,

        /// Bucket capacity (the per-minute quota).
        capacity: u64,
    },

    /// The caller's context was cancelled before admission.
    #[error("context canceled")]
    Cancelled,

    /// The caller's deadline passed before admission.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The unit-cost estimator could not price the request.
    #[error("cost estimation failed: {source}")]
    CostEstimation {
        /// Error reported by the estimator.
        #[source]
        source: BoxError,
    },

    /// The limiter configuration is invalid.
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument<S: Into<String>>(argument: &'static str, reason: S) -> Self {
        Self::InvalidArgument {
            argument,
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config_error<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns true when the caller may reasonably try the same call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }

    /// Returns true when the same call can never succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Error::QuotaExceedsCapacity { .. })
    }
}

/// Result type for quota gate operations
pub type Result<T> = std::result::Result<T, Error>;
