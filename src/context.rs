// SPDX-License-Identifier: Apache-2.0

//! Caller-supplied cancellation and deadline signal.
//!
//! Every wait observes a [`Context`]. Cancelling it, or letting its deadline
//! pass, makes a pending wait return promptly without charging any bucket.

use crate::error::Error;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation token plus an optional deadline.
///
/// Cloning a context shares the underlying token: cancelling any clone
/// cancels all of them. Use [`Context::child`] for a context that can be
/// cancelled independently of its parent.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context with no deadline that is only done when cancelled explicitly.
    pub fn background() -> Self {
        Self::default()
    }

    /// A fresh context with no deadline, paired with the token that cancels it.
    ///
    /// The token can be handed to code that never sees the context, such as
    /// a shutdown handler.
    pub fn with_cancel() -> (Self, CancellationToken) {
        let token = CancellationToken::new();
        (Self::from_token(token.clone()), token)
    }

    /// A context that ends after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context that ends at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Wraps an existing cancellation token.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// A child context: cancelled with its parent, but cancelling the child
    /// leaves the parent untouched.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// A child context whose deadline is at most `timeout` from now.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let limit = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < limit => parent,
            _ => limit,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Cancels this context and every child derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns the deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the reason this context is done, or `None` while it is live.
    pub fn err(&self) -> Option<Error> {
        if self.token.is_cancelled() {
            return Some(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    /// Returns true once the context is cancelled or past its deadline.
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves when the context ends, yielding the reason.
    pub async fn done(&self) -> Error {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.token.cancelled() => Error::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Error::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                Error::Cancelled
            }
        }
    }
}
