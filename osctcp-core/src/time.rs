//! Deadlines for socket operations.
//!
//! Per-operation read and write timeouts go through [`TimeProvider`], so the
//! clock that enforces them is swappable along with the socket layer.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// A deadline passed before the guarded operation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline elapsed")]
pub struct TimeError;

/// Enforces deadlines on futures.
#[async_trait(?Send)]
pub trait TimeProvider: Clone {
    /// Drive `future` for at most `duration`.
    ///
    /// The future is dropped, not completed, when the deadline passes.
    async fn timeout<F, T>(&self, duration: Duration, future: F) -> Result<T, TimeError>
    where
        F: Future<Output = T>;
}

/// Deadlines on the tokio clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimeProvider;

#[async_trait(?Send)]
impl TimeProvider for TokioTimeProvider {
    async fn timeout<F, T>(&self, duration: Duration, future: F) -> Result<T, TimeError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(duration, future)
            .await
            .map_err(|_| TimeError)
    }
}
