//! Transaction strategies.

use std::future::Future;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use super::{EntityStore, StoreError};

/// Default bound on attempts made by [`RetryingTransactionStrategy`].
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Runs a unit of work atomically against an [`EntityStore`].
///
/// The work receives the transaction's store handle. If it returns `Ok`, the
/// transaction commits and the value is returned; if it returns `Err`, the
/// transaction rolls back and the error propagates. Work is `FnMut` so that
/// retrying strategies can run it again from scratch; it must not have side
/// effects outside the store.
pub trait TransactionStrategy: Send + Sync {
    /// Transaction-scoped store handle.
    type Store: EntityStore + 'static;

    /// Run `work` in a single transaction and return its result.
    fn execute<T, F>(&self, work: F) -> impl Future<Output = Result<T, StoreError>> + Send
    where
        T: Send,
        F: for<'t> FnMut(&'t mut Self::Store) -> BoxFuture<'t, Result<T, StoreError>> + Send;

    /// Run `work` in a single transaction, discarding its result.
    fn execute_without_result<F>(
        &self,
        work: F,
    ) -> impl Future<Output = Result<(), StoreError>> + Send
    where
        F: for<'t> FnMut(&'t mut Self::Store) -> BoxFuture<'t, Result<(), StoreError>> + Send,
    {
        self.execute(work)
    }
}

/// Re-runs a unit of work in a fresh transaction when it fails with a
/// transient conflict.
///
/// At most `max_attempts` transactions are started. Errors that are not
/// transient are returned from the attempt that raised them.
#[derive(Debug, Clone)]
pub struct RetryingTransactionStrategy<S> {
    inner: S,
    max_attempts: u32,
}

impl<S> RetryingTransactionStrategy<S> {
    /// Wrap `inner`. A bound of zero is treated as one attempt.
    pub fn new(inner: S, max_attempts: u32) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
        }
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub const fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: TransactionStrategy> TransactionStrategy for RetryingTransactionStrategy<S> {
    type Store = S::Store;

    fn execute<T, F>(&self, mut work: F) -> impl Future<Output = Result<T, StoreError>> + Send
    where
        T: Send,
        F: for<'t> FnMut(&'t mut Self::Store) -> BoxFuture<'t, Result<T, StoreError>> + Send,
    {
        async move {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.inner.execute(&mut work).await {
                    Ok(value) => return Ok(value),
                    Err(e) if e.is_transient() && attempt < self.max_attempts => {
                        debug!(attempt, error = %e, "Transaction conflict, retrying");
                    }
                    Err(e) if e.is_transient() => {
                        warn!(attempts = attempt, error = %e, "Transaction retries exhausted");
                        return Err(StoreError::RetriesExhausted {
                            attempts: attempt,
                            source: Box::new(e),
                        });
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use zperm_common::EntityKind;

    use super::*;
    use crate::storage::memory::MemoryTransactionStrategy;

    #[tokio::test]
    async fn test_commits_on_success() {
        let strategy = MemoryTransactionStrategy::new();
        strategy
            .execute_without_result(|store| {
                Box::pin(async move {
                    store.get_or_create_entity("Admins", EntityKind::Group).await?;
                    Ok(())
                })
            })
            .await
            .unwrap();

        let names = strategy
            .execute(|store| Box::pin(async move { store.list_names(EntityKind::Group).await }))
            .await
            .unwrap();
        assert_eq!(names, vec!["Admins".to_string()]);
    }

    #[tokio::test]
    async fn test_rolls_back_on_failure() {
        let strategy = MemoryTransactionStrategy::new();
        let result: Result<(), _> = strategy
            .execute(|store| {
                Box::pin(async move {
                    store.get_or_create_entity("bob", EntityKind::Player).await?;
                    Err(StoreError::Invalid("abort".into()))
                })
            })
            .await;
        assert!(matches!(result, Err(StoreError::Invalid(_))));

        let names = strategy
            .execute(|store| Box::pin(async move { store.list_names(EntityKind::Player).await }))
            .await
            .unwrap();
        assert!(names.is_empty(), "rolled back write must not be visible");
    }

    #[tokio::test]
    async fn test_retries_transient_conflict() {
        let strategy = RetryingTransactionStrategy::new(MemoryTransactionStrategy::new(), 5);
        let calls = AtomicU32::new(0);

        let value = strategy
            .execute(|_store| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move {
                    if n < 2 {
                        Err(StoreError::Conflict)
                    } else {
                        Ok(n)
                    }
                })
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_bounded() {
        let strategy = RetryingTransactionStrategy::new(MemoryTransactionStrategy::new(), 3);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = strategy
            .execute(|_store| {
                calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move { Err(StoreError::Conflict) })
            })
            .await;

        assert!(matches!(
            result,
            Err(StoreError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_not_retried() {
        let strategy = RetryingTransactionStrategy::new(MemoryTransactionStrategy::new(), 5);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = strategy
            .execute(|_store| {
                calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move { Err(StoreError::Invalid("nope".into())) })
            })
            .await;

        assert!(matches!(result, Err(StoreError::Invalid(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        let strategy = RetryingTransactionStrategy::new(MemoryTransactionStrategy::new(), 0);
        assert_eq!(strategy.max_attempts(), 1);
    }
}
