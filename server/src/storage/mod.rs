//! Storage Layer
//!
//! The [`EntityStore`] contract and the transaction strategies that hand it
//! out. A store handle only exists inside a unit of work run by a
//! [`TransactionStrategy`], so every read and write is transactional.
//!
//! Backends:
//! - [`postgres`]: `PostgreSQL` via sqlx
//! - [`memory`]: in-process, optimistic commit

pub mod memory;
pub mod postgres;
mod transaction;

use std::future::Future;

use chrono::{DateTime, Utc};
use zperm_common::{EntityKind, Membership, MetadataEntry, PermissionEntity, PermissionGrant};

pub use transaction::{RetryingTransactionStrategy, TransactionStrategy, DEFAULT_MAX_ATTEMPTS};

/// `PostgreSQL` SQLSTATE for `serialization_failure`.
const PG_SERIALIZATION_FAILURE: &str = "40001";
/// `PostgreSQL` SQLSTATE for `deadlock_detected`.
const PG_DEADLOCK_DETECTED: &str = "40P01";

/// Storage error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Concurrent activity invalidated the transaction. Safe to retry.
    #[error("Transaction conflicted with a concurrent writer")]
    Conflict,

    /// A retrying strategy gave up.
    #[error("Transaction failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<StoreError>,
    },

    /// Write rejected by the store.
    #[error("Invalid operation: {0}")]
    Invalid(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Whether re-running the whole unit of work may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Conflict => true,
            Self::Database(sqlx::Error::Database(db_err)) => matches!(
                db_err.code().as_deref(),
                Some(PG_SERIALIZATION_FAILURE | PG_DEADLOCK_DETECTED)
            ),
            _ => false,
        }
    }
}

/// Persistence contract for entities, memberships, grants and metadata.
///
/// Names are matched case-insensitively; stored display names keep the case
/// they were first written with. Implementations are transaction-scoped
/// handles: nothing is visible to other transactions until the owning
/// [`TransactionStrategy`] commits.
pub trait EntityStore: Send {
    /// Display names of every entity of `kind`, ordered by folded name.
    fn list_names(
        &mut self,
        kind: EntityKind,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Every entity of `kind`, ordered by folded name.
    fn list_entities(
        &mut self,
        kind: EntityKind,
    ) -> impl Future<Output = Result<Vec<PermissionEntity>, StoreError>> + Send;

    /// Delete an entity with its grants, metadata and memberships.
    ///
    /// Returns `false` when there was nothing to delete; that is not an error.
    fn delete_entity(
        &mut self,
        name: &str,
        kind: EntityKind,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// A player's memberships, lowest priority first.
    fn list_groups_of(
        &mut self,
        player: &str,
    ) -> impl Future<Output = Result<Vec<Membership>, StoreError>> + Send;

    /// Look up an entity, creating it if absent.
    fn get_or_create_entity(
        &mut self,
        name: &str,
        kind: EntityKind,
    ) -> impl Future<Output = Result<PermissionEntity, StoreError>> + Send;

    /// Set (or overwrite) a permission on an entity, creating the entity.
    ///
    /// Permission, world and region are stored case-folded.
    fn set_permission(
        &mut self,
        name: &str,
        kind: EntityKind,
        grant: &PermissionGrant,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Grants on an entity; empty when the entity does not exist.
    fn list_permissions(
        &mut self,
        name: &str,
        kind: EntityKind,
    ) -> impl Future<Output = Result<Vec<PermissionGrant>, StoreError>> + Send;

    /// Set (or overwrite) a metadata value, creating the entity.
    fn set_metadata(
        &mut self,
        name: &str,
        kind: EntityKind,
        key: &str,
        value: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Metadata on an entity, ordered by folded key.
    fn list_metadata(
        &mut self,
        name: &str,
        kind: EntityKind,
    ) -> impl Future<Output = Result<Vec<MetadataEntry>, StoreError>> + Send;

    /// Add `player` to `group`, creating either if absent. Re-adding an
    /// existing member replaces its expiration.
    fn add_member(
        &mut self,
        group: &str,
        player: &str,
        expiration: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Members of a group, ordered by folded player name.
    fn list_members(
        &mut self,
        group: &str,
    ) -> impl Future<Output = Result<Vec<Membership>, StoreError>> + Send;

    /// Set a group's weight, creating the group.
    fn set_priority(
        &mut self,
        group: &str,
        priority: i32,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Set or clear a group's parent, creating both groups.
    fn set_parent(
        &mut self,
        group: &str,
        parent: Option<&str>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// The plain and retrying strategies over one backend.
#[derive(Debug, Clone)]
pub struct Storage<T> {
    transactions: T,
    retrying: RetryingTransactionStrategy<T>,
}

impl<T: TransactionStrategy> Storage<T> {
    /// Pair a plain strategy with a retrying wrapper around `retry_base`.
    ///
    /// Backends that detect conflicts only at a stricter isolation level pass
    /// a differently configured strategy as `retry_base`.
    pub fn new(transactions: T, retry_base: T, max_attempts: u32) -> Self {
        Self {
            transactions,
            retrying: RetryingTransactionStrategy::new(retry_base, max_attempts),
        }
    }

    /// Single-attempt strategy for reads and idempotent work.
    pub const fn transaction_strategy(&self) -> &T {
        &self.transactions
    }

    /// Strategy for destructive multi-row work.
    pub const fn retrying_transaction_strategy(&self) -> &RetryingTransactionStrategy<T> {
        &self.retrying
    }
}

impl<T: TransactionStrategy + Clone> Storage<T> {
    /// Use the same strategy for both paths.
    pub fn with_attempts(transactions: T, max_attempts: u32) -> Self {
        let retry_base = transactions.clone();
        Self::new(transactions, retry_base, max_attempts)
    }
}
