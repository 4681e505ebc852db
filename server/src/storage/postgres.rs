//! `PostgreSQL` storage backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::warn;
use zperm_common::{
    normalize_name, EntityKind, Membership, MetadataEntry, PermissionEntity, PermissionGrant,
};

use super::{EntityStore, Storage, StoreError, TransactionStrategy};

/// Plain strategy at the server's default isolation, retrying strategy at
/// `SERIALIZABLE` so concurrent writers surface as `40001`.
pub fn pg_storage(pool: PgPool, max_attempts: u32) -> Storage<PgTransactionStrategy> {
    Storage::new(
        PgTransactionStrategy::new(pool.clone()),
        PgTransactionStrategy::serializable(pool),
        max_attempts,
    )
}

/// Runs units of work in `PostgreSQL` transactions.
#[derive(Debug, Clone)]
pub struct PgTransactionStrategy {
    pool: PgPool,
    serializable: bool,
}

impl PgTransactionStrategy {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self {
            pool,
            serializable: false,
        }
    }

    #[must_use]
    pub const fn serializable(pool: PgPool) -> Self {
        Self {
            pool,
            serializable: true,
        }
    }
}

impl TransactionStrategy for PgTransactionStrategy {
    type Store = PgEntityStore;

    fn execute<T, F>(&self, mut work: F) -> impl Future<Output = Result<T, StoreError>> + Send
    where
        T: Send,
        F: for<'t> FnMut(&'t mut Self::Store) -> BoxFuture<'t, Result<T, StoreError>> + Send,
    {
        async move {
            let tx = self.pool.begin().await?;
            let mut store = PgEntityStore { tx };

            if self.serializable {
                sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
                    .execute(&mut *store.tx)
                    .await?;
            }

            match work(&mut store).await {
                Ok(value) => {
                    store.tx.commit().await?;
                    Ok(value)
                }
                Err(e) => {
                    if let Err(rollback_err) = store.tx.rollback().await {
                        warn!(error = %rollback_err, "Failed to roll back transaction");
                    }
                    Err(e)
                }
            }
        }
    }
}

/// Transaction-scoped handle on the `PostgreSQL` store.
pub struct PgEntityStore {
    tx: Transaction<'static, Postgres>,
}

#[derive(FromRow)]
struct EntityRow {
    display_name: String,
    is_group: bool,
    priority: i32,
    parent: Option<String>,
}

impl From<EntityRow> for PermissionEntity {
    fn from(row: EntityRow) -> Self {
        Self {
            display_name: row.display_name,
            kind: EntityKind::from_is_group(row.is_group),
            priority: row.priority,
            parent: row.parent,
        }
    }
}

#[derive(FromRow)]
struct MembershipRow {
    member: String,
    group_name: String,
    expiration: Option<DateTime<Utc>>,
}

impl From<MembershipRow> for Membership {
    fn from(row: MembershipRow) -> Self {
        Self {
            member: row.member,
            group: row.group_name,
            expiration: row.expiration,
        }
    }
}

#[derive(FromRow)]
struct GrantRow {
    region: String,
    world: String,
    permission: String,
    value: bool,
}

impl From<GrantRow> for PermissionGrant {
    fn from(row: GrantRow) -> Self {
        Self {
            region: Some(row.region).filter(|r| !r.is_empty()),
            world: Some(row.world).filter(|w| !w.is_empty()),
            permission: row.permission,
            value: row.value,
        }
    }
}

impl PgEntityStore {
    /// Id of an entity, inserting it first if needed.
    async fn ensure_id(&mut self, name: &str, kind: EntityKind) -> Result<i64, StoreError> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let id = sqlx::query_scalar(
            r"
            INSERT INTO entities (name, display_name, is_group)
            VALUES ($1, $2, $3)
            ON CONFLICT (name, is_group) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            ",
        )
        .bind(normalize_name(name))
        .bind(name)
        .bind(kind.is_group())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }
}

impl EntityStore for PgEntityStore {
    async fn list_names(&mut self, kind: EntityKind) -> Result<Vec<String>, StoreError> {
        let names = sqlx::query_scalar(
            "SELECT display_name FROM entities WHERE is_group = $1 ORDER BY name",
        )
        .bind(kind.is_group())
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(names)
    }

    async fn list_entities(&mut self, kind: EntityKind) -> Result<Vec<PermissionEntity>, StoreError> {
        let rows: Vec<EntityRow> = sqlx::query_as(
            r"
            SELECT e.display_name, e.is_group, e.priority, p.display_name AS parent
            FROM entities e
            LEFT JOIN entities p ON p.id = e.parent_id
            WHERE e.is_group = $1
            ORDER BY e.name
            ",
        )
        .bind(kind.is_group())
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete_entity(&mut self, name: &str, kind: EntityKind) -> Result<bool, StoreError> {
        // Foreign keys cascade to entries, metadata and memberships and clear
        // parent links.
        let result = sqlx::query("DELETE FROM entities WHERE name = $1 AND is_group = $2")
            .bind(normalize_name(name))
            .bind(kind.is_group())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_groups_of(&mut self, player: &str) -> Result<Vec<Membership>, StoreError> {
        let rows: Vec<MembershipRow> = sqlx::query_as(
            r"
            SELECT p.display_name AS member, g.display_name AS group_name, m.expiration
            FROM memberships m
            JOIN entities p ON p.id = m.member_id
            JOIN entities g ON g.id = m.group_id
            WHERE p.name = $1 AND p.is_group = FALSE
            ORDER BY g.priority, g.name
            ",
        )
        .bind(normalize_name(player))
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_or_create_entity(
        &mut self,
        name: &str,
        kind: EntityKind,
    ) -> Result<PermissionEntity, StoreError> {
        let id = self.ensure_id(name, kind).await?;
        let row: EntityRow = sqlx::query_as(
            r"
            SELECT e.display_name, e.is_group, e.priority, p.display_name AS parent
            FROM entities e
            LEFT JOIN entities p ON p.id = e.parent_id
            WHERE e.id = $1
            ",
        )
        .bind(id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.into())
    }

    async fn set_permission(
        &mut self,
        name: &str,
        kind: EntityKind,
        grant: &PermissionGrant,
    ) -> Result<(), StoreError> {
        let id = self.ensure_id(name, kind).await?;
        sqlx::query(
            r"
            INSERT INTO entries (entity_id, region, world, permission, value)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (entity_id, region, world, permission)
            DO UPDATE SET value = EXCLUDED.value
            ",
        )
        .bind(id)
        .bind(grant.region.as_deref().map(normalize_name).unwrap_or_default())
        .bind(grant.world.as_deref().map(normalize_name).unwrap_or_default())
        .bind(normalize_name(&grant.permission))
        .bind(grant.value)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_permissions(
        &mut self,
        name: &str,
        kind: EntityKind,
    ) -> Result<Vec<PermissionGrant>, StoreError> {
        let rows: Vec<GrantRow> = sqlx::query_as(
            r"
            SELECT en.region, en.world, en.permission, en.value
            FROM entries en
            JOIN entities e ON e.id = en.entity_id
            WHERE e.name = $1 AND e.is_group = $2
            ORDER BY en.region, en.world, en.permission
            ",
        )
        .bind(normalize_name(name))
        .bind(kind.is_group())
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn set_metadata(
        &mut self,
        name: &str,
        kind: EntityKind,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let id = self.ensure_id(name, kind).await?;
        sqlx::query(
            r"
            INSERT INTO metadata (entity_id, name, display_name, value)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (entity_id, name)
            DO UPDATE SET display_name = EXCLUDED.display_name, value = EXCLUDED.value
            ",
        )
        .bind(id)
        .bind(normalize_name(key))
        .bind(key)
        .bind(value)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_metadata(
        &mut self,
        name: &str,
        kind: EntityKind,
    ) -> Result<Vec<MetadataEntry>, StoreError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r"
            SELECT md.display_name, md.value
            FROM metadata md
            JOIN entities e ON e.id = md.entity_id
            WHERE e.name = $1 AND e.is_group = $2
            ORDER BY md.name
            ",
        )
        .bind(normalize_name(name))
        .bind(kind.is_group())
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(key, value)| MetadataEntry { key, value })
            .collect())
    }

    async fn add_member(
        &mut self,
        group: &str,
        player: &str,
        expiration: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let group_id = self.ensure_id(group, EntityKind::Group).await?;
        let member_id = self.ensure_id(player, EntityKind::Player).await?;
        sqlx::query(
            r"
            INSERT INTO memberships (member_id, group_id, expiration)
            VALUES ($1, $2, $3)
            ON CONFLICT (member_id, group_id) DO UPDATE SET expiration = EXCLUDED.expiration
            ",
        )
        .bind(member_id)
        .bind(group_id)
        .bind(expiration)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_members(&mut self, group: &str) -> Result<Vec<Membership>, StoreError> {
        let rows: Vec<MembershipRow> = sqlx::query_as(
            r"
            SELECT p.display_name AS member, g.display_name AS group_name, m.expiration
            FROM memberships m
            JOIN entities p ON p.id = m.member_id
            JOIN entities g ON g.id = m.group_id
            WHERE g.name = $1 AND g.is_group = TRUE
            ORDER BY p.name
            ",
        )
        .bind(normalize_name(group))
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn set_priority(&mut self, group: &str, priority: i32) -> Result<(), StoreError> {
        let id = self.ensure_id(group, EntityKind::Group).await?;
        sqlx::query("UPDATE entities SET priority = $2 WHERE id = $1")
            .bind(id)
            .bind(priority)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn set_parent(&mut self, group: &str, parent: Option<&str>) -> Result<(), StoreError> {
        if parent.is_some_and(|parent| normalize_name(parent) == normalize_name(group)) {
            return Err(StoreError::Invalid(format!(
                "group {group} cannot be its own parent"
            )));
        }

        let id = self.ensure_id(group, EntityKind::Group).await?;
        let parent_id = match parent {
            Some(parent) => Some(self.ensure_id(parent, EntityKind::Group).await?),
            None => None,
        };
        sqlx::query("UPDATE entities SET parent_id = $2 WHERE id = $1")
            .bind(id)
            .bind(parent_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}
