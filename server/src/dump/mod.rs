//! Model Dump and Replay
//!
//! [`ModelDumper`] writes the whole entity graph to a file; [`CommandReplay`]
//! applies such a file back to the store. The administrator only sees these
//! two traits, so the file format stays private to this module.

mod replay;

use std::path::Path;

use futures::future::BoxFuture;
use tracing::info;
use zperm_common::{DumpRecord, EntityKind};

use crate::storage::{EntityStore, Storage, StoreError, TransactionStrategy};

pub use replay::{apply_record, CommandReplay, ScriptReplayer};

/// Export failure.
#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("Failed to read model: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to encode dump: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to write dump: {0}")]
    Io(#[from] std::io::Error),
}

/// Serializes the entity graph to a file.
pub trait ModelDumper<T: TransactionStrategy>: Send + Sync {
    fn dump<'a>(
        &'a self,
        storage: &'a Storage<T>,
        path: &'a Path,
    ) -> BoxFuture<'a, Result<(), DumpError>>;
}

/// Writes dumps as JSON lines of [`DumpRecord`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonModelDumper;

impl<T: TransactionStrategy> ModelDumper<T> for JsonModelDumper {
    fn dump<'a>(
        &'a self,
        storage: &'a Storage<T>,
        path: &'a Path,
    ) -> BoxFuture<'a, Result<(), DumpError>> {
        Box::pin(async move {
            let records = storage
                .transaction_strategy()
                .execute(|store| Box::pin(async move { collect_records(store).await }))
                .await?;

            let mut contents = String::new();
            for record in &records {
                contents.push_str(&record.to_line()?);
                contents.push('\n');
            }
            tokio::fs::write(path, contents).await?;

            info!(path = %path.display(), records = records.len(), "Model dumped");
            Ok(())
        })
    }
}

/// Read the whole graph as an ordered list of records.
///
/// Groups and their hierarchy come first so that replaying a player's
/// memberships never has to create a group implicitly.
pub async fn collect_records<S: EntityStore>(
    store: &mut S,
) -> Result<Vec<DumpRecord>, StoreError> {
    let mut records = Vec::new();

    let groups = store.list_entities(EntityKind::Group).await?;
    for group in &groups {
        records.push(DumpRecord::CreateEntity {
            name: group.display_name.clone(),
            kind: EntityKind::Group,
        });
        if group.priority != 0 {
            records.push(DumpRecord::SetPriority {
                group: group.display_name.clone(),
                priority: group.priority,
            });
        }
    }
    for group in &groups {
        if let Some(parent) = &group.parent {
            records.push(DumpRecord::SetParent {
                group: group.display_name.clone(),
                parent: Some(parent.clone()),
            });
        }
    }
    for group in &groups {
        entity_details(store, &group.display_name, EntityKind::Group, &mut records).await?;
    }

    let players = store.list_names(EntityKind::Player).await?;
    for player in &players {
        records.push(DumpRecord::CreateEntity {
            name: player.clone(),
            kind: EntityKind::Player,
        });
        entity_details(store, player, EntityKind::Player, &mut records).await?;
    }

    for group in &groups {
        for membership in store.list_members(&group.display_name).await? {
            records.push(DumpRecord::AddMember {
                group: membership.group,
                player: membership.member,
                expiration: membership.expiration,
            });
        }
    }

    Ok(records)
}

async fn entity_details<S: EntityStore>(
    store: &mut S,
    name: &str,
    kind: EntityKind,
    records: &mut Vec<DumpRecord>,
) -> Result<(), StoreError> {
    for grant in store.list_permissions(name, kind).await? {
        records.push(DumpRecord::SetPermission {
            name: name.to_string(),
            kind,
            grant,
        });
    }
    for entry in store.list_metadata(name, kind).await? {
        records.push(DumpRecord::SetMetadata {
            name: name.to_string(),
            kind,
            key: entry.key,
            value: entry.value,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use zperm_common::{parse_dump, PermissionGrant};

    use super::*;
    use crate::storage::memory::MemoryTransactionStrategy;

    async fn seeded() -> Storage<MemoryTransactionStrategy> {
        let storage = Storage::with_attempts(MemoryTransactionStrategy::new(), 5);
        storage
            .transaction_strategy()
            .execute_without_result(|store| {
                Box::pin(async move {
                    store.add_member("Admins", "Alice", None).await?;
                    store.set_priority("Admins", 10).await?;
                    store.set_parent("Admins", Some("Builders")).await?;
                    store
                        .set_permission("Admins", EntityKind::Group, &PermissionGrant::global("zperm.*", true))
                        .await?;
                    store
                        .set_metadata("Alice", EntityKind::Player, "prefix", "[A]")
                        .await?;
                    Ok(())
                })
            })
            .await
            .unwrap();
        storage
    }

    #[tokio::test]
    async fn test_groups_precede_players_and_memberships_last() {
        let storage = seeded().await;
        let records = storage
            .transaction_strategy()
            .execute(|store| Box::pin(async move { collect_records(store).await }))
            .await
            .unwrap();

        let first_player = records
            .iter()
            .position(|r| matches!(r, DumpRecord::CreateEntity { kind: EntityKind::Player, .. }))
            .unwrap();
        let last_group = records
            .iter()
            .rposition(|r| matches!(r, DumpRecord::CreateEntity { kind: EntityKind::Group, .. }))
            .unwrap();
        assert!(last_group < first_player);
        assert!(matches!(records.last(), Some(DumpRecord::AddMember { .. })));
        assert!(records.contains(&DumpRecord::SetParent {
            group: "Admins".into(),
            parent: Some("Builders".into()),
        }));
    }

    #[tokio::test]
    async fn test_dump_writes_parseable_lines() {
        let storage = seeded().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup1");

        JsonModelDumper.dump(&storage, &path).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let records = parse_dump(&contents).unwrap();
        assert!(records.contains(&DumpRecord::SetMetadata {
            name: "Alice".into(),
            kind: EntityKind::Player,
            key: "prefix".into(),
            value: "[A]".into(),
        }));
    }

    #[tokio::test]
    async fn test_dump_into_missing_directory_is_io_error() {
        let storage = seeded().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("backup1");

        let err = JsonModelDumper.dump(&storage, &path).await.unwrap_err();
        assert!(matches!(err, DumpError::Io(_)));
    }
}
