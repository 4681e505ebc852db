//! Dump replay.

use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{error, info};
use zperm_common::{parse_dump, DumpRecord};

use crate::storage::{EntityStore, Storage, StoreError, TransactionStrategy};

/// Replays a dump file as administrative operations.
///
/// Returns `Ok(true)` when every operation applied, `Ok(false)` when the file
/// was readable but could not be applied (details are logged), and `Err`
/// when the file could not be read.
pub trait CommandReplay<T: TransactionStrategy>: Send + Sync {
    fn replay<'a>(
        &'a self,
        storage: &'a Storage<T>,
        actor: &'a str,
        path: &'a Path,
    ) -> BoxFuture<'a, std::io::Result<bool>>;
}

/// Replays JSON-lines dumps written by
/// [`JsonModelDumper`](super::JsonModelDumper).
///
/// The whole file is parsed before the store is touched, then applied in one
/// retrying transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptReplayer;

impl<T: TransactionStrategy> CommandReplay<T> for ScriptReplayer {
    fn replay<'a>(
        &'a self,
        storage: &'a Storage<T>,
        actor: &'a str,
        path: &'a Path,
    ) -> BoxFuture<'a, std::io::Result<bool>> {
        Box::pin(async move {
            let contents = tokio::fs::read_to_string(path).await?;

            let records = match parse_dump(&contents) {
                Ok(records) => Arc::new(records),
                Err(e) => {
                    error!(actor = %actor, path = %path.display(), line = e.line, error = %e.source, "Malformed dump line");
                    return Ok(false);
                }
            };

            let result = storage
                .retrying_transaction_strategy()
                .execute_without_result(|store| {
                    let records = Arc::clone(&records);
                    Box::pin(async move {
                        for record in records.iter() {
                            apply_record(store, record).await?;
                        }
                        Ok(())
                    })
                })
                .await;

            match result {
                Ok(()) => {
                    info!(actor = %actor, path = %path.display(), records = records.len(), "Dump replayed");
                    Ok(true)
                }
                Err(e) => {
                    error!(actor = %actor, path = %path.display(), error = %e, "Dump replay failed");
                    Ok(false)
                }
            }
        })
    }
}

/// Apply one record to the store.
pub async fn apply_record<S: EntityStore>(
    store: &mut S,
    record: &DumpRecord,
) -> Result<(), StoreError> {
    match record {
        DumpRecord::CreateEntity { name, kind } => {
            store.get_or_create_entity(name, *kind).await?;
        }
        DumpRecord::SetPriority { group, priority } => {
            store.set_priority(group, *priority).await?;
        }
        DumpRecord::SetParent { group, parent } => {
            store.set_parent(group, parent.as_deref()).await?;
        }
        DumpRecord::SetPermission { name, kind, grant } => {
            store.set_permission(name, *kind, grant).await?;
        }
        DumpRecord::SetMetadata {
            name,
            kind,
            key,
            value,
        } => {
            store.set_metadata(name, *kind, key, value).await?;
        }
        DumpRecord::AddMember {
            group,
            player,
            expiration,
        } => {
            store.add_member(group, player, *expiration).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use zperm_common::EntityKind;

    use super::*;
    use crate::storage::memory::MemoryTransactionStrategy;

    fn storage() -> Storage<MemoryTransactionStrategy> {
        Storage::with_attempts(MemoryTransactionStrategy::new(), 5)
    }

    async fn player_names(storage: &Storage<MemoryTransactionStrategy>) -> Vec<String> {
        storage
            .transaction_strategy()
            .execute(|store| Box::pin(async move { store.list_names(EntityKind::Player).await }))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_replay_applies_records() {
        let storage = storage();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup1");
        tokio::fs::write(
            &path,
            "# dump\n{\"op\":\"add_member\",\"group\":\"Admins\",\"player\":\"Alice\"}\n",
        )
        .await
        .unwrap();

        assert!(ScriptReplayer.replay(&storage, "alice", &path).await.unwrap());
        assert_eq!(player_names(&storage).await, vec!["Alice".to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_file_leaves_store_untouched() {
        let storage = storage();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken");
        tokio::fs::write(
            &path,
            "{\"op\":\"create_entity\",\"name\":\"bob\",\"kind\":\"player\"}\n{oops\n",
        )
        .await
        .unwrap();

        assert!(!ScriptReplayer.replay(&storage, "alice", &path).await.unwrap());
        assert!(player_names(&storage).await.is_empty());
    }

    #[tokio::test]
    async fn test_store_rejection_reports_failure() {
        let storage = storage();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cycle");
        tokio::fs::write(
            &path,
            "{\"op\":\"create_entity\",\"name\":\"bob\",\"kind\":\"player\"}\n{\"op\":\"set_parent\",\"group\":\"a\",\"parent\":\"A\"}\n",
        )
        .await
        .unwrap();

        assert!(!ScriptReplayer.replay(&storage, "alice", &path).await.unwrap());
        assert!(player_names(&storage).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let storage = storage();
        let dir = tempfile::tempdir().unwrap();
        let result = ScriptReplayer
            .replay(&storage, "alice", &dir.path().join("nope"))
            .await;
        assert!(result.is_err());
    }
}
