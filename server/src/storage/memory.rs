//! In-memory storage backend.
//!
//! Each transaction works on a private copy of the committed state and
//! publishes it on commit. Commits are optimistic: if another transaction
//! committed writes after this one took its copy, the commit fails with
//! [`StoreError::Conflict`] and nothing is published.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use zperm_common::{
    normalize_name, EntityKind, Membership, MetadataEntry, PermissionEntity, PermissionGrant,
};

use super::{EntityStore, StoreError, TransactionStrategy};

/// Grant key: region, world, permission (all folded, absent scopes as `""`).
type GrantKey = (String, String, String);

#[derive(Debug, Clone)]
struct EntityRecord {
    display_name: String,
    priority: i32,
    /// Folded name of the parent group.
    parent: Option<String>,
    permissions: BTreeMap<GrantKey, PermissionGrant>,
    metadata: BTreeMap<String, MetadataEntry>,
}

impl EntityRecord {
    fn new(display_name: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            priority: 0,
            parent: None,
            permissions: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryData {
    players: BTreeMap<String, EntityRecord>,
    groups: BTreeMap<String, EntityRecord>,
    /// (folded group, folded player) -> expiration
    memberships: BTreeMap<(String, String), Option<DateTime<Utc>>>,
}

impl MemoryData {
    const fn collection(&self, kind: EntityKind) -> &BTreeMap<String, EntityRecord> {
        match kind {
            EntityKind::Player => &self.players,
            EntityKind::Group => &self.groups,
        }
    }

    fn collection_mut(&mut self, kind: EntityKind) -> &mut BTreeMap<String, EntityRecord> {
        match kind {
            EntityKind::Player => &mut self.players,
            EntityKind::Group => &mut self.groups,
        }
    }

    fn entry(&mut self, name: &str, kind: EntityKind) -> &mut EntityRecord {
        self.collection_mut(kind)
            .entry(normalize_name(name))
            .or_insert_with(|| EntityRecord::new(name))
    }

    fn to_entity(&self, record: &EntityRecord, kind: EntityKind) -> PermissionEntity {
        PermissionEntity {
            display_name: record.display_name.clone(),
            kind,
            priority: record.priority,
            parent: record
                .parent
                .as_ref()
                .and_then(|parent| self.groups.get(parent))
                .map(|parent| parent.display_name.clone()),
        }
    }

    fn display_name(&self, folded: &str, kind: EntityKind) -> String {
        self.collection(kind)
            .get(folded)
            .map_or_else(|| folded.to_string(), |record| record.display_name.clone())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    data: MemoryData,
    version: u64,
}

/// Transaction strategy over a shared in-memory store.
///
/// Cloning yields another handle on the same store.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransactionStrategy {
    state: Arc<Mutex<MemoryState>>,
    conflict_on_delete: Arc<AtomicUsize>,
}

impl MemoryTransactionStrategy {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `nth` (1-based) `delete_entity` call of the next transaction
    /// that reaches it fail with a conflict. Fires once.
    pub fn inject_conflict_on_delete(&self, nth: usize) {
        self.conflict_on_delete.store(nth, Ordering::SeqCst);
    }

    /// Number of commits that published writes.
    pub async fn version(&self) -> u64 {
        self.state.lock().await.version
    }
}

impl TransactionStrategy for MemoryTransactionStrategy {
    type Store = MemoryEntityStore;

    fn execute<T, F>(&self, mut work: F) -> impl Future<Output = Result<T, StoreError>> + Send
    where
        T: Send,
        F: for<'t> FnMut(&'t mut Self::Store) -> BoxFuture<'t, Result<T, StoreError>> + Send,
    {
        async move {
            let (data, base_version) = {
                let state = self.state.lock().await;
                (state.data.clone(), state.version)
            };

            let mut store = MemoryEntityStore {
                data,
                dirty: false,
                deletes: 0,
                conflict_on_delete: Arc::clone(&self.conflict_on_delete),
            };

            let value = work(&mut store).await?;

            if store.dirty {
                let mut state = self.state.lock().await;
                if state.version != base_version {
                    return Err(StoreError::Conflict);
                }
                state.data = store.data;
                state.version += 1;
            }

            Ok(value)
        }
    }
}

/// Transaction-scoped handle on the in-memory store.
#[derive(Debug)]
pub struct MemoryEntityStore {
    data: MemoryData,
    dirty: bool,
    deletes: usize,
    conflict_on_delete: Arc<AtomicUsize>,
}

impl MemoryEntityStore {
    fn write(&mut self) -> &mut MemoryData {
        self.dirty = true;
        &mut self.data
    }
}

impl EntityStore for MemoryEntityStore {
    async fn list_names(&mut self, kind: EntityKind) -> Result<Vec<String>, StoreError> {
        Ok(self
            .data
            .collection(kind)
            .values()
            .map(|record| record.display_name.clone())
            .collect())
    }

    async fn list_entities(&mut self, kind: EntityKind) -> Result<Vec<PermissionEntity>, StoreError> {
        Ok(self
            .data
            .collection(kind)
            .values()
            .map(|record| self.data.to_entity(record, kind))
            .collect())
    }

    async fn delete_entity(&mut self, name: &str, kind: EntityKind) -> Result<bool, StoreError> {
        self.deletes += 1;
        if self
            .conflict_on_delete
            .compare_exchange(self.deletes, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return Err(StoreError::Conflict);
        }

        let folded = normalize_name(name);
        if !self.data.collection(kind).contains_key(&folded) {
            return Ok(false);
        }

        let data = self.write();
        data.collection_mut(kind).remove(&folded);
        match kind {
            EntityKind::Player => data.memberships.retain(|(_, player), _| *player != folded),
            EntityKind::Group => {
                data.memberships.retain(|(group, _), _| *group != folded);
                for group in data.groups.values_mut() {
                    if group.parent.as_deref() == Some(folded.as_str()) {
                        group.parent = None;
                    }
                }
            }
        }
        Ok(true)
    }

    async fn list_groups_of(&mut self, player: &str) -> Result<Vec<Membership>, StoreError> {
        let folded = normalize_name(player);
        let mut rows: Vec<(i32, String, Membership)> = self
            .data
            .memberships
            .iter()
            .filter(|((_, member), _)| *member == folded)
            .map(|((group, member), expiration)| {
                let priority = self.data.groups.get(group).map_or(0, |g| g.priority);
                let membership = Membership {
                    member: self.data.display_name(member, EntityKind::Player),
                    group: self.data.display_name(group, EntityKind::Group),
                    expiration: *expiration,
                };
                (priority, group.clone(), membership)
            })
            .collect();
        rows.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
        Ok(rows.into_iter().map(|(_, _, membership)| membership).collect())
    }

    async fn get_or_create_entity(
        &mut self,
        name: &str,
        kind: EntityKind,
    ) -> Result<PermissionEntity, StoreError> {
        let folded = normalize_name(name);
        if !self.data.collection(kind).contains_key(&folded) {
            self.write().entry(name, kind);
        }
        let record = &self.data.collection(kind)[&folded];
        Ok(self.data.to_entity(record, kind))
    }

    async fn set_permission(
        &mut self,
        name: &str,
        kind: EntityKind,
        grant: &PermissionGrant,
    ) -> Result<(), StoreError> {
        let grant = PermissionGrant {
            region: grant.region.as_deref().map(normalize_name),
            world: grant.world.as_deref().map(normalize_name),
            permission: normalize_name(&grant.permission),
            value: grant.value,
        };
        let key = (
            grant.region.clone().unwrap_or_default(),
            grant.world.clone().unwrap_or_default(),
            grant.permission.clone(),
        );
        self.write()
            .entry(name, kind)
            .permissions
            .insert(key, grant);
        Ok(())
    }

    async fn list_permissions(
        &mut self,
        name: &str,
        kind: EntityKind,
    ) -> Result<Vec<PermissionGrant>, StoreError> {
        Ok(self
            .data
            .collection(kind)
            .get(&normalize_name(name))
            .map(|record| record.permissions.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_metadata(
        &mut self,
        name: &str,
        kind: EntityKind,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let entry = MetadataEntry {
            key: key.to_string(),
            value: value.to_string(),
        };
        self.write()
            .entry(name, kind)
            .metadata
            .insert(normalize_name(key), entry);
        Ok(())
    }

    async fn list_metadata(
        &mut self,
        name: &str,
        kind: EntityKind,
    ) -> Result<Vec<MetadataEntry>, StoreError> {
        Ok(self
            .data
            .collection(kind)
            .get(&normalize_name(name))
            .map(|record| record.metadata.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_member(
        &mut self,
        group: &str,
        player: &str,
        expiration: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let data = self.write();
        data.entry(group, EntityKind::Group);
        data.entry(player, EntityKind::Player);
        data.memberships
            .insert((normalize_name(group), normalize_name(player)), expiration);
        Ok(())
    }

    async fn list_members(&mut self, group: &str) -> Result<Vec<Membership>, StoreError> {
        let folded = normalize_name(group);
        let mut members: Vec<(String, Membership)> = self
            .data
            .memberships
            .iter()
            .filter(|((g, _), _)| *g == folded)
            .map(|((g, player), expiration)| {
                let membership = Membership {
                    member: self.data.display_name(player, EntityKind::Player),
                    group: self.data.display_name(g, EntityKind::Group),
                    expiration: *expiration,
                };
                (player.clone(), membership)
            })
            .collect();
        members.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(members.into_iter().map(|(_, membership)| membership).collect())
    }

    async fn set_priority(&mut self, group: &str, priority: i32) -> Result<(), StoreError> {
        self.write().entry(group, EntityKind::Group).priority = priority;
        Ok(())
    }

    async fn set_parent(&mut self, group: &str, parent: Option<&str>) -> Result<(), StoreError> {
        let folded_group = normalize_name(group);
        let data = self.write();
        let parent = match parent {
            Some(parent) => {
                let folded_parent = normalize_name(parent);
                if folded_parent == folded_group {
                    return Err(StoreError::Invalid(format!(
                        "group {group} cannot be its own parent"
                    )));
                }
                data.entry(parent, EntityKind::Group);
                Some(folded_parent)
            }
            None => None,
        };
        data.entry(group, EntityKind::Group).parent = parent;
        Ok(())
    }
}
