//! Bulk administration: list, my-groups, purge, import, export.
//!
//! Every entry point reports exactly one message to the requesting admin
//! through the [`Messenger`] and returns the same result to its caller.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Duration;
use tokio::sync::Mutex;
use tracing::{error, info};
use zperm_common::EntityKind;

use super::confirmation::{Clock, ConfirmationGate, GateDecision, PendingConfirmation, SystemClock};
use super::files::sanitize_filename;
use super::types::{AdminError, EntityListing, Exported, GroupListing, Imported, PurgeOutcome};
use crate::dump::{CommandReplay, JsonModelDumper, ModelDumper, ScriptReplayer};
use crate::messaging::Messenger;
use crate::storage::{EntityStore, Storage, StoreError, TransactionStrategy};

/// Administrator settings taken from [`Config`](crate::config::Config).
#[derive(Debug, Clone)]
pub struct AdminSettings {
    pub dump_directory: PathBuf,
    pub default_group: String,
    pub purge_code_expiration: Duration,
}

/// Orchestrates the bulk operations over one storage backend.
pub struct BulkAdministrator<T: TransactionStrategy> {
    storage: Storage<T>,
    gate: Mutex<ConfirmationGate>,
    clock: Arc<dyn Clock>,
    messenger: Arc<dyn Messenger>,
    replay: Arc<dyn CommandReplay<T>>,
    dumper: Arc<dyn ModelDumper<T>>,
    dump_directory: PathBuf,
    default_group: String,
}

impl<T: TransactionStrategy> BulkAdministrator<T> {
    /// Administrator with the wall clock and the JSON dump collaborators.
    pub fn new(storage: Storage<T>, messenger: Arc<dyn Messenger>, settings: AdminSettings) -> Self {
        Self {
            storage,
            gate: Mutex::new(ConfirmationGate::new(settings.purge_code_expiration)),
            clock: Arc::new(SystemClock),
            messenger,
            replay: Arc::new(ScriptReplayer),
            dumper: Arc::new(JsonModelDumper),
            dump_directory: settings.dump_directory,
            default_group: settings.default_group,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_gate(mut self, gate: ConfirmationGate) -> Self {
        self.gate = Mutex::new(gate);
        self
    }

    #[must_use]
    pub fn with_replay(mut self, replay: Arc<dyn CommandReplay<T>>) -> Self {
        self.replay = replay;
        self
    }

    #[must_use]
    pub fn with_dumper(mut self, dumper: Arc<dyn ModelDumper<T>>) -> Self {
        self.dumper = dumper;
        self
    }

    pub const fn storage(&self) -> &Storage<T> {
        &self.storage
    }

    pub fn dump_directory(&self) -> &Path {
        &self.dump_directory
    }

    /// Snapshot of the live purge challenge, if any.
    pub async fn pending_confirmation(&self) -> Option<PendingConfirmation> {
        self.gate.lock().await.pending().cloned()
    }

    /// List every group or player. `what` is any prefix of `groups` or
    /// `players`.
    #[tracing::instrument(skip(self))]
    pub async fn list(&self, actor: &str, what: &str) -> Result<EntityListing, AdminError> {
        let result = self.list_entities(what).await;
        self.report(actor, &result).await;
        result
    }

    async fn list_entities(&self, what: &str) -> Result<EntityListing, AdminError> {
        let kind = EntityKind::from_list_target(what)
            .ok_or_else(|| AdminError::InvalidTarget(what.to_string()))?;

        let names = self
            .storage
            .transaction_strategy()
            .execute(|store| Box::pin(async move { store.list_names(kind).await }))
            .await?;

        Ok(EntityListing { kind, names })
    }

    /// Groups `player` belongs to, highest priority first.
    #[tracing::instrument(skip(self))]
    pub async fn my_groups(&self, actor: &str, player: &str) -> Result<GroupListing, AdminError> {
        let result = self.groups_of(player).await;
        self.report(actor, &result).await;
        result
    }

    async fn groups_of(&self, player: &str) -> Result<GroupListing, AdminError> {
        let player = player.to_string();
        let memberships = self
            .storage
            .transaction_strategy()
            .execute(|store| {
                let player = player.clone();
                Box::pin(async move { store.list_groups_of(&player).await })
            })
            .await?;

        Ok(GroupListing::from_memberships(&memberships, &self.default_group))
    }

    /// Two-step full purge of every player and group.
    ///
    /// Without a code this issues a challenge; with the right code from the
    /// same admin before expiry it deletes everything in one retrying
    /// transaction.
    #[tracing::instrument(skip(self, code))]
    pub async fn purge(&self, actor: &str, code: Option<u32>) -> Result<PurgeOutcome, AdminError> {
        let result = self.confirm_and_purge(actor, code).await;
        self.report(actor, &result).await;
        result
    }

    async fn confirm_and_purge(
        &self,
        actor: &str,
        code: Option<u32>,
    ) -> Result<PurgeOutcome, AdminError> {
        // Held until the purge finishes so a second correct code cannot
        // start another run.
        let mut gate = self.gate.lock().await;

        match gate.request(actor, code, self.clock.now()) {
            GateDecision::Issued { code } => {
                info!(actor = %actor, "Purge confirmation code issued");
                Ok(PurgeOutcome::CodeIssued { code })
            }
            GateDecision::NoPurgePending => Err(AdminError::NoPurgePending),
            GateDecision::Expired => Err(AdminError::ConfirmationExpired),
            GateDecision::HeldBy { executor } => Err(AdminError::ConfirmationHeld { executor }),
            GateDecision::CodeRequired => Err(AdminError::CodeRequired),
            GateDecision::CodeMismatch => Err(AdminError::CodeMismatch),
            GateDecision::Authorized => {
                info!(actor = %actor, "Full permissions purge authorized");
                let result = self
                    .storage
                    .retrying_transaction_strategy()
                    .execute_without_result(|store| Box::pin(async move { purge_all(store).await }))
                    .await;
                drop(gate);

                match result {
                    Ok(()) => {
                        info!(actor = %actor, "Full permissions purge completed");
                        self.messenger
                            .broadcast_admin(&format!("{actor} performed full permissions purge"))
                            .await;
                        Ok(PurgeOutcome::Completed)
                    }
                    Err(e) => {
                        error!(actor = %actor, error = %e, "Full permissions purge failed");
                        Err(AdminError::PurgeFailed(e))
                    }
                }
            }
        }
    }

    /// Replay a dump into an empty store.
    #[tracing::instrument(skip(self))]
    pub async fn import(&self, actor: &str, filename: &str) -> Result<Imported, AdminError> {
        let result = self.import_dump(actor, filename).await;
        self.report(actor, &result).await;
        result
    }

    async fn import_dump(&self, actor: &str, filename: &str) -> Result<Imported, AdminError> {
        let path =
            sanitize_filename(&self.dump_directory, filename).ok_or(AdminError::InvalidFilename)?;

        let empty = self
            .storage
            .transaction_strategy()
            .execute(|store| {
                Box::pin(async move {
                    Ok(store.list_entities(EntityKind::Player).await?.is_empty()
                        && store.list_entities(EntityKind::Group).await?.is_empty())
                })
            })
            .await?;
        if !empty {
            return Err(AdminError::NotEmpty);
        }

        match self.replay.replay(&self.storage, actor, &path).await {
            Ok(true) => {
                info!(actor = %actor, path = %path.display(), "Import complete");
                Ok(Imported { path })
            }
            Ok(false) => Err(AdminError::ImportFailed),
            Err(e) => {
                error!(actor = %actor, path = %path.display(), error = %e, "Error importing");
                Err(AdminError::ImportIo(e))
            }
        }
    }

    /// Write the whole entity graph to a dump file.
    #[tracing::instrument(skip(self))]
    pub async fn export(&self, actor: &str, filename: &str) -> Result<Exported, AdminError> {
        let result = self.export_dump(actor, filename).await;
        self.report(actor, &result).await;
        result
    }

    async fn export_dump(&self, actor: &str, filename: &str) -> Result<Exported, AdminError> {
        let path =
            sanitize_filename(&self.dump_directory, filename).ok_or(AdminError::InvalidFilename)?;

        if let Err(e) = tokio::fs::create_dir_all(&self.dump_directory).await {
            error!(directory = %self.dump_directory.display(), error = %e, "Unable to create dump directory");
            return Err(AdminError::DumpDirectory(e));
        }

        if let Err(e) = self.dumper.dump(&self.storage, &path).await {
            error!(actor = %actor, path = %path.display(), error = %e, "Error exporting");
            return Err(AdminError::ExportFailed(e));
        }

        info!(actor = %actor, path = %path.display(), "Export completed");
        Ok(Exported { path })
    }

    async fn report<V: fmt::Display>(&self, actor: &str, result: &Result<V, AdminError>) {
        let message = match result {
            Ok(value) => value.to_string(),
            Err(e) => {
                if let AdminError::Storage(source) = e {
                    error!(actor = %actor, error = %source, "Storage error");
                }
                e.to_string()
            }
        };
        self.messenger.notify(actor, &message).await;
    }
}

/// Delete every player, then every group.
async fn purge_all<S: EntityStore>(store: &mut S) -> Result<(), StoreError> {
    for player in store.list_entities(EntityKind::Player).await? {
        store
            .delete_entity(&player.display_name, EntityKind::Player)
            .await?;
    }
    for group in store.list_entities(EntityKind::Group).await? {
        store
            .delete_entity(&group.display_name, EntityKind::Group)
            .await?;
    }
    Ok(())
}
