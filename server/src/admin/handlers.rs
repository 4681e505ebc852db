//! Admin API handlers.
//!
//! Thin adapters over [`BulkAdministrator`](super::BulkAdministrator): the
//! authenticated admin is the actor, and the operation's message is echoed
//! in the response body.

use axum::{
    extract::{Path, State},
    Extension, Json,
};

use super::types::{
    AdminActor, AdminError, DumpFileRequest, EntityListResponse, GroupListResponse,
    MessageResponse, PurgeRequest,
};
use crate::api::AppState;
use crate::storage::TransactionStrategy;

/// List groups or players.
///
/// `GET /api/admin/entities/{what}`
#[tracing::instrument(skip(state))]
pub async fn list_entities<T: TransactionStrategy + 'static>(
    State(state): State<AppState<T>>,
    Extension(actor): Extension<AdminActor>,
    Path(what): Path<String>,
) -> Result<Json<EntityListResponse>, AdminError> {
    let listing = state.admin.list(&actor.name, &what).await?;
    Ok(Json(EntityListResponse {
        message: listing.to_string(),
        names: listing.names,
    }))
}

/// Groups of the calling admin.
///
/// `GET /api/admin/me/groups`
#[tracing::instrument(skip(state))]
pub async fn my_groups<T: TransactionStrategy + 'static>(
    State(state): State<AppState<T>>,
    Extension(actor): Extension<AdminActor>,
) -> Result<Json<GroupListResponse>, AdminError> {
    let listing = state.admin.my_groups(&actor.name, &actor.name).await?;
    Ok(Json(GroupListResponse {
        message: listing.to_string(),
        groups: listing.groups,
    }))
}

/// Groups of any player.
///
/// `GET /api/admin/players/{name}/groups`
#[tracing::instrument(skip(state))]
pub async fn player_groups<T: TransactionStrategy + 'static>(
    State(state): State<AppState<T>>,
    Extension(actor): Extension<AdminActor>,
    Path(name): Path<String>,
) -> Result<Json<GroupListResponse>, AdminError> {
    let listing = state.admin.my_groups(&actor.name, &name).await?;
    Ok(Json(GroupListResponse {
        message: listing.to_string(),
        groups: listing.groups,
    }))
}

/// Request or confirm a full purge.
///
/// `POST /api/admin/purge`
#[tracing::instrument(skip(state, body))]
pub async fn purge<T: TransactionStrategy + 'static>(
    State(state): State<AppState<T>>,
    Extension(actor): Extension<AdminActor>,
    Json(body): Json<PurgeRequest>,
) -> Result<Json<MessageResponse>, AdminError> {
    let outcome = state.admin.purge(&actor.name, body.code).await?;
    Ok(Json(MessageResponse {
        message: outcome.to_string(),
    }))
}

/// Import a dump into an empty store.
///
/// `POST /api/admin/import`
#[tracing::instrument(skip(state))]
pub async fn import<T: TransactionStrategy + 'static>(
    State(state): State<AppState<T>>,
    Extension(actor): Extension<AdminActor>,
    Json(body): Json<DumpFileRequest>,
) -> Result<Json<MessageResponse>, AdminError> {
    let imported = state.admin.import(&actor.name, &body.filename).await?;
    Ok(Json(MessageResponse {
        message: imported.to_string(),
    }))
}

/// Export the store to a dump.
///
/// `POST /api/admin/export`
#[tracing::instrument(skip(state))]
pub async fn export<T: TransactionStrategy + 'static>(
    State(state): State<AppState<T>>,
    Extension(actor): Extension<AdminActor>,
    Json(body): Json<DumpFileRequest>,
) -> Result<Json<MessageResponse>, AdminError> {
    let exported = state.admin.export(&actor.name, &body.filename).await?;
    Ok(Json(MessageResponse {
        message: exported.to_string(),
    }))
}
