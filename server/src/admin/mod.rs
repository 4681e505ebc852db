//! Admin Module
//!
//! Bulk administration of the permissions store:
//! - list groups and players, show a player's groups
//! - two-step confirmed full purge
//! - import from and export to dump files

mod bulk;
pub mod confirmation;
mod files;
pub mod handlers;
pub mod middleware;
pub mod types;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};

use crate::api::AppState;
use crate::storage::TransactionStrategy;

pub use bulk::{AdminSettings, BulkAdministrator};
pub use confirmation::{Clock, ConfirmationGate, GateDecision, ManualClock, SystemClock};
pub use files::sanitize_filename;
pub use middleware::require_admin;
pub use types::{AdminActor, AdminError, PurgeOutcome};

/// Create the admin router. Every route requires an admin bearer token.
pub fn router<T: TransactionStrategy + 'static>(state: AppState<T>) -> Router<AppState<T>> {
    Router::new()
        .route("/entities/{what}", get(handlers::list_entities::<T>))
        .route("/me/groups", get(handlers::my_groups::<T>))
        .route("/players/{name}/groups", get(handlers::player_groups::<T>))
        .route("/purge", post(handlers::purge::<T>))
        .route("/import", post(handlers::import::<T>))
        .route("/export", post(handlers::export::<T>))
        .layer(from_fn_with_state(state, require_admin::<T>))
}
