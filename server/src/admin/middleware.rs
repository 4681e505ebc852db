//! Admin authentication middleware.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

use super::types::{AdminActor, AdminError};
use crate::api::AppState;
use crate::storage::TransactionStrategy;

/// Middleware that resolves the bearer token to an [`AdminActor`].
#[tracing::instrument(skip(state, request, next))]
pub async fn require_admin<T: TransactionStrategy + 'static>(
    State(state): State<AppState<T>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AdminError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AdminError::Unauthorized)?;

    let name = state
        .config
        .admin_tokens
        .get(token.trim())
        .cloned()
        .ok_or(AdminError::Unauthorized)?;

    request.extensions_mut().insert(AdminActor { name });

    Ok(next.run(request).await)
}
