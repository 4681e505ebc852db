//! Admin module types.

use std::fmt;
use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zperm_common::{EntityKind, Membership};

use crate::storage::StoreError;

/// Authenticated admin, resolved from the bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminActor {
    pub name: String,
}

/// Admin operation failure.
///
/// The `Display` text is the message reported to the admin.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Missing or unknown bearer token.
    #[error("Admin credentials required")]
    Unauthorized,

    /// List target is neither groups nor players.
    #[error("Invalid list target: {0}")]
    InvalidTarget(String),

    /// Dump name is not a single plain path segment.
    #[error("Invalid filename.")]
    InvalidFilename,

    /// A code was supplied with no purge pending.
    #[error("No purge pending. Try again without code.")]
    NoPurgePending,

    /// The pending purge code expired.
    #[error("Too slow. Try again without code.")]
    ConfirmationExpired,

    /// Another admin holds the purge confirmation.
    #[error("Confirmation pending for {executor}. Ignored.")]
    ConfirmationHeld { executor: String },

    /// The holder repeated the request without the code.
    #[error("Confirmation pending. Try again with code.")]
    CodeRequired,

    #[error("Code mismatch. Try again.")]
    CodeMismatch,

    /// The purge transaction failed.
    #[error("Purge failed; see server log.")]
    PurgeFailed(#[source] StoreError),

    /// Import requires an empty store.
    #[error("Database is not empty!")]
    NotEmpty,

    /// The dump was read but could not be applied.
    #[error("Import failed.")]
    ImportFailed,

    /// The dump could not be read.
    #[error("Error importing; see server log.")]
    ImportIo(#[source] std::io::Error),

    #[error("Unable to create dump directory")]
    DumpDirectory(#[source] std::io::Error),

    #[error("Error exporting; see server log.")]
    ExportFailed(#[source] crate::dump::DumpError),

    /// Storage error outside purge.
    #[error("Storage error; see server log.")]
    Storage(#[from] StoreError),
}

impl AdminError {
    /// Stable machine-readable kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::InvalidTarget(_) | Self::InvalidFilename => "validation",
            Self::NoPurgePending => "no_purge_pending",
            Self::ConfirmationExpired => "confirmation_expired",
            Self::ConfirmationHeld { .. } => "confirmation_held",
            Self::CodeRequired => "code_required",
            Self::CodeMismatch => "code_mismatch",
            Self::PurgeFailed(_) => "purge_failed",
            Self::NotEmpty => "not_empty",
            Self::ImportFailed => "import_failed",
            Self::ImportIo(_) => "import_io",
            Self::DumpDirectory(_) => "dump_directory",
            Self::ExportFailed(_) => "export_failed",
            Self::Storage(_) => "storage",
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::InvalidTarget(_)
            | Self::InvalidFilename
            | Self::CodeRequired
            | Self::CodeMismatch => StatusCode::BAD_REQUEST,
            Self::ConfirmationHeld { .. } => StatusCode::FORBIDDEN,
            Self::NoPurgePending | Self::NotEmpty => StatusCode::CONFLICT,
            Self::ConfirmationExpired => StatusCode::GONE,
            Self::PurgeFailed(_)
            | Self::ImportFailed
            | Self::ImportIo(_)
            | Self::DumpDirectory(_)
            | Self::ExportFailed(_)
            | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({"error": self.kind(), "message": self.to_string()});
        (self.status(), Json(body)).into_response()
    }
}

/// Successful purge step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeOutcome {
    /// A confirmation code was issued to the requesting admin.
    CodeIssued { code: u32 },
    /// Every player and group was deleted.
    Completed,
}

impl fmt::Display for PurgeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CodeIssued { code } => write!(
                f,
                "Purge confirmation code issued: {code}. Issue purge {code} to confirm."
            ),
            Self::Completed => f.write_str("Full permissions purge successful."),
        }
    }
}

/// Completed import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Imported {
    pub path: PathBuf,
}

impl fmt::Display for Imported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Import complete.")
    }
}

/// Completed export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exported {
    pub path: PathBuf,
}

impl fmt::Display for Exported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Export completed.")
    }
}

/// Names of every entity of one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityListing {
    pub kind: EntityKind,
    pub names: Vec<String>,
}

impl fmt::Display for EntityListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.names.is_empty() {
            return write!(f, "No {} found.", self.kind.plural());
        }
        let lines: Vec<String> = self.names.iter().map(|name| format!("- {name}")).collect();
        f.write_str(&lines.join("\n"))
    }
}

/// A player's groups, highest priority first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupListing {
    pub groups: Vec<String>,
}

impl GroupListing {
    /// Render `memberships` (lowest priority first, as stored), falling back
    /// to `default_group` when there are none.
    #[must_use]
    pub fn from_memberships(memberships: &[Membership], default_group: &str) -> Self {
        let groups = if memberships.is_empty() {
            vec![default_group.to_string()]
        } else {
            memberships
                .iter()
                .rev()
                .map(|m| display_membership(&m.group, m.expiration))
                .collect()
        };
        Self { groups }
    }
}

fn display_membership(group: &str, expiration: Option<DateTime<Utc>>) -> String {
    match expiration {
        Some(until) => format!(
            "{group}[until {}]",
            until.to_rfc3339_opts(SecondsFormat::Secs, true)
        ),
        None => group.to_string(),
    }
}

impl fmt::Display for GroupListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "You are a member of: {}", self.groups.join(", "))
    }
}

// Request types
#[derive(Debug, Default, Deserialize)]
pub struct PurgeRequest {
    #[serde(default)]
    pub code: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct DumpFileRequest {
    pub filename: String,
}

// Response types
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct EntityListResponse {
    pub message: String,
    pub names: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct GroupListResponse {
    pub message: String,
    pub groups: Vec<String>,
}
