//! Entity Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which collection an entity belongs to.
///
/// Players and groups live in separate namespaces: a player and a group may
/// share a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A player.
    Player,
    /// A group players can be members of.
    Group,
}

impl EntityKind {
    /// Whether this is the group collection.
    #[must_use]
    pub const fn is_group(self) -> bool {
        matches!(self, Self::Group)
    }

    /// Kind for the legacy `is_group` discriminator.
    #[must_use]
    pub const fn from_is_group(is_group: bool) -> Self {
        if is_group {
            Self::Group
        } else {
            Self::Player
        }
    }

    /// Plural noun used in operator-facing messages.
    #[must_use]
    pub const fn plural(self) -> &'static str {
        match self {
            Self::Player => "players",
            Self::Group => "groups",
        }
    }

    /// Parse a list target the way operators abbreviate it.
    ///
    /// Any prefix of `groups` or `players` is accepted, `groups` winning
    /// for the empty string.
    ///
    /// ```
    /// use zperm_common::EntityKind;
    ///
    /// assert_eq!(EntityKind::from_list_target("gr"), Some(EntityKind::Group));
    /// assert_eq!(EntityKind::from_list_target("p"), Some(EntityKind::Player));
    /// assert_eq!(EntityKind::from_list_target("users"), None);
    /// ```
    #[must_use]
    pub fn from_list_target(what: &str) -> Option<Self> {
        let what = what.to_ascii_lowercase();
        if "groups".starts_with(&what) {
            Some(Self::Group)
        } else if "players".starts_with(&what) {
            Some(Self::Player)
        } else {
            None
        }
    }
}

/// A player or group record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEntity {
    /// Name as first written; lookups ignore case.
    pub display_name: String,
    /// Player or group.
    pub kind: EntityKind,
    /// Group weight. Always 0 for players.
    #[serde(default)]
    pub priority: i32,
    /// Display name of the parent group, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl PermissionEntity {
    /// New entity with default priority and no parent.
    #[must_use]
    pub fn new(display_name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            display_name: display_name.into(),
            kind,
            priority: 0,
            parent: None,
        }
    }

    /// Case-folded name used for identity.
    #[must_use]
    pub fn name(&self) -> String {
        normalize_name(&self.display_name)
    }
}

/// A player's membership in a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    /// Player display name.
    pub member: String,
    /// Group display name.
    pub group: String,
    /// When the membership lapses, if temporary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
}

/// A single permission set on an entity, optionally scoped to a world
/// and/or region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world: Option<String>,
    pub permission: String,
    pub value: bool,
}

impl PermissionGrant {
    /// Unscoped grant.
    #[must_use]
    pub fn global(permission: impl Into<String>, value: bool) -> Self {
        Self {
            region: None,
            world: None,
            permission: permission.into(),
            value,
        }
    }
}

/// A metadata key/value pair attached to an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub key: String,
    pub value: String,
}

/// Fold a name for case-insensitive comparison.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
}
