//! Dump Records
//!
//! A dump is a JSON-lines file: one [`DumpRecord`] per line, replayed in
//! order. Blank lines and lines starting with `#` are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{EntityKind, PermissionGrant};

/// One administrative operation in a dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DumpRecord {
    CreateEntity {
        name: String,
        kind: EntityKind,
    },
    SetPriority {
        group: String,
        priority: i32,
    },
    SetParent {
        group: String,
        parent: Option<String>,
    },
    SetPermission {
        name: String,
        kind: EntityKind,
        #[serde(flatten)]
        grant: PermissionGrant,
    },
    SetMetadata {
        name: String,
        kind: EntityKind,
        key: String,
        value: String,
    },
    AddMember {
        group: String,
        player: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expiration: Option<DateTime<Utc>>,
    },
}

/// A dump line that could not be parsed.
#[derive(Debug, thiserror::Error)]
#[error("line {line}: {source}")]
pub struct ParseDumpError {
    /// 1-based line number.
    pub line: usize,
    #[source]
    pub source: serde_json::Error,
}

impl DumpRecord {
    /// Serialize as a single dump line (without the trailing newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Parse a whole dump, stopping at the first malformed line.
pub fn parse_dump(contents: &str) -> Result<Vec<DumpRecord>, ParseDumpError> {
    contents
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line, text)| {
            serde_json::from_str(text).map_err(|source| ParseDumpError { line, source })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_tagged_by_op() {
        let record = DumpRecord::SetPriority {
            group: "admins".into(),
            priority: 10,
        };
        let line = record.to_line().unwrap();
        assert!(line.contains("\"op\":\"set_priority\""), "unexpected line: {line}");
    }

    #[test]
    fn test_permission_grant_is_flattened() {
        let line = r#"{"op":"set_permission","name":"admins","kind":"group","world":"nether","permission":"build","value":false}"#;
        let records = parse_dump(line).unwrap();
        assert_eq!(
            records,
            vec![DumpRecord::SetPermission {
                name: "admins".into(),
                kind: EntityKind::Group,
                grant: PermissionGrant {
                    region: None,
                    world: Some("nether".into()),
                    permission: "build".into(),
                    value: false,
                },
            }]
        );
    }

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let dump = "# exported\n\n{\"op\":\"create_entity\",\"name\":\"bob\",\"kind\":\"player\"}\n";
        let records = parse_dump(dump).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let dump = "{\"op\":\"create_entity\",\"name\":\"bob\",\"kind\":\"player\"}\n# note\nnot json\n";
        let err = parse_dump(dump).unwrap_err();
        assert_eq!(err.line, 3);
    }
}
