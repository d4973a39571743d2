//! Broad classification of CloudFormation resource statuses.

/// Coarse bucket a resource status falls into, used for styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StatusKind {
    #[default]
    Unknown,
    Ok,
    InProgress,
    Failed,
}

const STATUS_TABLE: &[(&str, StatusKind)] = &[
    ("CREATE_COMPLETE", StatusKind::Ok),
    ("CREATE_IN_PROGRESS", StatusKind::InProgress),
    ("CREATE_FAILED", StatusKind::Failed),
    ("DELETE_COMPLETE", StatusKind::Ok),
    ("DELETE_FAILED", StatusKind::Failed),
    ("DELETE_IN_PROGRESS", StatusKind::InProgress),
    ("ROLLBACK_COMPLETE", StatusKind::Ok),
    ("ROLLBACK_FAILED", StatusKind::Failed),
    ("ROLLBACK_IN_PROGRESS", StatusKind::InProgress),
    ("UPDATE_COMPLETE", StatusKind::Ok),
    ("UPDATE_COMPLETE_CLEANUP_IN_PROGRESS", StatusKind::InProgress),
    ("UPDATE_IN_PROGRESS", StatusKind::InProgress),
    ("UPDATE_ROLLBACK_COMPLETE", StatusKind::Ok),
    ("UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS", StatusKind::InProgress),
    ("UPDATE_ROLLBACK_FAILED", StatusKind::Failed),
    ("UPDATE_ROLLBACK_IN_PROGRESS", StatusKind::InProgress),
    ("UPDATE_FAILED", StatusKind::Failed),
    ("IMPORT_IN_PROGRESS", StatusKind::InProgress),
    ("IMPORT_COMPLETE", StatusKind::Ok),
    ("IMPORT_ROLLBACK_IN_PROGRESS", StatusKind::InProgress),
    ("IMPORT_ROLLBACK_FAILED", StatusKind::Failed),
    ("IMPORT_ROLLBACK_COMPLETE", StatusKind::Ok),
];

impl StatusKind {
    /// Look up a raw status string. Matching is exact; anything not in the
    /// table is [`StatusKind::Unknown`].
    pub fn of(status: &str) -> Self {
        STATUS_TABLE
            .iter()
            .find(|(name, _)| *name == status)
            .map(|(_, kind)| *kind)
            .unwrap_or_default()
    }
}
