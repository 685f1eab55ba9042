use serde::{Deserialize, Serialize};

/// Strong typed IDs for persisted entities.
///
/// Entity ids are allocated by the store as `max + 1`, starting at 1, so the
/// value 0 is never handed out and serves as the staging sentinel.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShortcutId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CategoryId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariableId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionId(pub u64);

/// Identifier of a Header or Parameter child record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChildId(pub uuid::Uuid);

impl ShortcutId {
    /// Reserved identity of the in-progress shortcut edit.
    pub const TEMPORARY: ShortcutId = ShortcutId(0);

    pub fn is_temporary(&self) -> bool {
        *self == Self::TEMPORARY
    }
}

impl VariableId {
    /// Reserved identity of the in-progress variable edit.
    pub const TEMPORARY: VariableId = VariableId(0);

    pub fn is_temporary(&self) -> bool {
        *self == Self::TEMPORARY
    }
}

impl ChildId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ChildId {
    fn default() -> Self {
        Self::new()
    }
}

/// Entity types that receive allocated identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Category,
    Shortcut,
    Variable,
    PendingExecution,
}

impl std::fmt::Display for ShortcutId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sc:{}", self.0)
    }
}

impl std::fmt::Display for CategoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cat:{}", self.0)
    }
}

impl std::fmt::Display for VariableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "var:{}", self.0)
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "exec:{}", self.0)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityKind::Category => "category",
            EntityKind::Shortcut => "shortcut",
            EntityKind::Variable => "variable",
            EntityKind::PendingExecution => "pending_execution",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_zero() {
        assert!(ShortcutId::TEMPORARY.is_temporary());
        assert!(VariableId(0).is_temporary());
        assert!(!ShortcutId(1).is_temporary());
    }

    #[test]
    fn child_id_uniqueness() {
        assert_ne!(ChildId::new(), ChildId::new());
    }

    #[test]
    fn display_formats() {
        assert_eq!(format!("{}", ShortcutId(7)), "sc:7");
        assert_eq!(format!("{}", CategoryId(2)), "cat:2");
        assert_eq!(format!("{}", VariableId(3)), "var:3");
        assert_eq!(format!("{}", ExecutionId(9)), "exec:9");
        assert_eq!(EntityKind::PendingExecution.to_string(), "pending_execution");
    }

    #[test]
    fn entity_kind_serialization() {
        let json = serde_json::to_string(&EntityKind::PendingExecution).unwrap();
        assert_eq!(json, "\"pending_execution\"");
        let restored: EntityKind = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, EntityKind::PendingExecution);
    }
}
