use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shortcuts_types::{
    AppLock, Base, Category, CategoryId, EntityKind, ExecutionId, PendingExecution, Shortcut,
    ShortcutId, Variable, VariableId,
};

use crate::state::{StagedShortcut, StagedVariable, StateImage};

/// A single primitive state change.
///
/// Mutations are record-level: cascading deletes and reorders are expressed
/// by the transaction as a sequence of these, so replaying a committed record
/// reproduces exactly what the original commit applied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data", rename_all = "snake_case")]
pub enum Mutation {
    PutBase(Base),
    PutCategory(Category),
    DeleteCategory(CategoryId),
    PutShortcut(Shortcut),
    DeleteShortcut(ShortcutId),
    PutVariable(Variable),
    DeleteVariable(VariableId),
    PutExecution(PendingExecution),
    DeleteExecution(ExecutionId),
    SetAppLock(Option<AppLock>),
    StageShortcut(Option<StagedShortcut>),
    StageVariable(Option<StagedVariable>),
    AdvanceWatermark { kind: EntityKind, id: u64 },
}

/// BLAKE3 digest over a record's timestamp and body.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordHash(pub [u8; 32]);

impl std::fmt::Display for RecordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "...")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordBody {
    /// Mutations of one committed unit of work, applied in order.
    Transaction { mutations: Vec<Mutation> },
    /// Full state image written by compaction; replaces everything before it.
    Snapshot { state: StateImage },
}

/// One durable WAL entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    pub committed_at: DateTime<Utc>,
    pub body: RecordBody,
    pub integrity_hash: RecordHash,
}

impl WalRecord {
    pub fn transaction(committed_at: DateTime<Utc>, mutations: Vec<Mutation>) -> Self {
        Self::new(committed_at, RecordBody::Transaction { mutations })
    }

    pub fn snapshot(committed_at: DateTime<Utc>, state: StateImage) -> Self {
        Self::new(committed_at, RecordBody::Snapshot { state })
    }

    fn new(committed_at: DateTime<Utc>, body: RecordBody) -> Self {
        let integrity_hash = Self::compute_hash(&committed_at, &body);
        Self {
            committed_at,
            body,
            integrity_hash,
        }
    }

    pub fn verify_integrity(&self) -> bool {
        self.integrity_hash == Self::compute_hash(&self.committed_at, &self.body)
    }

    pub fn mutation_count(&self) -> usize {
        match &self.body {
            RecordBody::Transaction { mutations } => mutations.len(),
            RecordBody::Snapshot { .. } => 0,
        }
    }

    pub fn is_snapshot(&self) -> bool {
        matches!(self.body, RecordBody::Snapshot { .. })
    }

    fn compute_hash(committed_at: &DateTime<Utc>, body: &RecordBody) -> RecordHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"shortcut-store-record-v1:");
        hasher.update(&committed_at.timestamp_millis().to_le_bytes());
        if let Ok(body_bytes) = serde_json::to_vec(body) {
            hasher.update(&body_bytes);
        }
        RecordHash(*hasher.finalize().as_bytes())
    }
}
