use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ExecutionId, ShortcutId};

/// Caller-supplied context attached to a run request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Free-form description of what triggered the run (widget, launcher, schedule).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// Variable values already resolved when the run was requested.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resolved_variables: BTreeMap<String, String>,
    #[serde(default)]
    pub try_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_until: Option<DateTime<Utc>>,
}

/// A durable request to run a shortcut.
///
/// Totally ordered by `enqueued_at`, ties broken by `id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingExecution {
    pub id: ExecutionId,
    pub shortcut_id: ShortcutId,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub request: ExecutionRequest,
}

impl PendingExecution {
    pub fn queue_order(&self, other: &PendingExecution) -> Ordering {
        self.enqueued_at
            .cmp(&other.enqueued_at)
            .then(self.id.cmp(&other.id))
    }
}
