use serde::{Deserialize, Serialize};

/// Point-in-time counters for a running store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreMetrics {
    pub latest_sequence: u64,
    pub wal_size_bytes: u64,
    pub wal_segments: u32,
    pub categories: usize,
    pub shortcuts: usize,
    pub variables: usize,
    pub pending_executions: usize,
    pub observers_active: u32,
    pub staging_active: bool,
    pub locked: bool,
}
