//! Durable queue of shortcut runs waiting to be executed.

use tracing::{debug, info};

use shortcuts_types::{EntityKind, ExecutionId, ExecutionRequest, PendingExecution, ShortcutId};

use crate::error::{StoreError, StoreResult};
use crate::router::Observer;
use crate::store::Store;

/// Queue operations over a store's pending executions.
///
/// Entries are ordered by `enqueued_at`, ties broken by id. Reading never
/// removes anything: an execution stays queued until the consumer removes it
/// after running it.
#[derive(Clone)]
pub struct ExecutionQueue {
    store: Store,
}

impl ExecutionQueue {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn enqueue(&self, shortcut_id: ShortcutId) -> StoreResult<PendingExecution> {
        self.enqueue_with(shortcut_id, ExecutionRequest::default())
            .await
    }

    /// Queue a run of `shortcut_id` carrying caller-supplied context.
    pub async fn enqueue_with(
        &self,
        shortcut_id: ShortcutId,
        request: ExecutionRequest,
    ) -> StoreResult<PendingExecution> {
        let execution = self
            .store
            .commit(move |tx| {
                if tx.state().committed_shortcut(shortcut_id).is_none() {
                    return Err(StoreError::not_found("shortcut", shortcut_id));
                }
                let execution = PendingExecution {
                    id: ExecutionId(tx.allocate_id(EntityKind::PendingExecution)),
                    shortcut_id,
                    enqueued_at: tx.now(),
                    request,
                };
                tx.put_execution(execution.clone());
                Ok(execution)
            })
            .await?;
        info!(
            execution = %execution.id,
            shortcut = %shortcut_id,
            "Execution enqueued"
        );
        Ok(execution)
    }

    /// Every pending execution in queue order.
    pub fn dequeue_all(&self) -> Vec<PendingExecution> {
        self.store
            .snapshot()
            .pending_executions()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn find_for_shortcut(&self, shortcut_id: ShortcutId) -> Option<PendingExecution> {
        self.store
            .snapshot()
            .execution_for_shortcut(shortcut_id)
            .cloned()
    }

    /// Remove one execution. Returns `false` when it was not queued.
    pub async fn remove(&self, execution_id: ExecutionId) -> StoreResult<bool> {
        let removed = self
            .store
            .commit(move |tx| Ok(tx.delete_execution(execution_id)))
            .await?;
        debug!(execution = %execution_id, removed, "Execution removal");
        Ok(removed)
    }

    /// Remove every execution queued for a shortcut. Returns how many were removed.
    pub async fn remove_for_shortcut(&self, shortcut_id: ShortcutId) -> StoreResult<usize> {
        self.store
            .commit(move |tx| {
                let ids = tx.state().executions_for_shortcut(shortcut_id);
                let mut removed = 0;
                for id in ids {
                    if tx.delete_execution(id) {
                        removed += 1;
                    }
                }
                Ok(removed)
            })
            .await
    }

    /// Observe the queue in queue order.
    pub async fn observe(&self) -> Observer<Vec<PendingExecution>> {
        self.store
            .observe_with(|state| state.pending_executions().into_iter().cloned().collect())
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::StoreConfig;
    use crate::staging::ShortcutEditor;

    async fn setup() -> (ExecutionQueue, Arc<ManualClock>, ShortcutId, ShortcutId) {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_millis_opt(1_000).unwrap()));
        let store = Store::open_with_clock(StoreConfig::in_memory(), clock.clone())
            .await
            .unwrap();
        let mut ids = Vec::new();
        for name in ["A", "B"] {
            let editor = ShortcutEditor::begin(&store, None).await.unwrap();
            editor.mutate(move |s| s.name = name.into()).await.unwrap();
            ids.push(editor.commit().await.unwrap());
        }
        (ExecutionQueue::new(store), clock, ids[0], ids[1])
    }

    #[tokio::test]
    async fn enqueue_order_is_preserved() {
        let (queue, clock, a, b) = setup().await;
        queue.enqueue(a).await.unwrap();
        clock.advance(5);
        queue.enqueue(b).await.unwrap();
        clock.advance(5);
        queue.enqueue(a).await.unwrap();

        let order: Vec<ShortcutId> = queue.dequeue_all().iter().map(|e| e.shortcut_id).collect();
        assert_eq!(order, vec![a, b, a]);
        // Reading is not destructive.
        assert_eq!(queue.dequeue_all().len(), 3);
    }

    #[tokio::test]
    async fn same_timestamp_ties_break_by_id() {
        let (queue, _clock, a, b) = setup().await;
        let first = queue.enqueue(b).await.unwrap();
        let second = queue.enqueue(a).await.unwrap();
        assert_eq!(first.enqueued_at, second.enqueued_at);

        let order: Vec<ExecutionId> = queue.dequeue_all().iter().map(|e| e.id).collect();
        assert_eq!(order, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn remove_and_find() {
        let (queue, clock, a, b) = setup().await;
        let first = queue.enqueue(a).await.unwrap();
        clock.advance(1);
        queue.enqueue(b).await.unwrap();
        clock.advance(1);
        queue.enqueue(a).await.unwrap();

        assert_eq!(queue.find_for_shortcut(a).unwrap().id, first.id);
        assert!(queue.remove(first.id).await.unwrap());
        assert!(!queue.remove(first.id).await.unwrap());
        assert_eq!(queue.remove_for_shortcut(a).await.unwrap(), 1);
        assert!(queue.find_for_shortcut(a).is_none());
        assert_eq!(queue.dequeue_all().len(), 1);
    }

    #[tokio::test]
    async fn unknown_shortcut_is_rejected() {
        let (queue, _clock, _, _) = setup().await;
        let err = queue.enqueue(ShortcutId(500)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(queue.enqueue(ShortcutId::TEMPORARY).await.is_err());
        assert!(queue.dequeue_all().is_empty());
    }

    #[tokio::test]
    async fn request_context_is_kept() {
        let (queue, _clock, a, _) = setup().await;
        let mut request = ExecutionRequest {
            trigger: Some("widget".into()),
            ..Default::default()
        };
        request.resolved_variables.insert("token".into(), "abc".into());
        queue.enqueue_with(a, request.clone()).await.unwrap();
        assert_eq!(queue.dequeue_all()[0].request, request);
    }
}
