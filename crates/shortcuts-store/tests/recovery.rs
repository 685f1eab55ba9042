//! Durability: reopening a file-backed store reproduces committed state.

use shortcuts_store::types::{AppLock, EntityKind, ShortcutId};
use shortcuts_store::{
    ExecutionQueue, ShortcutEditor, Store, StoreConfig, StoreError, WalConfig,
};

fn config(dir: &tempfile::TempDir) -> StoreConfig {
    StoreConfig::at(dir.path())
}

async fn create(store: &Store, name: &str) -> ShortcutId {
    let name = name.to_string();
    let editor = ShortcutEditor::begin(store, None).await.unwrap();
    editor.mutate(move |s| s.name = name).await.unwrap();
    editor.commit().await.unwrap()
}

#[tokio::test]
async fn reopen_restores_state() {
    let dir = tempfile::tempdir().unwrap();
    let (before, a) = {
        let store = Store::open(config(&dir)).await.unwrap();
        let a = create(&store, "A").await;
        let b = create(&store, "B").await;
        store.move_shortcut(b, None, Some(0)).await.unwrap();
        ExecutionQueue::new(store.clone()).enqueue(a).await.unwrap();
        store.lock(AppLock::hash_password("pw")).await.unwrap();
        let before = store.snapshot();
        store.close().await.unwrap();
        (before, a)
    };

    let store = Store::open(config(&dir)).await.unwrap();
    assert_eq!(*store.snapshot(), *before);
    assert_eq!(store.categories().len(), 1);
    assert!(store.is_locked());
    assert_eq!(ExecutionQueue::new(store.clone()).dequeue_all()[0].shortcut_id, a);
}

#[tokio::test]
async fn ids_are_not_reused_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = Store::open(config(&dir)).await.unwrap();
        let a = create(&store, "A").await;
        let b = create(&store, "B").await;
        store.delete_shortcut(b).await.unwrap();
        assert_eq!(a, ShortcutId(1));
        store.close().await.unwrap();
    }

    let store = Store::open(config(&dir)).await.unwrap();
    assert_eq!(store.allocate_id(EntityKind::Shortcut).await.unwrap(), 3);
}

#[tokio::test]
async fn staged_shadow_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = Store::open(config(&dir)).await.unwrap();
        let editor = ShortcutEditor::begin(&store, None).await.unwrap();
        editor.mutate(|s| s.name = "draft".into()).await.unwrap();
        store.close().await.unwrap();
    }

    let store = Store::open(config(&dir)).await.unwrap();
    assert_eq!(store.shortcut(ShortcutId::TEMPORARY).unwrap().name, "draft");
    assert!(store.shortcuts().is_empty());

    // A new session replaces the leftover draft.
    let editor = ShortcutEditor::begin(&store, None).await.unwrap();
    assert_eq!(editor.current().unwrap().name, "");
    editor.discard().await.unwrap();
    assert!(store.shortcut(ShortcutId::TEMPORARY).is_none());
}

#[tokio::test]
async fn compaction_preserves_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(&dir);
    cfg.wal = WalConfig {
        max_segment_size: 4 * 1024,
        ..WalConfig::default()
    };

    let before = {
        let store = Store::open(cfg.clone()).await.unwrap();
        for i in 0..20 {
            create(&store, &format!("s{i}")).await;
        }
        let segments = store.metrics().await.wal_segments;
        store.compact().await.unwrap();
        assert!(store.metrics().await.wal_segments <= segments);
        assert!(store.verify().await.unwrap().is_clean());

        create(&store, "after").await;
        let before = store.snapshot();
        store.close().await.unwrap();
        before
    };

    let store = Store::open(cfg).await.unwrap();
    assert_eq!(*store.snapshot(), *before);
    assert_eq!(store.shortcuts().len(), 21);
}

#[tokio::test]
async fn automatic_compaction() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(&dir);
    cfg.compact_every = Some(5);

    let before = {
        let store = Store::open(cfg.clone()).await.unwrap();
        for i in 0..12 {
            store
                .create_category(&format!("c{i}"), Default::default())
                .await
                .unwrap();
        }
        let before = store.snapshot();
        store.close().await.unwrap();
        before
    };

    let store = Store::open(cfg).await.unwrap();
    assert_eq!(*store.snapshot(), *before);
    assert_eq!(store.categories().len(), 13);
}

#[tokio::test]
async fn closed_store_reports_closed() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(config(&dir)).await.unwrap();
    store.close().await.unwrap();
    assert!(matches!(store.compact().await, Err(StoreError::Closed)));
}
