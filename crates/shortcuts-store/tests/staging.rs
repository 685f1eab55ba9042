//! Staging sessions against a live store.

use shortcuts_store::types::{Header, HttpMethod, LayoutType, ShortcutId, VariableType};
use shortcuts_store::{ShortcutEditor, Store, StoreConfig, VariableEditor};

async fn store_with(names: &[&str]) -> (Store, Vec<ShortcutId>) {
    let store = Store::open(StoreConfig::in_memory()).await.unwrap();
    let mut ids = Vec::new();
    for name in names {
        let name = name.to_string();
        let editor = ShortcutEditor::begin(&store, None).await.unwrap();
        editor.mutate(move |s| s.name = name).await.unwrap();
        ids.push(editor.commit().await.unwrap());
    }
    (store, ids)
}

#[tokio::test]
async fn begin_then_discard_is_invisible() {
    let (store, ids) = store_with(&["A", "B"]).await;
    let before = store.snapshot();

    let editor = ShortcutEditor::begin(&store, Some(ids[1])).await.unwrap();
    editor.discard().await.unwrap();

    assert_eq!(*store.snapshot(), *before);
}

#[tokio::test]
async fn edit_commit_keeps_identity_and_position() {
    let (store, ids) = store_with(&["A", "B", "C"]).await;
    let category = store.categories()[0].id;

    let editor = ShortcutEditor::begin(&store, Some(ids[1])).await.unwrap();
    editor
        .mutate(|s| {
            s.name = "B2".into();
            s.method = HttpMethod::Post;
        })
        .await
        .unwrap();
    editor
        .mutate(|s| s.headers.push(Header::new("X-Token", "t")))
        .await
        .unwrap();
    assert_eq!(editor.commit().await.unwrap(), ids[1]);

    let edited = store.shortcut(ids[1]).unwrap();
    assert_eq!(edited.name, "B2");
    assert_eq!(edited.method, HttpMethod::Post);
    assert_eq!(edited.headers.len(), 1);
    assert_eq!(store.category(category).unwrap().shortcuts, ids);
    assert!(store.shortcut(ShortcutId::TEMPORARY).is_none());
}

#[tokio::test]
async fn create_commit_allocates_above_everything_seen() {
    let (store, ids) = store_with(&["A", "B", "C"]).await;
    // Deleting the newest must not free its id.
    store.delete_shortcut(ids[2]).await.unwrap();

    let other = store.create_category("Other", LayoutType::Grid).await.unwrap();
    let editor = ShortcutEditor::begin_in(&store, None, Some(other)).await.unwrap();
    editor.mutate(|s| s.name = "D".into()).await.unwrap();
    let id = editor.commit().await.unwrap();

    assert!(ids.iter().all(|old| id > *old));
    assert_eq!(store.category(other).unwrap().shortcuts.last(), Some(&id));
}

#[tokio::test]
async fn shadow_is_observable_under_temporary_id() {
    let (store, ids) = store_with(&["A"]).await;
    let mut shadow = store.observe_shortcut(ShortcutId::TEMPORARY).await;
    assert_eq!(shadow.recv().await.unwrap(), None);

    let editor = ShortcutEditor::begin(&store, Some(ids[0])).await.unwrap();
    assert_eq!(shadow.recv().await.unwrap().unwrap().name, "A");

    editor.mutate(|s| s.name = "A!".into()).await.unwrap();
    assert_eq!(shadow.recv().await.unwrap().unwrap().name, "A!");

    editor.commit().await.unwrap();
    assert_eq!(shadow.recv().await.unwrap(), None);
}

#[tokio::test]
async fn variable_edit_roundtrip() {
    let store = Store::open(StoreConfig::in_memory()).await.unwrap();
    let editor = VariableEditor::begin(&store, None).await.unwrap();
    editor
        .mutate(|v| {
            v.key = "host".into();
            v.value = "example.org".into();
        })
        .await
        .unwrap();
    assert!(editor.has_changes().unwrap());
    let id = editor.commit().await.unwrap();

    let editor = VariableEditor::begin(&store, Some(id)).await.unwrap();
    assert!(!editor.has_changes().unwrap());
    editor
        .mutate(|v| v.variable_type = VariableType::Text)
        .await
        .unwrap();
    editor.commit().await.unwrap();

    let stored = store.variable(id).unwrap();
    assert_eq!(stored.variable_type, VariableType::Text);
    assert_eq!(stored.value, "example.org");
    assert_eq!(store.variables().len(), 1);
}
