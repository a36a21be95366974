//! 端到端同步场景：完整 SDK 跑在 MemoryBackend 上

use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_test::assert_ok;

use crate::cache::{CachedValue, QueryFetcher, QueryKey, UpdateSource};
use crate::config::ListSyncConfig;
use crate::error::FailureReason;
use crate::events::SyncEvent;
use crate::models::{MemberRole, Todo};
use crate::queries::RemoteQueryFetcher;
use crate::remote::{MemoryBackend, Table};
use crate::sdk::ListSyncSDK;

/// Groceries 清单：Milk(0)、Eggs(1)，均未完成
fn groceries() -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    backend.sign_in("u1");
    backend
        .seed(
            Table::Profiles,
            vec![
                json!({"id": "u1", "display_name": "Ada Lovelace", "email": "ada@example.com"}),
                json!({"id": "u2", "display_name": "Grace Hopper"}),
            ],
        )
        .unwrap();
    backend
        .seed(
            Table::Lists,
            vec![json!({"id": "L1", "name": "Groceries", "owner_id": "u1", "position": 0})],
        )
        .unwrap();
    backend
        .seed(
            Table::Todos,
            vec![
                json!({"id": "T1", "list_id": "L1", "title": "Milk", "position": 0, "is_complete": false}),
                json!({"id": "T2", "list_id": "L1", "title": "Eggs", "position": 1, "is_complete": false}),
            ],
        )
        .unwrap();
    backend
}

fn sdk_over(backend: &Arc<MemoryBackend>) -> ListSyncSDK {
    ListSyncSDK::with_backend(ListSyncConfig::default(), backend.clone())
}

fn titles(todos: &[Todo]) -> Vec<&str> {
    todos.iter().map(|t| t.title.as_str()).collect()
}

fn positions(todos: &[Todo]) -> Vec<(String, i64)> {
    todos.iter().map(|t| (t.id.clone(), t.position)).collect()
}

fn summary(todos: &[Todo]) -> Vec<(String, String, bool)> {
    todos
        .iter()
        .map(|t| (t.id.clone(), t.title.clone(), t.is_complete))
        .collect()
}

/// 直接从后端拉取的真实状态
async fn remote_todos(backend: &Arc<MemoryBackend>, list_id: &str) -> Vec<Todo> {
    let fetcher = RemoteQueryFetcher::new(backend.clone(), backend.clone());
    let value = fetcher.fetch(&QueryKey::Todos(list_id.to_string())).await.unwrap();
    value.as_todos().unwrap().to_vec()
}

fn drain(receiver: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

async fn wait_for<F>(receiver: &mut broadcast::Receiver<SyncEvent>, predicate: F) -> SyncEvent
where
    F: Fn(&SyncEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match receiver.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// 记录某个 key 每次发布的待办快照
fn record_todos(sdk: &ListSyncSDK, list_id: &str) -> (crate::cache::WatchHandle, Arc<Mutex<Vec<Vec<Todo>>>>) {
    let seen: Arc<Mutex<Vec<Vec<Todo>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handle = sdk.on_key_changed(QueryKey::Todos(list_id.to_string()), move |_, value| {
        if let Some(todos) = value.and_then(CachedValue::as_todos) {
            sink.lock().push(todos.to_vec());
        }
    });
    (handle, seen)
}

#[tokio::test]
async fn toggling_twice_restores_every_item() {
    let backend = groceries();
    let sdk = sdk_over(&backend);
    let before = assert_ok!(sdk.todos("L1").await);

    for todo in &before {
        let first = sdk.mutations().toggle_todo("L1", &todo.id).await;
        assert_eq!(first.confirmed().map(|t| t.is_complete), Some(!todo.is_complete));
        let second = sdk.mutations().toggle_todo("L1", &todo.id).await;
        assert_eq!(second.confirmed().map(|t| t.is_complete), Some(todo.is_complete));
    }

    let after = assert_ok!(sdk.todos("L1").await);
    let flags = |todos: &[Todo]| -> Vec<(String, bool, i64)> {
        todos.iter().map(|t| (t.id.clone(), t.is_complete, t.position)).collect()
    };
    assert_eq!(flags(&after), flags(&before));
    assert!(after.iter().all(|t| t.updated_by.as_deref() == Some("u1")));
}

#[tokio::test]
async fn denied_create_leaves_lists_exactly_as_before() {
    let backend = groceries();
    let sdk = sdk_over(&backend);
    let before = assert_ok!(sdk.lists().await);
    let mut events = sdk.subscribe_events();

    backend.deny_writes_to(Table::Lists);
    let outcome = sdk.mutations().create_list("Errands").await;

    assert!(outcome.was_rolled_back());
    assert_eq!(outcome.notice().map(|n| n.reason), Some(FailureReason::Denied));
    assert_eq!(assert_ok!(sdk.lists().await), before);
    assert!(sdk.cache().keys().iter().all(|key| key.list_id().is_none()));

    let notices = drain(&mut events)
        .into_iter()
        .filter(SyncEvent::is_failure_notice)
        .count();
    assert_eq!(notices, 1);
}

#[tokio::test]
async fn offline_bread_shows_then_reverts_with_one_notice() {
    let backend = groceries();
    let sdk = sdk_over(&backend);
    let before = assert_ok!(sdk.todos("L1").await);
    let (_handle, seen) = record_todos(&sdk, "L1");
    let mut events = sdk.subscribe_events();

    backend.set_offline(true);
    let outcome = sdk.mutations().create_todo("L1", "Bread").await;
    backend.set_offline(false);

    assert!(outcome.was_rolled_back());
    let notice = outcome.notice().cloned().unwrap();
    assert_eq!(notice.reason, FailureReason::Transient);
    assert_eq!(notice.key, Some(QueryKey::Todos("L1".into())));

    let seen = seen.lock().clone();
    assert_eq!(titles(&seen[0]), vec!["Milk", "Eggs", "Bread"]);
    assert_eq!(titles(seen.last().unwrap()), vec!["Milk", "Eggs"]);

    let after = sdk.cache().snapshot(&QueryKey::Todos("L1".into())).unwrap();
    assert_eq!(after, CachedValue::Todos(before));

    let rolled_back: Vec<SyncEvent> = drain(&mut events)
        .into_iter()
        .filter(SyncEvent::is_failure_notice)
        .collect();
    assert_eq!(rolled_back.len(), 1);
    assert!(matches!(rolled_back[0], SyncEvent::MutationRolledBack { .. }));
}

#[tokio::test]
async fn confirmed_create_leaves_no_placeholder_anywhere() {
    let backend = groceries();
    let sdk = sdk_over(&backend);
    assert_ok!(sdk.todos("L1").await);
    let (_handle, seen) = record_todos(&sdk, "L1");

    let created = sdk.mutations().create_todo("L1", "  Bread ").await;
    let todo = created.into_confirmed().unwrap();
    assert_eq!(todo.title, "Bread");
    assert_eq!(todo.position, 2);
    assert_eq!(todo.created_by.as_deref(), Some("u1"));

    let placeholder_id = seen.lock()[0]
        .iter()
        .find(|t| t.title == "Bread")
        .map(|t| t.id.clone())
        .unwrap();
    assert_ne!(placeholder_id, todo.id);
    assert!(!sdk.mutations().is_placeholder(&placeholder_id));
    assert!(sdk.cache().keys_containing(&placeholder_id).is_empty());
    assert_eq!(
        sdk.cache().keys_containing(&todo.id),
        vec![QueryKey::Todos("L1".into())]
    );
    assert!(backend.find(Table::Todos, &placeholder_id).is_none());
}

#[tokio::test]
async fn created_list_is_ready_without_loading() {
    let backend = groceries();
    let sdk = sdk_over(&backend);
    assert_ok!(sdk.lists().await);

    let list = sdk.mutations().create_list("Errands").await.into_confirmed().unwrap();
    assert_eq!(list.position, 1);
    assert_eq!(list.owner_id, "u1");

    let lists = assert_ok!(sdk.lists().await);
    assert_eq!(lists.iter().filter(|l| l.name == "Errands").count(), 1);
    assert!(sdk.cache().has_value(&QueryKey::Todos(list.id.clone())));
    assert!(assert_ok!(sdk.todos(&list.id).await).is_empty());
}

#[tokio::test]
async fn reorder_assigns_dense_positions() {
    let backend = groceries();
    for (id, title) in [("T3", "Bread"), ("T4", "Butter"), ("T5", "Jam")] {
        backend
            .insert_out_of_band(Table::Todos, json!({"id": id, "list_id": "L1", "title": title}))
            .unwrap();
    }
    let sdk = sdk_over(&backend);
    assert_ok!(sdk.todos("L1").await);

    let target: Vec<String> = ["T3", "T1", "T5", "T2", "T4"].iter().map(|s| s.to_string()).collect();
    assert!(sdk.mutations().reorder_todos("L1", &target).await.is_confirmed());

    let todos = assert_ok!(sdk.todos("L1").await);
    let expected: Vec<(String, i64)> = target
        .iter()
        .enumerate()
        .map(|(position, id)| (id.clone(), position as i64))
        .collect();
    assert_eq!(positions(&todos), expected);
    for (id, position) in &expected {
        let row = backend.find(Table::Todos, id).unwrap();
        assert_eq!(row.get("position"), Some(&json!(position)));
    }
}

#[tokio::test]
async fn groceries_reorder_is_identical_before_and_after_confirmation() {
    let backend = groceries();
    let sdk = sdk_over(&backend);
    assert_ok!(sdk.todos("L1").await);
    let (_handle, seen) = record_todos(&sdk, "L1");

    let outcome = sdk
        .mutations()
        .reorder_todos("L1", &["T2".to_string(), "T1".to_string()])
        .await;
    assert!(outcome.is_confirmed());

    let expected = vec![("T2".to_string(), 0), ("T1".to_string(), 1)];
    let optimistic = seen.lock()[0].clone();
    assert_eq!(positions(&optimistic), expected);
    assert_eq!(positions(&assert_ok!(sdk.todos("L1").await)), expected);
}

#[tokio::test]
async fn out_of_band_change_converges_through_the_feed() {
    let backend = groceries();
    let sdk = sdk_over(&backend);
    assert_ok!(sdk.todos("L1").await);
    let _observation = assert_ok!(sdk.observe_list("L1").await);
    let mut events = sdk.subscribe_events();

    backend
        .apply_out_of_band(Table::Todos, "T1", json!({"title": "Oat milk"}))
        .unwrap();

    wait_for(&mut events, |event| {
        matches!(
            event,
            SyncEvent::CacheUpdated { key: QueryKey::Todos(id), source: UpdateSource::Fetch, .. } if id == "L1"
        )
    })
    .await;
    assert_eq!(titles(&assert_ok!(sdk.todos("L1").await)), vec!["Oat milk", "Eggs"]);

    sdk.shutdown().await.unwrap();
}

#[tokio::test]
async fn changes_missed_during_a_gap_are_recovered() {
    let backend = groceries();
    let sdk = sdk_over(&backend);
    assert_ok!(sdk.todos("L1").await);
    let _observation = assert_ok!(sdk.observe_list("L1").await);
    let mut events = sdk.subscribe_events();

    backend.interrupt_feeds();
    backend
        .update_silently(Table::Todos, "T1", json!({"title": "Almond milk"}))
        .unwrap();
    backend.resume_feeds();

    wait_for(&mut events, |event| {
        matches!(event, SyncEvent::FeedResumed { channel, .. } if channel == "todos:L1")
    })
    .await;
    assert_eq!(titles(&assert_ok!(sdk.todos("L1").await)), vec!["Almond milk", "Eggs"]);

    sdk.shutdown().await.unwrap();
}

#[tokio::test]
async fn deleting_a_vanished_todo_is_ignored() {
    let backend = groceries();
    let sdk = sdk_over(&backend);
    assert_ok!(sdk.todos("L1").await);
    let mut events = sdk.subscribe_events();

    backend.delete_out_of_band(Table::Todos, "T2").unwrap();
    let outcome = sdk.mutations().delete_todo("L1", "T2").await;

    assert!(outcome.is_ignored());
    assert_eq!(titles(&assert_ok!(sdk.todos("L1").await)), vec!["Milk"]);
    assert!(!drain(&mut events).iter().any(SyncEvent::is_failure_notice));

    let outcome = sdk.mutations().set_todo_complete("L1", "T2", true).await;
    assert!(outcome.is_ignored());
    assert_eq!(titles(&assert_ok!(sdk.todos("L1").await)), vec!["Milk"]);
}

#[tokio::test]
async fn joining_by_share_token_adds_the_list() {
    let backend = groceries();
    backend
        .seed(
            Table::Lists,
            vec![json!({"id": "L9", "name": "Book club", "owner_id": "u2", "share_token": "tok-9"})],
        )
        .unwrap();
    let sdk = sdk_over(&backend);
    assert_eq!(assert_ok!(sdk.lists().await).len(), 1);

    let joined = sdk.mutations().join_via_share_token("tok-9").await;
    assert_eq!(joined.confirmed().map(String::as_str), Some("L9"));

    let lists = assert_ok!(sdk.lists().await);
    assert!(lists.iter().any(|l| l.id == "L9"));
    let members = assert_ok!(sdk.collaborators("L9").await);
    let roles: Vec<(&str, MemberRole)> = members.iter().map(|m| (m.id.as_str(), m.role)).collect();
    assert_eq!(roles, vec![("u2", MemberRole::Owner), ("u1", MemberRole::Collaborator)]);

    let unknown = sdk.mutations().join_via_share_token("nope").await;
    assert_eq!(unknown.notice().map(|n| n.reason), Some(FailureReason::Rejected));
}

#[tokio::test]
async fn blank_names_are_rejected_before_any_write() {
    let backend = groceries();
    let sdk = sdk_over(&backend);
    let before = assert_ok!(sdk.todos("L1").await);
    let mut events = sdk.subscribe_events();

    let outcome = sdk.mutations().create_todo("L1", "   ").await;
    assert_eq!(outcome.notice().map(|n| n.reason), Some(FailureReason::Rejected));
    assert!(sdk.mutations().create_list("").await.notice().is_some());

    assert!(backend.write_log().is_empty());
    assert_eq!(assert_ok!(sdk.todos("L1").await), before);
    let events = drain(&mut events);
    assert!(!events.iter().any(|e| matches!(e, SyncEvent::MutationStarted { .. })));
    assert_eq!(
        events.iter().filter(|e| matches!(e, SyncEvent::MutationRejected { .. })).count(),
        2
    );
}

#[tokio::test]
async fn signed_out_mutations_are_rejected() {
    let backend = groceries();
    let sdk = sdk_over(&backend);
    backend.sign_out();

    let outcome = sdk.mutations().create_list("Errands").await;
    assert_eq!(outcome.notice().map(|n| n.reason), Some(FailureReason::Denied));
    assert_eq!(assert_ok!(sdk.profile().await), None);
}

#[tokio::test]
async fn removing_a_collaborator_updates_members() {
    let backend = groceries();
    backend
        .seed(Table::ListCollaborators, vec![json!({"list_id": "L1", "user_id": "u2"})])
        .unwrap();
    let sdk = sdk_over(&backend);
    assert_eq!(assert_ok!(sdk.collaborators("L1").await).len(), 2);

    assert!(sdk.mutations().remove_collaborator("L1", "u2").await.is_confirmed());
    let members = assert_ok!(sdk.collaborators("L1").await);
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].role, MemberRole::Owner);

    assert!(sdk.mutations().remove_collaborator("L1", "u2").await.is_ignored());
}

#[tokio::test]
async fn renaming_and_deleting_a_list() {
    let backend = groceries();
    let sdk = sdk_over(&backend);
    assert_ok!(sdk.lists().await);
    assert_ok!(sdk.list("L1").await);
    assert_ok!(sdk.todos("L1").await);

    let renamed = sdk.mutations().rename_list("L1", "Food").await;
    assert_eq!(renamed.confirmed().map(|l| l.name.as_str()), Some("Food"));
    assert_eq!(assert_ok!(sdk.list("L1").await).name, "Food");
    assert_eq!(assert_ok!(sdk.lists().await)[0].name, "Food");

    assert!(sdk.mutations().delete_list("L1").await.is_confirmed());
    assert!(assert_ok!(sdk.lists().await).is_empty());
    assert!(!sdk.cache().has_value(&QueryKey::Todos("L1".into())));
    assert!(backend.rows(Table::Todos).is_empty());
}

#[tokio::test]
async fn abandoned_mutation_still_confirms_and_settles() {
    let backend = groceries();
    let sdk = sdk_over(&backend);
    assert_ok!(sdk.todos("L1").await);
    let (_handle, seen) = record_todos(&sdk, "L1");
    let mut events = sdk.subscribe_events();
    backend.set_latency(60, 60);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        sdk.mutations().create_todo("L1", "Bread"),
    )
    .await;
    assert!(abandoned.is_err());

    wait_for(&mut events, |event| matches!(event, SyncEvent::MutationConfirmed { .. })).await;
    wait_for(&mut events, |event| {
        matches!(
            event,
            SyncEvent::CacheUpdated { key: QueryKey::Todos(id), source: UpdateSource::Fetch, .. } if id == "L1"
        )
    })
    .await;

    let placeholder_id = seen.lock()[0]
        .iter()
        .find(|t| t.title == "Bread")
        .map(|t| t.id.clone())
        .unwrap();
    assert!(!sdk.mutations().is_placeholder(&placeholder_id));

    let state = sdk.cache().entry_state(&QueryKey::Todos("L1".into())).unwrap();
    assert_eq!(state.pending_mutations, 0);
    assert!(!state.invalidated);
    let cached = sdk.cache().snapshot(&QueryKey::Todos("L1".into())).unwrap();
    assert_eq!(cached, CachedValue::Todos(remote_todos(&backend, "L1").await));
    assert_eq!(titles(cached.as_todos().unwrap()), vec!["Milk", "Eggs", "Bread"]);
}

#[tokio::test]
async fn feed_event_during_mutation_settles_to_remote_state() {
    let backend = groceries();
    let sdk = sdk_over(&backend);
    assert_ok!(sdk.todos("L1").await);
    let _observation = assert_ok!(sdk.observe_list("L1").await);
    backend.set_latency(50, 50);

    let other_client = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        backend
            .apply_out_of_band(Table::Todos, "T2", json!({"title": "Duck eggs"}))
            .unwrap();
    };
    let (toggled, _) = tokio::join!(sdk.mutations().toggle_todo("L1", "T1"), other_client);
    assert!(toggled.is_confirmed());

    let cached = sdk.cache().snapshot(&QueryKey::Todos("L1".into())).unwrap();
    let cached = cached.as_todos().unwrap();
    assert_eq!(
        summary(cached),
        vec![
            ("T1".to_string(), "Milk".to_string(), true),
            ("T2".to_string(), "Duck eggs".to_string(), false),
        ]
    );
    assert_eq!(summary(cached), summary(&remote_todos(&backend, "L1").await));

    sdk.shutdown().await.unwrap();
}

#[tokio::test]
async fn overlapping_mutations_with_one_failure_settle_to_remote_state() {
    let backend = groceries();
    let sdk = sdk_over(&backend);
    assert_ok!(sdk.todos("L1").await);
    let mut events = sdk.subscribe_events();
    backend.set_latency(40, 40);
    backend.fail_next_writes(1);

    let first = sdk.mutations().set_todo_complete("L1", "T1", true);
    let second = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        sdk.mutations().update_todo_title("L1", "T2", "Duck eggs").await
    };
    let (first, second) = tokio::join!(first, second);

    assert!(first.was_rolled_back());
    assert!(second.is_confirmed());

    let cached = sdk.cache().snapshot(&QueryKey::Todos("L1".into())).unwrap();
    let cached = cached.as_todos().unwrap();
    assert_eq!(
        summary(cached),
        vec![
            ("T1".to_string(), "Milk".to_string(), false),
            ("T2".to_string(), "Duck eggs".to_string(), false),
        ]
    );
    assert_eq!(summary(cached), summary(&remote_todos(&backend, "L1").await));
    assert!(!sdk.cache().has_pending_mutations(&QueryKey::Todos("L1".into())));

    let notices = drain(&mut events)
        .into_iter()
        .filter(SyncEvent::is_failure_notice)
        .count();
    assert_eq!(notices, 1);
}
