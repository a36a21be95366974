//! 变更协调器
//!
//! 每个变更都走同一套流程：
//! 1. 校验参数（失败 → `Rejected`，不做任何写入）
//! 2. `MutationToken::begin` 并对受影响的 key 做乐观写
//! 3. 调用远端
//! 4. 成功：用确认行替换乐观值，commit；失败：回滚并发出一次失败通知；
//!    目标已不存在：commit 并按空操作处理
//! 5. 无论结果如何都执行收尾拉取
//!
//! 流程在独立的 tokio 任务中运行：调用方放弃等待（超时、`select!` 分支、界面任务被取消）
//! 不会中断进行中的变更，提交或回滚以及收尾拉取照常完成。

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::outcome::{MutationKind, MutationNotice, MutationOutcome};
use super::reorder::{assign_positions, PositionUpdate};
use super::token::MutationToken;
use crate::cache::{CachedValue, QueryCache, QueryKey};
use crate::error::{FailureReason, ListSyncError, Result};
use crate::events::{event_builders, EventManager};
use crate::models::{List, ListId, ListMember, MemberRole, Todo, UserId};
use crate::reconciler::{apply_positions, next_position, remove_by_id, replace_by_id, replace_placeholder};
use crate::remote::{from_row, to_row, Filter, IdentityProvider, RemoteStore, Table, JOIN_LIST_FUNCTION};
use crate::utils::now_utc;

struct CoordinatorCore {
    cache: QueryCache,
    remote: Arc<dyn RemoteStore>,
    identity: Arc<dyn IdentityProvider>,
    events: Arc<EventManager>,
    /// 仍在创建中的占位 id
    placeholders: Mutex<HashSet<String>>,
}

fn normalize_text(value: &str, what: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ListSyncError::InvalidArgument(format!("{} cannot be empty", what)));
    }
    Ok(trimmed.to_string())
}

fn map_lists<F>(value: &CachedValue, f: F) -> Option<CachedValue>
where
    F: FnOnce(&mut Vec<List>) -> bool,
{
    let mut lists = value.as_lists()?.to_vec();
    f(&mut lists).then(|| CachedValue::Lists(lists))
}

fn map_todos<F>(value: &CachedValue, f: F) -> Option<CachedValue>
where
    F: FnOnce(&mut Vec<Todo>) -> bool,
{
    let mut todos = value.as_todos()?.to_vec();
    f(&mut todos).then(|| CachedValue::Todos(todos))
}

fn map_members<F>(value: &CachedValue, f: F) -> Option<CachedValue>
where
    F: FnOnce(&mut Vec<ListMember>) -> bool,
{
    let mut members = value.as_collaborators()?.to_vec();
    f(&mut members).then(|| CachedValue::Collaborators(members))
}

/// 用确认行替换同 id 的缓存元素（不存在时不改动）
fn confirm_todo(value: &CachedValue, confirmed: Todo) -> Option<CachedValue> {
    map_todos(value, |todos| replace_by_id(todos, confirmed))
}

fn confirm_list(value: &CachedValue, confirmed: List) -> Option<CachedValue> {
    match value {
        CachedValue::List(_) => Some(CachedValue::List(confirmed)),
        other => map_lists(other, |lists| replace_by_id(lists, confirmed)),
    }
}

/// 占位 id 的登记，drop 时注销
struct PlaceholderGuard<'a> {
    placeholders: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for PlaceholderGuard<'_> {
    fn drop(&mut self) {
        self.placeholders.lock().remove(&self.id);
    }
}

impl CoordinatorCore {
    fn is_placeholder(&self, id: &str) -> bool {
        self.placeholders.lock().contains(id)
    }

    fn register_placeholder(&self, id: &str) -> PlaceholderGuard<'_> {
        self.placeholders.lock().insert(id.to_string());
        PlaceholderGuard {
            placeholders: &self.placeholders,
            id: id.to_string(),
        }
    }

    fn start(&self, kind: MutationKind) -> MutationToken {
        let token = MutationToken::begin(&self.cache, kind);
        debug!("mutation {} ({}) started", token.id(), kind);
        self.events.emit(event_builders::mutation_started(token.id(), kind));
        token
    }

    async fn succeed<T>(&self, mut token: MutationToken, value: T) -> MutationOutcome<T> {
        if let Err(err) = token.commit() {
            warn!("commit of mutation {} failed: {}", token.id(), err);
        }
        info!("mutation {} ({}) confirmed", token.id(), token.kind());
        self.events
            .emit(event_builders::mutation_confirmed(token.id(), token.kind()));
        self.settle(&mut token).await;
        MutationOutcome::Confirmed(value)
    }

    async fn fail<T>(&self, mut token: MutationToken, key: Option<QueryKey>, err: ListSyncError) -> MutationOutcome<T> {
        let reason = err.failure_reason();

        if reason == FailureReason::StaleTarget {
            // 目标已被并发删除：不回滚，收尾拉取会反映它的消失
            if let Err(commit_err) = token.commit() {
                warn!("commit of mutation {} failed: {}", token.id(), commit_err);
            }
            debug!("mutation {} ({}) hit a stale target: {}", token.id(), token.kind(), err);
            self.events.emit(event_builders::mutation_ignored(
                token.id(),
                token.kind(),
                &err.to_string(),
            ));
            self.settle(&mut token).await;
            return MutationOutcome::Ignored;
        }

        if let Err(rollback_err) = token.rollback() {
            warn!("rollback of mutation {} failed: {}", token.id(), rollback_err);
        }
        warn!("mutation {} ({}) rolled back: {}", token.id(), token.kind(), err);
        let notice = MutationNotice::new(token.id(), token.kind(), key, err.to_string(), reason);
        self.events.emit(event_builders::mutation_rolled_back(notice.clone()));
        self.settle(&mut token).await;
        MutationOutcome::RolledBack(notice)
    }

    async fn settle(&self, token: &mut MutationToken) {
        if let Err(err) = token.settle().await {
            warn!("settle of mutation {} failed: {}", token.id(), err);
        }
    }

    fn reject<T>(&self, kind: MutationKind, key: Option<QueryKey>, err: ListSyncError) -> MutationOutcome<T> {
        let notice = MutationNotice::new(
            &Uuid::new_v4().to_string(),
            kind,
            key,
            err.to_string(),
            err.failure_reason(),
        );
        info!("mutation {} rejected: {}", kind, err);
        self.events.emit(event_builders::mutation_rejected(notice.clone()));
        MutationOutcome::Rejected(notice)
    }

    fn ignore<T>(&self, kind: MutationKind, reason: &str) -> MutationOutcome<T> {
        debug!("mutation {} ignored: {}", kind, reason);
        self.events.emit(event_builders::mutation_ignored(
            &Uuid::new_v4().to_string(),
            kind,
            reason,
        ));
        MutationOutcome::Ignored
    }

    async fn require_user(&self) -> Result<UserId> {
        self.identity
            .current_user_id()
            .await
            .ok_or(ListSyncError::NotAuthenticated)
    }

    // ========== 清单 ==========

    /// 创建清单：追加到末尾，确认后预置子资源的空值
    async fn create_list(&self, name: &str) -> MutationOutcome<List> {
        let kind = MutationKind::CreateList;
        let key = QueryKey::Lists;
        let name = match normalize_text(name, "list name") {
            Ok(name) => name,
            Err(err) => return self.reject(kind, Some(key), err),
        };
        let user = match self.require_user().await {
            Ok(user) => user,
            Err(err) => return self.reject(kind, Some(key), err),
        };

        let mut token = self.start(kind);
        let position = self
            .cache
            .snapshot(&key)
            .and_then(|value| value.as_lists().map(next_position))
            .unwrap_or(0);
        let placeholder = List::placeholder(&name, &user, position, now_utc());
        let placeholder_id = placeholder.id.clone();
        let placeholder_guard = self.register_placeholder(&placeholder_id);

        let result: Result<List> = async {
            token.apply(&key, |value| {
                map_lists(value, |lists| {
                    lists.push(placeholder);
                    true
                })
            })?;

            let row = to_row(&json!({
                "name": name,
                "owner_id": user,
                "position": position,
            }))?;
            let list: List = from_row(self.remote.insert(Table::Lists, row).await?)?;

            let confirmed = list.clone();
            token.apply_confirmed(&key, |value| {
                map_lists(value, |lists| {
                    replace_placeholder(lists, &placeholder_id, confirmed);
                    true
                })
            })?;
            Ok(list)
        }
        .await;
        drop(placeholder_guard);

        match result {
            Ok(list) => {
                // 进入新清单时不需要加载态
                let seeds = [
                    (QueryKey::List(list.id.clone()), CachedValue::List(list.clone())),
                    (QueryKey::Todos(list.id.clone()), CachedValue::Todos(Vec::new())),
                    (QueryKey::Collaborators(list.id.clone()), CachedValue::Collaborators(Vec::new())),
                ];
                for (seed_key, value) in seeds {
                    if let Err(err) = self.cache.seed(&seed_key, value) {
                        warn!("failed to seed {}: {}", seed_key, err);
                    }
                }
                self.succeed(token, list).await
            }
            Err(err) => self.fail(token, Some(key), err).await,
        }
    }

    async fn rename_list(&self, list_id: &str, name: &str) -> MutationOutcome<List> {
        let kind = MutationKind::RenameList;
        let list_key = QueryKey::List(list_id.to_string());
        let name = match normalize_text(name, "list name") {
            Ok(name) => name,
            Err(err) => return self.reject(kind, Some(list_key), err),
        };
        if self.is_placeholder(list_id) {
            return self.ignore(kind, "list is still being created");
        }

        let mut token = self.start(kind);
        let result: Result<List> = async {
            let rename = |value: &CachedValue| -> Option<CachedValue> {
                match value {
                    CachedValue::List(list) => {
                        let mut list = list.clone();
                        list.name = name.clone();
                        Some(CachedValue::List(list))
                    }
                    other => map_lists(other, |lists| match lists.iter_mut().find(|l| l.id == list_id) {
                        Some(list) => {
                            list.name = name.clone();
                            true
                        }
                        None => false,
                    }),
                }
            };
            token.apply(&QueryKey::Lists, rename)?;
            token.apply(&list_key, rename)?;

            let patch = to_row(&json!({ "name": name }))?;
            let list: List = from_row(self.remote.update(Table::Lists, list_id, patch).await?)?;

            token.apply_confirmed(&QueryKey::Lists, |value| confirm_list(value, list.clone()))?;
            token.apply_confirmed(&list_key, |value| confirm_list(value, list.clone()))?;
            Ok(list)
        }
        .await;

        match result {
            Ok(list) => self.succeed(token, list).await,
            Err(err) => self.fail(token, Some(list_key), err).await,
        }
    }

    /// 删除清单：从 Lists 移除，确认后清掉该清单自身的各个 key
    async fn delete_list(&self, list_id: &str) -> MutationOutcome<()> {
        let kind = MutationKind::DeleteList;
        if self.is_placeholder(list_id) {
            return self.ignore(kind, "list is still being created");
        }

        let mut token = self.start(kind);
        let result: Result<()> = async {
            token.apply(&QueryKey::Lists, |value| {
                map_lists(value, |lists| remove_by_id(lists, list_id))
            })?;
            self.remote.delete(Table::Lists, list_id).await
        }
        .await;

        match result {
            Ok(()) => {
                for key in [
                    QueryKey::List(list_id.to_string()),
                    QueryKey::Todos(list_id.to_string()),
                    QueryKey::Collaborators(list_id.to_string()),
                ] {
                    self.cache.remove(&key);
                }
                self.succeed(token, ()).await
            }
            Err(err) => self.fail(token, Some(QueryKey::Lists), err).await,
        }
    }

    /// 按给定顺序重排清单
    async fn reorder_lists(&self, ordered_ids: &[ListId]) -> MutationOutcome<()> {
        let kind = MutationKind::ReorderLists;
        let key = QueryKey::Lists;
        let known: Vec<String> = match self.cache.read(&key).await {
            Ok(read) => read
                .value
                .as_lists()
                .map(|lists| lists.iter().map(|l| l.id.clone()).collect())
                .unwrap_or_default(),
            Err(err) => return self.reject(kind, Some(key), err),
        };
        self.reorder(kind, key, Table::Lists, ordered_ids, known).await
    }

    // ========== 待办 ==========

    /// 创建待办：position 为当前缓存的待办数
    async fn create_todo(&self, list_id: &str, title: &str) -> MutationOutcome<Todo> {
        let kind = MutationKind::CreateTodo;
        let key = QueryKey::Todos(list_id.to_string());
        let title = match normalize_text(title, "todo title") {
            Ok(title) => title,
            Err(err) => return self.reject(kind, Some(key), err),
        };
        if self.is_placeholder(list_id) {
            return self.ignore(kind, "list is still being created");
        }
        let user = match self.require_user().await {
            Ok(user) => user,
            Err(err) => return self.reject(kind, Some(key), err),
        };

        let position = match self.cache.read(&key).await {
            Ok(read) => read.value.as_todos().map(next_position).unwrap_or(0),
            Err(err) => {
                debug!("could not read {} before create: {}", key, err);
                self.cache
                    .snapshot(&key)
                    .and_then(|value| value.as_todos().map(next_position))
                    .unwrap_or(0)
            }
        };

        let mut token = self.start(kind);
        let mut placeholder = Todo::placeholder(list_id, &title, position, now_utc());
        placeholder.created_by = Some(user.clone());
        let placeholder_id = placeholder.id.clone();
        let placeholder_guard = self.register_placeholder(&placeholder_id);

        let result: Result<Todo> = async {
            token.apply(&key, |value| {
                map_todos(value, |todos| {
                    todos.push(placeholder);
                    true
                })
            })?;

            let row = to_row(&json!({
                "list_id": list_id,
                "title": title,
                "position": position,
                "is_complete": false,
                "created_by": user,
            }))?;
            let todo: Todo = from_row(self.remote.insert(Table::Todos, row).await?)?;

            let confirmed = todo.clone();
            token.apply_confirmed(&key, |value| {
                map_todos(value, |todos| {
                    replace_placeholder(todos, &placeholder_id, confirmed);
                    true
                })
            })?;
            Ok(todo)
        }
        .await;
        drop(placeholder_guard);

        match result {
            Ok(todo) => self.succeed(token, todo).await,
            Err(err) => self.fail(token, Some(key), err).await,
        }
    }

    async fn update_todo_title(&self, list_id: &str, todo_id: &str, title: &str) -> MutationOutcome<Todo> {
        let kind = MutationKind::UpdateTodoTitle;
        let key = QueryKey::Todos(list_id.to_string());
        let title = match normalize_text(title, "todo title") {
            Ok(title) => title,
            Err(err) => return self.reject(kind, Some(key), err),
        };
        let patch = json!({ "title": title });
        self.update_todo(kind, key, todo_id, patch, move |todo| todo.title = title)
            .await
    }

    async fn set_todo_complete(&self, list_id: &str, todo_id: &str, is_complete: bool) -> MutationOutcome<Todo> {
        let key = QueryKey::Todos(list_id.to_string());
        let patch = json!({ "is_complete": is_complete });
        self.update_todo(MutationKind::SetTodoComplete, key, todo_id, patch, move |todo| {
            todo.is_complete = is_complete
        })
        .await
    }

    /// 翻转缓存中的完成状态
    async fn toggle_todo(&self, list_id: &str, todo_id: &str) -> MutationOutcome<Todo> {
        let kind = MutationKind::ToggleTodo;
        let key = QueryKey::Todos(list_id.to_string());
        let current = match self.cache.read(&key).await {
            Ok(read) => read
                .value
                .as_todos()
                .and_then(|todos| todos.iter().find(|t| t.id == todo_id).map(|t| t.is_complete)),
            Err(err) => return self.reject(kind, Some(key), err),
        };
        let Some(is_complete) = current else {
            return self.ignore(kind, "todo is not in the cache");
        };
        let patch = json!({ "is_complete": !is_complete });
        self.update_todo(kind, key, todo_id, patch, move |todo| todo.is_complete = !is_complete)
            .await
    }

    async fn update_todo<F>(
        &self,
        kind: MutationKind,
        key: QueryKey,
        todo_id: &str,
        patch: Value,
        edit: F,
    ) -> MutationOutcome<Todo>
    where
        F: FnOnce(&mut Todo) + Send,
    {
        if self.is_placeholder(todo_id) {
            return self.ignore(kind, "todo is still being created");
        }
        let user = self.identity.current_user_id().await;

        let mut token = self.start(kind);
        let result: Result<Todo> = async {
            let updated_by = user.clone();
            token.apply(&key, |value| {
                map_todos(value, |todos| match todos.iter_mut().find(|t| t.id == todo_id) {
                    Some(todo) => {
                        edit(todo);
                        todo.updated_by = updated_by;
                        true
                    }
                    None => false,
                })
            })?;

            let mut row = to_row(&patch)?;
            row.insert("updated_by".to_string(), json!(user));
            let todo: Todo = from_row(self.remote.update(Table::Todos, todo_id, row).await?)?;

            token.apply_confirmed(&key, |value| confirm_todo(value, todo.clone()))?;
            Ok(todo)
        }
        .await;

        match result {
            Ok(todo) => self.succeed(token, todo).await,
            Err(err) => self.fail(token, Some(key), err).await,
        }
    }

    async fn delete_todo(&self, list_id: &str, todo_id: &str) -> MutationOutcome<()> {
        let kind = MutationKind::DeleteTodo;
        let key = QueryKey::Todos(list_id.to_string());
        if self.is_placeholder(todo_id) {
            return self.ignore(kind, "todo is still being created");
        }

        let mut token = self.start(kind);
        let result: Result<()> = async {
            token.apply(&key, |value| map_todos(value, |todos| remove_by_id(todos, todo_id)))?;
            self.remote.delete(Table::Todos, todo_id).await
        }
        .await;

        match result {
            Ok(()) => self.succeed(token, ()).await,
            Err(err) => self.fail(token, Some(key), err).await,
        }
    }

    /// 按给定顺序重排待办（通常是未完成分组）
    async fn reorder_todos(&self, list_id: &str, ordered_ids: &[String]) -> MutationOutcome<()> {
        let kind = MutationKind::ReorderTodos;
        let key = QueryKey::Todos(list_id.to_string());
        let known: Vec<String> = match self.cache.read(&key).await {
            Ok(read) => read
                .value
                .as_todos()
                .map(|todos| todos.iter().map(|t| t.id.clone()).collect())
                .unwrap_or_default(),
            Err(err) => return self.reject(kind, Some(key), err),
        };
        self.reorder(kind, key, Table::Todos, ordered_ids, known).await
    }

    async fn reorder(
        &self,
        kind: MutationKind,
        key: QueryKey,
        table: Table,
        ordered_ids: &[String],
        known: Vec<String>,
    ) -> MutationOutcome<()> {
        if ordered_ids.iter().any(|id| self.is_placeholder(id)) {
            return self.ignore(kind, "reorder includes an item still being created");
        }
        let known: Vec<&str> = known.iter().map(String::as_str).collect();
        let updates = match assign_positions(ordered_ids, &known) {
            Ok(updates) => updates,
            Err(err) => return self.reject(kind, Some(key), err),
        };

        let mut token = self.start(kind);
        let result: Result<()> = async {
            let optimistic = updates.clone();
            token.apply(&key, |value| match value {
                CachedValue::Lists(_) => map_lists(value, |lists| {
                    apply_positions(lists, &optimistic);
                    true
                }),
                _ => map_todos(value, |todos| {
                    apply_positions(todos, &optimistic);
                    true
                }),
            })?;
            self.write_positions(table, &updates).await
        }
        .await;

        match result {
            Ok(()) => self.succeed(token, ()).await,
            Err(err) => self.fail(token, Some(key), err).await,
        }
    }

    /// 逐个提交完整排列；单个元素已被删除时跳过
    async fn write_positions(&self, table: Table, updates: &[PositionUpdate]) -> Result<()> {
        for update in updates {
            let patch = to_row(&json!({ "position": update.position }))?;
            match self.remote.update(table, &update.id, patch).await {
                Ok(_) => {}
                Err(err) if err.is_stale_target() => {
                    debug!("{} {} vanished during reorder, skipped", table, update.id);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    // ========== 协作者 ==========

    async fn remove_collaborator(&self, list_id: &str, user_id: &str) -> MutationOutcome<()> {
        let kind = MutationKind::RemoveCollaborator;
        let key = QueryKey::Collaborators(list_id.to_string());

        let mut token = self.start(kind);
        let result: Result<()> = async {
            token.apply(&key, |value| {
                map_members(value, |members| {
                    let before = members.len();
                    members.retain(|m| !(m.id == user_id && m.role == MemberRole::Collaborator));
                    members.len() != before
                })
            })?;
            let filter = Filter::eq("list_id", list_id).and_eq("user_id", user_id);
            let removed = self.remote.delete_where(Table::ListCollaborators, &filter).await?;
            if removed == 0 {
                return Err(ListSyncError::NotFound(format!(
                    "collaborator {} on list {}",
                    user_id, list_id
                )));
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => self.succeed(token, ()).await,
            Err(err) => self.fail(token, Some(key), err).await,
        }
    }

    // ========== 分享 ==========

    /// 通过分享令牌加入清单（非乐观），成功后刷新 Lists
    async fn join_via_share_token(&self, share_token: &str) -> MutationOutcome<ListId> {
        let kind = MutationKind::JoinList;
        let key = QueryKey::Lists;
        let share_token = match normalize_text(share_token, "share token") {
            Ok(token) => token,
            Err(err) => return self.reject(kind, Some(key), err),
        };
        if let Err(err) = self.require_user().await {
            return self.reject(kind, Some(key), err);
        }

        let mut token = self.start(kind);
        let result: Result<Option<ListId>> = async {
            token.touch(&key)?;
            let value = self
                .remote
                .call(JOIN_LIST_FUNCTION, json!({ "p_share_token": share_token }))
                .await?;
            Ok(value.as_str().map(str::to_string))
        }
        .await;

        match result {
            Ok(Some(list_id)) => {
                info!("joined list {}", list_id);
                self.succeed(token, list_id).await
            }
            Ok(None) => {
                if let Err(err) = token.commit() {
                    warn!("commit of mutation {} failed: {}", token.id(), err);
                }
                let err = ListSyncError::InvalidArgument("invalid or expired share token".to_string());
                let notice = MutationNotice::new(token.id(), kind, Some(key), err.to_string(), FailureReason::Rejected);
                info!("join via share token rejected: {}", err);
                self.events.emit(event_builders::mutation_rejected(notice.clone()));
                self.settle(&mut token).await;
                MutationOutcome::Rejected(notice)
            }
            Err(err) => self.fail(token, Some(key), err).await,
        }
    }
}

/// 变更协调器
///
/// 清单、待办、协作者与分享的全部变更入口。
#[derive(Clone)]
pub struct MutationCoordinator {
    core: Arc<CoordinatorCore>,
}

impl MutationCoordinator {
    pub fn new(
        cache: QueryCache,
        remote: Arc<dyn RemoteStore>,
        identity: Arc<dyn IdentityProvider>,
        events: Arc<EventManager>,
    ) -> Self {
        Self {
            core: Arc::new(CoordinatorCore {
                cache,
                remote,
                identity,
                events,
                placeholders: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// 某个 id 是否仍是本地占位 id
    pub fn is_placeholder(&self, id: &str) -> bool {
        self.core.is_placeholder(id)
    }

    /// 在独立任务中运行一次变更并等待结果；返回的 future 被 drop 时任务继续执行
    async fn run<T, F, Fut>(&self, kind: MutationKind, mutation: F) -> MutationOutcome<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<CoordinatorCore>) -> Fut,
        Fut: Future<Output = MutationOutcome<T>> + Send + 'static,
    {
        match tokio::spawn(mutation(self.core.clone())).await {
            Ok(outcome) => outcome,
            Err(err) => {
                // 任务 panic：令牌在 drop 时已回滚并安排了收尾拉取
                warn!("mutation {} task aborted: {}", kind, err);
                let notice = MutationNotice::new(
                    &Uuid::new_v4().to_string(),
                    kind,
                    None,
                    format!("mutation task aborted: {}", err),
                    FailureReason::Transient,
                );
                self.core
                    .events
                    .emit(event_builders::mutation_rolled_back(notice.clone()));
                MutationOutcome::RolledBack(notice)
            }
        }
    }

    // ========== 清单 ==========

    /// 创建清单：追加到末尾，确认后预置子资源的空值
    pub async fn create_list(&self, name: &str) -> MutationOutcome<List> {
        let name = name.to_string();
        self.run(MutationKind::CreateList, |core| async move {
            core.create_list(&name).await
        })
        .await
    }

    pub async fn rename_list(&self, list_id: &str, name: &str) -> MutationOutcome<List> {
        let (list_id, name) = (list_id.to_string(), name.to_string());
        self.run(MutationKind::RenameList, |core| async move {
            core.rename_list(&list_id, &name).await
        })
        .await
    }

    /// 删除清单：从 Lists 移除，确认后清掉该清单自身的各个 key
    pub async fn delete_list(&self, list_id: &str) -> MutationOutcome<()> {
        let list_id = list_id.to_string();
        self.run(MutationKind::DeleteList, |core| async move {
            core.delete_list(&list_id).await
        })
        .await
    }

    /// 按给定顺序重排清单
    pub async fn reorder_lists(&self, ordered_ids: &[ListId]) -> MutationOutcome<()> {
        let ordered_ids = ordered_ids.to_vec();
        self.run(MutationKind::ReorderLists, |core| async move {
            core.reorder_lists(&ordered_ids).await
        })
        .await
    }

    // ========== 待办 ==========

    /// 创建待办：position 为当前缓存的待办数
    pub async fn create_todo(&self, list_id: &str, title: &str) -> MutationOutcome<Todo> {
        let (list_id, title) = (list_id.to_string(), title.to_string());
        self.run(MutationKind::CreateTodo, |core| async move {
            core.create_todo(&list_id, &title).await
        })
        .await
    }

    pub async fn update_todo_title(&self, list_id: &str, todo_id: &str, title: &str) -> MutationOutcome<Todo> {
        let (list_id, todo_id, title) = (list_id.to_string(), todo_id.to_string(), title.to_string());
        self.run(MutationKind::UpdateTodoTitle, |core| async move {
            core.update_todo_title(&list_id, &todo_id, &title).await
        })
        .await
    }

    pub async fn set_todo_complete(&self, list_id: &str, todo_id: &str, is_complete: bool) -> MutationOutcome<Todo> {
        let (list_id, todo_id) = (list_id.to_string(), todo_id.to_string());
        self.run(MutationKind::SetTodoComplete, |core| async move {
            core.set_todo_complete(&list_id, &todo_id, is_complete).await
        })
        .await
    }

    /// 翻转缓存中的完成状态
    pub async fn toggle_todo(&self, list_id: &str, todo_id: &str) -> MutationOutcome<Todo> {
        let (list_id, todo_id) = (list_id.to_string(), todo_id.to_string());
        self.run(MutationKind::ToggleTodo, |core| async move {
            core.toggle_todo(&list_id, &todo_id).await
        })
        .await
    }

    pub async fn delete_todo(&self, list_id: &str, todo_id: &str) -> MutationOutcome<()> {
        let (list_id, todo_id) = (list_id.to_string(), todo_id.to_string());
        self.run(MutationKind::DeleteTodo, |core| async move {
            core.delete_todo(&list_id, &todo_id).await
        })
        .await
    }

    /// 按给定顺序重排待办（通常是未完成分组）
    pub async fn reorder_todos(&self, list_id: &str, ordered_ids: &[String]) -> MutationOutcome<()> {
        let (list_id, ordered_ids) = (list_id.to_string(), ordered_ids.to_vec());
        self.run(MutationKind::ReorderTodos, |core| async move {
            core.reorder_todos(&list_id, &ordered_ids).await
        })
        .await
    }

    // ========== 协作者 ==========

    pub async fn remove_collaborator(&self, list_id: &str, user_id: &str) -> MutationOutcome<()> {
        let (list_id, user_id) = (list_id.to_string(), user_id.to_string());
        self.run(MutationKind::RemoveCollaborator, |core| async move {
            core.remove_collaborator(&list_id, &user_id).await
        })
        .await
    }

    // ========== 分享 ==========

    /// 通过分享令牌加入清单（非乐观），成功后刷新 Lists
    pub async fn join_via_share_token(&self, share_token: &str) -> MutationOutcome<ListId> {
        let share_token = share_token.to_string();
        self.run(MutationKind::JoinList, |core| async move {
            core.join_via_share_token(&share_token).await
        })
        .await
    }
}
