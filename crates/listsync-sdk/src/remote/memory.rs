//! 内存参考后端
//!
//! 同时实现 [`RemoteStore`]、[`ChangeFeed`] 与 [`IdentityProvider`]，用于测试与演示：
//! - 分配 id / share_token / 时间戳，删除清单时级联删除待办与协作关系
//! - 按表 + 过滤条件向订阅者扇出变更事件
//! - 清单可见性：owner、协作者，或按 share_token 精确查询
//! - 故障注入：离线、按表拒绝写入、让接下来 N 次写入失败、随机延迟
//! - 带外修改（模拟其他客户端）与传输中断（模拟断线）

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};
use uuid::Uuid;

use super::feed::{ChangeEvent, ChangeFeed, ChangeKind, FeedMessage, FeedSubscription};
use super::table::{to_row, Filter, Row, Table};
use super::{IdentityProvider, RemoteStore, JOIN_LIST_FUNCTION};
use crate::error::{ListSyncError, Result};
use crate::models::UserId;
use crate::utils::{now_utc, now_utc_millis};

/// 写入类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOp {
    Insert,
    Update,
    Delete,
}

/// 一次成功的远端写入（经由 RemoteStore 接口）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub table: Table,
    pub op: WriteOp,
    pub id: Option<String>,
}

struct FeedEntry {
    table: Table,
    filter: Filter,
    sender: mpsc::Sender<FeedMessage>,
}

#[derive(Default)]
struct BackendState {
    tables: HashMap<Table, Vec<Row>>,
    feeds: HashMap<u64, FeedEntry>,
    current_user: Option<UserId>,
    offline: bool,
    denied_tables: HashSet<Table>,
    failing_writes: usize,
    latency_ms: Option<(u64, u64)>,
    write_log: Vec<WriteRecord>,
}

fn row_id(row: &Row) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

fn row_str<'a>(row: &'a Row, column: &str) -> Option<&'a str> {
    row.get(column).and_then(Value::as_str)
}

fn timestamp_value() -> Value {
    Value::String(now_utc().to_rfc3339())
}

fn require_columns(table: Table, row: &Row, columns: &[&str]) -> Result<()> {
    for column in columns {
        if !row.contains_key(*column) {
            return Err(ListSyncError::InvalidArgument(format!(
                "{} row is missing column {}",
                table, column
            )));
        }
    }
    Ok(())
}

impl BackendState {
    fn rows(&self, table: Table) -> &[Row] {
        self.tables.get(&table).map(|rows| rows.as_slice()).unwrap_or(&[])
    }

    fn check_reachable(&self) -> Result<()> {
        if self.offline {
            return Err(ListSyncError::Transport("remote store unreachable".to_string()));
        }
        Ok(())
    }

    fn check_write(&mut self, table: Table) -> Result<()> {
        self.check_reachable()?;
        if self.denied_tables.contains(&table) {
            return Err(ListSyncError::Unauthorized(format!(
                "row-level policy denied write to {}",
                table
            )));
        }
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(ListSyncError::Transport("injected write failure".to_string()));
        }
        Ok(())
    }

    fn is_collaborator(&self, list_id: &str, user_id: &str) -> bool {
        self.rows(Table::ListCollaborators).iter().any(|row| {
            row_str(row, "list_id") == Some(list_id) && row_str(row, "user_id") == Some(user_id)
        })
    }

    fn is_list_visible(&self, row: &Row, filter: &Filter) -> bool {
        if filter.value_of("share_token").is_some() {
            return true;
        }
        let Some(user) = self.current_user.as_deref() else {
            return false;
        };
        if row_str(row, "owner_id") == Some(user) {
            return true;
        }
        row_id(row)
            .map(|list_id| self.is_collaborator(list_id, user))
            .unwrap_or(false)
    }

    fn notify(&mut self, table: Table, kind: ChangeKind, row: &Row) {
        let mut closed = Vec::new();
        for (id, feed) in &self.feeds {
            if feed.table != table || !feed.filter.matches(row) {
                continue;
            }
            let event = ChangeEvent {
                table,
                kind,
                row: Some(row.clone()),
                commit_ts: now_utc_millis(),
            };
            match feed.sender.try_send(FeedMessage::Change(event)) {
                Ok(()) => {}
                // 通道满时合并事件：订阅方只关心"有变化"
                Err(TrySendError::Full(_)) => debug!("feed {} full, change coalesced", id),
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in closed {
            self.feeds.remove(&id);
        }
    }

    fn broadcast(&mut self, message: FeedMessage) {
        self.feeds
            .retain(|_, feed| !matches!(feed.sender.try_send(message.clone()), Err(TrySendError::Closed(_))));
    }

    fn insert_row(&mut self, table: Table, mut row: Row, notify: bool) -> Result<Row> {
        if table.has_id_column() && !row.contains_key("id") {
            row.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
        }
        match table {
            Table::Lists => {
                require_columns(table, &row, &["name", "owner_id"])?;
                row.entry("share_token")
                    .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
                row.entry("position").or_insert(json!(0));
            }
            Table::Todos => {
                require_columns(table, &row, &["list_id", "title"])?;
                let list_id = row_str(&row, "list_id").unwrap_or_default().to_string();
                if !self.rows(Table::Lists).iter().any(|r| row_id(r) == Some(list_id.as_str())) {
                    return Err(ListSyncError::NotFound(format!("list {}", list_id)));
                }
                row.entry("is_complete").or_insert(json!(false));
                row.entry("position").or_insert(json!(0));
                for column in ["description", "due_date", "created_by", "updated_by"] {
                    row.entry(column).or_insert(Value::Null);
                }
            }
            Table::ListCollaborators => {
                require_columns(table, &row, &["list_id", "user_id"])?;
                let list_id = row_str(&row, "list_id").unwrap_or_default();
                let user_id = row_str(&row, "user_id").unwrap_or_default();
                if self.is_collaborator(list_id, user_id) {
                    return Err(ListSyncError::InvalidOperation(
                        "duplicate collaborator".to_string(),
                    ));
                }
            }
            Table::Profiles => {
                require_columns(table, &row, &["id"])?;
            }
        }
        if let Some(id) = row_id(&row) {
            if self.rows(table).iter().any(|r| row_id(r) == Some(id)) {
                return Err(ListSyncError::InvalidOperation(format!(
                    "duplicate key {} in {}",
                    id, table
                )));
            }
        }
        let now = timestamp_value();
        row.entry("created_at").or_insert(now.clone());
        row.entry("updated_at").or_insert(now);

        self.tables.entry(table).or_default().push(row.clone());
        if notify {
            self.notify(table, ChangeKind::Insert, &row);
        }
        Ok(row)
    }

    fn update_row(&mut self, table: Table, id: &str, patch: Row, notify: bool) -> Result<Row> {
        if patch.contains_key("id") {
            return Err(ListSyncError::InvalidOperation("primary key is immutable".to_string()));
        }
        if table == Table::Lists && patch.contains_key("share_token") {
            return Err(ListSyncError::InvalidOperation("share_token is immutable".to_string()));
        }
        let row = self
            .tables
            .entry(table)
            .or_default()
            .iter_mut()
            .find(|row| row_id(row) == Some(id))
            .ok_or_else(|| ListSyncError::NotFound(format!("{} {}", table, id)))?;
        for (column, value) in patch {
            row.insert(column, value);
        }
        row.insert("updated_at".to_string(), timestamp_value());
        let updated = row.clone();
        if notify {
            self.notify(table, ChangeKind::Update, &updated);
        }
        Ok(updated)
    }

    fn remove_where<F>(&mut self, table: Table, predicate: F) -> Vec<Row>
    where
        F: Fn(&Row) -> bool,
    {
        let rows = self.tables.entry(table).or_default();
        let (removed, kept): (Vec<Row>, Vec<Row>) = rows.drain(..).partition(|row| predicate(row));
        *rows = kept;
        for row in &removed {
            self.notify(table, ChangeKind::Delete, row);
        }
        removed
    }

    fn delete_row(&mut self, table: Table, id: &str) -> Result<Row> {
        let mut removed = self.remove_where(table, |row| row_id(row) == Some(id));
        let row = removed
            .pop()
            .ok_or_else(|| ListSyncError::NotFound(format!("{} {}", table, id)))?;
        if table == Table::Lists {
            // 外键级联
            self.remove_where(Table::Todos, |row| row_str(row, "list_id") == Some(id));
            self.remove_where(Table::ListCollaborators, |row| row_str(row, "list_id") == Some(id));
        }
        Ok(row)
    }

    fn join_list(&mut self, share_token: &str) -> Result<Value> {
        let user = self.current_user.clone().ok_or(ListSyncError::NotAuthenticated)?;
        let list = self
            .rows(Table::Lists)
            .iter()
            .find(|row| row_str(row, "share_token") == Some(share_token))
            .cloned();
        let Some(list) = list else {
            return Ok(Value::Null);
        };
        let list_id = row_id(&list).unwrap_or_default().to_string();
        let is_owner = row_str(&list, "owner_id") == Some(user.as_str());
        if !is_owner && !self.is_collaborator(&list_id, &user) {
            let mut row = Row::new();
            row.insert("list_id".to_string(), Value::String(list_id.clone()));
            row.insert("user_id".to_string(), Value::String(user.clone()));
            self.insert_row(Table::ListCollaborators, row, true)?;
            info!("user {} joined list {} via share token", user, list_id);
        }
        Ok(Value::String(list_id))
    }

    fn record(&mut self, table: Table, op: WriteOp, id: Option<String>) {
        self.write_log.push(WriteRecord { table, op, id });
    }
}

/// 内存后端
pub struct MemoryBackend {
    state: Mutex<BackendState>,
    next_feed_id: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BackendState::default()),
            next_feed_id: AtomicU64::new(1),
        }
    }

    pub fn sign_in(&self, user_id: &str) {
        self.state.lock().current_user = Some(user_id.to_string());
    }

    pub fn sign_out(&self) {
        self.state.lock().current_user = None;
    }

    /// 模拟断网：所有调用返回 Transport 错误
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// 模拟行级策略拒绝写入某张表
    pub fn deny_writes_to(&self, table: Table) {
        self.state.lock().denied_tables.insert(table);
    }

    pub fn allow_writes_to(&self, table: Table) {
        self.state.lock().denied_tables.remove(&table);
    }

    /// 让接下来 n 次写入以 Transport 错误失败
    pub fn fail_next_writes(&self, n: usize) {
        self.state.lock().failing_writes = n;
    }

    /// 每次调用前随机等待 [min_ms, max_ms]
    pub fn set_latency(&self, min_ms: u64, max_ms: u64) {
        self.state.lock().latency_ms = Some((min_ms.min(max_ms), max_ms.max(min_ms)));
    }

    /// 静默写入初始数据（不产生变更事件、不记录写入日志）
    pub fn seed(&self, table: Table, rows: Vec<Value>) -> Result<()> {
        let mut state = self.state.lock();
        for row in rows {
            state.insert_row(table, to_row(&row)?, false)?;
        }
        Ok(())
    }

    /// 带外插入（模拟其他客户端），产生变更事件
    pub fn insert_out_of_band(&self, table: Table, row: Value) -> Result<Row> {
        let row = to_row(&row)?;
        self.state.lock().insert_row(table, row, true)
    }

    /// 带外更新（模拟其他客户端），产生变更事件
    pub fn apply_out_of_band(&self, table: Table, id: &str, patch: Value) -> Result<Row> {
        let patch = to_row(&patch)?;
        self.state.lock().update_row(table, id, patch, true)
    }

    /// 带外删除（模拟其他客户端），产生变更事件
    pub fn delete_out_of_band(&self, table: Table, id: &str) -> Result<Row> {
        self.state.lock().delete_row(table, id)
    }

    /// 静默更新：变更发生但事件丢失（配合 `interrupt_feeds` 模拟断线期间的修改）
    pub fn update_silently(&self, table: Table, id: &str, patch: Value) -> Result<Row> {
        let patch = to_row(&patch)?;
        self.state.lock().update_row(table, id, patch, false)
    }

    /// 向所有订阅投递 Interrupted
    pub fn interrupt_feeds(&self) {
        self.state.lock().broadcast(FeedMessage::Interrupted);
    }

    /// 向所有订阅投递 Subscribed（重连成功）
    pub fn resume_feeds(&self) {
        self.state.lock().broadcast(FeedMessage::Subscribed);
    }

    pub fn rows(&self, table: Table) -> Vec<Row> {
        self.state.lock().rows(table).to_vec()
    }

    pub fn find(&self, table: Table, id: &str) -> Option<Row> {
        self.state
            .lock()
            .rows(table)
            .iter()
            .find(|row| row_id(row) == Some(id))
            .cloned()
    }

    pub fn write_log(&self) -> Vec<WriteRecord> {
        self.state.lock().write_log.clone()
    }

    pub fn active_feeds(&self) -> usize {
        self.state.lock().feeds.len()
    }

    async fn simulate_latency(&self) {
        let latency = self.state.lock().latency_ms;
        if let Some((min, max)) = latency {
            let millis = rand::thread_rng().gen_range(min..=max);
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryBackend {
    async fn select(&self, table: Table, filter: &Filter) -> Result<Vec<Row>> {
        self.simulate_latency().await;
        let state = self.state.lock();
        state.check_reachable()?;
        Ok(state
            .rows(table)
            .iter()
            .filter(|row| filter.matches(row))
            .filter(|row| table != Table::Lists || state.is_list_visible(row, filter))
            .cloned()
            .collect())
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.check_write(table)?;
        let inserted = state.insert_row(table, row, true)?;
        state.record(table, WriteOp::Insert, row_id(&inserted).map(str::to_string));
        Ok(inserted)
    }

    async fn update(&self, table: Table, id: &str, patch: Row) -> Result<Row> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.check_write(table)?;
        let updated = state.update_row(table, id, patch, true)?;
        state.record(table, WriteOp::Update, Some(id.to_string()));
        Ok(updated)
    }

    async fn delete(&self, table: Table, id: &str) -> Result<()> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.check_write(table)?;
        state.delete_row(table, id)?;
        state.record(table, WriteOp::Delete, Some(id.to_string()));
        Ok(())
    }

    async fn delete_where(&self, table: Table, filter: &Filter) -> Result<usize> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.check_write(table)?;
        let removed = state.remove_where(table, |row| filter.matches(row));
        if !removed.is_empty() {
            state.record(table, WriteOp::Delete, None);
        }
        Ok(removed.len())
    }

    async fn call(&self, function: &str, args: Value) -> Result<Value> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.check_reachable()?;
        match function {
            JOIN_LIST_FUNCTION => {
                let token = args
                    .get("p_share_token")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ListSyncError::InvalidArgument("missing p_share_token".to_string()))?;
                state.join_list(token)
            }
            other => Err(ListSyncError::InvalidOperation(format!("unknown function {}", other))),
        }
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, table: Table, filter: Filter, buffer: usize) -> Result<FeedSubscription> {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let id = self.next_feed_id.fetch_add(1, Ordering::SeqCst);
        let _ = sender.try_send(FeedMessage::Subscribed);
        debug!("feed {} subscribed: {} [{}]", id, table, filter);
        self.state.lock().feeds.insert(id, FeedEntry { table, filter, sender });
        Ok(FeedSubscription { id, receiver })
    }

    async fn unsubscribe(&self, subscription_id: u64) {
        if self.state.lock().feeds.remove(&subscription_id).is_some() {
            debug!("feed {} unsubscribed", subscription_id);
        }
    }
}

#[async_trait]
impl IdentityProvider for MemoryBackend {
    async fn current_user_id(&self) -> Option<UserId> {
        self.state.lock().current_user.clone()
    }
}
