//! 行级变更订阅
//!
//! 订阅只保证"范围内有东西变了"：事件可能重复、乱序或被合并，payload 不可信，
//! 消费方一律按失效 + 重新拉取处理。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::table::{Filter, Row, Table};
use crate::error::Result;

/// 变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// 行级变更事件
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    /// 变更后的行（删除时为删除前的行），仅供日志参考
    pub row: Option<Row>,
    /// 远端提交时间（UTC 毫秒）
    pub commit_ts: u64,
}

/// 订阅通道上的消息
#[derive(Debug, Clone)]
pub enum FeedMessage {
    /// 订阅（重新）建立
    Subscribed,
    /// 范围内的一次变更
    Change(ChangeEvent),
    /// 传输中断，期间的变更可能丢失
    Interrupted,
}

/// 一个订阅句柄
#[derive(Debug)]
pub struct FeedSubscription {
    pub id: u64,
    pub receiver: mpsc::Receiver<FeedMessage>,
}

/// 变更订阅服务
///
/// 断线重连由实现方负责；实现方应在中断时投递 `Interrupted`，恢复时投递 `Subscribed`。
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, table: Table, filter: Filter, buffer: usize) -> Result<FeedSubscription>;

    async fn unsubscribe(&self, subscription_id: u64);
}
