//! 事件系统模块 - 同步核心对外广播的事件
//!
//! 功能包括：
//! - 缓存更新 / 失效事件
//! - 变更生命周期事件（开始、确认、回滚、拒绝、忽略）
//! - 变更订阅通道事件（建立、中断、恢复、关闭）
//! - 事件广播、过滤订阅和监听器回调
//!
//! 回滚和拒绝事件就是面向用户的失败通知：每个失败的变更恰好发出一次。

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::cache::{QueryKey, UpdateSource};
use crate::mutation::{MutationKind, MutationNotice};

/// SDK 事件类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncEvent {
    /// 缓存值变化
    CacheUpdated {
        key: QueryKey,
        source: UpdateSource,
        timestamp: u64,
    },
    /// 缓存条目被标记过期
    CacheInvalidated { key: QueryKey, timestamp: u64 },
    /// 变更开始（乐观写之前）
    MutationStarted {
        mutation_id: String,
        kind: MutationKind,
        timestamp: u64,
    },
    /// 远端确认
    MutationConfirmed {
        mutation_id: String,
        kind: MutationKind,
        timestamp: u64,
    },
    /// 乐观写已回滚（失败通知）
    MutationRolledBack { notice: MutationNotice },
    /// 前置条件不满足，未做任何写入（失败通知）
    MutationRejected { notice: MutationNotice },
    /// 目标已不存在或仍是占位 id，按空操作处理
    MutationIgnored {
        mutation_id: String,
        kind: MutationKind,
        reason: String,
        timestamp: u64,
    },
    /// 订阅通道（重新）建立
    FeedSubscribed { channel: String, timestamp: u64 },
    /// 订阅通道传输中断
    FeedInterrupted { channel: String, timestamp: u64 },
    /// 中断后首次恢复，已重新失效相关 key
    FeedResumed { channel: String, timestamp: u64 },
    /// 订阅通道关闭
    FeedClosed { channel: String, timestamp: u64 },
}

impl SyncEvent {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::CacheUpdated { .. } => "cache_updated",
            SyncEvent::CacheInvalidated { .. } => "cache_invalidated",
            SyncEvent::MutationStarted { .. } => "mutation_started",
            SyncEvent::MutationConfirmed { .. } => "mutation_confirmed",
            SyncEvent::MutationRolledBack { .. } => "mutation_rolled_back",
            SyncEvent::MutationRejected { .. } => "mutation_rejected",
            SyncEvent::MutationIgnored { .. } => "mutation_ignored",
            SyncEvent::FeedSubscribed { .. } => "feed_subscribed",
            SyncEvent::FeedInterrupted { .. } => "feed_interrupted",
            SyncEvent::FeedResumed { .. } => "feed_resumed",
            SyncEvent::FeedClosed { .. } => "feed_closed",
        }
    }

    /// 获取事件关联的缓存 key
    pub fn key(&self) -> Option<&QueryKey> {
        match self {
            SyncEvent::CacheUpdated { key, .. } => Some(key),
            SyncEvent::CacheInvalidated { key, .. } => Some(key),
            SyncEvent::MutationRolledBack { notice } => notice.key.as_ref(),
            SyncEvent::MutationRejected { notice } => notice.key.as_ref(),
            _ => None,
        }
    }

    /// 获取事件时间戳
    pub fn timestamp(&self) -> u64 {
        match self {
            SyncEvent::CacheUpdated { timestamp, .. } => *timestamp,
            SyncEvent::CacheInvalidated { timestamp, .. } => *timestamp,
            SyncEvent::MutationStarted { timestamp, .. } => *timestamp,
            SyncEvent::MutationConfirmed { timestamp, .. } => *timestamp,
            SyncEvent::MutationRolledBack { notice } => notice.timestamp,
            SyncEvent::MutationRejected { notice } => notice.timestamp,
            SyncEvent::MutationIgnored { timestamp, .. } => *timestamp,
            SyncEvent::FeedSubscribed { timestamp, .. } => *timestamp,
            SyncEvent::FeedInterrupted { timestamp, .. } => *timestamp,
            SyncEvent::FeedResumed { timestamp, .. } => *timestamp,
            SyncEvent::FeedClosed { timestamp, .. } => *timestamp,
        }
    }

    /// 是否为面向用户的失败通知
    pub fn is_failure_notice(&self) -> bool {
        matches!(
            self,
            SyncEvent::MutationRolledBack { .. } | SyncEvent::MutationRejected { .. }
        )
    }
}

/// 事件过滤器
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// 事件类型过滤器
    pub event_types: Option<Vec<String>>,
    /// 缓存 key 过滤器
    pub keys: Option<Vec<QueryKey>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加事件类型过滤
    pub fn with_event_types(mut self, event_types: Vec<String>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    /// 添加缓存 key 过滤
    pub fn with_keys(mut self, keys: Vec<QueryKey>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// 检查事件是否匹配过滤器
    pub fn matches(&self, event: &SyncEvent) -> bool {
        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        if let Some(ref keys) = self.keys {
            match event.key() {
                Some(key) if keys.contains(key) => {}
                _ => return false, // 事件没有 key 但过滤器要求有
            }
        }

        true
    }
}

/// 事件监听器类型
pub type EventListener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<String, u64>,
    /// 监听器数量
    pub listener_count: usize,
    /// 最后事件时间
    pub last_event_time: Option<u64>,
}

/// 事件管理器
///
/// `emit` 是同步的：缓存在持锁区外直接调用，不需要 await。
pub struct EventManager {
    sender: broadcast::Sender<SyncEvent>,
    listeners: RwLock<HashMap<String, Vec<EventListener>>>,
    stats: RwLock<EventStats>,
}

impl EventManager {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self {
            sender,
            listeners: RwLock::new(HashMap::new()),
            stats: RwLock::new(EventStats::default()),
        }
    }

    /// 发布事件
    pub fn emit(&self, event: SyncEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write();
            stats.total_events += 1;
            *stats.events_by_type.entry(event.event_type().to_string()).or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 无订阅者时 send 失败属正常情况
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("No active receivers for event: {}", e);
        }

        let to_call: Vec<EventListener> = {
            let listeners = self.listeners.read();
            listeners
                .get(event.event_type())
                .into_iter()
                .chain(listeners.get("*"))
                .flat_map(|list| list.iter().cloned())
                .collect()
        };
        for listener in to_call {
            listener(&event);
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// 订阅匹配过滤器的事件
    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredEventReceiver {
        FilteredEventReceiver::new(self.sender.subscribe(), filter)
    }

    /// 添加事件监听器，`"*"` 监听所有事件
    pub fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write();
        listeners
            .entry(event_type.to_string())
            .or_default()
            .push(Arc::new(listener));

        self.stats.write().listener_count = listeners.values().map(|v| v.len()).sum();

        info!("Added listener for event type: {}", event_type);
    }

    /// 移除所有监听器
    pub fn clear_listeners(&self) {
        self.listeners.write().clear();
        self.stats.write().listener_count = 0;

        info!("Cleared all event listeners");
    }

    pub fn get_stats(&self) -> EventStats {
        self.stats.read().clone()
    }

    /// 获取活跃订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// 过滤事件接收器
pub struct FilteredEventReceiver {
    receiver: broadcast::Receiver<SyncEvent>,
    filter: EventFilter,
}

impl FilteredEventReceiver {
    pub fn new(receiver: broadcast::Receiver<SyncEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// 接收下一个匹配的事件
    pub async fn recv(&mut self) -> Result<SyncEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// 尝试接收事件（非阻塞）
    pub fn try_recv(&mut self) -> Result<SyncEvent, broadcast::error::TryRecvError> {
        loop {
            let event = self.receiver.try_recv()?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// 事件生成器 - 辅助函数
pub mod event_builders {
    use super::*;
    use crate::utils::now_utc_millis;

    pub fn cache_updated(key: QueryKey, source: UpdateSource) -> SyncEvent {
        SyncEvent::CacheUpdated {
            key,
            source,
            timestamp: now_utc_millis(),
        }
    }

    pub fn cache_invalidated(key: QueryKey) -> SyncEvent {
        SyncEvent::CacheInvalidated {
            key,
            timestamp: now_utc_millis(),
        }
    }

    pub fn mutation_started(mutation_id: &str, kind: MutationKind) -> SyncEvent {
        SyncEvent::MutationStarted {
            mutation_id: mutation_id.to_string(),
            kind,
            timestamp: now_utc_millis(),
        }
    }

    pub fn mutation_confirmed(mutation_id: &str, kind: MutationKind) -> SyncEvent {
        SyncEvent::MutationConfirmed {
            mutation_id: mutation_id.to_string(),
            kind,
            timestamp: now_utc_millis(),
        }
    }

    pub fn mutation_rolled_back(notice: MutationNotice) -> SyncEvent {
        SyncEvent::MutationRolledBack { notice }
    }

    pub fn mutation_rejected(notice: MutationNotice) -> SyncEvent {
        SyncEvent::MutationRejected { notice }
    }

    pub fn mutation_ignored(mutation_id: &str, kind: MutationKind, reason: &str) -> SyncEvent {
        SyncEvent::MutationIgnored {
            mutation_id: mutation_id.to_string(),
            kind,
            reason: reason.to_string(),
            timestamp: now_utc_millis(),
        }
    }

    pub fn feed_subscribed(channel: &str) -> SyncEvent {
        SyncEvent::FeedSubscribed {
            channel: channel.to_string(),
            timestamp: now_utc_millis(),
        }
    }

    pub fn feed_interrupted(channel: &str) -> SyncEvent {
        SyncEvent::FeedInterrupted {
            channel: channel.to_string(),
            timestamp: now_utc_millis(),
        }
    }

    pub fn feed_resumed(channel: &str) -> SyncEvent {
        SyncEvent::FeedResumed {
            channel: channel.to_string(),
            timestamp: now_utc_millis(),
        }
    }

    pub fn feed_closed(channel: &str) -> SyncEvent {
        SyncEvent::FeedClosed {
            channel: channel.to_string(),
            timestamp: now_utc_millis(),
        }
    }
}
