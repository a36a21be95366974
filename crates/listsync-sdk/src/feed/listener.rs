//! 变更订阅监听器
//!
//! 每个通道一个后台任务：收到范围内的任何事件都把范围内的 key 标记过期，
//! 并对有值、且没有进行中变更的 key 重新拉取（进行中的变更会在收尾时自己拉取）。
//! 事件 payload 一律不使用，重复/乱序/合并的事件都只是多一次失效。
//!
//! 通道按名字引用计数：最后一个 [`FeedGuard`] 被 drop 时取消订阅。
//! 传输中断后收到的第一条消息会重新失效整个范围。

use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::scope::FeedScope;
use crate::cache::{QueryCache, QueryKey};
use crate::config::ListSyncConfig;
use crate::error::{ListSyncError, Result};
use crate::events::{event_builders, EventManager};
use crate::remote::{ChangeFeed, FeedMessage, FeedSubscription};

struct Channel {
    refs: usize,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

struct ListenerInner {
    feed: Arc<dyn ChangeFeed>,
    cache: QueryCache,
    events: Arc<EventManager>,
    buffer_size: usize,
    refetch_on_event: bool,
    channels: Mutex<HashMap<String, Channel>>,
    shutdown: CancellationToken,
}

impl ListenerInner {
    fn release(&self, channel: &str) {
        let mut channels = self.channels.lock();
        let Some(entry) = channels.get_mut(channel) else {
            return;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            if let Some(entry) = channels.remove(channel) {
                debug!("last observer of {} gone, closing", channel);
                entry.cancel.cancel();
            }
        }
    }
}

/// 变更订阅监听器
#[derive(Clone)]
pub struct ChangeFeedListener {
    inner: Arc<ListenerInner>,
}

impl ChangeFeedListener {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        cache: QueryCache,
        events: Arc<EventManager>,
        config: &ListSyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ListenerInner {
                feed,
                cache,
                events,
                buffer_size: config.feed_buffer_size,
                refetch_on_event: config.refetch_on_feed_event,
                channels: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// 开始观察一个范围；同名通道已存在时只增加引用计数
    pub async fn observe(&self, scope: FeedScope) -> Result<FeedGuard> {
        if self.inner.shutdown.is_cancelled() {
            return Err(ListSyncError::ShuttingDown("change feed listener stopped".to_string()));
        }

        let cancel = {
            let mut channels = self.inner.channels.lock();
            if let Some(entry) = channels.get_mut(&scope.channel) {
                entry.refs += 1;
                return Ok(self.guard(&scope.channel));
            }
            let cancel = self.inner.shutdown.child_token();
            channels.insert(
                scope.channel.clone(),
                Channel {
                    refs: 1,
                    cancel: cancel.clone(),
                    task: None,
                },
            );
            cancel
        };

        let subscription = match self
            .inner
            .feed
            .subscribe(scope.table, scope.filter.clone(), self.inner.buffer_size)
            .await
        {
            Ok(subscription) => subscription,
            Err(err) => {
                self.inner.channels.lock().remove(&scope.channel);
                warn!("failed to subscribe {}: {}", scope.channel, err);
                return Err(err);
            }
        };
        info!("observing {} ({} [{}])", scope.channel, scope.table, scope.filter);

        let guard = self.guard(&scope.channel);
        let channel = scope.channel.clone();
        let task = tokio::spawn(pump(
            scope,
            subscription,
            cancel,
            self.inner.feed.clone(),
            self.inner.cache.clone(),
            self.inner.events.clone(),
            self.inner.refetch_on_event,
        ));
        if let Some(entry) = self.inner.channels.lock().get_mut(&channel) {
            entry.task = Some(task);
        }
        Ok(guard)
    }

    /// 清单详情页：待办、清单行、协作关系
    pub async fn observe_list(&self, list_id: &str) -> Result<ListObservation> {
        let mut guards = Vec::new();
        for scope in FeedScope::for_list_detail(list_id) {
            // 出错时已建立的 guard 随 Vec 一起 drop
            guards.push(self.observe(scope).await?);
        }
        Ok(ListObservation {
            list_id: list_id.to_string(),
            guards,
        })
    }

    /// 首页：全部清单
    pub async fn observe_lists(&self) -> Result<FeedGuard> {
        self.observe(FeedScope::lists()).await
    }

    pub fn active_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.inner.channels.lock().keys().cloned().collect();
        channels.sort();
        channels
    }

    pub fn observer_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .lock()
            .get(channel)
            .map(|entry| entry.refs)
            .unwrap_or(0)
    }

    /// 关闭所有通道并等待后台任务退出
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = self
            .inner
            .channels
            .lock()
            .drain()
            .filter_map(|(_, entry)| entry.task)
            .collect();
        for result in join_all(tasks).await {
            if let Err(err) = result {
                warn!("feed task ended abnormally: {}", err);
            }
        }
        info!("change feed listener stopped");
    }

    fn guard(&self, channel: &str) -> FeedGuard {
        FeedGuard {
            listener: Arc::downgrade(&self.inner),
            channel: channel.to_string(),
        }
    }
}

async fn pump(
    scope: FeedScope,
    mut subscription: FeedSubscription,
    cancel: CancellationToken,
    feed: Arc<dyn ChangeFeed>,
    cache: QueryCache,
    events: Arc<EventManager>,
    refetch_on_event: bool,
) {
    let channel = scope.channel.as_str();
    let mut in_gap = false;

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = subscription.receiver.recv() => message,
        };

        match message {
            None => {
                debug!("feed {} closed by remote", channel);
                break;
            }
            Some(FeedMessage::Interrupted) => {
                if !in_gap {
                    in_gap = true;
                    warn!("feed {} interrupted", channel);
                    events.emit(event_builders::feed_interrupted(channel));
                }
            }
            Some(FeedMessage::Subscribed) => {
                if in_gap {
                    in_gap = false;
                    info!("feed {} resumed, re-invalidating", channel);
                    refresh_scope(&scope, &cache, refetch_on_event).await;
                    events.emit(event_builders::feed_resumed(channel));
                } else {
                    debug!("feed {} subscribed", channel);
                    events.emit(event_builders::feed_subscribed(channel));
                }
            }
            Some(FeedMessage::Change(change)) => {
                debug!("feed {}: {:?} on {}", channel, change.kind, change.table);
                refresh_scope(&scope, &cache, refetch_on_event).await;
                if in_gap {
                    in_gap = false;
                    info!("feed {} resumed", channel);
                    events.emit(event_builders::feed_resumed(channel));
                }
            }
        }
    }

    feed.unsubscribe(subscription.id).await;
    events.emit(event_builders::feed_closed(channel));
    debug!("feed {} stopped", channel);
}

/// 失效范围内的所有 key，并重新拉取可以立即落地的那些
async fn refresh_scope(scope: &FeedScope, cache: &QueryCache, refetch_on_event: bool) {
    let mut due: Vec<&QueryKey> = Vec::new();
    for key in &scope.keys {
        let has_value = cache.invalidate(key);
        if refetch_on_event && has_value && !cache.has_pending_mutations(key) {
            due.push(key);
        }
    }

    let results = join_all(due.iter().map(|key| cache.refetch(key))).await;
    for (key, result) in due.iter().zip(results) {
        if let Err(err) = result {
            // 资源可能已被删除；下次读取会再试
            debug!("refetch of {} after feed event failed: {}", key, err);
        }
    }
}

/// 一个范围的观察句柄，drop 时释放
pub struct FeedGuard {
    listener: Weak<ListenerInner>,
    channel: String,
}

impl FeedGuard {
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl Drop for FeedGuard {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.upgrade() {
            listener.release(&self.channel);
        }
    }
}

impl std::fmt::Debug for FeedGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedGuard").field("channel", &self.channel).finish()
    }
}

/// 清单详情页的观察句柄
#[derive(Debug)]
pub struct ListObservation {
    list_id: String,
    guards: Vec<FeedGuard>,
}

impl ListObservation {
    pub fn list_id(&self) -> &str {
        &self.list_id
    }

    pub fn channels(&self) -> Vec<&str> {
        self.guards.iter().map(|guard| guard.channel()).collect()
    }
}
