//! 统一 SDK 接口 - ListSyncSDK 主入口
//!
//! 分层架构设计：
//! ```text
//! ListSyncSDK (组合根，会话级生命周期)
//!   ├── QueryCache (唯一的客户端数据副本)
//!   ├── MutationCoordinator (乐观写 + 回滚 + 收尾拉取)
//!   ├── ChangeFeedListener (失效 + 重新拉取)
//!   └── EventManager (事件系统层)
//! ```
//!
//! 设计原则：
//! - 缓存实例在这里创建，并通过构造参数显式传给每个组件，没有全局单例
//! - 远端、订阅、身份三个外部依赖都以 trait 对象注入

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use crate::cache::{CachedValue, QueryCache, QueryKey, WatchHandle};
use crate::config::ListSyncConfig;
use crate::error::{ListSyncError, Result};
use crate::events::{EventFilter, EventManager, FilteredEventReceiver, SyncEvent};
use crate::feed::{ChangeFeedListener, FeedGuard, ListObservation};
use crate::models::{List, ListMember, Profile, Todo};
use crate::mutation::MutationCoordinator;
use crate::queries::RemoteQueryFetcher;
use crate::reconciler::split_by_completion;
use crate::remote::{ChangeFeed, IdentityProvider, RemoteStore};

/// 统一 SDK 主接口
pub struct ListSyncSDK {
    /// SDK 配置
    config: ListSyncConfig,

    /// 查询缓存
    cache: QueryCache,

    /// 变更协调器
    mutations: MutationCoordinator,

    /// 变更订阅监听器
    feed_listener: ChangeFeedListener,

    /// 事件管理器
    event_manager: Arc<EventManager>,

    /// 是否正在关闭
    shutting_down: AtomicBool,
}

impl ListSyncSDK {
    pub fn new(
        config: ListSyncConfig,
        remote: Arc<dyn RemoteStore>,
        feed: Arc<dyn ChangeFeed>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let event_manager = Arc::new(EventManager::new(config.event_buffer_size));

        let fetcher = Arc::new(RemoteQueryFetcher::new(remote.clone(), identity.clone()));
        let cache = QueryCache::new(fetcher, event_manager.clone(), &config);
        let mutations = MutationCoordinator::new(cache.clone(), remote, identity, event_manager.clone());
        let feed_listener = ChangeFeedListener::new(feed, cache.clone(), event_manager.clone(), &config);

        info!(
            "ListSyncSDK ready (stale_time={}ms, refetch_on_feed_event={})",
            config.stale_time_ms, config.refetch_on_feed_event
        );

        Self {
            config,
            cache,
            mutations,
            feed_listener,
            event_manager,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// 用同时实现三个 trait 的后端（如 `MemoryBackend`）创建
    pub fn with_backend<B>(config: ListSyncConfig, backend: Arc<B>) -> Self
    where
        B: RemoteStore + ChangeFeed + IdentityProvider + 'static,
    {
        Self::new(config, backend.clone(), backend.clone(), backend)
    }

    pub fn config(&self) -> &ListSyncConfig {
        &self.config
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn mutations(&self) -> &MutationCoordinator {
        &self.mutations
    }

    pub fn feed(&self) -> &ChangeFeedListener {
        &self.feed_listener
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.event_manager
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_manager.subscribe()
    }

    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredEventReceiver {
        self.event_manager.subscribe_filtered(filter)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(ListSyncError::ShuttingDown("ListSyncSDK is shut down".to_string()));
        }
        Ok(())
    }

    async fn read_value(&self, key: &QueryKey) -> Result<CachedValue> {
        self.ensure_running()?;
        Ok(self.cache.read(key).await?.value)
    }

    // ========== 查询 ==========

    pub async fn lists(&self) -> Result<Vec<List>> {
        let key = QueryKey::Lists;
        match self.read_value(&key).await? {
            CachedValue::Lists(lists) => Ok(lists),
            other => Err(shape_mismatch(&key, &other)),
        }
    }

    pub async fn list(&self, list_id: &str) -> Result<List> {
        let key = QueryKey::List(list_id.to_string());
        match self.read_value(&key).await? {
            CachedValue::List(list) => Ok(list),
            other => Err(shape_mismatch(&key, &other)),
        }
    }

    pub async fn todos(&self, list_id: &str) -> Result<Vec<Todo>> {
        let key = QueryKey::Todos(list_id.to_string());
        match self.read_value(&key).await? {
            CachedValue::Todos(todos) => Ok(todos),
            other => Err(shape_mismatch(&key, &other)),
        }
    }

    /// 未完成的待办（重排序作用的分组）
    pub async fn incomplete_todos(&self, list_id: &str) -> Result<Vec<Todo>> {
        let todos = self.todos(list_id).await?;
        Ok(split_by_completion(&todos).0)
    }

    pub async fn completed_todos(&self, list_id: &str) -> Result<Vec<Todo>> {
        let todos = self.todos(list_id).await?;
        Ok(split_by_completion(&todos).1)
    }

    pub async fn collaborators(&self, list_id: &str) -> Result<Vec<ListMember>> {
        let key = QueryKey::Collaborators(list_id.to_string());
        match self.read_value(&key).await? {
            CachedValue::Collaborators(members) => Ok(members),
            other => Err(shape_mismatch(&key, &other)),
        }
    }

    /// 当前用户资料，未登录时为 None
    pub async fn profile(&self) -> Result<Option<Profile>> {
        let key = QueryKey::Profile;
        match self.read_value(&key).await? {
            CachedValue::Profile(profile) => Ok(profile),
            other => Err(shape_mismatch(&key, &other)),
        }
    }

    /// 观察某个 key 的值变化
    pub fn on_key_changed<F>(&self, key: QueryKey, callback: F) -> WatchHandle
    where
        F: Fn(&QueryKey, Option<&CachedValue>) + Send + Sync + 'static,
    {
        self.cache.on_key_changed(key, callback)
    }

    // ========== 变更订阅 ==========

    /// 清单详情页开始观察远端变更
    pub async fn observe_list(&self, list_id: &str) -> Result<ListObservation> {
        self.ensure_running()?;
        self.feed_listener.observe_list(list_id).await
    }

    /// 首页开始观察清单变更
    pub async fn observe_lists(&self) -> Result<FeedGuard> {
        self.ensure_running()?;
        self.feed_listener.observe_lists().await
    }

    // ========== 生命周期 ==========

    /// 关闭 SDK：停止所有订阅并清空缓存
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("正在关闭 ListSyncSDK...");

        self.feed_listener.shutdown().await;
        self.cache.clear();

        info!("ListSyncSDK 关闭完成");
        Ok(())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

fn shape_mismatch(key: &QueryKey, value: &CachedValue) -> ListSyncError {
    ListSyncError::ShapeMismatch {
        key: key.to_string(),
        value: value.shape(),
    }
}
