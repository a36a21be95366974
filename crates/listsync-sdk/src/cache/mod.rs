//! 查询缓存
//!
//! 会话内唯一一份客户端可见的远端数据副本，由 [`crate::ListSyncSDK`] 创建并显式
//! 传给各组件（`QueryCache` 是 `Arc` 句柄，clone 开销很小）。
//!
//! - `read`：新鲜直接返回；过期返回旧值并在后台刷新；无值时阻塞拉取（冷读）
//! - `write` / `patch`：本地写入，推进条目 epoch
//! - `snapshot`：不触发刷新地读取当前值，用于回滚前保存现场
//! - `invalidate`：只标记过期，不清空值（stale-while-revalidate）
//! - `refetch`：拉取并按对账规则决定是否落地
//! - `on_key_changed`：按 key 注册观察者，返回的句柄 drop 时自动取消

mod entry;
mod key;
mod value;

pub use entry::EntryState;
pub use key::QueryKey;
pub use value::CachedValue;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::ListSyncConfig;
use crate::error::{ListSyncError, Result};
use crate::events::{event_builders, EventManager};
use crate::reconciler::{self, FetchGuard};
use entry::CacheEntry;

/// 按 key 从远端加载数据
#[async_trait]
pub trait QueryFetcher: Send + Sync {
    async fn fetch(&self, key: &QueryKey) -> Result<CachedValue>;
}

/// 缓存写入来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateSource {
    /// 远端拉取落地
    Fetch,
    /// 乐观写
    Optimistic,
    /// 远端确认后的写入
    Confirmed,
    /// 回滚到变更前的快照
    Rollback,
    /// 新建资源时预置的空值
    Seed,
}

/// 读取结果
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResult {
    pub value: CachedValue,
    pub is_stale: bool,
}

/// 一次拉取的结果
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub value: CachedValue,
    /// 是否写入了缓存（被对账规则丢弃时为 false）
    pub applied: bool,
}

/// key 观察者回调，参数为变化后的值（值被移除时为 None）
pub type KeyCallback = Arc<dyn Fn(&QueryKey, Option<&CachedValue>) + Send + Sync>;

#[derive(Default)]
struct WatcherRegistry {
    next_id: u64,
    by_key: HashMap<QueryKey, Vec<(u64, KeyCallback)>>,
}

struct CacheInner {
    entries: RwLock<HashMap<QueryKey, CacheEntry>>,
    watchers: Mutex<WatcherRegistry>,
    fetcher: Arc<dyn QueryFetcher>,
    events: Arc<EventManager>,
    stale_time: Duration,
}

/// 查询缓存句柄
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl QueryCache {
    pub fn new(fetcher: Arc<dyn QueryFetcher>, events: Arc<EventManager>, config: &ListSyncConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: RwLock::new(HashMap::new()),
                watchers: Mutex::new(WatcherRegistry::default()),
                fetcher,
                events,
                stale_time: config.stale_time(),
            }),
        }
    }

    pub fn stale_time(&self) -> Duration {
        self.inner.stale_time
    }

    /// 读取
    pub async fn read(&self, key: &QueryKey) -> Result<ReadResult> {
        let cached = {
            let entries = self.inner.entries.read();
            entries.get(key).and_then(|entry| {
                entry.value.clone().map(|value| {
                    (value, entry.is_stale(self.inner.stale_time), entry.fetches_in_flight > 0)
                })
            })
        };

        match cached {
            Some((value, is_stale, fetch_in_flight)) => {
                if is_stale && !fetch_in_flight {
                    debug!("stale read of {}, refreshing in background", key);
                    self.spawn_refetch(key.clone());
                }
                Ok(ReadResult { value, is_stale })
            }
            None => {
                debug!("cold read of {}", key);
                let outcome = self.refetch(key).await?;
                let value = if outcome.applied {
                    outcome.value
                } else {
                    // 拉取期间有本地写入：以本地值为准
                    self.snapshot(key).unwrap_or(outcome.value)
                };
                Ok(ReadResult { value, is_stale: false })
            }
        }
    }

    /// 当前值，不触发任何刷新
    pub fn snapshot(&self, key: &QueryKey) -> Option<CachedValue> {
        self.inner.entries.read().get(key).and_then(|entry| entry.value.clone())
    }

    /// 无条件覆盖（远端确认后的写入）
    pub fn write(&self, key: &QueryKey, value: CachedValue) -> Result<()> {
        self.write_with_source(key, value, UpdateSource::Confirmed)
    }

    pub(crate) fn write_with_source(&self, key: &QueryKey, value: CachedValue, source: UpdateSource) -> Result<()> {
        check_shape(key, &value)?;
        {
            let mut entries = self.inner.entries.write();
            let entry = entries.entry(key.clone()).or_default();
            entry.write_local(Some(value));
        }
        debug!("{} written ({:?})", key, source);
        self.publish(key, source);
        Ok(())
    }

    /// 对当前值做纯变换（乐观写）
    ///
    /// `updater` 返回 None 或条目尚无值时不做任何修改；返回是否写入。
    pub fn patch<F>(&self, key: &QueryKey, updater: F) -> Result<bool>
    where
        F: FnOnce(&CachedValue) -> Option<CachedValue>,
    {
        self.patch_with_source(key, updater, UpdateSource::Optimistic)
    }

    pub(crate) fn patch_with_source<F>(&self, key: &QueryKey, updater: F, source: UpdateSource) -> Result<bool>
    where
        F: FnOnce(&CachedValue) -> Option<CachedValue>,
    {
        {
            let mut entries = self.inner.entries.write();
            let Some(entry) = entries.get_mut(key) else {
                return Ok(false);
            };
            let Some(current) = entry.value.as_ref() else {
                return Ok(false);
            };
            let Some(next) = updater(current) else {
                return Ok(false);
            };
            check_shape(key, &next)?;
            entry.write_local(Some(next));
        }
        debug!("{} patched ({:?})", key, source);
        self.publish(key, source);
        Ok(true)
    }

    /// 恢复到快照（None 表示恢复为"无值"）
    pub(crate) fn restore(&self, key: &QueryKey, previous: Option<CachedValue>) -> Result<()> {
        if let Some(value) = &previous {
            check_shape(key, value)?;
        }
        {
            let mut entries = self.inner.entries.write();
            let entry = entries.entry(key.clone()).or_default();
            entry.write_local(previous);
        }
        self.publish(key, UpdateSource::Rollback);
        Ok(())
    }

    /// 移除某个 key 的值（远端确认资源已删除）
    pub(crate) fn remove(&self, key: &QueryKey) {
        let removed = {
            let mut entries = self.inner.entries.write();
            match entries.get_mut(key) {
                Some(entry) if entry.value.is_some() => {
                    entry.write_local(None);
                    true
                }
                _ => false,
            }
        };
        if removed {
            debug!("{} removed", key);
            self.publish(key, UpdateSource::Confirmed);
        }
    }

    /// 预置值：只在条目没有值时写入
    pub fn seed(&self, key: &QueryKey, value: CachedValue) -> Result<bool> {
        check_shape(key, &value)?;
        {
            let mut entries = self.inner.entries.write();
            let entry = entries.entry(key.clone()).or_default();
            if entry.value.is_some() {
                return Ok(false);
            }
            entry.write_local(Some(value));
        }
        self.publish(key, UpdateSource::Seed);
        Ok(true)
    }

    /// 标记过期，返回条目当前是否有值
    pub fn invalidate(&self, key: &QueryKey) -> bool {
        let state = {
            let mut entries = self.inner.entries.write();
            entries.get_mut(key).map(|entry| {
                entry.invalidated = true;
                entry.value.is_some()
            })
        };
        match state {
            Some(has_value) => {
                debug!("{} invalidated", key);
                self.inner.events.emit(event_builders::cache_invalidated(key.clone()));
                has_value
            }
            None => false,
        }
    }

    /// 拉取并按对账规则落地
    pub async fn refetch(&self, key: &QueryKey) -> Result<FetchOutcome> {
        let (started_epoch, seq) = {
            let mut entries = self.inner.entries.write();
            let entry = entries.entry(key.clone()).or_default();
            entry.fetch_seq += 1;
            entry.fetches_in_flight += 1;
            (entry.epoch, entry.fetch_seq)
        };

        let result = self.inner.fetcher.fetch(key).await;

        let applied = {
            let mut entries = self.inner.entries.write();
            let entry = entries.entry(key.clone()).or_default();
            entry.fetches_in_flight = entry.fetches_in_flight.saturating_sub(1);
            match &result {
                Ok(value) if key.accepts(value) => {
                    let guard = FetchGuard {
                        started_epoch,
                        current_epoch: entry.epoch,
                        seq,
                        applied_seq: entry.applied_fetch_seq,
                        pending_mutations: entry.pending_mutations,
                    };
                    if reconciler::should_apply_fetch(&guard) {
                        entry.value = Some(value.clone());
                        entry.updated_at = Some(Instant::now());
                        entry.invalidated = false;
                        entry.applied_fetch_seq = seq;
                        true
                    } else {
                        false
                    }
                }
                _ => false,
            }
        };

        let value = match result {
            Ok(value) => value,
            Err(err) => {
                warn!("fetch of {} failed: {}", key, err);
                return Err(err);
            }
        };
        check_shape(key, &value)?;

        if applied {
            debug!("{} refreshed (fetch #{})", key, seq);
            self.publish(key, UpdateSource::Fetch);
        } else {
            debug!("discarded superseded fetch #{} of {}", seq, key);
        }
        Ok(FetchOutcome { value, applied })
    }

    fn spawn_refetch(&self, key: QueryKey) {
        let cache = self.clone();
        tokio::spawn(async move {
            if let Err(err) = cache.refetch(&key).await {
                warn!("background refresh of {} failed: {}", key, err);
            }
        });
    }

    pub(crate) fn begin_pending(&self, key: &QueryKey) {
        let mut entries = self.inner.entries.write();
        entries.entry(key.clone()).or_default().pending_mutations += 1;
    }

    pub(crate) fn end_pending(&self, key: &QueryKey) {
        let mut entries = self.inner.entries.write();
        if let Some(entry) = entries.get_mut(key) {
            entry.pending_mutations = entry.pending_mutations.saturating_sub(1);
        }
    }

    pub fn has_value(&self, key: &QueryKey) -> bool {
        self.inner
            .entries
            .read()
            .get(key)
            .map(|entry| entry.value.is_some())
            .unwrap_or(false)
    }

    pub fn has_pending_mutations(&self, key: &QueryKey) -> bool {
        self.inner
            .entries
            .read()
            .get(key)
            .map(|entry| entry.pending_mutations > 0)
            .unwrap_or(false)
    }

    pub fn entry_state(&self, key: &QueryKey) -> Option<EntryState> {
        self.inner
            .entries
            .read()
            .get(key)
            .map(|entry| entry.state(self.inner.stale_time))
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        self.inner.entries.read().keys().cloned().collect()
    }

    /// 值中包含某个 id 的所有 key
    pub fn keys_containing(&self, id: &str) -> Vec<QueryKey> {
        self.inner
            .entries
            .read()
            .iter()
            .filter(|(_, entry)| entry.value.as_ref().map(|v| v.contains_id(id)).unwrap_or(false))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// 清空（会话结束）
    pub fn clear(&self) {
        self.inner.entries.write().clear();
    }

    /// 注册 key 观察者
    pub fn on_key_changed<F>(&self, key: QueryKey, callback: F) -> WatchHandle
    where
        F: Fn(&QueryKey, Option<&CachedValue>) + Send + Sync + 'static,
    {
        let mut watchers = self.inner.watchers.lock();
        watchers.next_id += 1;
        let id = watchers.next_id;
        watchers
            .by_key
            .entry(key.clone())
            .or_default()
            .push((id, Arc::new(callback)));
        WatchHandle {
            cache: Arc::downgrade(&self.inner),
            key,
            id,
        }
    }

    pub fn watcher_count(&self, key: &QueryKey) -> usize {
        self.inner
            .watchers
            .lock()
            .by_key
            .get(key)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    fn publish(&self, key: &QueryKey, source: UpdateSource) {
        self.inner.events.emit(event_builders::cache_updated(key.clone(), source));

        // 回调在锁外执行，允许回调内再次读写缓存
        let callbacks: Vec<KeyCallback> = self
            .inner
            .watchers
            .lock()
            .by_key
            .get(key)
            .map(|list| list.iter().map(|(_, callback)| callback.clone()).collect())
            .unwrap_or_default();
        if callbacks.is_empty() {
            return;
        }
        let value = self.snapshot(key);
        for callback in callbacks {
            callback(key, value.as_ref());
        }
    }
}

fn check_shape(key: &QueryKey, value: &CachedValue) -> Result<()> {
    if key.accepts(value) {
        Ok(())
    } else {
        Err(ListSyncError::ShapeMismatch {
            key: key.to_string(),
            value: value.shape(),
        })
    }
}

/// 观察者句柄，drop 时取消观察
pub struct WatchHandle {
    cache: Weak<CacheInner>,
    key: QueryKey,
    id: u64,
}

impl WatchHandle {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        let Some(inner) = self.cache.upgrade() else {
            return;
        };
        let mut watchers = inner.watchers.lock();
        if let Some(list) = watchers.by_key.get_mut(&self.key) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                watchers.by_key.remove(&self.key);
            }
        }
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Todo;
    use crate::utils::now_utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, Duration};

    struct TestFetcher {
        calls: AtomicUsize,
        todos: Mutex<Vec<Todo>>,
        delay_ms: u64,
    }

    impl TestFetcher {
        fn new(titles: &[&str], delay_ms: u64) -> Arc<Self> {
            let todos = titles
                .iter()
                .enumerate()
                .map(|(i, title)| {
                    let mut todo = Todo::placeholder("L1", title, i as i64, now_utc());
                    todo.id = format!("T{}", i + 1);
                    todo
                })
                .collect();
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                todos: Mutex::new(todos),
                delay_ms,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QueryFetcher for TestFetcher {
        async fn fetch(&self, key: &QueryKey) -> Result<CachedValue> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                sleep(Duration::from_millis(self.delay_ms)).await;
            }
            match key {
                QueryKey::Todos(_) => Ok(CachedValue::Todos(self.todos.lock().clone())),
                QueryKey::Lists => Ok(CachedValue::Lists(vec![])),
                other => Err(ListSyncError::NotFound(other.to_string())),
            }
        }
    }

    fn cache_with(fetcher: Arc<TestFetcher>, stale_time_ms: u64) -> QueryCache {
        let config = ListSyncConfig::builder().stale_time_ms(stale_time_ms).build();
        QueryCache::new(fetcher, Arc::new(EventManager::new(64)), &config)
    }

    fn todos_key() -> QueryKey {
        QueryKey::Todos("L1".into())
    }

    fn titles(value: &CachedValue) -> Vec<String> {
        value
            .as_todos()
            .unwrap_or_default()
            .iter()
            .map(|t| t.title.clone())
            .collect()
    }

    #[tokio::test]
    async fn cold_read_fetches_once_then_serves_fresh() {
        let fetcher = TestFetcher::new(&["Milk", "Eggs"], 0);
        let cache = cache_with(fetcher.clone(), 60_000);

        let first = cache.read(&todos_key()).await.unwrap();
        assert!(!first.is_stale);
        assert_eq!(titles(&first.value), vec!["Milk", "Eggs"]);

        let second = cache.read(&todos_key()).await.unwrap();
        assert!(!second.is_stale);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn stale_read_returns_old_value_and_refreshes() {
        let fetcher = TestFetcher::new(&["Milk"], 0);
        let cache = cache_with(fetcher.clone(), 0);
        cache.read(&todos_key()).await.unwrap();

        fetcher.todos.lock()[0].title = "Oat milk".into();
        let stale = cache.read(&todos_key()).await.unwrap();
        assert!(stale.is_stale);
        assert_eq!(titles(&stale.value), vec!["Milk"]);

        sleep(Duration::from_millis(20)).await;
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(titles(&cache.snapshot(&todos_key()).unwrap()), vec!["Oat milk"]);
    }

    #[tokio::test]
    async fn invalidate_keeps_value() {
        let fetcher = TestFetcher::new(&["Milk"], 0);
        let cache = cache_with(fetcher, 60_000);
        cache.read(&todos_key()).await.unwrap();

        assert!(cache.invalidate(&todos_key()));
        let state = cache.entry_state(&todos_key()).unwrap();
        assert!(state.has_value && state.is_stale && state.invalidated);
        assert!(!cache.invalidate(&QueryKey::Lists));
    }

    #[tokio::test]
    async fn fetch_started_before_local_write_is_discarded() {
        let fetcher = TestFetcher::new(&["Milk"], 50);
        let cache = cache_with(fetcher, 60_000);
        cache.seed(&todos_key(), CachedValue::Todos(vec![])).unwrap();

        let background = cache.clone();
        let fetch = tokio::spawn(async move { background.refetch(&todos_key()).await });
        sleep(Duration::from_millis(10)).await;

        let mut local = Todo::placeholder("L1", "Bread", 0, now_utc());
        local.id = "tmp".into();
        cache
            .patch(&todos_key(), |_| Some(CachedValue::Todos(vec![local])))
            .unwrap();

        let outcome = fetch.await.unwrap().unwrap();
        assert!(!outcome.applied);
        assert_eq!(titles(&cache.snapshot(&todos_key()).unwrap()), vec!["Bread"]);
    }

    #[tokio::test]
    async fn pending_mutation_blocks_fetch_results() {
        let fetcher = TestFetcher::new(&["Milk"], 0);
        let cache = cache_with(fetcher, 60_000);
        cache.read(&todos_key()).await.unwrap();

        cache.begin_pending(&todos_key());
        assert!(!cache.refetch(&todos_key()).await.unwrap().applied);
        cache.end_pending(&todos_key());
        assert!(cache.refetch(&todos_key()).await.unwrap().applied);
    }

    #[tokio::test]
    async fn watchers_fire_until_handle_dropped() {
        let fetcher = TestFetcher::new(&["Milk"], 0);
        let cache = cache_with(fetcher, 60_000);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        let handle = cache.on_key_changed(todos_key(), move |_, value| {
            assert!(value.is_some());
            counter.fetch_add(1, Ordering::SeqCst);
        });
        cache.read(&todos_key()).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(cache.watcher_count(&todos_key()), 1);

        handle.unsubscribe();
        cache.refetch(&todos_key()).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(cache.watcher_count(&todos_key()), 0);
    }

    #[tokio::test]
    async fn writes_must_match_key_shape() {
        let fetcher = TestFetcher::new(&[], 0);
        let cache = cache_with(fetcher, 60_000);
        let err = cache.write(&QueryKey::Lists, CachedValue::Todos(vec![])).unwrap_err();
        assert!(matches!(err, ListSyncError::ShapeMismatch { .. }));
    }

    #[tokio::test]
    async fn seed_does_not_overwrite() {
        let fetcher = TestFetcher::new(&["Milk"], 0);
        let cache = cache_with(fetcher, 60_000);
        cache.read(&todos_key()).await.unwrap();
        assert!(!cache.seed(&todos_key(), CachedValue::Todos(vec![])).unwrap());
        assert!(cache.keys_containing("T1").contains(&todos_key()));
    }
}
