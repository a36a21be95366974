//! 三阶段乐观写协议
//!
//! ```text
//! begin ──apply/apply_confirmed──▶ Open ──commit──▶ Committed ──settle──▶ Settled
//!                                    └──rollback──▶ RolledBack ──settle──▶ Settled
//! ```
//!
//! - 首次触及某个 key 时保存快照并把该 key 标记为"有进行中的变更"，此后拉取结果不会落地
//! - 回滚按首次触及的逆序把每个被改动的 key 整体恢复为快照
//! - commit / rollback 结束进行中标记；settle 对所有触及且有值的 key 做收尾拉取
//! - 处于 Open 时被 drop 视为放弃：自动回滚，并把触及的 key 标记过期、在后台收尾拉取
//!   （远端可能已经执行了这次写入，回滚后的值不可当作新鲜值）

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::outcome::MutationKind;
use crate::cache::{CachedValue, QueryCache, QueryKey, UpdateSource};
use crate::error::{ListSyncError, Result};

/// 协议阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenPhase {
    Open,
    Committed,
    RolledBack,
    Settled,
}

struct Touched {
    key: QueryKey,
    previous: Option<CachedValue>,
    dirty: bool,
}

/// 一次变更的乐观写令牌
pub struct MutationToken {
    id: String,
    kind: MutationKind,
    cache: QueryCache,
    touched: Vec<Touched>,
    phase: TokenPhase,
}

impl MutationToken {
    pub fn begin(cache: &QueryCache, kind: MutationKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            cache: cache.clone(),
            touched: Vec::new(),
            phase: TokenPhase::Open,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    pub fn phase(&self) -> TokenPhase {
        self.phase
    }

    pub fn touched_keys(&self) -> Vec<QueryKey> {
        self.touched.iter().map(|t| t.key.clone()).collect()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.phase != TokenPhase::Open {
            return Err(ListSyncError::InvalidOperation(format!(
                "mutation {} is {:?}, expected Open",
                self.id, self.phase
            )));
        }
        Ok(())
    }

    fn slot(&mut self, key: &QueryKey) -> usize {
        if let Some(index) = self.touched.iter().position(|t| &t.key == key) {
            return index;
        }
        let previous = self.cache.snapshot(key);
        self.cache.begin_pending(key);
        self.touched.push(Touched {
            key: key.clone(),
            previous,
            dirty: false,
        });
        self.touched.len() - 1
    }

    /// 登记一个 key（保存快照，收尾时重新拉取），不写入
    pub fn touch(&mut self, key: &QueryKey) -> Result<()> {
        self.ensure_open()?;
        self.slot(key);
        Ok(())
    }

    /// 乐观写
    pub fn apply<F>(&mut self, key: &QueryKey, updater: F) -> Result<bool>
    where
        F: FnOnce(&CachedValue) -> Option<CachedValue>,
    {
        self.write(key, updater, UpdateSource::Optimistic)
    }

    /// 远端确认后的写入（例如用确认行替换占位元素）
    pub fn apply_confirmed<F>(&mut self, key: &QueryKey, updater: F) -> Result<bool>
    where
        F: FnOnce(&CachedValue) -> Option<CachedValue>,
    {
        self.write(key, updater, UpdateSource::Confirmed)
    }

    fn write<F>(&mut self, key: &QueryKey, updater: F, source: UpdateSource) -> Result<bool>
    where
        F: FnOnce(&CachedValue) -> Option<CachedValue>,
    {
        self.ensure_open()?;
        let index = self.slot(key);
        let changed = self.cache.patch_with_source(key, updater, source)?;
        if changed {
            self.touched[index].dirty = true;
        }
        Ok(changed)
    }

    /// 确认：保留当前缓存值，把触及的 key 标记为待刷新
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        for touched in &self.touched {
            self.cache.end_pending(&touched.key);
            self.cache.invalidate(&touched.key);
        }
        self.phase = TokenPhase::Committed;
        debug!("mutation {} ({}) committed", self.id, self.kind);
        Ok(())
    }

    /// 回滚：把每个改动过的 key 整体恢复为快照
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        for touched in self.touched.iter().rev() {
            if touched.dirty {
                self.cache.restore(&touched.key, touched.previous.clone())?;
            }
        }
        for touched in &self.touched {
            self.cache.end_pending(&touched.key);
        }
        self.phase = TokenPhase::RolledBack;
        debug!("mutation {} ({}) rolled back", self.id, self.kind);
        Ok(())
    }

    /// 收尾拉取：无论成功失败都以远端真实状态为准
    ///
    /// 目标资源已被删除（NotFound）时移除该 key 的值；其他拉取错误只记录日志。
    pub async fn settle(&mut self) -> Result<()> {
        if !matches!(self.phase, TokenPhase::Committed | TokenPhase::RolledBack) {
            return Err(ListSyncError::InvalidOperation(format!(
                "mutation {} cannot settle from {:?}",
                self.id, self.phase
            )));
        }

        let keys = self.touched_keys();
        settle_keys(&self.cache, &keys).await;

        self.phase = TokenPhase::Settled;
        Ok(())
    }
}

/// 对有值的 key 重新拉取；目标已删除时移除该 key 的值
async fn settle_keys(cache: &QueryCache, keys: &[QueryKey]) {
    let keys: Vec<&QueryKey> = keys.iter().filter(|key| cache.has_value(key)).collect();
    let results = join_all(keys.iter().map(|key| cache.refetch(key))).await;

    for (key, result) in keys.into_iter().zip(results) {
        match result {
            Ok(_) => {}
            Err(err) if err.is_stale_target() => cache.remove(key),
            Err(err) => warn!("settle refetch of {} failed: {}", key, err),
        }
    }
}

impl Drop for MutationToken {
    fn drop(&mut self) {
        if self.phase != TokenPhase::Open || self.touched.is_empty() {
            return;
        }
        warn!("mutation {} ({}) dropped while open, rolling back", self.id, self.kind);
        if let Err(err) = self.rollback() {
            warn!("rollback of dropped mutation {} failed: {}", self.id, err);
        }

        let keys = self.touched_keys();
        for key in &keys {
            self.cache.invalidate(key);
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let cache = self.cache.clone();
                handle.spawn(async move { settle_keys(&cache, &keys).await });
            }
            Err(_) => debug!("no runtime for settle of dropped mutation {}, next read refetches", self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QueryFetcher;
    use crate::config::ListSyncConfig;
    use crate::events::EventManager;
    use crate::models::Todo;
    use crate::utils::now_utc;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct FixedFetcher {
        todos: Mutex<Vec<Todo>>,
    }

    #[async_trait]
    impl QueryFetcher for FixedFetcher {
        async fn fetch(&self, key: &QueryKey) -> Result<CachedValue> {
            match key {
                QueryKey::Todos(_) => Ok(CachedValue::Todos(self.todos.lock().clone())),
                other => Err(ListSyncError::NotFound(other.to_string())),
            }
        }
    }

    fn todo(id: &str, title: &str) -> Todo {
        let mut todo = Todo::placeholder("L1", title, 0, now_utc());
        todo.id = id.to_string();
        todo
    }

    async fn setup() -> (QueryCache, Arc<FixedFetcher>) {
        let fetcher = Arc::new(FixedFetcher {
            todos: Mutex::new(vec![todo("T1", "Milk")]),
        });
        let cache = QueryCache::new(
            fetcher.clone(),
            Arc::new(EventManager::new(16)),
            &ListSyncConfig::default(),
        );
        cache.read(&key()).await.unwrap();
        (cache, fetcher)
    }

    fn key() -> QueryKey {
        QueryKey::Todos("L1".into())
    }

    fn push(title: &'static str) -> impl FnOnce(&CachedValue) -> Option<CachedValue> {
        move |value| {
            let mut todos = value.as_todos()?.to_vec();
            todos.push(todo("tmp", title));
            Some(CachedValue::Todos(todos))
        }
    }

    #[tokio::test]
    async fn rollback_restores_whole_value() {
        let (cache, _) = setup().await;
        let before = cache.snapshot(&key());

        let mut token = MutationToken::begin(&cache, MutationKind::CreateTodo);
        assert!(token.apply(&key(), push("Bread")).unwrap());
        assert!(token.apply(&key(), push("Butter")).unwrap());
        assert_eq!(cache.snapshot(&key()).unwrap().as_todos().unwrap().len(), 3);
        assert!(cache.has_pending_mutations(&key()));

        token.rollback().unwrap();
        assert_eq!(cache.snapshot(&key()), before);
        assert!(!cache.has_pending_mutations(&key()));
        assert_eq!(token.phase(), TokenPhase::RolledBack);
    }

    #[tokio::test]
    async fn commit_then_settle_converges_to_remote() {
        let (cache, fetcher) = setup().await;

        let mut token = MutationToken::begin(&cache, MutationKind::CreateTodo);
        token.apply(&key(), push("Bread")).unwrap();
        fetcher.todos.lock().push(todo("T2", "Bread"));

        token.commit().unwrap();
        assert!(cache.entry_state(&key()).unwrap().invalidated);
        token.settle().await.unwrap();

        let ids: Vec<String> = cache
            .snapshot(&key())
            .unwrap()
            .as_todos()
            .unwrap()
            .iter()
            .map(|t| t.id.clone())
            .collect();
        assert_eq!(ids, vec!["T1", "T2"]);
        assert_eq!(token.phase(), TokenPhase::Settled);
    }

    #[tokio::test]
    async fn illegal_transitions_are_rejected() {
        let (cache, _) = setup().await;
        let mut token = MutationToken::begin(&cache, MutationKind::DeleteTodo);
        assert!(token.settle().await.is_err());
        token.commit().unwrap();
        assert!(token.rollback().is_err());
        assert!(token.apply(&key(), push("x")).is_err());
    }

    #[tokio::test]
    async fn dropping_an_open_token_rolls_back_and_refetches() {
        let (cache, fetcher) = setup().await;
        let before = cache.snapshot(&key());
        {
            let mut token = MutationToken::begin(&cache, MutationKind::CreateTodo);
            token.apply(&key(), push("Bread")).unwrap();
            // 远端已经执行了写入，但调用方放弃了等待
            fetcher.todos.lock().push(todo("T2", "Bread"));
        }
        assert_eq!(cache.snapshot(&key()), before);
        let state = cache.entry_state(&key()).unwrap();
        assert!(state.invalidated);
        assert_eq!(state.pending_mutations, 0);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let titles: Vec<String> = cache
            .snapshot(&key())
            .unwrap()
            .as_todos()
            .unwrap()
            .iter()
            .map(|t| t.title.clone())
            .collect();
        assert_eq!(titles, vec!["Milk", "Bread"]);
    }
}
