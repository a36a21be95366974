use serde::Serialize;
use std::time::{Duration, Instant};

use super::value::CachedValue;

/// 单个 key 的缓存条目
///
/// `epoch` 在每次本地写入（乐观写、确认写、回滚）时递增；拉取结果本身不改变 epoch。
/// 拉取开始时记录 epoch 与序号，落地时据此判断结果是否已过时。
#[derive(Debug, Default)]
pub(crate) struct CacheEntry {
    pub(crate) value: Option<CachedValue>,
    pub(crate) updated_at: Option<Instant>,
    pub(crate) invalidated: bool,
    pub(crate) pending_mutations: usize,
    pub(crate) epoch: u64,
    pub(crate) fetch_seq: u64,
    pub(crate) applied_fetch_seq: u64,
    pub(crate) fetches_in_flight: usize,
}

impl CacheEntry {
    pub(crate) fn is_stale(&self, stale_time: Duration) -> bool {
        if self.invalidated {
            return true;
        }
        match self.updated_at {
            Some(at) => at.elapsed() >= stale_time,
            None => true,
        }
    }

    /// 本地写入：替换值并推进 epoch
    pub(crate) fn write_local(&mut self, value: Option<CachedValue>) {
        self.value = value;
        self.updated_at = Some(Instant::now());
        self.epoch += 1;
    }

    pub(crate) fn state(&self, stale_time: Duration) -> EntryState {
        EntryState {
            has_value: self.value.is_some(),
            is_stale: self.is_stale(stale_time),
            invalidated: self.invalidated,
            pending_mutations: self.pending_mutations,
            fetch_in_flight: self.fetches_in_flight > 0,
            age_ms: self.updated_at.map(|at| at.elapsed().as_millis() as u64),
        }
    }
}

/// 条目状态快照（调试与测试用）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryState {
    pub has_value: bool,
    pub is_stale: bool,
    pub invalidated: bool,
    pub pending_mutations: usize,
    pub fetch_in_flight: bool,
    pub age_ms: Option<u64>,
}
