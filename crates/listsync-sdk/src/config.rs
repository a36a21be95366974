//! SDK 配置
//!
//! 所有参数都有合理默认值，只需覆盖关心的字段：
//!
//! ```rust
//! use listsync_sdk::ListSyncConfig;
//!
//! let config = ListSyncConfig::builder()
//!     .stale_time_ms(30_000)
//!     .debug_mode(true)
//!     .build();
//! assert_eq!(config.stale_time().as_secs(), 30);
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// ListSync SDK 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSyncConfig {
    /// 缓存新鲜度窗口（毫秒），超过后读取会触发后台刷新
    pub stale_time_ms: u64,
    /// 事件广播缓冲区大小
    pub event_buffer_size: usize,
    /// 单个变更订阅的通道容量
    pub feed_buffer_size: usize,
    /// 收到变更事件后是否主动重新拉取正在观察的 key
    pub refetch_on_feed_event: bool,
    /// 调试模式（debug 级别日志）
    pub debug_mode: bool,
}

impl Default for ListSyncConfig {
    fn default() -> Self {
        Self {
            stale_time_ms: 60 * 1000, // 60 秒
            event_buffer_size: 256,
            feed_buffer_size: 64,
            refetch_on_feed_event: true,
            debug_mode: false,
        }
    }
}

impl ListSyncConfig {
    pub fn builder() -> ListSyncConfigBuilder {
        ListSyncConfigBuilder::new()
    }

    /// 新鲜度窗口
    pub fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_time_ms)
    }
}

/// 配置构建器
pub struct ListSyncConfigBuilder {
    config: ListSyncConfig,
}

impl ListSyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ListSyncConfig::default(),
        }
    }

    pub fn stale_time_ms(mut self, stale_time_ms: u64) -> Self {
        self.config.stale_time_ms = stale_time_ms;
        self
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.config.stale_time_ms = stale_time.as_millis() as u64;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size.max(1);
        self
    }

    pub fn feed_buffer_size(mut self, size: usize) -> Self {
        self.config.feed_buffer_size = size.max(1);
        self
    }

    pub fn refetch_on_feed_event(mut self, enabled: bool) -> Self {
        self.config.refetch_on_feed_event = enabled;
        self
    }

    pub fn debug_mode(mut self, debug: bool) -> Self {
        self.config.debug_mode = debug;
        self
    }

    pub fn build(self) -> ListSyncConfig {
        self.config
    }
}

impl Default for ListSyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
