//! 日志初始化
//!
//! SDK 内部统一使用 `tracing` 宏；宿主应用若未安装 subscriber，可调用
//! [`init_logging`] 安装一个 fmt subscriber。

use tracing::Level;

use crate::config::ListSyncConfig;

/// 安装全局 fmt subscriber
///
/// 返回 false 表示进程内已有 subscriber（重复调用是安全的空操作）。
pub fn init_logging(config: &ListSyncConfig) -> bool {
    let level = if config.debug_mode { Level::DEBUG } else { Level::INFO };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init()
        .is_ok()
}
