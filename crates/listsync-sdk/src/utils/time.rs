//! 时间处理工具
//!
//! - **远端行**: 时间字段统一使用 `DateTime<Utc>`，由后端写入
//! - **事件/统计**: 使用 UTC 毫秒时间戳
//! - **缓存新鲜度**: 使用单调时钟 `Instant`，不受系统时间回拨影响

use chrono::{DateTime, Utc};

/// 当前 UTC 时间
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// 当前 UTC 毫秒时间戳
pub fn now_utc_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
