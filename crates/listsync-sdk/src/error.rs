use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ListSyncError {
    /// 网络或超时错误（可由用户重试）
    #[error("Transport error: {0}")]
    Transport(String),
    /// 行级权限策略拒绝
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// 目标行不存在（可能已被其他客户端删除）
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// 缓存值与 QueryKey 的形状不匹配
    #[error("Cache shape mismatch: key {key} cannot hold {value}")]
    ShapeMismatch { key: String, value: &'static str },
    #[error("Shutting down: {0}")]
    ShuttingDown(String),
}

impl From<serde_json::Error> for ListSyncError {
    fn from(error: serde_json::Error) -> Self {
        ListSyncError::Serialization(error.to_string())
    }
}

impl ListSyncError {
    /// 目标已不存在：更新/删除按幂等空操作处理
    pub fn is_stale_target(&self) -> bool {
        matches!(self, ListSyncError::NotFound(_))
    }

    /// 映射到同步核心的失败分类
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            ListSyncError::Transport(_) | ListSyncError::ShuttingDown(_) => FailureReason::Transient,
            ListSyncError::Unauthorized(_) | ListSyncError::NotAuthenticated => FailureReason::Denied,
            ListSyncError::NotFound(_) => FailureReason::StaleTarget,
            ListSyncError::InvalidArgument(_)
            | ListSyncError::InvalidOperation(_)
            | ListSyncError::Serialization(_)
            | ListSyncError::ShapeMismatch { .. } => FailureReason::Rejected,
        }
    }
}

pub type Result<T> = std::result::Result<T, ListSyncError>;

/// 失败原因分类
///
/// 同步核心只关心"是否回滚"，具体原因仅透传给 UI 层做文案。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// 网络/超时 → 回滚 + 提示，不自动重试
    Transient,
    /// 权限拒绝 → 与 Transient 同样处理
    Denied,
    /// 目标已删除/移动 → 空操作，不提示
    StaleTarget,
    /// 参数或前置条件不满足 → 未做任何乐观写入
    Rejected,
}

impl FailureReason {
    /// 是否需要回滚乐观写入
    pub fn requires_rollback(&self) -> bool {
        matches!(self, FailureReason::Transient | FailureReason::Denied)
    }
}
