//! 远端数据服务契约
//!
//! 同步核心只依赖这里的三个 trait：
//! - [`RemoteStore`]：按表的增删改查 + 远端函数调用（行级权限由远端负责）
//! - [`ChangeFeed`]：按表 + 过滤条件订阅行级变更
//! - [`IdentityProvider`]：当前登录用户
//!
//! 具体协议由平台层实现；[`memory::MemoryBackend`] 是内存参考实现。

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::models::UserId;

pub mod feed;
pub mod memory;
pub mod table;

pub use feed::{ChangeEvent, ChangeFeed, ChangeKind, FeedMessage, FeedSubscription};
pub use memory::MemoryBackend;
pub use table::{from_row, from_rows, to_row, Filter, Row, Table};

/// 通过分享令牌加入清单的远端函数名
pub const JOIN_LIST_FUNCTION: &str = "join_list_via_share_token";

/// 远端数据服务
///
/// 每个调用都可能失败：网络错误 → `Transport`，行级策略拒绝 → `Unauthorized`，
/// 目标行不存在 → `NotFound`。
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn select(&self, table: Table, filter: &Filter) -> Result<Vec<Row>>;

    /// 插入一行，返回远端补全后的行（id、时间戳等由远端分配）
    async fn insert(&self, table: Table, row: Row) -> Result<Row>;

    /// 按 id 局部更新，返回更新后的完整行
    async fn update(&self, table: Table, id: &str, patch: Row) -> Result<Row>;

    async fn delete(&self, table: Table, id: &str) -> Result<()>;

    /// 按条件删除（用于复合主键表），返回删除行数
    async fn delete_where(&self, table: Table, filter: &Filter) -> Result<usize>;

    /// 调用远端函数
    async fn call(&self, function: &str, args: Value) -> Result<Value>;
}

/// 身份上下文（外部身份提供方）
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// 当前登录用户，未登录返回 None
    async fn current_user_id(&self) -> Option<UserId>;
}
