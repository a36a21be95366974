//! ListSync SDK - 协作待办清单的客户端同步核心
//!
//! 本 SDK 负责让多人共享的待办清单在客户端保持一致：
//! - 🧠 查询缓存：按 key 缓存远端数据，stale-while-revalidate
//! - ⚡ 乐观变更：先写本地，失败时按快照整体回滚，结束后必定重新拉取
//! - 📡 变更订阅：远端任何改动都只当作"失效"信号，由拉取收敛到服务器状态
//! - 🔀 对账：占位 ID 替换、位置排列、过期拉取结果丢弃
//! - ⚙️ 事件系统：缓存更新、变更结果、订阅状态统一广播
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use listsync_sdk::{ListSyncConfig, ListSyncSDK, MemoryBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(MemoryBackend::new());
//!     backend.sign_in("user-1");
//!
//!     let sdk = ListSyncSDK::with_backend(ListSyncConfig::default(), backend);
//!
//!     // 新建清单（乐观写入，确认后替换占位 ID）
//!     let list = sdk.mutations().create_list("Groceries").await;
//!     if let Some(list) = list.confirmed() {
//!         // 观察详情页的远端变更
//!         let _observation = sdk.observe_list(&list.id).await?;
//!         sdk.mutations().create_todo(&list.id, "Milk").await;
//!         println!("todos: {:?}", sdk.todos(&list.id).await?);
//!     }
//!
//!     sdk.shutdown().await?;
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod feed;
pub mod logging;
pub mod models;
pub mod mutation;
pub mod queries;
pub mod reconciler;
pub mod remote;
pub mod sdk;
pub mod utils;

#[cfg(test)]
mod sync_tests;

// 重新导出核心类型，方便使用
pub use cache::{CachedValue, EntryState, QueryCache, QueryFetcher, QueryKey, UpdateSource, WatchHandle};
pub use config::{ListSyncConfig, ListSyncConfigBuilder};
pub use error::{FailureReason, ListSyncError, Result};
pub use events::{EventFilter, EventManager, EventStats, SyncEvent};
pub use feed::{ChangeFeedListener, FeedGuard, FeedScope, ListObservation};
pub use logging::init_logging;
pub use models::{CollaboratorRow, List, ListId, ListMember, MemberRole, Profile, Todo, TodoId, UserId};
pub use mutation::{
    MutationCoordinator, MutationKind, MutationNotice, MutationOutcome, MutationToken, PositionUpdate,
};
pub use queries::RemoteQueryFetcher;
pub use remote::{ChangeFeed, Filter, IdentityProvider, MemoryBackend, RemoteStore, Table};
pub use sdk::ListSyncSDK;

/// SDK 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
