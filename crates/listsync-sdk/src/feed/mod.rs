//! 变更订阅
//!
//! - [`FeedScope`]：通道名、表、过滤条件与需要失效的 key
//! - [`ChangeFeedListener`]：按通道引用计数的订阅与失效/重新拉取任务

mod listener;
mod scope;

pub use listener::{ChangeFeedListener, FeedGuard, ListObservation};
pub use scope::FeedScope;
