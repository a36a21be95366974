//! 乐观变更
//!
//! - [`MutationToken`]：begin / commit / rollback / settle 三阶段协议对象
//! - [`MutationCoordinator`]：清单、待办、协作者、分享的全部变更
//! - [`assign_positions`]：重排序的完整排列计算

mod coordinator;
mod outcome;
mod reorder;
mod token;

pub use coordinator::MutationCoordinator;
pub use outcome::{MutationKind, MutationNotice, MutationOutcome};
pub use reorder::{assign_positions, PositionUpdate};
pub use token::{MutationToken, TokenPhase};
