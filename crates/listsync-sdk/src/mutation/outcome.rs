use serde::{Deserialize, Serialize};

use crate::cache::QueryKey;
use crate::error::FailureReason;
use crate::utils::now_utc_millis;

/// 变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    CreateList,
    RenameList,
    DeleteList,
    ReorderLists,
    CreateTodo,
    UpdateTodoTitle,
    SetTodoComplete,
    ToggleTodo,
    DeleteTodo,
    ReorderTodos,
    RemoveCollaborator,
    JoinList,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateList => "create_list",
            Self::RenameList => "rename_list",
            Self::DeleteList => "delete_list",
            Self::ReorderLists => "reorder_lists",
            Self::CreateTodo => "create_todo",
            Self::UpdateTodoTitle => "update_todo_title",
            Self::SetTodoComplete => "set_todo_complete",
            Self::ToggleTodo => "toggle_todo",
            Self::DeleteTodo => "delete_todo",
            Self::ReorderTodos => "reorder_todos",
            Self::RemoveCollaborator => "remove_collaborator",
            Self::JoinList => "join_list",
        }
    }
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 失败通知（交给 UI 层展示，可关闭，不自动重试）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationNotice {
    pub mutation_id: String,
    pub kind: MutationKind,
    /// 主要受影响的 key
    pub key: Option<QueryKey>,
    pub message: String,
    pub reason: FailureReason,
    pub timestamp: u64,
}

impl MutationNotice {
    pub fn new(
        mutation_id: &str,
        kind: MutationKind,
        key: Option<QueryKey>,
        message: impl Into<String>,
        reason: FailureReason,
    ) -> Self {
        Self {
            mutation_id: mutation_id.to_string(),
            kind,
            key,
            message: message.into(),
            reason,
            timestamp: now_utc_millis(),
        }
    }
}

/// 变更结果
///
/// 远端错误不会直接抛给调用方，只回答"乐观写是否被回滚"并附带通知。
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome<T> {
    /// 远端已确认
    Confirmed(T),
    /// 目标已不存在或仍在创建中，按空操作处理
    Ignored,
    /// 远端失败，乐观写已回滚
    RolledBack(MutationNotice),
    /// 前置条件不满足，未做任何写入
    Rejected(MutationNotice),
}

impl<T> MutationOutcome<T> {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored)
    }

    pub fn was_rolled_back(&self) -> bool {
        matches!(self, Self::RolledBack(_))
    }

    pub fn confirmed(&self) -> Option<&T> {
        match self {
            Self::Confirmed(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_confirmed(self) -> Option<T> {
        match self {
            Self::Confirmed(value) => Some(value),
            _ => None,
        }
    }

    pub fn notice(&self) -> Option<&MutationNotice> {
        match self {
            Self::RolledBack(notice) | Self::Rejected(notice) => Some(notice),
            _ => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> MutationOutcome<U> {
        match self {
            Self::Confirmed(value) => MutationOutcome::Confirmed(f(value)),
            Self::Ignored => MutationOutcome::Ignored,
            Self::RolledBack(notice) => MutationOutcome::RolledBack(notice),
            Self::Rejected(notice) => MutationOutcome::Rejected(notice),
        }
    }
}
