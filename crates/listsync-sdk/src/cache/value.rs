use serde::{Deserialize, Serialize};

use crate::models::{List, ListMember, Profile, Todo};

/// 缓存值：整个集合作为一个值存取，回滚时整体恢复
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CachedValue {
    Lists(Vec<List>),
    List(List),
    Todos(Vec<Todo>),
    Collaborators(Vec<ListMember>),
    Profile(Option<Profile>),
}

impl CachedValue {
    pub fn shape(&self) -> &'static str {
        match self {
            Self::Lists(_) => "lists",
            Self::List(_) => "list",
            Self::Todos(_) => "todos",
            Self::Collaborators(_) => "collaborators",
            Self::Profile(_) => "profile",
        }
    }

    pub fn as_lists(&self) -> Option<&[List]> {
        match self {
            Self::Lists(lists) => Some(lists),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_todos(&self) -> Option<&[Todo]> {
        match self {
            Self::Todos(todos) => Some(todos),
            _ => None,
        }
    }

    pub fn as_collaborators(&self) -> Option<&[ListMember]> {
        match self {
            Self::Collaborators(members) => Some(members),
            _ => None,
        }
    }

    pub fn as_profile(&self) -> Option<Option<&Profile>> {
        match self {
            Self::Profile(profile) => Some(profile.as_ref()),
            _ => None,
        }
    }

    /// 值中是否出现某个 id（清单、待办或成员）
    pub fn contains_id(&self, id: &str) -> bool {
        match self {
            Self::Lists(lists) => lists.iter().any(|list| list.id == id),
            Self::List(list) => list.id == id,
            Self::Todos(todos) => todos.iter().any(|todo| todo.id == id),
            Self::Collaborators(members) => members.iter().any(|member| member.id == id),
            Self::Profile(profile) => profile.as_ref().map(|p| p.id == id).unwrap_or(false),
        }
    }
}
