//! 缓存 key
//!
//! 结构化比较的带标签枚举，替代字符串/数组拼接的 key。

use serde::{Deserialize, Serialize};
use std::fmt;

use super::value::CachedValue;
use crate::models::ListId;

/// 查询 key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "list_id", rename_all = "snake_case")]
pub enum QueryKey {
    /// 当前用户可见的所有清单
    Lists,
    /// 单个清单的元数据
    List(ListId),
    /// 某清单下的待办
    Todos(ListId),
    /// 某清单的成员（owner + 协作者）
    Collaborators(ListId),
    /// 当前登录用户的资料
    Profile,
}

impl QueryKey {
    /// key 关联的清单 id
    pub fn list_id(&self) -> Option<&str> {
        match self {
            Self::List(id) | Self::Todos(id) | Self::Collaborators(id) => Some(id),
            Self::Lists | Self::Profile => None,
        }
    }

    /// 值的形状是否与 key 匹配
    pub fn accepts(&self, value: &CachedValue) -> bool {
        matches!(
            (self, value),
            (Self::Lists, CachedValue::Lists(_))
                | (Self::List(_), CachedValue::List(_))
                | (Self::Todos(_), CachedValue::Todos(_))
                | (Self::Collaborators(_), CachedValue::Collaborators(_))
                | (Self::Profile, CachedValue::Profile(_))
        )
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lists => f.write_str("lists"),
            Self::List(id) => write!(f, "list:{}", id),
            Self::Todos(id) => write!(f, "todos:{}", id),
            Self::Collaborators(id) => write!(f, "collaborators:{}", id),
            Self::Profile => f.write_str("profile"),
        }
    }
}
