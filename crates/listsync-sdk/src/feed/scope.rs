use serde::{Deserialize, Serialize};

use crate::cache::QueryKey;
use crate::remote::{Filter, Table};

/// 订阅范围：一个通道 = 一张表 + 一个过滤条件 + 收到事件时需要失效的 key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedScope {
    pub channel: String,
    pub table: Table,
    pub filter: Filter,
    pub keys: Vec<QueryKey>,
}

impl FeedScope {
    pub fn new(channel: impl Into<String>, table: Table, filter: Filter, keys: Vec<QueryKey>) -> Self {
        Self {
            channel: channel.into(),
            table,
            filter,
            keys,
        }
    }

    /// 首页：整张 lists 表
    pub fn lists() -> Self {
        Self::new("lists", Table::Lists, Filter::all(), vec![QueryKey::Lists])
    }

    /// 某清单下的待办
    pub fn todos(list_id: &str) -> Self {
        Self::new(
            format!("todos:{}", list_id),
            Table::Todos,
            Filter::eq("list_id", list_id),
            vec![QueryKey::Todos(list_id.to_string())],
        )
    }

    /// 清单自身的行（改名、分享令牌等）
    pub fn list(list_id: &str) -> Self {
        Self::new(
            format!("list:{}", list_id),
            Table::Lists,
            Filter::eq("id", list_id),
            vec![QueryKey::List(list_id.to_string()), QueryKey::Lists],
        )
    }

    /// 协作关系
    pub fn collaborators(list_id: &str) -> Self {
        Self::new(
            format!("collaborators:{}", list_id),
            Table::ListCollaborators,
            Filter::eq("list_id", list_id),
            vec![QueryKey::Collaborators(list_id.to_string())],
        )
    }

    /// 成员投影依赖清单行的 owner_id
    pub fn collaborators_list(list_id: &str) -> Self {
        Self::new(
            format!("collaborators-list:{}", list_id),
            Table::Lists,
            Filter::eq("id", list_id),
            vec![QueryKey::Collaborators(list_id.to_string())],
        )
    }

    /// 清单详情页需要的全部范围
    pub fn for_list_detail(list_id: &str) -> Vec<Self> {
        vec![
            Self::todos(list_id),
            Self::list(list_id),
            Self::collaborators(list_id),
            Self::collaborators_list(list_id),
        ]
    }
}
