//! 远端行在客户端的投影
//!
//! 字段名与远端表列名一致（snake_case），便于直接从 JSON 行反序列化。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ListId = String;
pub type TodoId = String;
pub type UserId = String;

/// 清单
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct List {
    pub id: ListId,
    pub name: String,
    pub owner_id: UserId,
    /// 分享令牌，签发后不可变
    pub share_token: String,
    /// 在用户清单列表中的显示顺序
    #[serde(default)]
    pub position: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl List {
    /// 乐观创建使用的本地占位清单
    ///
    /// id 与 share_token 都是本地随机值，只在当前会话内作为 UI 的稳定 key。
    pub fn placeholder(name: &str, owner_id: &str, position: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            owner_id: owner_id.to_string(),
            share_token: Uuid::new_v4().to_string(),
            position,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 待办事项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub id: TodoId,
    pub list_id: ListId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    pub is_complete: bool,
    /// 同一清单、同一完成状态分组内的顺序
    pub position: i64,
    #[serde(default)]
    pub created_by: Option<UserId>,
    #[serde(default)]
    pub updated_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Todo {
    /// 乐观创建使用的本地占位待办
    pub fn placeholder(list_id: &str, title: &str, position: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            list_id: list_id.to_string(),
            title: title.to_string(),
            description: None,
            due_date: None,
            is_complete: false,
            position,
            created_by: None,
            updated_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 用户资料
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl Profile {
    /// 显示名的第一个词
    pub fn first_name(&self) -> String {
        self.display_name
            .as_deref()
            .and_then(|name| name.split_whitespace().next())
            .unwrap_or_default()
            .to_string()
    }

    /// 问候语使用的名字：first_name，为空时退回邮箱
    pub fn greeting_name(&self) -> String {
        let first = self.first_name();
        if !first.is_empty() {
            return first;
        }
        self.email.clone().unwrap_or_default()
    }
}

/// 成员角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Collaborator,
}

/// 清单成员（owner + 协作者的 join 投影）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMember {
    pub id: UserId,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub role: MemberRole,
}

impl ListMember {
    pub fn from_profile(profile: Profile, role: MemberRole) -> Self {
        Self {
            id: profile.id,
            display_name: profile.display_name,
            email: profile.email,
            avatar_url: profile.avatar_url,
            role,
        }
    }
}

/// 协作关系行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaboratorRow {
    pub list_id: ListId,
    pub user_id: UserId,
}
