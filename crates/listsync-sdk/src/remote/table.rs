//! 远端表与过滤条件
//!
//! 表名为受控枚举；过滤条件只支持列等值匹配（`col=eq.value`），足以覆盖
//! 同步核心用到的全部查询与变更订阅范围。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::error::{ListSyncError, Result};

/// 远端行：列名 → JSON 值
pub type Row = serde_json::Map<String, Value>;

/// 远端表
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Table {
    Lists,
    Todos,
    ListCollaborators,
    Profiles,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lists => "lists",
            Self::Todos => "todos",
            Self::ListCollaborators => "list_collaborators",
            Self::Profiles => "profiles",
        }
    }

    /// 是否有单列主键 `id`（list_collaborators 是复合键）
    pub fn has_id_column(self) -> bool {
        !matches!(self, Self::ListCollaborators)
    }
}

impl FromStr for Table {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "lists" => Ok(Self::Lists),
            "todos" => Ok(Self::Todos),
            "list_collaborators" => Ok(Self::ListCollaborators),
            "profiles" => Ok(Self::Profiles),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 等值过滤条件（多个条件为 AND）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    /// 不过滤：匹配整张表
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self::all().and_eq(column, value)
    }

    pub fn and_eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.conditions.push((column.to_string(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// 取某列的等值条件
    pub fn value_of(&self, column: &str) -> Option<&Value> {
        self.conditions
            .iter()
            .find(|(col, _)| col == column)
            .map(|(_, value)| value)
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.conditions
            .iter()
            .all(|(column, expected)| row.get(column) == Some(expected))
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.conditions.is_empty() {
            return f.write_str("*");
        }
        let parts: Vec<String> = self
            .conditions
            .iter()
            .map(|(column, value)| match value {
                Value::String(s) => format!("{}=eq.{}", column, s),
                other => format!("{}=eq.{}", column, other),
            })
            .collect();
        f.write_str(&parts.join("&"))
    }
}

/// 序列化为远端行
pub fn to_row<T: Serialize>(value: &T) -> Result<Row> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(ListSyncError::Serialization(format!(
            "expected a JSON object row, got {}",
            other
        ))),
    }
}

/// 从远端行反序列化
pub fn from_row<T: serde::de::DeserializeOwned>(row: Row) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

pub fn from_rows<T: serde::de::DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>> {
    rows.into_iter().map(from_row).collect()
}
