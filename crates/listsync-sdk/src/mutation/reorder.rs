//! 重排序
//!
//! 新顺序完全由客户端当前的内存顺序推导，提交完整的 (id, position) 排列而不是差量。

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{ListSyncError, Result};

/// 单个元素的新位置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub id: String,
    pub position: i64,
}

impl PositionUpdate {
    pub fn new(id: &str, position: i64) -> Self {
        Self {
            id: id.to_string(),
            position,
        }
    }
}

/// 按目标顺序分配 0..N-1
///
/// `known_ids` 为当前缓存中的元素；目标顺序中出现重复或未知 id 时拒绝。
pub fn assign_positions<S: AsRef<str>>(ordered_ids: &[S], known_ids: &[&str]) -> Result<Vec<PositionUpdate>> {
    if ordered_ids.is_empty() {
        return Err(ListSyncError::InvalidArgument("nothing to reorder".to_string()));
    }

    let known: HashSet<&str> = known_ids.iter().copied().collect();
    let mut seen = HashSet::with_capacity(ordered_ids.len());
    let mut updates = Vec::with_capacity(ordered_ids.len());

    for (index, id) in ordered_ids.iter().enumerate() {
        let id = id.as_ref();
        if !known.contains(id) {
            return Err(ListSyncError::InvalidArgument(format!("unknown id in reorder: {}", id)));
        }
        if !seen.insert(id) {
            return Err(ListSyncError::InvalidArgument(format!("duplicate id in reorder: {}", id)));
        }
        updates.push(PositionUpdate::new(id, index as i64));
    }

    Ok(updates)
}
