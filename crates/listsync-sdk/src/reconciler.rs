//! 对账规则
//!
//! 乐观写、远端确认与变更订阅三路写入缓存时共同遵守的纯函数规则：
//! - 回滚总是整体恢复某个 key 的完整集合，不做局部合并
//! - 占位 id 在确认后原位替换，不能残留在任何缓存值中
//! - 拉取结果只在"开始后没有发生本地写入、没有更晚的拉取已落地、没有进行中的变更"时生效
//! - 排序只按 position 推导，远端重新拉取的结果为准

use std::cmp::Ordering;

use crate::models::{List, ListMember, Todo};
use crate::mutation::PositionUpdate;

/// 有稳定 id 的缓存元素
pub trait Keyed {
    fn key_id(&self) -> &str;
}

/// 有显示顺序的缓存元素
pub trait Positioned: Keyed {
    fn position(&self) -> i64;
    fn set_position(&mut self, position: i64);
}

impl Keyed for List {
    fn key_id(&self) -> &str {
        &self.id
    }
}

impl Keyed for Todo {
    fn key_id(&self) -> &str {
        &self.id
    }
}

impl Keyed for ListMember {
    fn key_id(&self) -> &str {
        &self.id
    }
}

impl Positioned for List {
    fn position(&self) -> i64 {
        self.position
    }

    fn set_position(&mut self, position: i64) {
        self.position = position;
    }
}

impl Positioned for Todo {
    fn position(&self) -> i64 {
        self.position
    }

    fn set_position(&mut self, position: i64) {
        self.position = position;
    }
}

/// 用远端确认的行替换占位元素
///
/// 保持占位元素原来的下标；若确认行已经由并发拉取带入，则去掉占位元素避免重复；
/// 若占位元素已不在集合中（例如被并发拉取覆盖），追加确认行。
pub fn replace_placeholder<T: Keyed>(items: &mut Vec<T>, placeholder_id: &str, confirmed: T) {
    let confirmed_index = items.iter().position(|item| item.key_id() == confirmed.key_id());
    let placeholder_index = items.iter().position(|item| item.key_id() == placeholder_id);

    match (placeholder_index, confirmed_index) {
        (Some(index), None) => items[index] = confirmed,
        (Some(index), Some(existing)) => {
            items[existing] = confirmed;
            items.remove(index);
        }
        (None, Some(existing)) => items[existing] = confirmed,
        (None, None) => items.push(confirmed),
    }
}

/// 用确认值替换同 id 的元素；不存在时不追加（可能已被并发删除），返回是否替换
pub fn replace_by_id<T: Keyed>(items: &mut [T], item: T) -> bool {
    match items.iter().position(|existing| existing.key_id() == item.key_id()) {
        Some(index) => {
            items[index] = item;
            true
        }
        None => false,
    }
}

/// 按 id 删除，返回是否删除了元素
pub fn remove_by_id<T: Keyed>(items: &mut Vec<T>, id: &str) -> bool {
    let before = items.len();
    items.retain(|item| item.key_id() != id);
    items.len() != before
}

/// 应用一组 (id, position)，然后按 position 稳定排序
///
/// 未出现在更新中的元素保留原 position。
pub fn apply_positions<T: Positioned>(items: &mut [T], updates: &[PositionUpdate]) {
    for update in updates {
        if let Some(item) = items.iter_mut().find(|item| item.key_id() == update.id) {
            item.set_position(update.position);
        }
    }
    items.sort_by_key(|item| item.position());
}

/// 清单排序：position 升序，相同时新建的在前
pub fn sort_lists(lists: &mut [List]) {
    lists.sort_by(|a, b| match a.position.cmp(&b.position) {
        Ordering::Equal => b.created_at.cmp(&a.created_at),
        other => other,
    });
}

/// 待办排序：position 升序（稳定，允许乐观写期间的临时重复）
pub fn sort_todos(todos: &mut [Todo]) {
    todos.sort_by_key(|todo| todo.position);
}

/// 按完成状态拆分，返回 (未完成, 已完成)，各自保持原有顺序
pub fn split_by_completion(todos: &[Todo]) -> (Vec<Todo>, Vec<Todo>) {
    todos.iter().cloned().partition(|todo| !todo.is_complete)
}

/// 追加到末尾时使用的 position
pub fn next_position<T>(items: &[T]) -> i64 {
    items.len() as i64
}

/// 拉取结果落地时的判定输入
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchGuard {
    /// 拉取开始时条目的 epoch
    pub started_epoch: u64,
    /// 落地时条目的 epoch
    pub current_epoch: u64,
    /// 本次拉取序号
    pub seq: u64,
    /// 已落地的最大拉取序号
    pub applied_seq: u64,
    /// 进行中的变更数
    pub pending_mutations: usize,
}

/// 拉取结果是否可以写入缓存
pub fn should_apply_fetch(guard: &FetchGuard) -> bool {
    guard.started_epoch == guard.current_epoch
        && guard.seq > guard.applied_seq
        && guard.pending_mutations == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::now_utc;
    use chrono::Duration;

    fn todo(id: &str, position: i64) -> Todo {
        let mut todo = Todo::placeholder("L1", id, position, now_utc());
        todo.id = id.to_string();
        todo
    }

    fn ids(todos: &[Todo]) -> Vec<&str> {
        todos.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn placeholder_is_replaced_in_place() {
        let mut todos = vec![todo("T1", 0), todo("tmp", 1), todo("T2", 2)];
        replace_placeholder(&mut todos, "tmp", todo("T9", 1));
        assert_eq!(ids(&todos), vec!["T1", "T9", "T2"]);
    }

    #[test]
    fn placeholder_replacement_never_duplicates() {
        // 并发拉取已经带回了确认行
        let mut todos = vec![todo("tmp", 0), todo("T9", 0)];
        replace_placeholder(&mut todos, "tmp", todo("T9", 0));
        assert_eq!(ids(&todos), vec!["T9"]);

        let mut todos = vec![todo("T1", 0)];
        replace_placeholder(&mut todos, "tmp", todo("T9", 1));
        assert_eq!(ids(&todos), vec!["T1", "T9"]);
    }

    #[test]
    fn replace_and_remove() {
        let mut todos = vec![todo("T1", 0)];
        let mut renamed = todo("T1", 0);
        renamed.title = "Oat milk".into();
        assert!(replace_by_id(&mut todos, renamed));
        assert!(!replace_by_id(&mut todos, todo("T2", 1)));
        assert_eq!(todos.len(), 1);
        assert_eq!(todos[0].title, "Oat milk");

        assert!(remove_by_id(&mut todos, "T1"));
        assert!(!remove_by_id(&mut todos, "T1"));
    }

    #[test]
    fn apply_positions_resorts() {
        let mut todos = vec![todo("T1", 0), todo("T2", 1)];
        apply_positions(
            &mut todos,
            &[
                PositionUpdate::new("T2", 0),
                PositionUpdate::new("T1", 1),
            ],
        );
        assert_eq!(ids(&todos), vec!["T2", "T1"]);
        assert_eq!(todos[0].position, 0);
        assert_eq!(todos[1].position, 1);
    }

    #[test]
    fn lists_tie_break_on_newest_first() {
        let now = now_utc();
        let mut older = List::placeholder("A", "u1", 0, now - Duration::seconds(10));
        older.id = "A".into();
        let mut newer = List::placeholder("B", "u1", 0, now);
        newer.id = "B".into();
        let mut first = List::placeholder("C", "u1", -1, now - Duration::seconds(60));
        first.id = "C".into();

        let mut lists = vec![older, newer, first];
        sort_lists(&mut lists);
        let order: Vec<&str> = lists.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(order, vec!["C", "B", "A"]);
    }

    #[test]
    fn split_keeps_order() {
        let mut done = todo("T2", 1);
        done.is_complete = true;
        let (open, closed) = split_by_completion(&[todo("T1", 0), done, todo("T3", 2)]);
        assert_eq!(ids(&open), vec!["T1", "T3"]);
        assert_eq!(ids(&closed), vec!["T2"]);
    }

    #[test]
    fn fetch_guard_rules() {
        let fresh = FetchGuard {
            started_epoch: 3,
            current_epoch: 3,
            seq: 5,
            applied_seq: 4,
            pending_mutations: 0,
        };
        assert!(should_apply_fetch(&fresh));
        // 拉取开始后发生过本地写入
        assert!(!should_apply_fetch(&FetchGuard { current_epoch: 4, ..fresh }));
        // 更晚开始的拉取已落地
        assert!(!should_apply_fetch(&FetchGuard { applied_seq: 6, ..fresh }));
        // 仍有进行中的变更
        assert!(!should_apply_fetch(&FetchGuard { pending_mutations: 1, ..fresh }));
    }
}
