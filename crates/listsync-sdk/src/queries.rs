//! 每个 QueryKey 如何从远端加载

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::debug;

use crate::cache::{CachedValue, QueryFetcher, QueryKey};
use crate::error::{ListSyncError, Result};
use crate::models::{CollaboratorRow, List, ListMember, MemberRole, Profile, Todo};
use crate::reconciler::{sort_lists, sort_todos};
use crate::remote::{from_row, from_rows, Filter, IdentityProvider, RemoteStore, Table};

/// 基于 [`RemoteStore`] 的查询实现
pub struct RemoteQueryFetcher {
    remote: Arc<dyn RemoteStore>,
    identity: Arc<dyn IdentityProvider>,
}

impl RemoteQueryFetcher {
    pub fn new(remote: Arc<dyn RemoteStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { remote, identity }
    }

    /// 可见清单：position 升序，相同时新建的在前
    async fn fetch_lists(&self) -> Result<Vec<List>> {
        let rows = self.remote.select(Table::Lists, &Filter::all()).await?;
        let mut lists: Vec<List> = from_rows(rows)?;
        sort_lists(&mut lists);
        Ok(lists)
    }

    async fn fetch_list(&self, list_id: &str) -> Result<List> {
        let rows = self.remote.select(Table::Lists, &Filter::eq("id", list_id)).await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| ListSyncError::NotFound(format!("list {}", list_id)))?;
        from_row(row)
    }

    async fn fetch_todos(&self, list_id: &str) -> Result<Vec<Todo>> {
        let rows = self.remote.select(Table::Todos, &Filter::eq("list_id", list_id)).await?;
        let mut todos: Vec<Todo> = from_rows(rows)?;
        sort_todos(&mut todos);
        Ok(todos)
    }

    async fn fetch_profile_by_id(&self, user_id: &str) -> Result<Option<Profile>> {
        let rows = self.remote.select(Table::Profiles, &Filter::eq("id", user_id)).await?;
        rows.into_iter().next().map(from_row).transpose()
    }

    /// 成员：owner 在前，然后是协作者；缺少资料的行跳过
    async fn fetch_members(&self, list_id: &str) -> Result<Vec<ListMember>> {
        let list = self.fetch_list(list_id).await?;
        let rows = self
            .remote
            .select(Table::ListCollaborators, &Filter::eq("list_id", list_id))
            .await?;
        let collaborators: Vec<CollaboratorRow> = from_rows(rows)?;

        let mut user_ids = vec![(list.owner_id.clone(), MemberRole::Owner)];
        user_ids.extend(
            collaborators
                .into_iter()
                .map(|row| (row.user_id, MemberRole::Collaborator)),
        );

        let profiles = join_all(
            user_ids
                .iter()
                .map(|(user_id, _)| self.fetch_profile_by_id(user_id)),
        )
        .await;

        let mut members = Vec::with_capacity(user_ids.len());
        for ((user_id, role), profile) in user_ids.into_iter().zip(profiles) {
            match profile? {
                Some(profile) => members.push(ListMember::from_profile(profile, role)),
                None => debug!("no profile for member {} of list {}", user_id, list_id),
            }
        }
        Ok(members)
    }

    async fn fetch_own_profile(&self) -> Result<Option<Profile>> {
        match self.identity.current_user_id().await {
            Some(user_id) => self.fetch_profile_by_id(&user_id).await,
            None => Ok(None),
        }
    }
}

#[async_trait]
impl QueryFetcher for RemoteQueryFetcher {
    async fn fetch(&self, key: &QueryKey) -> Result<CachedValue> {
        match key {
            QueryKey::Lists => self.fetch_lists().await.map(CachedValue::Lists),
            QueryKey::List(list_id) => self.fetch_list(list_id).await.map(CachedValue::List),
            QueryKey::Todos(list_id) => self.fetch_todos(list_id).await.map(CachedValue::Todos),
            QueryKey::Collaborators(list_id) => {
                self.fetch_members(list_id).await.map(CachedValue::Collaborators)
            }
            QueryKey::Profile => self.fetch_own_profile().await.map(CachedValue::Profile),
        }
    }
}
