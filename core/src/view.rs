//! View model for the users table: the list plus an optional selected user.

use crate::api::{QueryOptions, Subscription, UsersApi};
use crate::cache::QueryState;
use crate::endpoint::Query;
use crate::http::Transport;
use crate::types::{User, UserId};

/// What the table should show right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableView {
    Loading,
    Failed(String),
    Rows(Vec<User>),
}

fn subscribe_selected<T: Transport>(api: &UsersApi<T>, id: Option<UserId>) -> Subscription {
    let options = QueryOptions { skip: id.is_none() };
    api.subscribe_with(Query::GetUserById(id.unwrap_or_default()), options)
}

pub struct UsersTable<T> {
    api: UsersApi<T>,
    list: Subscription,
    selected: Subscription,
}

impl<T: Transport> UsersTable<T> {
    pub fn new(api: UsersApi<T>) -> Self {
        let list = api.subscribe(Query::GetUsers);
        let selected = subscribe_selected(&api, None);
        Self { api, list, selected }
    }

    /// Select a user to load by id; `None` skips the request entirely.
    pub fn select(&mut self, id: Option<UserId>) {
        self.selected = subscribe_selected(&self.api, id);
    }

    /// Rows keep showing during a background refetch; `Loading` is only for
    /// the first load.
    pub fn rows(&self) -> TableView {
        match self.list.state() {
            QueryState::Error(e) => TableView::Failed(e.to_string()),
            state => match state.data().and_then(|d| d.as_users()) {
                Some(users) => TableView::Rows(users.to_vec()),
                None => TableView::Loading,
            },
        }
    }

    pub fn list_state(&self) -> QueryState {
        self.list.state()
    }

    pub fn selected_state(&self) -> QueryState {
        self.selected.state()
    }

    pub fn selected_user(&self) -> Option<User> {
        self.selected.state().data().and_then(|d| d.as_user()).cloned()
    }

    /// Wait for the list to change state.
    pub async fn changed(&mut self) -> bool {
        self.list.changed().await
    }

    /// Wait until the list holds data or an error.
    pub async fn settled(&mut self) -> TableView {
        self.list.settled().await;
        self.rows()
    }

    pub async fn selected_settled(&mut self) -> QueryState {
        self.selected.settled().await
    }
}
