//! Query cache keyed by `(endpoint, argument)` with a tag reverse index.
//!
//! # Design
//! `QueryCache` performs no I/O and never spawns; it only decides. Callers
//! learn from its return values when a fetch must start (`subscribe`,
//! `complete`, `invalidate`) and run the fetch themselves. Each entry owns a
//! `watch` channel so subscribers observe state transitions without polling.
//!
//! Invariants:
//! - at most one request is in flight per key;
//! - `tag_index` contains a key iff the entry exists and its query provides
//!   that tag;
//! - entries with subscribers are never removed.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::client::QueryData;
use crate::endpoint::{Query, QueryKey, Tag};
use crate::error::ApiError;

/// Observable state of one cached query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryState {
    /// No request has been issued (or the subscription is skipped).
    Uninitialized,
    /// A request is in flight. `previous` keeps the last good data across
    /// refetches.
    Loading { previous: Option<QueryData> },
    Success(QueryData),
    Error(ApiError),
}

impl QueryState {
    pub fn data(&self) -> Option<&QueryData> {
        match self {
            QueryState::Success(data) => Some(data),
            QueryState::Loading { previous } => previous.as_ref(),
            QueryState::Uninitialized | QueryState::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ApiError> {
        match self {
            QueryState::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, QueryState::Loading { .. })
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, QueryState::Success(_) | QueryState::Error(_))
    }
}

#[derive(Debug)]
struct CacheEntry {
    query: Query,
    state: watch::Sender<QueryState>,
    subscribers: usize,
    in_flight: bool,
    /// Set when the entry was invalidated while a request was in flight; the
    /// result of that request is stale on arrival.
    invalidated: bool,
    idle_since: Option<Instant>,
}

impl CacheEntry {
    fn begin_fetch(&mut self) {
        let previous = self.state.borrow().data().cloned();
        self.in_flight = true;
        self.state.send_replace(QueryState::Loading { previous });
    }
}

/// What the fetcher must do after `QueryCache::complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Done,
    /// The entry lost its last subscriber while the request was in flight;
    /// any eviction timer started on release has already given up on it, so
    /// a new one must be scheduled.
    Idle,
    /// The entry was invalidated during the flight and is `Loading` again.
    Refetch,
}

/// Outcome of `QueryCache::subscribe`.
#[derive(Debug)]
pub struct Subscribed {
    pub receiver: watch::Receiver<QueryState>,
    /// The caller must fetch the query; the entry is already `Loading`.
    pub start_fetch: bool,
}

#[derive(Debug, Default)]
pub struct QueryCache {
    entries: HashMap<QueryKey, CacheEntry>,
    tag_index: HashMap<Tag, HashSet<QueryKey>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber, creating the entry on first use.
    ///
    /// A fetch starts when nothing is in flight and the entry holds no
    /// result yet or holds an error from a previous attempt.
    pub fn subscribe(&mut self, query: &Query) -> Subscribed {
        let key = query.key();
        let tag_index = &mut self.tag_index;
        let entry = self.entries.entry(key.clone()).or_insert_with(|| {
            for tag in query.provides() {
                tag_index.entry(*tag).or_default().insert(key.clone());
            }
            let (state, _) = watch::channel(QueryState::Uninitialized);
            CacheEntry {
                query: query.clone(),
                state,
                subscribers: 0,
                in_flight: false,
                invalidated: false,
                idle_since: None,
            }
        });
        entry.subscribers += 1;
        entry.idle_since = None;

        let needs_data = matches!(*entry.state.borrow(), QueryState::Uninitialized | QueryState::Error(_));
        let start_fetch = !entry.in_flight && needs_data;
        if start_fetch {
            entry.begin_fetch();
        }
        Subscribed {
            receiver: entry.state.subscribe(),
            start_fetch,
        }
    }

    /// Publish the result of a fetch and tell the caller what to do next.
    pub fn complete(&mut self, key: &QueryKey, result: Result<QueryData, ApiError>) -> Completion {
        let Some(entry) = self.entries.get_mut(key) else {
            return Completion::Done;
        };
        entry.in_flight = false;

        if entry.invalidated {
            entry.invalidated = false;
            if entry.subscribers == 0 {
                self.remove(key);
                return Completion::Done;
            }
            let previous = match result {
                Ok(data) => Some(data),
                Err(_) => entry.state.borrow().data().cloned(),
            };
            entry.in_flight = true;
            entry.state.send_replace(QueryState::Loading { previous });
            return Completion::Refetch;
        }

        let state = match result {
            Ok(data) => QueryState::Success(data),
            Err(e) => QueryState::Error(e),
        };
        entry.state.send_replace(state);
        if entry.subscribers == 0 {
            Completion::Idle
        } else {
            Completion::Done
        }
    }

    /// Invalidate every entry providing any of `tags`. Subscribed entries go
    /// back to `Loading` and are returned for refetch; unsubscribed entries
    /// are dropped.
    pub fn invalidate(&mut self, tags: &[Tag]) -> Vec<Query> {
        let keys: BTreeSet<QueryKey> = tags
            .iter()
            .filter_map(|tag| self.tag_index.get(tag))
            .flatten()
            .cloned()
            .collect();

        let mut refetch = Vec::new();
        for key in keys {
            let Some(entry) = self.entries.get_mut(&key) else {
                continue;
            };
            if entry.subscribers == 0 {
                self.remove(&key);
            } else if entry.in_flight {
                entry.invalidated = true;
            } else {
                entry.begin_fetch();
                refetch.push(entry.query.clone());
            }
        }
        refetch
    }

    pub fn release(&mut self, key: &QueryKey, now: Instant) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.subscribers = entry.subscribers.saturating_sub(1);
            if entry.subscribers == 0 {
                entry.idle_since = Some(now);
            }
        }
    }

    /// Drop entries that have had no subscribers for at least
    /// `keep_unused_for`. Returns the number of entries removed.
    pub fn evict_idle(&mut self, now: Instant, keep_unused_for: Duration) -> usize {
        let expired: Vec<QueryKey> = self
            .entries
            .iter()
            .filter(|(_, e)| {
                e.subscribers == 0
                    && !e.in_flight
                    && e.idle_since.is_some_and(|since| now.duration_since(since) >= keep_unused_for)
            })
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    pub fn state(&self, key: &QueryKey) -> Option<QueryState> {
        self.entries.get(key).map(|e| e.state.borrow().clone())
    }

    pub fn subscribers(&self, key: &QueryKey) -> usize {
        self.entries.get(key).map_or(0, |e| e.subscribers)
    }

    pub fn is_in_flight(&self, key: &QueryKey) -> bool {
        self.entries.get(key).is_some_and(|e| e.in_flight)
    }

    /// Keys currently indexed under `tag`, sorted.
    pub fn keys_for_tag(&self, tag: Tag) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = self.tag_index.get(&tag).into_iter().flatten().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove(&mut self, key: &QueryKey) {
        let Some(entry) = self.entries.remove(key) else {
            return;
        };
        for tag in entry.query.provides() {
            if let Some(keys) = self.tag_index.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }
    }
}
