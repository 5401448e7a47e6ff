//! Cache-aware fetch engine over the users endpoints.
//!
//! # Design
//! `UsersApi` glues a `UsersClient`, a `Transport`, and a shared
//! `QueryCache`. The cache decides when to fetch; the engine spawns the
//! fetch on the current tokio runtime and feeds the result back. The cache
//! lock is only taken for short synchronous sections, never across an await.
//!
//! Subscribers hold a `Subscription`. Dropping it releases the entry, which
//! is evicted once it has stayed unsubscribed for `keep_unused_for`. A fetch
//! that settles an entry nobody holds any more starts a fresh grace period.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::cache::{Completion, QueryCache, QueryState};
use crate::client::{MutationOutput, QueryData, UsersClient};
use crate::config::ApiConfig;
use crate::endpoint::{Mutation, Query, QueryKey, Tag};
use crate::error::ApiError;
use crate::http::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub keep_unused_for: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            keep_unused_for: Duration::from_secs(crate::config::DEFAULT_KEEP_UNUSED_FOR_SECS),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Stay `Uninitialized` without issuing a request.
    pub skip: bool,
}

type SharedCache = Arc<Mutex<QueryCache>>;

fn lock(cache: &Mutex<QueryCache>) -> MutexGuard<'_, QueryCache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sweep idle entries once `keep_unused_for` has elapsed. No-op outside a
/// tokio runtime.
fn schedule_eviction(cache: &SharedCache, keep_unused_for: Duration) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };
    let cache = Arc::clone(cache);
    handle.spawn(async move {
        tokio::time::sleep(keep_unused_for).await;
        let evicted = lock(&cache).evict_idle(Instant::now(), keep_unused_for);
        if evicted > 0 {
            debug!(evicted, "evicted idle cache entries");
        }
    });
}

struct Inner<T> {
    client: UsersClient,
    transport: T,
    cache: SharedCache,
    config: CacheConfig,
}

impl<T: Transport> Inner<T> {
    async fn run_query(self: Arc<Self>, query: Query) {
        let key = query.key();
        loop {
            debug!(%key, "fetching");
            let result = self.fetch(&query).await;
            if let Err(e) = &result {
                debug!(%key, error = %e, "fetch failed");
            }
            let next = lock(&self.cache).complete(&key, result);
            match next {
                Completion::Done => break,
                Completion::Idle => {
                    schedule_eviction(&self.cache, self.config.keep_unused_for);
                    break;
                }
                Completion::Refetch => debug!(%key, "invalidated during flight, fetching again"),
            }
        }
    }

    async fn fetch(&self, query: &Query) -> Result<QueryData, ApiError> {
        let request = self.client.build_query(query)?;
        let response = self.transport.execute(request).await?;
        self.client.parse_query(query, response)
    }
}

/// Query/mutation front-end with request coalescing and tag invalidation.
///
/// Must be used from within a tokio runtime: subscribing and invalidating
/// spawn fetch tasks.
pub struct UsersApi<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for UsersApi<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> UsersApi<T> {
    pub fn new(client: UsersClient, transport: T, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                transport,
                cache: Arc::new(Mutex::new(QueryCache::new())),
                config,
            }),
        }
    }

    pub fn from_config(config: &ApiConfig, transport: T) -> Self {
        let client = UsersClient::with_credentials(&config.base_url, config.credentials());
        let cache = CacheConfig {
            keep_unused_for: config.keep_unused_for(),
        };
        Self::new(client, transport, cache)
    }

    pub fn client(&self) -> &UsersClient {
        &self.inner.client
    }

    pub fn subscribe(&self, query: Query) -> Subscription {
        self.subscribe_with(query, QueryOptions::default())
    }

    pub fn subscribe_with(&self, query: Query, options: QueryOptions) -> Subscription {
        if options.skip {
            return Subscription::skipped();
        }
        let subscribed = lock(&self.inner.cache).subscribe(&query);
        let key = query.key();
        if subscribed.start_fetch {
            self.spawn_fetch(query);
        } else {
            debug!(%key, "joined existing entry");
        }
        Subscription {
            receiver: subscribed.receiver,
            lease: Some(Lease {
                key,
                cache: Arc::clone(&self.inner.cache),
                keep_unused_for: self.inner.config.keep_unused_for,
            }),
        }
    }

    /// Fetch once, sharing any request already in flight for the same key.
    pub async fn query(&self, query: Query) -> Result<QueryData, ApiError> {
        let mut subscription = self.subscribe(query);
        // The subscription's lease keeps the entry, and so the sender, alive;
        // entries with subscribers are never removed, so `settled` can only
        // end on `Success` or `Error` here.
        match subscription.settled().await {
            QueryState::Success(data) => Ok(data),
            QueryState::Error(e) => Err(e),
            state => Err(ApiError::Transport(format!("query ended unsettled: {state:?}"))),
        }
    }

    /// Run a mutation; on success invalidate the tags it declares.
    pub async fn mutate(&self, mutation: Mutation) -> Result<MutationOutput, ApiError> {
        let endpoint = mutation.endpoint();
        let request = self.inner.client.build_mutation(&mutation)?;
        debug!(%endpoint, "executing mutation");
        let response = self.inner.transport.execute(request).await?;
        let output = self.inner.client.parse_mutation(&mutation, response)?;
        self.invalidate(mutation.invalidates());
        Ok(output)
    }

    pub fn invalidate(&self, tags: &[Tag]) {
        let refetch = lock(&self.inner.cache).invalidate(tags);
        debug!(?tags, refetching = refetch.len(), "invalidated");
        for query in refetch {
            self.spawn_fetch(query);
        }
    }

    pub fn cached_entries(&self) -> usize {
        lock(&self.inner.cache).len()
    }

    pub fn cached_state(&self, query: &Query) -> Option<QueryState> {
        lock(&self.inner.cache).state(&query.key())
    }

    pub fn subscriber_count(&self, query: &Query) -> usize {
        lock(&self.inner.cache).subscribers(&query.key())
    }

    fn spawn_fetch(&self, query: Query) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.run_query(query));
    }
}

struct Lease {
    key: QueryKey,
    cache: SharedCache,
    keep_unused_for: Duration,
}

impl Drop for Lease {
    fn drop(&mut self) {
        lock(&self.cache).release(&self.key, Instant::now());
        schedule_eviction(&self.cache, self.keep_unused_for);
    }
}

/// A live view of one cached query.
pub struct Subscription {
    receiver: watch::Receiver<QueryState>,
    lease: Option<Lease>,
}

impl Subscription {
    fn skipped() -> Self {
        let (_, receiver) = watch::channel(QueryState::Uninitialized);
        Self { receiver, lease: None }
    }

    pub fn is_skipped(&self) -> bool {
        self.lease.is_none()
    }

    pub fn state(&self) -> QueryState {
        self.receiver.borrow().clone()
    }

    /// Wait for the next state change. Returns `false` if no change can
    /// ever arrive (skipped subscription).
    pub async fn changed(&mut self) -> bool {
        self.receiver.changed().await.is_ok()
    }

    /// Wait until the query holds data or an error. A skipped subscription
    /// returns `Uninitialized` immediately.
    pub async fn settled(&mut self) -> QueryState {
        loop {
            {
                let state = self.receiver.borrow_and_update();
                if state.is_settled() {
                    return state.clone();
                }
            }
            if self.lease.is_none() || self.receiver.changed().await.is_err() {
                return self.state();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::http::{HttpRequest, HttpResponse};
    use crate::types::{NewUser, UserId};

    /// Answers every request with a fixed response and counts calls.
    struct Canned {
        status: u16,
        body: &'static str,
        calls: AtomicUsize,
    }

    impl Canned {
        fn new(status: u16, body: &'static str) -> Self {
            Self {
                status,
                body,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for Canned {
        async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HttpResponse {
                status: self.status,
                headers: Vec::new(),
                body: self.body.to_string(),
            })
        }
    }

    /// Takes 90 seconds to answer with an empty list.
    struct Slow;

    #[async_trait]
    impl Transport for Slow {
        async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse, ApiError> {
            tokio::time::sleep(Duration::from_secs(90)).await;
            Ok(HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: "[]".to_string(),
            })
        }
    }

    fn api<T: Transport>(transport: T) -> UsersApi<T> {
        UsersApi::new(UsersClient::new("http://localhost:3001/"), transport, CacheConfig::default())
    }

    #[test]
    fn client_is_built_from_base_url() {
        let api = api(Canned::new(200, "[]"));
        assert_eq!(api.client().base_url(), "http://localhost:3001");
    }

    #[tokio::test]
    async fn skipped_subscription_never_fetches() {
        let api = api(Canned::new(200, "[]"));
        let mut sub = api.subscribe_with(Query::GetUserById(UserId(1)), QueryOptions { skip: true });

        assert!(sub.is_skipped());
        assert_eq!(sub.settled().await, QueryState::Uninitialized);
        assert!(!sub.changed().await);
        assert_eq!(api.cached_entries(), 0);
        assert_eq!(api.inner.transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn http_error_settles_as_error_state() {
        let api = api(Canned::new(500, "down"));
        let err = api.query(Query::GetUsers).await.unwrap_err();
        assert_eq!(
            err,
            ApiError::HttpError {
                status: 500,
                body: "down".to_string()
            }
        );
        assert!(api.cached_state(&Query::GetUsers).unwrap().error().is_some());
    }

    #[tokio::test]
    async fn failed_mutation_invalidates_nothing() {
        let api = api(Canned::new(200, "[]"));
        let mut sub = api.subscribe(Query::GetUsers);
        sub.settled().await;

        let err = api
            .mutate(Mutation::CreateUser(NewUser::new("a", "b")))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::DeserializationError(_)));
        assert!(api.cached_state(&Query::GetUsers).unwrap().is_settled());
        assert_eq!(api.inner.transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dropping_subscription_releases_it() {
        let api = api(Canned::new(200, "[]"));
        let sub = api.subscribe(Query::GetUsers);
        assert_eq!(api.subscriber_count(&Query::GetUsers), 1);
        drop(sub);
        assert_eq!(api.subscriber_count(&Query::GetUsers), 0);
        assert_eq!(api.cached_entries(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entry_released_during_fetch_is_evicted_after_it_settles() {
        let api = api(Slow);
        drop(api.subscribe(Query::GetUsers));
        assert_eq!(api.cached_entries(), 1);

        // The release timer fires at 60s while the fetch is still running.
        tokio::time::sleep(Duration::from_secs(75)).await;
        assert_eq!(api.cached_entries(), 1);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(api.cached_entries(), 0);
    }
}
