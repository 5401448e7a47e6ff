//! In-process transport that drives the mock-server router directly.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use http_body_util::BodyExt;
use mock_server::{app_with_state, AppState};
use tower::ServiceExt;
use users_core::{ApiError, CacheConfig, HttpRequest, HttpResponse, Transport, UsersApi, UsersClient};

pub const BASE_URL: &str = "http://localhost:3001";

pub struct RouterTransport {
    router: Router,
}

impl RouterTransport {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            router: app_with_state(state),
        }
    }
}

#[async_trait]
impl Transport for RouterTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let mut builder = axum::http::Request::builder()
            .method(request.method.as_str())
            .uri(request.path.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let req = builder
            .body(request.body.unwrap_or_default())
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let response = self
            .router
            .clone()
            .oneshot(req)
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?
            .to_bytes();

        Ok(HttpResponse {
            status,
            headers: Vec::new(),
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

/// Fresh server state plus an API wired to it.
pub fn setup() -> (Arc<AppState>, UsersApi<RouterTransport>) {
    let state = Arc::new(AppState::new());
    let api = api_for(state.clone(), UsersClient::new(BASE_URL));
    (state, api)
}

pub fn api_for(state: Arc<AppState>, client: UsersClient) -> UsersApi<RouterTransport> {
    UsersApi::new(client, RouterTransport::new(state), CacheConfig::default())
}
