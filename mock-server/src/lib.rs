use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use axum::{
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    sync::{Mutex, RwLock},
};
use tracing::{debug, info};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: u64,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    pub first_name: String,
    pub last_name: String,
}

/// Full replacement payload for `PUT /users/{id}`. The `id` in the body is
/// accepted but the path id always wins.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceUser {
    #[serde(default)]
    pub id: Option<u64>,
    pub first_name: String,
    pub last_name: String,
}

/// One request as seen by the server, recorded before routing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestRecord {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
}

/// Shared server state: the user table plus a request log tests can inspect.
#[derive(Debug, Default)]
pub struct AppState {
    users: RwLock<BTreeMap<u64, User>>,
    next_id: AtomicU64,
    log: Mutex<Vec<RequestRecord>>,
    token: Option<String>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `Authorization: Bearer <token>` on every request.
    pub fn with_token(token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            ..Self::default()
        }
    }

    pub async fn requests(&self) -> Vec<RequestRecord> {
        self.log.lock().await.clone()
    }

    /// Number of recorded requests matching `method` and `path` exactly.
    pub async fn count(&self, method: &str, path: &str) -> usize {
        self.log
            .lock()
            .await
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    pub async fn users(&self) -> Vec<User> {
        self.users.read().await.values().cloned().collect()
    }
}

pub type SharedState = Arc<AppState>;

pub fn app() -> Router {
    app_with_state(Arc::new(AppState::new()))
}

pub fn app_with_state(state: SharedState) -> Router {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/{id}", get(get_user).put(update_user).delete(delete_user))
        .layer(middleware::from_fn_with_state(state.clone(), record_and_authorize))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

pub async fn run_with_state(listener: TcpListener, state: SharedState) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, auth = state.token.is_some(), "serving users API");
    }
    axum::serve(listener, app_with_state(state)).await
}

async fn record_and_authorize(State(state): State<SharedState>, request: Request, next: Next) -> Response {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let record = RequestRecord {
        method: request.method().as_str().to_string(),
        path: request.uri().path().to_string(),
        authorization,
    };
    debug!(method = %record.method, path = %record.path, "request");

    let authorized = match &state.token {
        None => true,
        Some(token) => record.authorization.as_deref() == Some(format!("Bearer {token}").as_str()),
    };
    state.log.lock().await.push(record);

    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    next.run(request).await
}

fn blank_name_error(first_name: &str, last_name: &str) -> Option<Response> {
    if first_name.trim().is_empty() || last_name.trim().is_empty() {
        let body = serde_json::json!({ "error": "firstName and lastName are required" });
        return Some((StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response());
    }
    None
}

async fn list_users(State(state): State<SharedState>) -> Json<Vec<User>> {
    Json(state.users().await)
}

async fn create_user(State(state): State<SharedState>, Json(input): Json<CreateUser>) -> Response {
    if let Some(rejection) = blank_name_error(&input.first_name, &input.last_name) {
        return rejection;
    }
    let user = User {
        id: state.next_id.fetch_add(1, Ordering::SeqCst) + 1,
        first_name: input.first_name,
        last_name: input.last_name,
    };
    state.users.write().await.insert(user.id, user.clone());
    (StatusCode::CREATED, Json(user)).into_response()
}

async fn get_user(State(state): State<SharedState>, Path(id): Path<u64>) -> Result<Json<User>, StatusCode> {
    let users = state.users.read().await;
    users.get(&id).cloned().map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn update_user(
    State(state): State<SharedState>,
    Path(id): Path<u64>,
    Json(input): Json<ReplaceUser>,
) -> Response {
    if let Some(rejection) = blank_name_error(&input.first_name, &input.last_name) {
        return rejection;
    }
    if input.id.is_some_and(|body_id| body_id != id) {
        debug!(path_id = id, body_id = ?input.id, "body id ignored");
    }
    let mut users = state.users.write().await;
    let Some(user) = users.get_mut(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    user.first_name = input.first_name;
    user.last_name = input.last_name;
    Json(user.clone()).into_response()
}

async fn delete_user(State(state): State<SharedState>, Path(id): Path<u64>) -> StatusCode {
    let mut users = state.users.write().await;
    users.remove(&id).map(|_| StatusCode::NO_CONTENT).unwrap_or(StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_serializes_camel_case() {
        let user = User {
            id: 7,
            first_name: "John".to_string(),
            last_name: "Doe".to_string(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["firstName"], "John");
        assert_eq!(json["lastName"], "Doe");
    }

    #[test]
    fn create_user_rejects_missing_last_name() {
        let result: Result<CreateUser, _> = serde_json::from_str(r#"{"firstName":"John"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn replace_user_id_is_optional() {
        let input: ReplaceUser = serde_json::from_str(r#"{"firstName":"A","lastName":"B"}"#).unwrap();
        assert!(input.id.is_none());
        assert_eq!(input.first_name, "A");
    }

    #[test]
    fn blank_names_are_rejected() {
        assert!(blank_name_error("  ", "Doe").is_some());
        assert!(blank_name_error("John", "").is_some());
        assert!(blank_name_error("John", "Doe").is_none());
    }

    #[tokio::test]
    async fn count_filters_by_method_and_path() {
        let state = AppState::new();
        state.log.lock().await.push(RequestRecord {
            method: "GET".to_string(),
            path: "/users".to_string(),
            authorization: None,
        });
        state.log.lock().await.push(RequestRecord {
            method: "POST".to_string(),
            path: "/users".to_string(),
            authorization: None,
        });
        assert_eq!(state.count("GET", "/users").await, 1);
        assert_eq!(state.count("DELETE", "/users").await, 0);
    }
}
