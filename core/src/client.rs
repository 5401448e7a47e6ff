//! Stateless HTTP request builder and response parser for the users API.
//!
//! # Design
//! `UsersClient` holds only a `base_url` and an injected credential provider
//! and carries no mutable state between calls. Requests are built from the
//! registry's `RequestDescriptor`s; responses are parsed per endpoint. The
//! caller (usually `UsersApi`) executes the HTTP round-trip in between.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::auth::{CredentialProvider, NoCredentials};
use crate::endpoint::{Mutation, Query, RequestDescriptor};
use crate::error::ApiError;
use crate::http::{HttpRequest, HttpResponse};
use crate::types::{User, UserId};

/// Parsed result of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryData {
    Users(Vec<User>),
    User(User),
}

impl QueryData {
    pub fn as_users(&self) -> Option<&[User]> {
        match self {
            QueryData::Users(users) => Some(users),
            QueryData::User(_) => None,
        }
    }

    pub fn as_user(&self) -> Option<&User> {
        match self {
            QueryData::User(user) => Some(user),
            QueryData::Users(_) => None,
        }
    }
}

/// Parsed result of a successful mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutput {
    Created(User),
    Updated(User),
    Deleted(UserId),
}

/// Synchronous, stateless client for the users API.
#[derive(Clone)]
pub struct UsersClient {
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl fmt::Debug for UsersClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsersClient").field("base_url", &self.base_url).finish_non_exhaustive()
    }
}

impl UsersClient {
    /// Client that never sends an `authorization` header.
    pub fn new(base_url: &str) -> Self {
        Self::with_credentials(base_url, Arc::new(NoCredentials))
    }

    pub fn with_credentials(base_url: &str, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn build(&self, descriptor: &RequestDescriptor) -> Result<HttpRequest, ApiError> {
        let mut headers = Vec::new();
        let body = match descriptor.body() {
            Some(value) => {
                let body = serde_json::to_string(value).map_err(|e| ApiError::SerializationError(e.to_string()))?;
                headers.push(("content-type".to_string(), "application/json".to_string()));
                Some(body)
            }
            None => None,
        };
        if let Some(token) = self.credentials.token() {
            headers.push(("authorization".to_string(), format!("Bearer {token}")));
        }
        Ok(HttpRequest {
            method: descriptor.method(),
            path: format!("{}{}", self.base_url, descriptor.path()),
            headers,
            body,
        })
    }

    pub fn build_query(&self, query: &Query) -> Result<HttpRequest, ApiError> {
        self.build(&query.descriptor())
    }

    pub fn build_mutation(&self, mutation: &Mutation) -> Result<HttpRequest, ApiError> {
        self.build(&mutation.descriptor()?)
    }

    pub fn parse_query(&self, query: &Query, response: HttpResponse) -> Result<QueryData, ApiError> {
        check_status(&response, &[200])?;
        match query {
            Query::GetUsers => decode(&response).map(QueryData::Users),
            Query::GetUserById(_) => decode(&response).map(QueryData::User),
        }
    }

    pub fn parse_mutation(&self, mutation: &Mutation, response: HttpResponse) -> Result<MutationOutput, ApiError> {
        match mutation {
            Mutation::CreateUser(_) => {
                check_status(&response, &[201, 200])?;
                decode(&response).map(MutationOutput::Created)
            }
            Mutation::UpdateUser(_) => {
                check_status(&response, &[200])?;
                decode(&response).map(MutationOutput::Updated)
            }
            Mutation::DeleteUser(id) => {
                check_status(&response, &[204, 200])?;
                Ok(MutationOutput::Deleted(*id))
            }
        }
    }
}

fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, ApiError> {
    serde_json::from_str(&response.body).map_err(|e| ApiError::DeserializationError(e.to_string()))
}

/// Map non-success status codes to the appropriate `ApiError` variant.
fn check_status(response: &HttpResponse, expected: &[u16]) -> Result<(), ApiError> {
    if expected.contains(&response.status) {
        return Ok(());
    }
    if response.status == 404 {
        return Err(ApiError::NotFound);
    }
    Err(ApiError::HttpError {
        status: response.status,
        body: response.body.clone(),
    })
}
