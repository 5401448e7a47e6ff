//! Client core for the users service: endpoint registry, request building,
//! and a tag-invalidated query cache.
//!
//! # Overview
//! The five user endpoints are declared once in `endpoint`. `UsersClient`
//! turns their descriptors into `HttpRequest`s and parses `HttpResponse`s
//! without touching the network. `UsersApi` wraps client + `Transport` with
//! a `QueryCache`: concurrent reads of the same key share one request, and
//! successful mutations invalidate cached reads by tag so subscribers
//! refetch automatically.
//!
//! # Design
//! - The cache is a plain key-value store with a tag reverse index; it makes
//!   decisions, the engine performs I/O.
//! - Credentials are injected through `CredentialProvider`; nothing reads
//!   global state.
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod api;
pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod form;
pub mod http;
pub mod types;
pub mod view;

pub use api::{CacheConfig, QueryOptions, Subscription, UsersApi};
pub use auth::{CredentialProvider, NoCredentials, StaticToken, TokenFile};
pub use cache::{QueryCache, QueryState};
pub use client::{MutationOutput, QueryData, UsersClient};
pub use config::ApiConfig;
pub use endpoint::{check_registry, Mutation, Query, QueryKey, RequestDescriptor, Tag, ENDPOINTS};
pub use error::{ApiError, ConfigError};
pub use form::{CreateUserForm, Field, FieldError, Schema, SubmitOutcome, SubmitStatus};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport, UreqTransport};
pub use types::{NewUser, User, UserId};
pub use view::{TableView, UsersTable};
