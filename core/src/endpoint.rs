//! Declarative registry of the users API endpoints.
//!
//! # Design
//! Each endpoint is either a query that *provides* cache tags or a mutation
//! that *invalidates* them; `EndpointKind` makes the two mutually exclusive.
//! `Query` and `Mutation` carry the endpoint's argument and deterministically
//! produce a `RequestDescriptor`, one variant per HTTP verb. Tags form a fixed
//! set known when the registry is defined; nothing is derived from responses.

use std::collections::HashSet;
use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::error::ApiError;
use crate::http::HttpMethod;
use crate::types::{NewUser, User, UserId};

/// Cache tag attached to query results and mutation invalidations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tag {
    User,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::User => f.write_str("User"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EndpointName {
    GetUsers,
    GetUserById,
    CreateUser,
    UpdateUser,
    DeleteUser,
}

impl EndpointName {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointName::GetUsers => "getUsers",
            EndpointName::GetUserById => "getUserById",
            EndpointName::CreateUser => "createUser",
            EndpointName::UpdateUser => "updateUser",
            EndpointName::DeleteUser => "deleteUser",
        }
    }

    pub fn definition(self) -> &'static EndpointDefinition {
        match self {
            EndpointName::GetUsers => &ENDPOINTS[0],
            EndpointName::GetUserById => &ENDPOINTS[1],
            EndpointName::CreateUser => &ENDPOINTS[2],
            EndpointName::UpdateUser => &ENDPOINTS[3],
            EndpointName::DeleteUser => &ENDPOINTS[4],
        }
    }
}

impl fmt::Display for EndpointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Query { provides: &'static [Tag] },
    Mutation { invalidates: &'static [Tag] },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDefinition {
    pub name: EndpointName,
    pub method: HttpMethod,
    pub kind: EndpointKind,
}

const USER_TAGS: &[Tag] = &[Tag::User];

/// The five operations on the `User` resource.
pub static ENDPOINTS: [EndpointDefinition; 5] = [
    EndpointDefinition {
        name: EndpointName::GetUsers,
        method: HttpMethod::Get,
        kind: EndpointKind::Query { provides: USER_TAGS },
    },
    EndpointDefinition {
        name: EndpointName::GetUserById,
        method: HttpMethod::Get,
        kind: EndpointKind::Query { provides: USER_TAGS },
    },
    EndpointDefinition {
        name: EndpointName::CreateUser,
        method: HttpMethod::Post,
        kind: EndpointKind::Mutation { invalidates: USER_TAGS },
    },
    EndpointDefinition {
        name: EndpointName::UpdateUser,
        method: HttpMethod::Put,
        kind: EndpointKind::Mutation { invalidates: USER_TAGS },
    },
    EndpointDefinition {
        name: EndpointName::DeleteUser,
        method: HttpMethod::Delete,
        kind: EndpointKind::Mutation { invalidates: USER_TAGS },
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("endpoint {0} is defined more than once")]
    Duplicate(EndpointName),

    #[error("mutation {mutation} does not invalidate tag {tag} provided by {query}")]
    MissingInvalidation {
        mutation: EndpointName,
        query: EndpointName,
        tag: Tag,
    },
}

/// Verify that every mutation invalidates every tag any query provides.
///
/// Without this, a reader of the collection would keep serving the
/// pre-mutation data until it is evicted.
pub fn check_registry(definitions: &[EndpointDefinition]) -> Result<(), RegistryError> {
    let mut seen = HashSet::new();
    for def in definitions {
        if !seen.insert(def.name) {
            return Err(RegistryError::Duplicate(def.name));
        }
    }

    for mutation in definitions {
        let EndpointKind::Mutation { invalidates } = mutation.kind else {
            continue;
        };
        for query in definitions {
            let EndpointKind::Query { provides } = query.kind else {
                continue;
            };
            if let Some(tag) = provides.iter().find(|t| !invalidates.contains(*t)) {
                return Err(RegistryError::MissingInvalidation {
                    mutation: mutation.name,
                    query: query.name,
                    tag: *tag,
                });
            }
        }
    }
    Ok(())
}

/// Method, relative path, and body for one operation call.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestDescriptor {
    Get { path: String },
    Post { path: String, body: Value },
    Put { path: String, body: Value },
    Delete { path: String },
}

impl RequestDescriptor {
    pub fn method(&self) -> HttpMethod {
        match self {
            RequestDescriptor::Get { .. } => HttpMethod::Get,
            RequestDescriptor::Post { .. } => HttpMethod::Post,
            RequestDescriptor::Put { .. } => HttpMethod::Put,
            RequestDescriptor::Delete { .. } => HttpMethod::Delete,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            RequestDescriptor::Get { path }
            | RequestDescriptor::Post { path, .. }
            | RequestDescriptor::Put { path, .. }
            | RequestDescriptor::Delete { path } => path,
        }
    }

    pub fn body(&self) -> Option<&Value> {
        match self {
            RequestDescriptor::Post { body, .. } | RequestDescriptor::Put { body, .. } => Some(body),
            RequestDescriptor::Get { .. } | RequestDescriptor::Delete { .. } => None,
        }
    }
}

/// Cache key: endpoint plus a fingerprint of its argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    pub endpoint: EndpointName,
    pub arg: String,
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.endpoint, self.arg)
    }
}

/// A read operation and its argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    GetUsers,
    GetUserById(UserId),
}

impl Query {
    pub fn endpoint(&self) -> EndpointName {
        match self {
            Query::GetUsers => EndpointName::GetUsers,
            Query::GetUserById(_) => EndpointName::GetUserById,
        }
    }

    pub fn key(&self) -> QueryKey {
        let arg = match self {
            Query::GetUsers => String::new(),
            Query::GetUserById(id) => id.to_string(),
        };
        QueryKey {
            endpoint: self.endpoint(),
            arg,
        }
    }

    pub fn provides(&self) -> &'static [Tag] {
        match self.endpoint().definition().kind {
            EndpointKind::Query { provides } => provides,
            EndpointKind::Mutation { .. } => &[],
        }
    }

    pub fn descriptor(&self) -> RequestDescriptor {
        match self {
            Query::GetUsers => RequestDescriptor::Get {
                path: "/users".to_string(),
            },
            Query::GetUserById(id) => RequestDescriptor::Get {
                path: format!("/users/{id}"),
            },
        }
    }
}

/// A write operation and its argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateUser(NewUser),
    /// Full replacement; the body carries the id as well.
    UpdateUser(User),
    DeleteUser(UserId),
}

impl Mutation {
    pub fn endpoint(&self) -> EndpointName {
        match self {
            Mutation::CreateUser(_) => EndpointName::CreateUser,
            Mutation::UpdateUser(_) => EndpointName::UpdateUser,
            Mutation::DeleteUser(_) => EndpointName::DeleteUser,
        }
    }

    pub fn invalidates(&self) -> &'static [Tag] {
        match self.endpoint().definition().kind {
            EndpointKind::Mutation { invalidates } => invalidates,
            EndpointKind::Query { .. } => &[],
        }
    }

    pub fn descriptor(&self) -> Result<RequestDescriptor, ApiError> {
        let descriptor = match self {
            Mutation::CreateUser(input) => RequestDescriptor::Post {
                path: "/users".to_string(),
                body: to_body(input)?,
            },
            Mutation::UpdateUser(user) => RequestDescriptor::Put {
                path: format!("/users/{}", user.id),
                body: to_body(user)?,
            },
            Mutation::DeleteUser(id) => RequestDescriptor::Delete {
                path: format!("/users/{id}"),
            },
        };
        Ok(descriptor)
    }
}

fn to_body<T: serde::Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError::SerializationError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_passes_invalidation_check() {
        assert_eq!(check_registry(&ENDPOINTS), Ok(()));
    }

    #[test]
    fn definitions_match_their_names() {
        for def in &ENDPOINTS {
            assert_eq!(def.name.definition(), def);
        }
    }

    #[test]
    fn mutation_missing_a_provided_tag_is_rejected() {
        let defs = [
            ENDPOINTS[0],
            EndpointDefinition {
                name: EndpointName::CreateUser,
                method: HttpMethod::Post,
                kind: EndpointKind::Mutation { invalidates: &[] },
            },
        ];
        assert_eq!(
            check_registry(&defs),
            Err(RegistryError::MissingInvalidation {
                mutation: EndpointName::CreateUser,
                query: EndpointName::GetUsers,
                tag: Tag::User,
            })
        );
    }

    #[test]
    fn duplicate_endpoint_is_rejected() {
        let defs = [ENDPOINTS[0], ENDPOINTS[0]];
        assert_eq!(check_registry(&defs), Err(RegistryError::Duplicate(EndpointName::GetUsers)));
    }

    #[test]
    fn get_user_by_id_resolves_path_parameter() {
        let descriptor = Query::GetUserById(UserId(7)).descriptor();
        assert_eq!(descriptor.method(), HttpMethod::Get);
        assert_eq!(descriptor.path(), "/users/7");
        assert!(descriptor.body().is_none());
    }

    #[test]
    fn update_targets_the_users_own_id_with_full_body() {
        let user = User {
            id: UserId(4),
            first_name: "Grace".to_string(),
            last_name: "Hopper".to_string(),
        };
        let descriptor = Mutation::UpdateUser(user).descriptor().unwrap();
        assert_eq!(descriptor.method(), HttpMethod::Put);
        assert_eq!(descriptor.path(), "/users/4");
        let body = descriptor.body().unwrap();
        assert_eq!(body["id"], 4);
        assert_eq!(body["firstName"], "Grace");
    }

    #[test]
    fn delete_has_no_body() {
        let descriptor = Mutation::DeleteUser(UserId(2)).descriptor().unwrap();
        assert_eq!(descriptor.method(), HttpMethod::Delete);
        assert_eq!(descriptor.path(), "/users/2");
        assert!(descriptor.body().is_none());
    }

    #[test]
    fn descriptor_method_agrees_with_definition() {
        let queries = [Query::GetUsers, Query::GetUserById(UserId(1))];
        for q in queries {
            assert_eq!(q.descriptor().method(), q.endpoint().definition().method);
        }
        let mutations = [
            Mutation::CreateUser(NewUser::new("a", "b")),
            Mutation::DeleteUser(UserId(1)),
        ];
        for m in mutations {
            assert_eq!(m.descriptor().unwrap().method(), m.endpoint().definition().method);
        }
    }

    #[test]
    fn query_keys_fingerprint_the_argument() {
        assert_eq!(Query::GetUsers.key().to_string(), "getUsers()");
        assert_eq!(Query::GetUserById(UserId(9)).key().to_string(), "getUserById(9)");
        assert_ne!(Query::GetUserById(UserId(1)).key(), Query::GetUserById(UserId(2)).key());
    }
}
