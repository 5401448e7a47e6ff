//! Domain DTOs for the users API.
//!
//! # Design
//! These types mirror the mock-server's schema but are defined independently;
//! integration tests catch any drift between the two crates. JSON field names
//! are camelCase to match the wire format.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric user identifier. Serialized as a bare JSON number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A single user returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
}

/// Request payload for creating a new user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
}

impl NewUser {
    pub fn new(first_name: &str, last_name: &str) -> Self {
        Self {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_is_a_bare_number() {
        let json = serde_json::to_string(&UserId(7)).unwrap();
        assert_eq!(json, "7");
        assert_eq!(UserId(7).to_string(), "7");
    }

    #[test]
    fn user_uses_camel_case_fields() {
        let user: User = serde_json::from_str(r#"{"id":3,"firstName":"Ada","lastName":"Lovelace"}"#).unwrap();
        assert_eq!(user.id, UserId(3));
        assert_eq!(user.first_name, "Ada");
        let back = serde_json::to_value(&user).unwrap();
        assert_eq!(back["lastName"], "Lovelace");
    }
}
