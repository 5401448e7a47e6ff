//! Credential providers consulted for every outgoing request.
//!
//! A missing token is not an error: the request is simply sent without an
//! `authorization` header.

use std::path::{Path, PathBuf};

use tracing::warn;

/// Supplies the bearer token, if any, for the next request.
pub trait CredentialProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// Never attaches a token.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn token(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl CredentialProvider for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Token persisted in a local file, re-read on every request so a login or
/// logout elsewhere takes effect immediately.
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialProvider for TokenFile {
    fn token(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                (!token.is_empty()).then(|| token.to_string())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable token file, sending unauthenticated");
                None
            }
        }
    }
}
