//! Credential provider: how each poll cycle gets a usable token.
//!
//! Credentials are re-read from persisted auth state on every call. Nothing
//! is cached in memory, so a token rotated on disk by an external login
//! helper is picked up on the next cycle.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::Credentials;

/// Source of current API credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn current_credentials(&self) -> Result<Credentials>;
}

/// Auth cache file layout
#[derive(Debug, Deserialize)]
struct AuthState {
    access_token: Option<String>,
}

/// Reads credentials from a JSON auth cache file.
pub struct FileCredentialProvider {
    path: PathBuf,
}

impl FileCredentialProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialProvider for FileCredentialProvider {
    async fn current_credentials(&self) -> Result<Credentials> {
        let content = tokio::fs::read(&self.path).await.map_err(|e| {
            Error::Auth(format!(
                "failed to read auth cache {}: {}",
                self.path.display(),
                e
            ))
        })?;

        parse_auth_state(&content)
    }
}

fn parse_auth_state(content: &[u8]) -> Result<Credentials> {
    let state: AuthState = serde_json::from_slice(content)
        .map_err(|e| Error::Auth(format!("failed to parse auth cache: {}", e)))?;

    match state.access_token {
        Some(token) if !token.trim().is_empty() => Ok(Credentials::new(token)),
        _ => Err(Error::Auth("auth cache has no access_token".to_string())),
    }
}
