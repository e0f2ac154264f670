use std::sync::Arc;

use futures::future::BoxFuture;

use crate::dao::storage::{StorageError, StorageResult};

/// Source of the bearer credential used for backend requests and feed subscriptions.
pub trait CredentialProvider: Send + Sync {
    /// Resolve the current access token.
    fn token(&self) -> BoxFuture<'static, StorageResult<String>>;
}

/// Provider returning a token fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    token: Option<Arc<str>>,
}

impl StaticCredentials {
    /// Wrap an optional token; `None` makes every resolution fail.
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token
                .filter(|token| !token.trim().is_empty())
                .map(Arc::from),
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn token(&self) -> BoxFuture<'static, StorageResult<String>> {
        let token = self.token.clone();
        Box::pin(async move {
            token
                .map(|token| token.to_string())
                .ok_or_else(|| StorageError::Credential("no access token configured".into()))
        })
    }
}
