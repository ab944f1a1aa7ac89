//! Identity-provider driver for dynamic OIDC clients.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{ProviderError, ProviderResult};

/// A client registered for one central.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicClient {
    pub client_id: String,
    pub secret: String,
}

#[async_trait]
pub trait IdpDriver: Send + Sync {
    /// Register a client whose redirect URI points at `redirect_host`.
    async fn create_client(&self, central_id: &str, redirect_host: &str) -> ProviderResult<DynamicClient>;

    /// Remove a client. Unknown ids are `NotFound`.
    async fn delete_client(&self, client_id: &str) -> ProviderResult<()>;
}

/// In-process client registry.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdp {
    clients: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryIdp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl IdpDriver for InMemoryIdp {
    async fn create_client(&self, central_id: &str, redirect_host: &str) -> ProviderResult<DynamicClient> {
        if central_id.is_empty() {
            return Err(ProviderError::Client("client name must not be empty".to_string()));
        }
        let client = DynamicClient {
            client_id: format!("rhacs-{central_id}"),
            secret: uuid::Uuid::new_v4().simple().to_string(),
        };
        self.clients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(client.client_id.clone(), redirect_host.to_string());
        info!(central = %central_id, client_id = %client.client_id, "oidc client created");
        Ok(client)
    }

    async fn delete_client(&self, client_id: &str) -> ProviderResult<()> {
        let removed = self
            .clients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(client_id);
        match removed {
            Some(_) => {
                debug!(%client_id, "oidc client deleted");
                Ok(())
            }
            None => Err(ProviderError::NotFound(format!("client {client_id}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_delete() {
        let idp = InMemoryIdp::new();
        let client = idp.create_client("c-1", "acs-c-1.example.com").await.unwrap();

        assert_eq!(client.client_id, "rhacs-c-1");
        assert_eq!(client.secret.len(), 32);
        assert_eq!(idp.client_count(), 1);

        idp.delete_client(&client.client_id).await.unwrap();
        assert!(idp.delete_client(&client.client_id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn empty_central_id_is_client_error() {
        let idp = InMemoryIdp::new();
        assert!(idp.create_client("", "host").await.unwrap_err().is_client());
    }
}
