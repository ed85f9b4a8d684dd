//! Process-wide cache of authenticated CloudStack clients.
//!
//! The registry is constructed once at startup and shared by handle. Cached
//! clients are read under a short read lock; creating a client (including its
//! credential probe) runs under a single async mutex so concurrent first
//! lookups for the same credentials probe exactly once.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::cloudstack::{CloudStackClient, CloudStackError, Credentials, HttpTransport, Transport};

/// Memoises one authenticated client per set of credentials.
#[derive(Debug)]
pub struct ClientRegistry<T = HttpTransport> {
    transport: T,
    clients: RwLock<HashMap<Credentials, Arc<CloudStackClient<T>>>>,
    creation: Mutex<()>,
}

impl ClientRegistry<HttpTransport> {
    /// Creates a registry whose clients share one HTTP transport.
    ///
    /// # Errors
    ///
    /// Returns [`CloudStackError::Transport`] when the HTTP client cannot be
    /// built.
    pub fn with_timeout(timeout: Duration) -> Result<Self, CloudStackError> {
        Ok(Self::new(HttpTransport::new(timeout)?))
    }
}

impl<T: Transport + Clone> ClientRegistry<T> {
    /// Creates an empty registry; every client gets a clone of `transport`.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            clients: RwLock::new(HashMap::new()),
            creation: Mutex::new(()),
        }
    }

    fn cached(&self, credentials: &Credentials) -> Option<Arc<CloudStackClient<T>>> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(credentials)
            .cloned()
    }

    /// Returns the client for `credentials`, creating and authenticating it
    /// on first use.
    ///
    /// # Errors
    ///
    /// Returns [`CloudStackError::InvalidCredentials`] when the credential
    /// probe fails. Failed clients are never cached.
    pub async fn get(
        &self,
        credentials: &Credentials,
    ) -> Result<Arc<CloudStackClient<T>>, CloudStackError> {
        if let Some(client) = self.cached(credentials) {
            return Ok(client);
        }

        let _creating = self.creation.lock().await;
        if let Some(client) = self.cached(credentials) {
            return Ok(client);
        }

        let client = CloudStackClient::new(credentials.clone(), self.transport.clone());
        if !client.authenticate().await {
            warn!(endpoint = %credentials.endpoint, "rejecting cloudstack credentials");
            return Err(CloudStackError::InvalidCredentials {
                endpoint: credentials.endpoint.clone(),
            });
        }

        let client = Arc::new(client);
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(credentials.clone(), Arc::clone(&client));
        info!(endpoint = %credentials.endpoint, "authenticated cloudstack client");
        Ok(client)
    }

    /// Number of cached clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no client has been cached yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
