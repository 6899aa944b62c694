use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

/// Immutable credential snapshot handed to the transport for one upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(skip_serializing)]
    pub api_key: String,
    pub entity_id: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            entity_id: entity_id.into(),
        }
    }

    /// Both the key and the destination id are non-empty.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.entity_id.is_empty()
    }
}

/// Process-wide credential holder.
///
/// Every `set` publishes a fresh `Arc<Credentials>`; readers take a snapshot
/// and never observe a half-written pair.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    tx: Arc<watch::Sender<Arc<Credentials>>>,
}

impl CredentialStore {
    pub fn new(initial: Credentials) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, credentials: Credentials) {
        info!(
            entity_id = %credentials.entity_id,
            configured = credentials.is_configured(),
            "credentials updated"
        );
        self.tx.send_replace(Arc::new(credentials));
    }

    pub fn snapshot(&self) -> Arc<Credentials> {
        Arc::clone(&self.tx.borrow())
    }

    pub fn is_configured(&self) -> bool {
        self.tx.borrow().is_configured()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Credentials>> {
        self.tx.subscribe()
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new(Credentials::default())
    }
}
